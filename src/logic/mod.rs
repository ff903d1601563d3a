pub mod etag;
pub mod jobs;
pub mod mutation;
pub mod operations;
pub mod policy;

pub use etag::*;
pub use jobs::*;
pub use operations::*;
pub use policy::*;
