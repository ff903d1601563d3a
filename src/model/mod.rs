pub mod architecture;
pub mod common;
pub mod instance;
pub mod operation;
pub mod profile;
pub mod project;
pub mod units;

pub use architecture::*;
pub use common::*;
pub use instance::*;
pub use operation::*;
pub use profile::*;
pub use project::*;
pub use units::*;
