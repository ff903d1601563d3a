pub mod handlers;
pub mod instance_handlers;
pub mod operation_handlers;
pub mod response;
pub mod routes;

pub use handlers::*;
pub use instance_handlers::*;
pub use operation_handlers::*;
pub use response::*;
pub use routes::*;
