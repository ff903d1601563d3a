pub mod cluster;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use cluster::*;
pub use memory::*;
pub use postgres::*;
pub use traits::*;
