pub mod endpoint;
pub mod region;
pub mod site;

pub use endpoint::*;
pub use region::*;
pub use site::*;
