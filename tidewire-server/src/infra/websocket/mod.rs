pub mod connection;
pub mod gateway;
pub mod messages;
pub mod registry;

pub use connection::*;
pub use gateway::*;
pub use messages::*;
pub use registry::{ConnectionRegistry, RegistryError};
