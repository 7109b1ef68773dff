//! API Module
//!
//! REST surface of the node agent.

pub mod rest;
pub mod server;

pub use rest::RestRouter;
pub use server::{ApiServer, ApiServerConfig};
