//! Dataset management
//!
//! Filesystems, volumes, snapshots, clones and bookmarks, plus the
//! send/receive transfer engine built on top of the same manager.

pub mod manager;
pub mod transfer;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod fake;

pub use manager::DatasetManager;
pub use transfer::{build_receive, build_send, received_dataset, TransferMode};
pub use transport::{transport_for, LocalTransport, SshTransport, StreamTransport};
pub use types::*;
