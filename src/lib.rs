//! Rodent - ZFS node agent
//!
//! Exposes the ZFS dataset lifecycle and snapshot replication of one host
//! through a typed Rust API and a thin REST surface. All engine work goes
//! through the `zfs` command line tool; nothing talks to libzfs directly.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                      REST API (axum)                       │
//! ├────────────────────────────────────────────────────────────┤
//! │                     Dataset Manager                        │
//! │   lifecycle · properties · snapshots · clones · transfers  │
//! ├──────────────────────────────┬─────────────────────────────┤
//! │       Name validation        │     Stream transports       │
//! │                              │      (local / ssh)          │
//! ├──────────────────────────────┴─────────────────────────────┤
//! │                    Command Executor                        │
//! │     argv-only spawn · deadlines · cancellation · pipes     │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`api`]: REST router and server
//! - [`command`]: Supervised execution of `zfs` and `ssh`
//! - [`zfs`]: Name rules, dataset manager and transfer engine
//! - [`error`]: Coded errors shared by every layer

pub mod api;
pub mod command;
pub mod error;
pub mod zfs;

pub use api::{ApiServer, ApiServerConfig};
pub use command::{CommandExecutor, CommandOptions, CommandSpec, ExecutorConfig};
pub use error::{Domain, ErrorCode, RodentError, Result};
pub use zfs::dataset::DatasetManager;
pub use zfs::name::{DatasetName, NameKind};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
