//! External command layer
//!
//! - Typed argument vectors ([`CommandSpec`])
//! - Process supervision with cancellation and deadlines ([`CommandExecutor`])
//! - Stderr re-classification into semantic error codes

pub mod classify;
pub mod executor;
pub mod spec;

pub use classify::classify_stderr;
pub use executor::{
    CommandExecutor, CommandOptions, CommandOutput, Deadline, ExecutorConfig, PIPE_SIDE,
    STDERR_TAIL_BYTES,
};
pub use spec::{CommandSpec, Program, ZfsSubcommand};
