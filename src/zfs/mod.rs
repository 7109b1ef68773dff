//! ZFS domain layer

pub mod dataset;
pub mod name;

pub use dataset::DatasetManager;
pub use name::{DatasetName, NameKind};
