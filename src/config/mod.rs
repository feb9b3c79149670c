//! Command-line and file configuration.

pub mod duration;
pub mod policy;
pub mod tables;

pub use duration::parse_duration;
pub use policy::{load_policy, PolicyFile};
pub use tables::{resolve_tables, TableOverride};
