//! Checkpoint management for pos-event-bridge
//!
//! Provides storage-agnostic persistence of per-table change-log watermarks.
//!
//! # Architecture
//!
//! This crate provides a generic checkpoint system that:
//! - Defines the `Checkpoint` trait for concrete checkpoint types
//! - Provides `CheckpointFile` wrapper for storage-agnostic serialization
//! - Manages checkpoint saving/loading via `CheckpointManager`
//! - Supports multiple storage backends via `CheckpointStore` trait
//!
//! ## Storage Backends
//!
//! - `FilesystemStore` - One JSON file per checkpoint key, replaced atomically
//! - `MemoryStore` - Process-local map, used when persistence is disabled and in tests
//!
//! A checkpoint is addressed by its type (`Checkpoint::CHECKPOINT_TYPE`) and a key,
//! which for watermarks is the tracked table name.

mod file;
mod filesystem;
mod manager;
mod memory;
pub mod store;


pub use file::CheckpointFile;
pub use filesystem::FilesystemStore;
pub use manager::CheckpointManager;
pub use memory::MemoryStore;
pub use store::{CheckpointID, CheckpointStore, StoredCheckpoint};

/// Trait that concrete checkpoint types must implement.
///
/// # Example
///
/// ```rust
/// use checkpoint::Checkpoint;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// pub struct OffsetCheckpoint {
///     pub offset: i64,
/// }
///
/// impl Checkpoint for OffsetCheckpoint {
///     const CHECKPOINT_TYPE: &'static str = "offset";
///
///     fn to_cli_string(&self) -> String {
///         self.offset.to_string()
///     }
///
///     fn from_cli_string(s: &str) -> anyhow::Result<Self> {
///         Ok(Self { offset: s.parse()? })
///     }
/// }
/// ```
pub trait Checkpoint: serde::Serialize + for<'de> serde::Deserialize<'de> + Clone {
    /// Checkpoint type identifier (e.g., "watermark").
    ///
    /// Stored alongside the data and validated when loading.
    const CHECKPOINT_TYPE: &'static str;

    /// Convert to CLI-friendly string format.
    ///
    /// The returned string should be parseable by `from_cli_string()`.
    fn to_cli_string(&self) -> String;

    /// Parse from CLI string format.
    fn from_cli_string(s: &str) -> anyhow::Result<Self>
    where
        Self: Sized;
}
