//! Core types for the pos-event-bridge.
//!
//! This crate provides the foundational types shared by the change source,
//! the publisher and the processing pipeline:
//!
//! - [`ChangeRecord`] - A pending row read from the change log, with typed accessors
//! - [`Classification`] - What a row says happened to its business entity
//! - [`TableSpec`] - The registry entry for a tracked table
//! - [`OutboundMessage`] - The envelope published to the broker
//! - [`Disposition`] / [`Outcome`] - Terminal row states and their write-back form
//! - [`ChangeSource`] / [`EventPublisher`] - The seams to the database and the broker
//!
//! # Architecture
//!
//! ```text
//! bridge-core (this crate)
//!    │
//!    ├─── postgresql-change-source  (implements ChangeSource)
//!    ├─── amqp-publisher            (implements EventPublisher)
//!    └─── pipeline                  (drives both through the filters)
//! ```

pub mod classification;
pub mod error;
pub mod message;
pub mod outcome;
pub mod record;
pub mod table;
pub mod traits;

// Re-exports for convenience
pub use classification::Classification;
pub use error::{PublishError, SourceError};
pub use message::{MessageMetadata, OutboundMessage, METADATA_FIELD};
pub use outcome::{Disposition, Outcome, CLAIM_MARKER};
pub use record::{ChangeRecord, Operation, SplitDeclaration, SplitRole};
pub use table::{default_tables, validate_identifier, DeleteScope, EventType, TableSpec};
pub use traits::{ChangeSource, EventPublisher, PublishConfirmation};
