use bridge_core::SourceError;
use thiserror::Error;

/// Errors raised while running a table processor.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// The scan itself failed; the cycle is abandoned for this table.
    #[error("Cycle aborted: {0}")]
    Fetch(#[source] SourceError),

    /// Rows could not be claimed; nothing was processed.
    #[error("Cycle aborted: {0}")]
    Claim(#[source] SourceError),

    #[error("Row {table}#{id} is missing required field '{field}'")]
    MissingField {
        table: String,
        id: i64,
        field: &'static str,
    },

    #[error("Row {table}#{id} has an invalid value for '{field}': {value}")]
    InvalidField {
        table: String,
        id: i64,
        field: &'static str,
        value: String,
    },
}

impl ProcessError {
    /// Whether the whole cycle was abandoned rather than a single row.
    pub fn is_cycle_error(&self) -> bool {
        matches!(self, ProcessError::Fetch(_) | ProcessError::Claim(_))
    }
}
