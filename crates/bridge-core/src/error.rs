use thiserror::Error;

/// Failures talking to the change log.
///
/// None of these are fatal to the pipeline: a failed scan leaves the
/// watermark where it was and the same range is read again next cycle.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Change log query failed for table '{table}': {message}")]
    Query { table: String, message: String },

    #[error("Claim failed for table '{table}': {message}")]
    Claim { table: String, message: String },

    #[error("Write-back failed for {table}#{id}: {message}")]
    WriteBack {
        table: String,
        id: i64,
        message: String,
    },

    #[error("Invalid row in table '{table}': {message}")]
    InvalidRow { table: String, message: String },

    #[error("Invalid table registration: {0}")]
    Registry(String),

    #[error("Database pool error: {0}")]
    Pool(String),
}

impl SourceError {
    pub fn query(table: &str, err: impl std::fmt::Display) -> Self {
        SourceError::Query {
            table: table.to_string(),
            message: err.to_string(),
        }
    }

    pub fn invalid_row(table: &str, message: impl Into<String>) -> Self {
        SourceError::InvalidRow {
            table: table.to_string(),
            message: message.into(),
        }
    }
}

/// Failures reaching the broker.
///
/// A broker-level nack is not an error; it is reported through
/// [`crate::PublishConfirmation::Nack`].
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Broker error: {0}")]
    Broker(String),
}
