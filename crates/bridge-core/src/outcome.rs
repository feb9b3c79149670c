//! Terminal row states and the outcome columns they are written back as.

use std::fmt;

/// Response text written by a claim before the row is processed.
pub const CLAIM_MARKER: &str = "processing";

/// Terminal state of one change record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Classified as closeout noise; the reason is written back.
    SkippedNoise(String),
    SkippedDuplicate,
    Published,
    PublishFailed(String),
    ProcessingError(String),
}

impl Disposition {
    pub fn state(&self) -> &'static str {
        match self {
            Disposition::SkippedNoise(_) => "SKIPPED-NOISE",
            Disposition::SkippedDuplicate => "SKIPPED-DUPLICATE",
            Disposition::Published => "PUBLISHED",
            Disposition::PublishFailed(_) => "PUBLISH-FAILED",
            Disposition::ProcessingError(_) => "PROCESSING-ERROR",
        }
    }

    pub fn outcome(&self) -> Outcome {
        match self {
            Disposition::SkippedNoise(reason) => Outcome::success(format!("skipped: {reason}")),
            Disposition::SkippedDuplicate => Outcome::success("duplicate"),
            Disposition::Published => Outcome::success("published"),
            Disposition::PublishFailed(err) => Outcome::failure(format!("publish failed: {err}")),
            Disposition::ProcessingError(err) => Outcome::failure(format!("error: {err}")),
        }
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.state())
    }
}

/// Values for the row's processed flag and response column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub processed: bool,
    pub response: String,
}

impl Outcome {
    pub fn success(response: impl Into<String>) -> Self {
        Self {
            processed: true,
            response: response.into(),
        }
    }

    pub fn failure(response: impl Into<String>) -> Self {
        Self {
            processed: false,
            response: response.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_columns() {
        assert_eq!(Disposition::Published.outcome(), Outcome::success("published"));
        assert_eq!(
            Disposition::SkippedNoise("shift 12 closed".into()).outcome().response,
            "skipped: shift 12 closed"
        );
        let failed = Disposition::PublishFailed("nack".into()).outcome();
        assert!(!failed.processed);
        assert_eq!(failed.response, "publish failed: nack");
    }
}
