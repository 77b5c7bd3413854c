//! Error taxonomy for batch ingestion
//!
//! Every variant is fatal to the batch that raised it. Nothing in the core
//! retries; the ingestion loop logs the failure and moves on to the next batch.

use crate::producer::ProducerError;
use crate::storage::StoreError;

#[derive(Debug)]
pub enum IngestError {
    /// Survey tag with no extractor/corrector variant
    UnsupportedSurvey(String),
    /// Aggregate coordinate outside its valid domain
    Range { field: &'static str, value: f64 },
    /// Record missing or mistyping a canonical field
    Schema(String),
    /// Alert position that cannot be turned into an identity
    InvalidPosition { oid: String, ra: f64, dec: f64 },
    Storage(StoreError),
    Produce(ProducerError),
}

impl IngestError {
    pub fn schema(message: impl Into<String>) -> Self {
        IngestError::Schema(message.into())
    }
}

impl From<StoreError> for IngestError {
    fn from(err: StoreError) -> Self {
        IngestError::Storage(err)
    }
}

impl From<ProducerError> for IngestError {
    fn from(err: ProducerError) -> Self {
        IngestError::Produce(err)
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::Schema(err.to_string())
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::UnsupportedSurvey(tid) => write!(f, "Unsupported survey: {}", tid),
            IngestError::Range { field, value } => {
                write!(f, "Range error: {} out of domain (given {})", field, value)
            }
            IngestError::Schema(msg) => write!(f, "Schema error: {}", msg),
            IngestError::InvalidPosition { oid, ra, dec } => {
                write!(f, "Invalid position for {}: ra={} dec={}", oid, ra, dec)
            }
            IngestError::Storage(e) => write!(f, "Storage error: {}", e),
            IngestError::Produce(e) => write!(f, "Producer error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_error_message_names_field() {
        let err = IngestError::Range { field: "meanra", value: -12.5 };
        assert_eq!(err.to_string(), "Range error: meanra out of domain (given -12.5)");
    }

    #[test]
    fn test_store_error_converts() {
        let err: IngestError = StoreError::Database("locked".to_string()).into();
        assert!(matches!(err, IngestError::Storage(_)));
        assert!(err.to_string().contains("locked"));
    }
}
