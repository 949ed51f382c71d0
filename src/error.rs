use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecordError {
    #[error("invalid time description: {0}")]
    InvalidTimeDescription(String),

    #[error("quota exceeded writing '{key}': {message}")]
    QuotaExceeded { key: String, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("runtime error: {0}")]
    Runtime(String),
}

impl RecordError {
    /// True when the backend refused the write for capacity or permission reasons.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, RecordError::QuotaExceeded { .. })
    }
}
