use thiserror::Error;

/// Failure talking to the bus or the directory.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or refused the operation.
    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    /// A payload did not decode into the expected envelope.
    #[error("malformed payload: {0}")]
    Malformed(#[source] serde_json::Error),
}

impl StoreError {
    pub fn unavailable(reason: impl std::fmt::Display) -> Self {
        StoreError::Unavailable(reason.to_string())
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Malformed(e)
    }
}
