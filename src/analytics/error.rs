//! Error kinds raised on the ingestion path

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    /// Salt store, event log or identity set could not be read or written
    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[source] anyhow::Error),

    /// A record could not be encoded or decoded
    #[error("malformed record: {0}")]
    MalformedRecord(String),

    /// No geography resolver is configured or the lookup failed
    #[error("geo lookup unavailable")]
    GeoUnavailable,
}

impl IngestError {
    /// Stable name used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::StorageUnavailable(_) => "StorageUnavailable",
            IngestError::MalformedRecord(_) => "MalformedRecord",
            IngestError::GeoUnavailable => "GeoUnavailable",
        }
    }

    pub(crate) fn storage(err: impl Into<anyhow::Error>) -> Self {
        IngestError::StorageUnavailable(err.into())
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(err: serde_json::Error) -> Self {
        IngestError::MalformedRecord(err.to_string())
    }
}

pub type IngestResult<T> = Result<T, IngestError>;
