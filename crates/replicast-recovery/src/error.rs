use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecoveryError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid upstream base URL: {0}")]
    InvalidBaseUrl(String),

    #[error("unexpected upstream status {actual} (expected {expected})")]
    UnexpectedStatus { expected: u16, actual: u16 },

    #[error("malformed multipart body: {0}")]
    Multipart(String),

    #[error("malformed Content-Range: {0}")]
    ContentRange(String),

    #[error("cache error: {0}")]
    Cache(#[from] replicast_cache::CacheError),
}

pub type RecoveryResult<T> = Result<T, RecoveryError>;
