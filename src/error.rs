use sample_bus::BufferError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A buffer could not make progress before its deadline.
    #[error("backpressure: {0}")]
    Backpressure(String),
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("invalid unit: {0}")]
    InvalidUnit(String),
    #[error("forward failure: {0}")]
    ForwardFailure(String),
    #[error("transport bind failed: {0}")]
    Bind(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("cancelled")]
    Cancelled,
}

impl From<BufferError> for Error {
    fn from(e: BufferError) -> Self {
        match e {
            BufferError::Backpressure(_) => Error::Backpressure(e.to_string()),
            BufferError::Cancelled | BufferError::Closed => Error::Cancelled,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidConfig(e.to_string())
    }
}
