use std::{fmt, time::Duration};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer stayed full (push) or empty (pop) for the whole deadline.
    #[error("backpressure: no progress within {0:?}")]
    Backpressure(Duration),
    #[error("buffer cancelled")]
    Cancelled,
    #[error("buffer closed")]
    Closed,
}

impl BufferError {
    pub fn is_backpressure(&self) -> bool {
        matches!(self, BufferError::Backpressure(_))
    }
}

/// A rejected push. The unit travels back with the error so the caller
/// still owns it and can recycle it.
pub struct PushError<T> {
    error: BufferError,
    unit: T,
}

impl<T> PushError<T> {
    pub(crate) fn new(error: BufferError, unit: T) -> Self {
        Self { error, unit }
    }

    pub fn error(&self) -> &BufferError {
        &self.error
    }

    pub fn into_inner(self) -> T {
        self.unit
    }

    pub fn into_parts(self) -> (BufferError, T) {
        (self.error, self.unit)
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "push rejected: {}", self.error)
    }
}

impl<T> std::error::Error for PushError<T> {}
