//! Backend error type (spec §4.1, §7).

use thiserror::Error;

/// Any transport failure on the queue or cache surfaces as `BackendError`;
/// callers treat it as fatal to the current iteration (spec §4.1).
#[derive(Debug, Error, Clone)]
pub enum BackendError {
    #[error("backend transport error: {0}")]
    Transport(String),

    #[error("backend operation timed out")]
    Timeout,
}

impl From<redis::RedisError> for BackendError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Transport(err.to_string())
        }
    }
}
