use thiserror::Error;

/// Errors returned by sample stream reads
///
/// Every variant is recoverable: a stale reader should move to the oldest
/// retained index, a reader that is ahead should wait and poll again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("index {index} is no longer retained (oldest retained index is {oldest})")]
    Stale { index: u64, oldest: u64 },

    #[error("index {index} has not been written yet (next write index is {next})")]
    NotYetWritten { index: u64, next: u64 },

    #[error("stream is closed and index {index} will never be written")]
    Closed { index: u64 },

    #[error("invalid stream configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, StreamError>;
