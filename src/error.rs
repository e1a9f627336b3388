//! Crate-wide error type.
//!
//! `InvalidState`, `OutOfRange`, `IoFailure` and `CorruptData` surface to
//! callers; `NotFound` is consumed internally (an unknown keyword becomes
//! an empty search request, never an error) and is kept here only because a
//! handful of internal helpers need to return it before the caller-facing
//! wrapper swallows it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SseError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("I/O failure: {0}")]
    IoFailure(#[from] std::io::Error),

    #[error("I/O failure: {0}")]
    StoreFailure(#[from] rocksdb::Error),

    #[error("corrupt data: {0}")]
    CorruptData(String),

    #[error("not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, SseError>;
