//! Error types for the engine.
//!
//! Per-item failures ([`ItemError`]) never abort a job; they are collected into
//! the job's report. Only request preconditions ([`SubjectError`], [`JobError`])
//! are returned as `Err` before any work starts.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed subject input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubjectError {
    #[error("name must be at least {min} characters long")]
    TooShort { min: usize },

    #[error("name may only contain letters and digits, found {0:?}")]
    InvalidCharacter(char),

    #[error("name may not contain consecutive spaces")]
    RepeatedSpace,
}

/// Outcome of a single GET that did not produce content.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The source redirected to its not-found placeholder.
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,
}

/// Why one item could not be stored.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error("response too small ({len} bytes, need {threshold})")]
    SizeRejected { len: usize, threshold: usize },

    #[error("not found on source")]
    NotFound,

    #[error("network error: {0}")]
    Network(String),

    #[error("cancelled")]
    Cancelled,

    #[error("cannot write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<FetchError> for ItemError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::NotFound => ItemError::NotFound,
            FetchError::Network(reason) => ItemError::Network(reason),
            FetchError::Cancelled => ItemError::Cancelled,
        }
    }
}

/// A download request refused before any work was scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JobError {
    #[error(transparent)]
    Subject(#[from] SubjectError),

    #[error("no pages detected")]
    NoPagesDetected,

    #[error("invalid page range {start}-{end}")]
    InvalidRange { start: u32, end: u32 },
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cannot prepare history location {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported image format")]
    UnsupportedFormat,

    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("image item unavailable: {0}")]
    Item(#[from] ItemError),

    #[error("decode task failed: {0}")]
    Task(String),
}
