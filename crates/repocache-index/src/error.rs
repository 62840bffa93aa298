//! Error types for content index parsing and persistence.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed index line {line_no}: {line}")]
    MalformedLine { line_no: usize, line: String },

    #[error("path not found in index: {0}")]
    PathNotFound(String),

    #[error("content blob is not valid UTF-8 at the requested range")]
    InvalidUtf8,
}
