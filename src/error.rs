//! Error types for zipper

use std::io;
use std::path::PathBuf;

/// Result type for zipper operations
pub type Result<T> = std::result::Result<T, ZipperError>;

/// Error types that can occur while building an archive
///
/// File-system failures on either side (the destination being written or a
/// source file being copied in) surface as [`ZipperError::Io`] with the
/// original [`io::Error`] intact. Everything else is a format-level refusal
/// from the writer or from header derivation.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ZipperError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The writer cannot produce the requested structure
    #[error("Invalid ZIP format: {0}")]
    InvalidFormat(String),
    /// Source path is a directory or another non-regular file
    #[error("Not a regular file: {}", .0.display())]
    NotAFile(PathBuf),
    /// Source path has no final component to use as an entry name
    #[error("Path has no file name: {}", .0.display())]
    MissingFileName(PathBuf),
}

impl From<ZipperError> for io::Error {
    fn from(err: ZipperError) -> Self {
        match err {
            ZipperError::Io(e) => e,
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
