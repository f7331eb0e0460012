//! Error types for the high-level API.

use basehdf5_format::error::{ErrorKind, FormatError};
use thiserror::Error;

/// Errors that can occur when using the high-level API.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Low-level format parsing or serialization error.
    #[error("HDF5 format error: {0}")]
    Format(#[from] FormatError),
    /// The object at the given path is not a dataset.
    #[error("not a dataset: {0}")]
    NotADataset(String),
    /// The object at the given path is not a group.
    #[error("not a group: {0}")]
    NotAGroup(String),
    /// Nothing is linked at the given path.
    #[error("path not found: {0}")]
    PathNotFound(String),
    /// No dataset with this path was created by the builder.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),
    /// No group with this path was created by the builder.
    #[error("unknown group: {0}")]
    UnknownGroup(String),
    /// `close` was called on a builder that has no output file.
    #[error("builder was not created with an output path")]
    NoOutputPath,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::CorruptFile,
            Error::Format(e) => e.kind(),
            Error::NotADataset(_) | Error::NotAGroup(_) | Error::NoOutputPath => ErrorKind::Format,
            Error::PathNotFound(_) | Error::UnknownDataset(_) | Error::UnknownGroup(_) => {
                ErrorKind::Bounds
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_the_format_error() {
        let e: Error = FormatError::SignatureNotFound.into();
        assert_eq!(e.kind(), ErrorKind::NotAnHdfFile);
        let e: Error = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short").into();
        assert_eq!(e.kind(), ErrorKind::CorruptFile);
        assert_eq!(Error::PathNotFound("a/b".into()).kind(), ErrorKind::Bounds);
        assert_eq!(Error::NotADataset("g".into()).kind(), ErrorKind::Format);
    }

    #[test]
    fn display() {
        assert_eq!(
            Error::NotADataset("sensors".into()).to_string(),
            "not a dataset: sensors"
        );
        let e: Error = FormatError::SignatureNotFound.into();
        assert_eq!(
            e.to_string(),
            "HDF5 format error: HDF5 signature not found at any valid offset"
        );
    }
}
