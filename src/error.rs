use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::encoding::EncodingKind;

/// Errors that stop a run before any file is touched.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("path does not exist or is not a folder: {}", .0.display())]
    Path(PathBuf),
    #[error("invalid filename pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },
    #[error("worker thread panicked: {0}")]
    WorkerPanicked(String),
}

/// Violations of the caller-side preconditions on a replacement request.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("a filename or pattern (e.g. *.txt) is required")]
    EmptyPattern,
    #[error("the replacement text cannot end with a trailing new line")]
    TrailingNewline,
}

/// Per-file failures. These are reported and the run moves on.
#[derive(Debug, Error)]
pub enum FileError {
    #[error("could not read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} is not valid {encoding}; rewriting it would lose data", .path.display())]
    Decode { path: PathBuf, encoding: EncodingKind },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A backup that could not be created. Only ever surfaced as a warning.
#[derive(Debug, Error)]
#[error("backup file not created: {}: {source}", .backup.display())]
pub struct BackupError {
    pub backup: PathBuf,
    #[source]
    pub source: io::Error,
}
