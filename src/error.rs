// src/error.rs

//! Error types for the recompression pipeline
//!
//! Every failure aborts the current run. Variants carry the path or the
//! expected/actual values needed to diagnose the problem from the message
//! alone.

use crate::compression::CompressionError;
use crate::manifest::SchemaError;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline errors
#[derive(Error, Debug)]
pub enum Error {
    /// Filesystem or workspace operation failed
    #[error("I/O error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    /// A required input (container, compressor executable) does not exist
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Container codec failure or missing member
    #[error("Archive error: {0}")]
    Archive(String),

    /// The manifest text is not valid libconfig
    #[error("Manifest parse error at line {line}, column {column}: {message}")]
    ConfigParse {
        line: usize,
        column: usize,
        message: String,
    },

    /// The manifest parsed but does not have the expected shape
    #[error("Manifest schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Image extension does not map to a known codec
    #[error("Unsupported codec for {file}: extension '{extension}'")]
    UnsupportedCodec { file: String, extension: String },

    /// Decompression or recompression of an image failed
    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// The rewritten manifest does not match the expected tree
    #[error("Manifest equivalence check failed: {0}")]
    Equivalence(String),

    /// Two images, or an image and another member, would share an output name
    #[error("Image name collision: {0}")]
    NameCollision(String),

    /// A per-image compression-details artifact was not produced
    #[error("Missing compression details for {0}")]
    MissingCompressionDetails(String),

    /// Compression-details document could not be read or written
    #[error("Compression details JSON error at {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// External signer failed or did not produce a signature file
    #[error("Signing failed: {0}")]
    Signing(String),
}

impl Error {
    /// Wrap an I/O error with the path it occurred on
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Attach a path to `io::Result` values
pub(crate) trait IoResultExt<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn at_path(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
