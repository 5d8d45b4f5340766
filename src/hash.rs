// src/hash.rs

//! SHA-256 content digests for images and manifests
//!
//! The manifest records every image's SHA-256 as a lowercase hex string, so
//! that is the only representation produced here.

use crate::error::{IoResultExt, Result};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Read buffer size for streaming hashes
const READ_CHUNK_SIZE: usize = 64 * 1024;

/// A SHA-256 digest together with the number of bytes hashed
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digested {
    /// Lowercase hex digest
    pub hex: String,
    /// Number of bytes fed into the hasher
    pub size: u64,
}

impl fmt::Display for Digested {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} bytes)", self.hex, self.size)
    }
}

/// Incremental SHA-256 hasher that also counts bytes
#[derive(Default)]
pub struct Hasher {
    state: Sha256,
    size: u64,
}

impl Hasher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update the hasher with more data
    pub fn update(&mut self, data: &[u8]) {
        self.state.update(data);
        self.size += data.len() as u64;
    }

    /// Finalize and return the digest
    pub fn finalize(self) -> Digested {
        Digested {
            hex: format!("{:x}", self.state.finalize()),
            size: self.size,
        }
    }
}

/// Compute SHA-256 of a byte slice as lowercase hex
pub fn sha256(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Compute SHA-256 of data from a reader
pub fn hash_reader<R: Read>(reader: &mut R) -> io::Result<Digested> {
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Stream a file through SHA-256
pub fn hash_file(path: &Path) -> Result<Digested> {
    let mut file = File::open(path).at_path(path)?;
    hash_reader(&mut file).at_path(path)
}
