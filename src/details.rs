// src/details.rs

//! Compression details sidecar
//!
//! Each recompressed image leaves a `compression-details-<stem>.json`
//! artifact in the staged directory. After all images are processed the
//! artifacts are merged into one document keyed by final image name and
//! written next to the output container as
//! `<container-stem>.compression-details.json`.

use crate::error::{Error, IoResultExt, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const ARTIFACT_PREFIX: &str = "compression-details";
const DETAILS_SUFFIX: &str = ".compression-details.json";

/// Codec metadata for one recompressed image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CompressionRecord {
    #[serde(rename = "type")]
    pub codec: String,
    pub level: i32,
    pub major_version: u32,
    pub minor_version: u32,
    /// Name of the decompressed image
    pub original_file_name: String,
    #[serde(rename = "original-file-sha256hash")]
    pub original_file_sha256: String,
    #[serde(rename = "compressed-file-sha256hash")]
    pub compressed_file_sha256: String,
    pub original_file_size: u64,
    pub compressed_file_size: u64,
}

/// Merged details document, keyed by final image file name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompressionDetails {
    entries: BTreeMap<String, CompressionRecord>,
}

impl CompressionDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, record: CompressionRecord) {
        self.entries.insert(name.into(), record);
    }

    pub fn get(&self, name: &str) -> Option<&CompressionRecord> {
        self.entries.get(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Merge and delete every per-image artifact in `dir`
    ///
    /// Fails with [`Error::MissingCompressionDetails`] if any name in
    /// `expected` has no record afterwards.
    pub fn merge(dir: &Path, expected: &[String]) -> Result<Self> {
        let pattern = format!(
            "{}/{}*.json",
            glob::Pattern::escape(&dir.to_string_lossy()),
            ARTIFACT_PREFIX
        );
        let paths = glob::glob(&pattern).map_err(|e| {
            Error::io(dir, std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })?;

        let mut details = Self::new();
        for entry in paths {
            let path = entry.map_err(|e| {
                Error::io(e.path(), std::io::Error::new(e.error().kind(), e.to_string()))
            })?;
            let part = Self::load(&path)?;
            debug!("Merging {} ({} record(s))", path.display(), part.len());
            details.entries.extend(part.entries);
            fs::remove_file(&path).at_path(&path)?;
        }

        if let Some(missing) = expected.iter().find(|name| !details.entries.contains_key(*name)) {
            return Err(Error::MissingCompressionDetails(missing.clone()));
        }

        Ok(details)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).at_path(path)?;
        serde_json::from_str(&content).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).at_path(path)
    }
}

/// Path of the per-image artifact for a decompressed image stem
pub fn artifact_path(dir: &Path, stem: &str) -> PathBuf {
    dir.join(format!("{}-{}.json", ARTIFACT_PREFIX, stem))
}

/// Write a single-record artifact for later merging
pub fn write_artifact(dir: &Path, stem: &str, name: &str, record: CompressionRecord) -> Result<PathBuf> {
    let path = artifact_path(dir, stem);
    let mut details = CompressionDetails::new();
    details.insert(name, record);
    details.write(&path)?;
    Ok(path)
}

/// Sidecar path for a container: `dir/<stem>.compression-details.json`
pub fn details_path(container: &Path) -> PathBuf {
    let stem = container
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    container.with_file_name(format!("{}{}", stem, DETAILS_SUFFIX))
}

/// Sidecar written next to its final path, published by [`commit`](Self::commit)
///
/// Dropping it uncommitted removes the partial file.
#[derive(Debug)]
pub struct StagedDetails {
    partial: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedDetails {
    /// Serialize `details` to the partial file for `target`
    pub fn write(details: &CompressionDetails, target: &Path) -> Result<Self> {
        let staged = Self::new(target);
        details.write(&staged.partial)?;
        Ok(staged)
    }

    fn new(target: &Path) -> Self {
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            partial: target.with_file_name(format!(".{}.partial", file_name)),
            target: target.to_path_buf(),
            committed: false,
        }
    }

    /// Rename the partial file into place
    pub fn commit(mut self) -> Result<PathBuf> {
        fs::rename(&self.partial, &self.target).at_path(&self.target)?;
        self.committed = true;
        info!("Wrote {}", self.target.display());
        Ok(self.target.clone())
    }
}

impl Drop for StagedDetails {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.partial);
        }
    }
}

/// Stage a copy of the input container's sidecar for the output container
///
/// The copy is published when the returned [`StagedDetails`] is committed.
pub fn copy_forward(input_container: &Path, output_container: &Path) -> Result<StagedDetails> {
    let source = details_path(input_container);
    if !source.exists() {
        return Err(Error::NotFound(source));
    }

    let staged = StagedDetails::new(&details_path(output_container));
    fs::copy(&source, &staged.partial).at_path(&staged.partial)?;
    debug!("Copied {} to {}", source.display(), staged.partial.display());
    Ok(staged)
}
