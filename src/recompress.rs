// src/recompress.rs

//! Per-image recompression
//!
//! Every distinct image filename is processed once. Raw images are copied
//! into the staged directory as they are; compressed images are decoded,
//! re-encoded with the target codec and hashed, and the literal
//! replacements for the manifest are recorded.

use crate::compression::{decompress_file, CodecInfo, CompressionFormat, Compressor};
use crate::details::{self, CompressionRecord};
use crate::error::{Error, IoResultExt, Result};
use crate::hash::hash_file;
use crate::manifest::{CodecMarker, ImageDescriptor, Literal, SchemaError, SubstitutionMap};
use crate::workspace::Workspace;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Replacement values for one recompressed image
#[derive(Debug, Clone, PartialEq, Eq)]
struct Replacement {
    filename: String,
    sha256: String,
}

/// Result of processing every image of a manifest
#[derive(Debug, Default)]
pub struct RecompressionOutcome {
    /// Literal replacements for the manifest text
    pub substitutions: SubstitutionMap,
    /// `(old name, new name)` for each recompressed image, in processing order
    pub renames: Vec<(String, String)>,
    /// Raw images copied unchanged
    pub passed_through: Vec<String>,
}

impl RecompressionOutcome {
    /// Final names of the recompressed images
    pub fn recompressed_names(&self) -> Vec<String> {
        self.renames.iter().map(|(_, to)| to.clone()).collect()
    }
}

/// Drives decompression and recompression of manifest images
pub struct RecompressionEngine<'a> {
    compressor: &'a dyn Compressor,
    original_dir: PathBuf,
    staged_dir: PathBuf,
    decompressed_dir: PathBuf,
}

impl<'a> RecompressionEngine<'a> {
    pub fn new(compressor: &'a dyn Compressor, workspace: &Workspace) -> Self {
        Self {
            compressor,
            original_dir: workspace.original_dir().to_path_buf(),
            staged_dir: workspace.staged_dir().to_path_buf(),
            decompressed_dir: workspace.decompressed_dir().to_path_buf(),
        }
    }

    /// Process all images, updating each descriptor to its new values
    pub fn run(&self, descriptors: &mut [ImageDescriptor]) -> Result<RecompressionOutcome> {
        let codec = self.compressor.codec();
        let mut outcome = RecompressionOutcome::default();
        let mut processed: HashMap<String, Replacement> = HashMap::new();
        let mut claimed: HashMap<String, String> = HashMap::new();

        for descriptor in descriptors.iter_mut() {
            let format = CompressionFormat::from_filename(&descriptor.filename)?;

            if format.is_passthrough() {
                self.pass_through(&descriptor.filename)?;
                if !outcome.passed_through.contains(&descriptor.filename) {
                    outcome.passed_through.push(descriptor.filename.clone());
                }
                continue;
            }

            let (old_sha256, old_marker) = required_fields(descriptor)?;

            let replacement = match processed.get(&descriptor.filename) {
                Some(existing) => {
                    debug!("{} already processed", descriptor.filename);
                    existing.clone()
                }
                None => {
                    let new_name = target_name(&descriptor.filename, &codec);
                    self.claim(&mut claimed, &new_name, &descriptor.filename)?;
                    let replacement = self.recompress_image(&descriptor.filename, format, &codec)?;
                    outcome
                        .renames
                        .push((descriptor.filename.clone(), replacement.filename.clone()));
                    processed.insert(descriptor.filename.clone(), replacement.clone());
                    replacement
                }
            };

            outcome
                .substitutions
                .insert(Literal::Str(descriptor.filename.clone()), &replacement.filename)?;
            outcome
                .substitutions
                .insert(Literal::Str(old_sha256), &replacement.sha256)?;
            outcome
                .substitutions
                .insert(marker_literal(&old_marker), codec.name)?;

            descriptor.filename = replacement.filename;
            descriptor.sha256 = Some(replacement.sha256);
            descriptor.compressed = Some(CodecMarker::Named(codec.name.to_string()));
        }

        info!(
            "Recompressed {} image(s), passed through {}",
            outcome.renames.len(),
            outcome.passed_through.len()
        );
        Ok(outcome)
    }

    /// Reserve `new_name` for `filename`, refusing names already taken by
    /// another image or by a container member that keeps its name
    fn claim(
        &self,
        claimed: &mut HashMap<String, String>,
        new_name: &str,
        filename: &str,
    ) -> Result<()> {
        if let Some(owner) = claimed.get(new_name) {
            return Err(Error::NameCollision(format!(
                "{} and {} both become {}",
                owner, filename, new_name
            )));
        }
        if new_name != filename && self.original_dir.join(new_name).exists() {
            return Err(Error::NameCollision(format!(
                "{} becomes {}, which is already a container member",
                filename, new_name
            )));
        }
        claimed.insert(new_name.to_string(), filename.to_string());
        Ok(())
    }

    fn pass_through(&self, filename: &str) -> Result<()> {
        let source = self.original_dir.join(filename);
        let target = self.staged_dir.join(filename);
        if target.exists() {
            return Ok(());
        }
        debug!("Passing through {}", filename);
        fs::copy(&source, &target).at_path(&source)?;
        Ok(())
    }

    fn recompress_image(
        &self,
        filename: &str,
        format: CompressionFormat,
        codec: &CodecInfo,
    ) -> Result<Replacement> {
        let stem = file_stem(filename);
        let source = self.original_dir.join(filename);
        let decompressed = self.decompressed_dir.join(&stem);
        let new_name = target_name(filename, codec);
        let target = self.staged_dir.join(&new_name);

        info!("Decompressing {} ({})", filename, format);
        decompress_file(&source, &decompressed, format)?;

        info!("Compressing {} with {}", stem, codec.name);
        self.compressor.compress_file(&decompressed, &target)?;

        let original = hash_file(&decompressed)?;
        let compressed = hash_file(&target)?;
        debug!("{}: original {}, compressed {}", new_name, original, compressed);

        let record = CompressionRecord {
            codec: codec.name.to_string(),
            level: codec.level,
            major_version: codec.major_version,
            minor_version: codec.minor_version,
            original_file_name: stem.clone(),
            original_file_sha256: original.hex,
            compressed_file_sha256: compressed.hex.clone(),
            original_file_size: original.size,
            compressed_file_size: compressed.size,
        };
        details::write_artifact(&self.staged_dir, &stem, &new_name, record)?;

        fs::remove_file(&decompressed).at_path(&decompressed)?;

        Ok(Replacement {
            filename: new_name,
            sha256: compressed.hex,
        })
    }
}

/// Hash and codec marker of an image that is about to be recompressed
fn required_fields(descriptor: &ImageDescriptor) -> Result<(String, CodecMarker)> {
    let sha256 = descriptor.sha256.clone().ok_or_else(|| SchemaError::MissingField {
        path: descriptor.path.to_string(),
        field: "sha256",
    })?;
    let marker = descriptor.compressed.clone().ok_or_else(|| SchemaError::MissingField {
        path: descriptor.path.to_string(),
        field: "compressed",
    })?;
    Ok((sha256, marker))
}

fn marker_literal(marker: &CodecMarker) -> Literal {
    match marker {
        CodecMarker::Flag(b) => Literal::Bool(*b),
        CodecMarker::Named(name) => Literal::Str(name.clone()),
    }
}

fn target_name(filename: &str, codec: &CodecInfo) -> String {
    format!("{}{}", file_stem(filename), codec.extension)
}

fn file_stem(filename: &str) -> String {
    Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{decompress, ZstdCompressor};
    use crate::hash::sha256;
    use crate::manifest::SettingPath;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::cell::Cell;
    use std::io::Write;
    use tempfile::TempDir;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    fn descriptor(index: usize, filename: &str, sha256: &str, marker: Option<CodecMarker>) -> ImageDescriptor {
        ImageDescriptor {
            path: SettingPath::root().child("images").index(index),
            filename: filename.to_string(),
            sha256: Some(sha256.to_string()),
            compressed: marker,
        }
    }

    /// Counts invocations, delegating to the in-process zstd encoder
    struct CountingCompressor {
        inner: ZstdCompressor,
        calls: Cell<usize>,
    }

    impl Compressor for CountingCompressor {
        fn codec(&self) -> CodecInfo {
            self.inner.codec()
        }

        fn compress_file(&self, source: &Path, target: &Path) -> Result<()> {
            self.calls.set(self.calls.get() + 1);
            self.inner.compress_file(source, target)
        }
    }

    fn setup() -> (TempDir, Workspace) {
        let temp_dir = TempDir::new().unwrap();
        let workspace = Workspace::acquire(temp_dir.path(), "working", false).unwrap();
        (temp_dir, workspace)
    }

    #[test]
    fn test_recompress_gzip_image() {
        let (_temp_dir, workspace) = setup();
        let payload = vec![7u8; 8192];
        fs::write(workspace.original_dir().join("image1.gz"), gzip(&payload)).unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "image1.gz", "H1", Some(CodecMarker::Flag(true)))];

        let outcome = engine.run(&mut descriptors).unwrap();

        let staged = workspace.staged_dir().join("image1.zst");
        let compressed = fs::read(&staged).unwrap();
        assert_eq!(decompress(&compressed, CompressionFormat::Zstd).unwrap(), payload);

        let new_hash = sha256(&compressed);
        assert_eq!(descriptors[0].filename, "image1.zst");
        assert_eq!(descriptors[0].sha256.as_deref(), Some(new_hash.as_str()));
        assert_eq!(descriptors[0].compressed, Some(CodecMarker::Named("zstd".to_string())));

        let map = &outcome.substitutions;
        assert_eq!(map.get(&Literal::Str("image1.gz".into())), Some("image1.zst"));
        assert_eq!(map.get(&Literal::Str("H1".into())), Some(new_hash.as_str()));
        assert_eq!(map.get(&Literal::Bool(true)), Some("zstd"));
        assert_eq!(outcome.recompressed_names(), vec!["image1.zst".to_string()]);

        // Intermediate removed, artifact left for the merge
        assert!(!workspace.decompressed_dir().join("image1").exists());
        let artifact = details::artifact_path(workspace.staged_dir(), "image1");
        let merged = details::CompressionDetails::load(&artifact).unwrap();
        let record = merged.get("image1.zst").unwrap();
        assert_eq!(record.original_file_name, "image1");
        assert_eq!(record.original_file_size, payload.len() as u64);
        assert_eq!(record.original_file_sha256, sha256(&payload));
        assert_eq!(record.compressed_file_size, compressed.len() as u64);
    }

    #[test]
    fn test_raw_images_pass_through() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("image2.RAW"), b"raw bytes").unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "image2.RAW", "H2", None)];

        let outcome = engine.run(&mut descriptors).unwrap();

        assert!(outcome.substitutions.is_empty());
        assert_eq!(outcome.passed_through, vec!["image2.RAW".to_string()]);
        assert_eq!(
            fs::read(workspace.staged_dir().join("image2.RAW")).unwrap(),
            b"raw bytes"
        );
        assert_eq!(descriptors[0].filename, "image2.RAW");
        assert_eq!(descriptors[0].sha256.as_deref(), Some("H2"));
    }

    #[test]
    fn test_duplicate_filenames_processed_once() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("rootfs.gz"), gzip(b"rootfs")).unwrap();

        let compressor = CountingCompressor {
            inner: ZstdCompressor::default(),
            calls: Cell::new(0),
        };
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![
            descriptor(0, "rootfs.gz", "H1", Some(CodecMarker::Flag(true))),
            descriptor(1, "rootfs.gz", "H1", Some(CodecMarker::Flag(true))),
        ];

        let outcome = engine.run(&mut descriptors).unwrap();

        assert_eq!(compressor.calls.get(), 1);
        assert_eq!(outcome.renames.len(), 1);
        assert_eq!(outcome.substitutions.len(), 3);
        assert_eq!(descriptors[0].filename, "rootfs.zst");
        assert_eq!(descriptors[1].filename, "rootfs.zst");
        assert_eq!(descriptors[0].sha256, descriptors[1].sha256);
    }

    #[test]
    fn test_zstd_source_is_reencoded() {
        let (_temp_dir, workspace) = setup();
        let original = zstd::encode_all(&b"payload"[..], 19).unwrap();
        fs::write(workspace.original_dir().join("app.zstd"), &original).unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(
            0,
            "app.zstd",
            "H3",
            Some(CodecMarker::Named("zstd".to_string())),
        )];

        engine.run(&mut descriptors).unwrap();
        assert_eq!(descriptors[0].filename, "app.zst");
        assert!(workspace.staged_dir().join("app.zst").exists());
    }

    #[test]
    fn test_unsupported_extension() {
        let (_temp_dir, workspace) = setup();
        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "image.xz", "H", Some(CodecMarker::Flag(true)))];

        let err = engine.run(&mut descriptors).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCodec { ref extension, .. } if extension == "xz"));
    }

    #[test]
    fn test_missing_marker_on_compressed_image() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("image1.gz"), gzip(b"x")).unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "image1.gz", "H1", None)];

        let err = engine.run(&mut descriptors).unwrap_err();
        assert!(matches!(
            err,
            Error::Schema(SchemaError::MissingField { field: "compressed", .. })
        ));
    }

    #[test]
    fn test_corrupt_gzip_is_fatal() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("image1.gz"), b"not gzip").unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "image1.gz", "H1", Some(CodecMarker::Flag(true)))];

        assert!(matches!(
            engine.run(&mut descriptors).unwrap_err(),
            Error::Compression(_)
        ));
    }

    #[test]
    fn test_images_sharing_a_stem_collide() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("rootfs.gz"), gzip(b"AAAA first image")).unwrap();
        fs::write(
            workspace.original_dir().join("rootfs.zst"),
            zstd::encode_all(&b"BBBB second image"[..], 3).unwrap(),
        )
        .unwrap();

        let compressor = ZstdCompressor::default();
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![
            descriptor(0, "rootfs.zst", "H2", Some(CodecMarker::Named("zstd".to_string()))),
            descriptor(1, "rootfs.gz", "H1", Some(CodecMarker::Flag(true))),
        ];

        let err = engine.run(&mut descriptors).unwrap_err();
        assert!(matches!(err, Error::NameCollision(ref msg) if msg.contains("rootfs.zst")));
    }

    #[test]
    fn test_new_name_taken_by_other_member() {
        let (_temp_dir, workspace) = setup();
        fs::write(workspace.original_dir().join("rootfs.gz"), gzip(b"rootfs")).unwrap();
        fs::write(workspace.original_dir().join("rootfs.zst"), b"unrelated member").unwrap();

        let compressor = CountingCompressor {
            inner: ZstdCompressor::default(),
            calls: Cell::new(0),
        };
        let engine = RecompressionEngine::new(&compressor, &workspace);
        let mut descriptors = vec![descriptor(0, "rootfs.gz", "H1", Some(CodecMarker::Flag(true)))];

        let err = engine.run(&mut descriptors).unwrap_err();
        assert!(matches!(err, Error::NameCollision(_)));
        assert_eq!(compressor.calls.get(), 0);
        assert!(!workspace.staged_dir().join("rootfs.zst").exists());
    }
}
