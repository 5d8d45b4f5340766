// src/compression/encoder.rs

//! Target codec implementations

use super::CompressionError;
use crate::error::{Error, IoResultExt, Result};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Compression level used for recompressed images
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// Version the external zstd helper is built against
const EXTERNAL_ZSTD_MAJOR_VERSION: u32 = 1;
const EXTERNAL_ZSTD_MINOR_VERSION: u32 = 5;

/// Identity of the target codec, recorded alongside every recompressed image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecInfo {
    /// Codec name, also used as the manifest codec marker (e.g. "zstd")
    pub name: &'static str,
    /// Extension given to recompressed files, including the dot
    pub extension: &'static str,
    pub level: i32,
    pub major_version: u32,
    pub minor_version: u32,
}

/// A one-way file-to-file compressor
pub trait Compressor {
    /// Codec produced by this compressor
    fn codec(&self) -> CodecInfo;

    /// Compress `source` into `target`
    fn compress_file(&self, source: &Path, target: &Path) -> Result<()>;
}

/// In-process zstd compressor
#[derive(Debug, Clone)]
pub struct ZstdCompressor {
    level: i32,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(DEFAULT_ZSTD_LEVEL)
    }
}

impl Compressor for ZstdCompressor {
    fn codec(&self) -> CodecInfo {
        // e.g. 10505 for 1.5.5
        let version = zstd::zstd_safe::version_number();
        CodecInfo {
            name: "zstd",
            extension: ".zst",
            level: self.level,
            major_version: version / 10_000,
            minor_version: (version / 100) % 100,
        }
    }

    fn compress_file(&self, source: &Path, target: &Path) -> Result<()> {
        let input = File::open(source).at_path(source)?;
        let output = File::create(target).at_path(target)?;
        let mut writer = BufWriter::new(output);

        zstd::stream::copy_encode(BufReader::new(input), &mut writer, self.level).map_err(|e| {
            CompressionError::Compression {
                codec: "zstd",
                path: source.display().to_string(),
                message: e.to_string(),
            }
        })?;
        writer.flush().at_path(target)?;

        Ok(())
    }
}

/// Compressor that shells out to an external `<tool> <source> <target>` binary
#[derive(Debug, Clone)]
pub struct ExternalCompressor {
    tool: PathBuf,
}

impl ExternalCompressor {
    /// Wrap an external compressor executable, which must exist
    pub fn new(tool: impl Into<PathBuf>) -> Result<Self> {
        let tool = tool.into();
        if !tool.exists() {
            return Err(Error::NotFound(tool));
        }
        Ok(Self { tool })
    }
}

impl Compressor for ExternalCompressor {
    fn codec(&self) -> CodecInfo {
        CodecInfo {
            name: "zstd",
            extension: ".zst",
            level: DEFAULT_ZSTD_LEVEL,
            major_version: EXTERNAL_ZSTD_MAJOR_VERSION,
            minor_version: EXTERNAL_ZSTD_MINOR_VERSION,
        }
    }

    fn compress_file(&self, source: &Path, target: &Path) -> Result<()> {
        debug!("Running {} {} {}", self.tool.display(), source.display(), target.display());

        let output = Command::new(&self.tool)
            .arg(source)
            .arg(target)
            .output()
            .map_err(|e| CompressionError::Compression {
                codec: "zstd",
                path: source.display().to_string(),
                message: format!("failed to run {}: {}", self.tool.display(), e),
            })?;

        if !output.status.success() {
            return Err(CompressionError::Compression {
                codec: "zstd",
                path: source.display().to_string(),
                message: format!(
                    "{} exited with {}: {}",
                    self.tool.display(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            }
            .into());
        }

        if !target.exists() {
            return Err(CompressionError::Compression {
                codec: "zstd",
                path: source.display().to_string(),
                message: format!("{} did not produce {}", self.tool.display(), target.display()),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_zstd_compressor_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("rootfs.ext4");
        let target = temp_dir.path().join("rootfs.ext4.zst");
        let payload = b"firmware image contents ".repeat(1000);
        std::fs::write(&source, &payload).unwrap();

        let compressor = ZstdCompressor::default();
        compressor.compress_file(&source, &target).unwrap();

        let compressed = std::fs::read(&target).unwrap();
        assert_eq!(&compressed[..4], &[0x28, 0xb5, 0x2f, 0xfd]);
        assert_eq!(zstd::decode_all(&compressed[..]).unwrap(), payload);
    }

    #[test]
    fn test_zstd_codec_info() {
        let codec = ZstdCompressor::new(19).codec();
        assert_eq!(codec.name, "zstd");
        assert_eq!(codec.extension, ".zst");
        assert_eq!(codec.level, 19);
        assert_eq!(codec.major_version, 1);
    }

    #[test]
    fn test_external_compressor_must_exist() {
        let err = ExternalCompressor::new("/nonexistent/zstd_compress_file").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_external_compressor_runs_tool() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let tool = temp_dir.path().join("fake-compress");
        std::fs::write(&tool, "#!/bin/sh\ncp \"$1\" \"$2\"\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = temp_dir.path().join("image");
        let target = temp_dir.path().join("image.zst");
        std::fs::write(&source, b"payload").unwrap();

        let compressor = ExternalCompressor::new(&tool).unwrap();
        compressor.compress_file(&source, &target).unwrap();
        assert_eq!(std::fs::read(&target).unwrap(), b"payload");
        assert_eq!(compressor.codec().minor_version, 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_compressor_failure() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let tool = temp_dir.path().join("broken-compress");
        std::fs::write(&tool, "#!/bin/sh\necho broken >&2\nexit 3\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = temp_dir.path().join("image");
        std::fs::write(&source, b"payload").unwrap();

        let compressor = ExternalCompressor::new(&tool).unwrap();
        let err = compressor
            .compress_file(&source, &temp_dir.path().join("image.zst"))
            .unwrap_err();
        assert!(err.to_string().contains("broken"));
    }
}
