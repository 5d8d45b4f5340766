// src/compression/mod.rs
//! Image codecs
//!
//! Source images arrive gzip- or zstd-compressed (or raw). They are decoded
//! here and re-encoded through a [`Compressor`].

mod encoder;

pub use encoder::{CodecInfo, Compressor, ExternalCompressor, ZstdCompressor, DEFAULT_ZSTD_LEVEL};

use crate::error::{Error, IoResultExt, Result};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;

/// Compression-related errors
#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("Failed to create {format} decoder: {source}")]
    DecoderCreation {
        format: &'static str,
        source: io::Error,
    },

    #[error("Failed to decompress {format} data from {path}: {source}")]
    Decompression {
        format: &'static str,
        path: String,
        source: io::Error,
    },

    #[error("Failed to compress {path} with {codec}: {message}")]
    Compression {
        codec: &'static str,
        path: String,
        message: String,
    },
}

/// Formats a source image can be stored in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionFormat {
    /// Uncompressed image (.raw), passed through untouched
    Raw,
    /// Gzip compression (.gz)
    Gzip,
    /// Zstandard compression (.zst)
    Zstd,
}

impl CompressionFormat {
    /// Classify an image by its filename extension
    ///
    /// Matching is case-insensitive. A missing or unknown extension is an
    /// [`Error::UnsupportedCodec`].
    pub fn from_filename(filename: &str) -> Result<Self> {
        let extension = Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "raw" => Ok(Self::Raw),
            "gz" => Ok(Self::Gzip),
            "zst" | "zstd" => Ok(Self::Zstd),
            _ => Err(Error::UnsupportedCodec {
                file: filename.to_string(),
                extension,
            }),
        }
    }

    /// Get a human-readable name for this format
    pub fn name(&self) -> &'static str {
        match self {
            Self::Raw => "raw",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// Whether images in this format are left as they are
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Raw)
    }
}

impl std::fmt::Display for CompressionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Create a decompressing reader for the given format
///
/// Gzip input may consist of several concatenated members; all of them are
/// decoded.
pub fn create_decoder<'a, R: Read + 'a>(
    reader: R,
    format: CompressionFormat,
) -> std::result::Result<Box<dyn Read + 'a>, CompressionError> {
    match format {
        CompressionFormat::Raw => Ok(Box::new(reader)),
        CompressionFormat::Gzip => Ok(Box::new(flate2::read::MultiGzDecoder::new(reader))),
        CompressionFormat::Zstd => {
            let decoder = zstd::Decoder::new(reader).map_err(|e| CompressionError::DecoderCreation {
                format: "zstd",
                source: e,
            })?;
            Ok(Box::new(decoder))
        }
    }
}

/// Decompress a byte slice using the specified format
pub fn decompress(data: &[u8], format: CompressionFormat) -> Result<Vec<u8>> {
    let mut decoder = create_decoder(data, format)?;
    let mut output = Vec::new();
    decoder
        .read_to_end(&mut output)
        .map_err(|e| CompressionError::Decompression {
            format: format.name(),
            path: "<memory>".to_string(),
            source: e,
        })?;
    Ok(output)
}

/// Stream-decompress `source` into `target`, returning the decoded size
pub fn decompress_file(source: &Path, target: &Path, format: CompressionFormat) -> Result<u64> {
    let input = File::open(source).at_path(source)?;
    let mut decoder = create_decoder(BufReader::new(input), format)?;

    let output = File::create(target).at_path(target)?;
    let mut writer = BufWriter::new(output);

    let written = io::copy(&mut decoder, &mut writer).map_err(|e| {
        CompressionError::Decompression {
            format: format.name(),
            path: source.display().to_string(),
            source: e,
        }
    })?;
    writer.flush().at_path(target)?;

    Ok(written)
}
