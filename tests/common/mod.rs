// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::{self, File};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};
use swu_recompress::archive::{CpioReader, CpioWriter};
use swu_recompress::hash::sha256;
use swu_recompress::signing::signature_path;
use swu_recompress::{Result, Signer};
use tempfile::TempDir;

/// Decompressed content of `image1.gz`
pub fn image1_payload() -> Vec<u8> {
    (0..64 * 1024u32).map(|i| (i % 251) as u8).collect()
}

pub const IMAGE2_RAW: &[u8] = b"raw partition bytes\n";

pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// Manifest referencing `image1.gz` twice (two copies) and `image2.raw` once
pub fn manifest(image1_hash: &str, image2_hash: &str) -> String {
    format!(
        r#"software =
{{
	version = "1.0.0";

	board = {{
		hardware-compatibility: [ "1.0" ];
		stable = {{
			copy1 = {{
				images: (
					{{
						filename = "image1.gz";
						type = "raw";
						sha256 = "{h1}";
						compressed = true;
						device = "/dev/mmcblk0p2";
					}},
					{{
						filename = "image2.raw";
						type = "raw";
						sha256 = "{h2}";
						device = "/dev/mmcblk0p1";
					}}
				);
			}};
			copy2 = {{
				images: (
					{{
						filename = "image1.gz";
						type = "raw";
						sha256 = "{h1}";
						compressed = true;
						device = "/dev/mmcblk0p3";
					}}
				);
			}};
		}};
	}};
}};
"#,
        h1 = image1_hash,
        h2 = image2_hash
    )
}

/// Write a CPIO container with the given members in order
pub fn build_swu(path: &Path, members: &[(&str, Vec<u8>)]) {
    let mut writer = CpioWriter::new(File::create(path).unwrap());
    for (name, data) in members {
        writer.append_data(name, 0o100644, 0, data).unwrap();
    }
    writer.finish().unwrap();
}

/// Read every member of a CPIO container, in order
pub fn read_swu(path: &Path) -> Vec<(String, Vec<u8>)> {
    let mut reader = CpioReader::new(BufReader::new(File::open(path).unwrap()));
    let mut members = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        let mut data = Vec::new();
        reader.copy_content(&mut data).unwrap();
        members.push((entry.name, data));
    }
    members
}

pub fn member_names(path: &Path) -> Vec<String> {
    read_swu(path).into_iter().map(|(name, _)| name).collect()
}

pub fn member<'a>(members: &'a [(String, Vec<u8>)], name: &str) -> &'a [u8] {
    members
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, data)| data.as_slice())
        .unwrap_or_else(|| panic!("member {} not found", name))
}

/// Test container `[sw-description, image1.gz, image2.raw]`
pub struct Fixture {
    pub temp_dir: TempDir,
    pub input: PathBuf,
    pub image1_gz: Vec<u8>,
    pub manifest: String,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_members(|manifest, image1_gz| {
            vec![
                ("sw-description", manifest.as_bytes().to_vec()),
                ("image1.gz", image1_gz.to_vec()),
                ("image2.raw", IMAGE2_RAW.to_vec()),
            ]
        })
    }

    /// Build a fixture with a custom member list
    pub fn with_members<F>(members: F) -> Self
    where
        F: FnOnce(&str, &[u8]) -> Vec<(&'static str, Vec<u8>)>,
    {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("yocto.swu");
        let image1_gz = gzip(&image1_payload());
        let manifest = manifest(&sha256(&image1_gz), &sha256(IMAGE2_RAW));

        build_swu(&input, &members(&manifest, &image1_gz));

        Self {
            temp_dir,
            input,
            image1_gz,
            manifest,
        }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Scratch parent for pipeline workspaces
    pub fn scratch(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("scratch");
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}

/// In-process signer writing `signed:<sha256 of manifest>` next to the manifest
pub struct DigestSigner;

impl DigestSigner {
    pub fn signature_for(manifest: &[u8]) -> Vec<u8> {
        format!("signed:{}", sha256(manifest)).into_bytes()
    }
}

impl Signer for DigestSigner {
    fn sign(&self, manifest: &Path) -> Result<PathBuf> {
        let content = fs::read(manifest).unwrap();
        let sig = signature_path(manifest);
        fs::write(&sig, Self::signature_for(&content)).unwrap();
        Ok(sig)
    }
}

/// Signer that always fails
pub struct FailingSigner;

impl Signer for FailingSigner {
    fn sign(&self, _manifest: &Path) -> Result<PathBuf> {
        Err(swu_recompress::Error::Signing("no key available".to_string()))
    }
}
