// src/signing.rs

//! Manifest signing
//!
//! Signing is delegated to an external tool that writes a detached
//! signature next to the manifest (`sw-description.sig`). The signature then
//! goes into the container directly after the manifest.

use crate::archive::MemberOrderList;
use crate::error::{Error, IoResultExt, Result};
use crate::manifest::{MANIFEST_NAME, SIGNATURE_NAME};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Produces a detached signature for a manifest file
pub trait Signer {
    /// Sign `manifest`, returning the path of the signature file
    fn sign(&self, manifest: &Path) -> Result<PathBuf>;
}

/// Path where a detached signature for `manifest` is expected
pub fn signature_path(manifest: &Path) -> PathBuf {
    let mut name = manifest.as_os_str().to_owned();
    name.push(".sig");
    PathBuf::from(name)
}

/// Remove a signature left over from an earlier signing
pub fn remove_stale_signature(manifest: &Path) -> Result<()> {
    let sig = signature_path(manifest);
    if sig.exists() {
        debug!("Removing stale signature {}", sig.display());
        fs::remove_file(&sig).at_path(&sig)?;
    }
    Ok(())
}

/// Signer backed by a user-supplied command line, e.g. `gpg --detach-sign`
///
/// The manifest path is appended as the last argument and the command runs
/// in the manifest's directory.
#[derive(Debug, Clone)]
pub struct CommandSigner {
    program: String,
    args: Vec<String>,
}

impl CommandSigner {
    /// Split a command line on whitespace
    pub fn parse(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::Signing("signing command is empty".to_string()))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl Signer for CommandSigner {
    fn sign(&self, manifest: &Path) -> Result<PathBuf> {
        let workdir = manifest
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        info!("Signing {} with {}", manifest.display(), self.program);
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(manifest)
            .current_dir(workdir)
            .output()
            .map_err(|e| Error::Signing(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            return Err(Error::Signing(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let sig = signature_path(manifest);
        if !sig.exists() {
            return Err(Error::Signing(format!(
                "signature file missing: {}",
                sig.display()
            )));
        }
        Ok(sig)
    }
}

/// Whether the output container carries a manifest signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureState {
    Unsigned,
    Signed,
}

impl SignatureState {
    /// Make the member order reflect this state
    ///
    /// `Signed` places the signature directly after the manifest, moving it
    /// if it is elsewhere. `Unsigned` drops any signature entry.
    pub fn apply(self, order: &mut MemberOrderList) -> Result<()> {
        match self {
            Self::Signed => {
                if !order.place_after(MANIFEST_NAME, SIGNATURE_NAME) {
                    return Err(Error::Archive(format!(
                        "container has no {} member",
                        MANIFEST_NAME
                    )));
                }
            }
            Self::Unsigned => {
                if order.remove(SIGNATURE_NAME) {
                    debug!("Dropped {} from member list", SIGNATURE_NAME);
                }
            }
        }
        Ok(())
    }
}
