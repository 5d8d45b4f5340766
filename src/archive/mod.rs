// src/archive/mod.rs

//! Container adapter
//!
//! SWUpdate containers are CPIO archives whose member order is significant:
//! the manifest must come first and its signature directly after it. The
//! adapter lists, extracts and rebuilds containers while preserving that
//! order exactly.

pub mod cpio;
mod order;

pub use cpio::{CpioArchive, CpioEntry, CpioReader, CpioWriter};
pub use order::MemberOrderList;

use crate::error::{Error, Result};
use std::path::Path;

/// Operations the pipeline needs from a container codec
pub trait ArchiveAdapter {
    /// Member names in on-disk order
    fn list_members(&self, container: &Path) -> Result<Vec<String>>;

    /// Extract every member into `dest`, using the member name as file name
    fn extract_all(&self, container: &Path, dest: &Path) -> Result<()>;

    /// Create `output` from the files in `source_dir`, in exactly `members` order
    fn build(&self, output: &Path, source_dir: &Path, members: &[String]) -> Result<()>;
}

/// Validate that a member name is a plain file name
///
/// Container members are flat; anything that could resolve outside the
/// extraction directory is rejected.
pub fn validate_member_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\\') {
        return Err(Error::Archive(format!("Invalid member name: {:?}", name)));
    }
    Ok(())
}
