// src/archive/order.rs

//! Ordered member list of a container

use crate::error::{IoResultExt, Result};
use std::fs;
use std::path::Path;

/// Member names in container order
///
/// The only mutations are in-place renames and placing or removing the
/// manifest signature entry; the relative order of every other member is
/// never changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberOrderList {
    members: Vec<String>,
}

impl MemberOrderList {
    pub fn new(members: Vec<String>) -> Self {
        Self { members }
    }

    /// Write one member name per line
    pub fn save(&self, path: &Path) -> Result<()> {
        let mut content = String::new();
        for member in &self.members {
            content.push_str(member);
            content.push('\n');
        }
        fs::write(path, content).at_path(path)
    }

    pub fn members(&self) -> &[String] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m == name)
    }

    /// Rename a member in place, keeping its position
    ///
    /// Returns false if `from` is not in the list.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        match self.position(from) {
            Some(index) => {
                self.members[index] = to.to_string();
                true
            }
            None => false,
        }
    }

    /// Place `entry` directly after `anchor`
    ///
    /// An existing `entry` elsewhere in the list is moved. Returns false (and
    /// leaves the list untouched) if `anchor` is absent.
    pub fn place_after(&mut self, anchor: &str, entry: &str) -> bool {
        if !self.contains(anchor) {
            return false;
        }
        self.remove(entry);
        // Anchor index may have shifted after the removal
        if let Some(index) = self.position(anchor) {
            self.members.insert(index + 1, entry.to_string());
        }
        true
    }

    /// Remove every occurrence of `entry`; returns whether anything was removed
    pub fn remove(&mut self, entry: &str) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m != entry);
        self.members.len() != before
    }
}
