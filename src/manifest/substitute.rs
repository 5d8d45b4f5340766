// src/manifest/substitute.rs

//! Exact-literal substitution on manifest text
//!
//! String keys match their quoted form followed by the setting terminator
//! (`"image.gz";`), boolean keys their lowercase literal (`true;`). Every
//! replacement is written as a quoted string. The edited text is then
//! re-parsed and compared against the original tree with the expected
//! values swapped in; any other change is an [`Error::Equivalence`].

use super::{Document, ImageDescriptor, Value};
use crate::error::{Error, Result};
use std::fmt;
use tracing::debug;

/// A literal token as it appears in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Literal {
    Str(String),
    Bool(bool),
}

impl Literal {
    /// Text matched in the manifest
    pub fn encode(&self) -> String {
        match self {
            Self::Str(s) => quote(s),
            Self::Bool(b) => format!("{};", b),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Bool(b) => write!(f, "{}", b),
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push_str("\";");
    out
}

/// Ordered literal replacements
///
/// Entries are applied in insertion order. A key may be inserted again only
/// with the same replacement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubstitutionMap {
    entries: Vec<(Literal, String)>,
}

impl SubstitutionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Literal, value: impl Into<String>) -> Result<()> {
        let value = value.into();
        match self.get(&key) {
            Some(existing) if existing == value => Ok(()),
            Some(existing) => Err(Error::Equivalence(format!(
                "conflicting substitutions for {}: \"{}\" and \"{}\"",
                key, existing, value
            ))),
            None => {
                self.entries.push((key, value));
                Ok(())
            }
        }
    }

    pub fn get(&self, key: &Literal) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Literal, &str)> {
        self.entries.iter().map(|(k, v)| (k, v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Replace every key literal with its quoted replacement
pub fn apply_substitutions(text: &str, map: &SubstitutionMap) -> String {
    map.iter().fold(text.to_string(), |acc, (key, value)| {
        let pattern = key.encode();
        let count = acc.matches(&pattern).count();
        debug!("Substituting {} -> \"{}\" ({} occurrence(s))", key, value, count);
        acc.replace(&pattern, &quote(value))
    })
}

/// Check that `new_text` differs from `original` only in the descriptor fields
///
/// `descriptors` carry the post-recompression values. Returns the parsed new
/// document on success.
pub fn verify_equivalence(
    original: &Document,
    descriptors: &[ImageDescriptor],
    new_text: &str,
) -> Result<Document> {
    let mut expected = original.clone();
    for descriptor in descriptors {
        let Some(Value::Group(group)) = expected.lookup_mut(&descriptor.path) else {
            return Err(Error::Equivalence(format!(
                "image {} not found in original manifest",
                descriptor.path
            )));
        };
        group.set("filename", Value::Str(descriptor.filename.clone()));
        if let Some(sha256) = &descriptor.sha256 {
            group.set("sha256", Value::Str(sha256.clone()));
        }
        if let Some(marker) = &descriptor.compressed {
            group.set("compressed", marker.to_value());
        }
    }

    let actual = Document::parse(new_text)
        .map_err(|e| Error::Equivalence(format!("rewritten manifest does not parse: {}", e)))?;

    match expected.first_difference(&actual) {
        None => Ok(actual),
        Some((path, want, got)) => Err(Error::Equivalence(format!(
            "{}: expected {}, found {}",
            path, want, got
        ))),
    }
}
