// src/manifest/mod.rs

//! `sw-description` manifest model
//!
//! The manifest is a libconfig document. It is parsed into a [`Document`]
//! tree for reading and for equivalence checks, but it is never re-emitted
//! from the tree: edits are exact literal substitutions on the original text
//! (see [`substitute`]), so formatting and comments survive byte-for-byte.

mod parser;
pub mod schema;
pub mod substitute;

pub use schema::{extract_image_descriptors, CodecMarker, ImageDescriptor, SchemaError};
pub use substitute::{apply_substitutions, verify_equivalence, Literal, SubstitutionMap};

use crate::error::Result;
use std::fmt;

/// Name of the manifest member inside a container
pub const MANIFEST_NAME: &str = "sw-description";
/// Name of the detached manifest signature member
pub const SIGNATURE_NAME: &str = "sw-description.sig";

/// A libconfig value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Group(Group),
    /// `[ ... ]`, scalars only
    Array(Vec<Value>),
    /// `( ... )`, any values
    List(Vec<Value>),
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Value {
    /// Short type name used in error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Group(_) => "group",
            Self::Array(_) => "array",
            Self::List(_) => "list",
            Self::Str(_) => "string",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
        }
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Self::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of a list or array
    pub fn elements(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) | Self::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Resolve a path relative to this value
    pub fn lookup(&self, path: &[PathSegment]) -> Option<&Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = match (self, first) {
            (Self::Group(group), PathSegment::Name(name)) => group.get(name)?,
            (Self::List(items) | Self::Array(items), PathSegment::Index(i)) => items.get(*i)?,
            _ => return None,
        };
        child.lookup(rest)
    }

    /// Resolve a path relative to this value, mutably
    pub fn lookup_mut(&mut self, path: &[PathSegment]) -> Option<&mut Value> {
        let Some((first, rest)) = path.split_first() else {
            return Some(self);
        };
        let child = match (self, first) {
            (Self::Group(group), PathSegment::Name(name)) => group.get_mut(name)?,
            (Self::List(items) | Self::Array(items), PathSegment::Index(i)) => items.get_mut(*i)?,
            _ => return None,
        };
        child.lookup_mut(rest)
    }
}

/// A named setting inside a group
#[derive(Debug, Clone, PartialEq)]
pub struct Setting {
    pub name: String,
    pub value: Value,
}

/// An ordered collection of uniquely named settings
///
/// Equality is order-sensitive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Group {
    settings: Vec<Setting>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.settings.iter().find(|s| s.name == name).map(|s| &s.value)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.settings
            .iter_mut()
            .find(|s| s.name == name)
            .map(|s| &mut s.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Replace an existing setting's value or append a new setting
    pub fn set(&mut self, name: &str, value: Value) {
        match self.get_mut(name) {
            Some(existing) => *existing = value,
            None => self.settings.push(Setting {
                name: name.to_string(),
                value,
            }),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Setting> {
        self.settings.iter()
    }

    pub fn len(&self) -> usize {
        self.settings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.settings.is_empty()
    }
}

/// One step of a path through the tree
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Name(String),
    Index(usize),
}

/// Location of a setting, rendered the way libconfig does
/// (`software.board.stable.copy1.images.[0]`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SettingPath(Vec<PathSegment>);

impl SettingPath {
    pub fn root() -> Self {
        Self::default()
    }

    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Name(name.to_string()));
        Self(segments)
    }

    pub fn index(&self, index: usize) -> Self {
        let mut segments = self.0.clone();
        segments.push(PathSegment::Index(index));
        Self(segments)
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }
}

impl fmt::Display for SettingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return write!(f, "<root>");
        }
        for (i, segment) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            match segment {
                PathSegment::Name(name) => write!(f, "{}", name)?,
                PathSegment::Index(index) => write!(f, "[{}]", index)?,
            }
        }
        Ok(())
    }
}

/// A parsed manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    root: Value,
}

impl Document {
    /// Parse libconfig text
    pub fn parse(text: &str) -> Result<Self> {
        let root = parser::parse(text)?;
        Ok(Self {
            root: Value::Group(root),
        })
    }

    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn lookup(&self, path: &SettingPath) -> Option<&Value> {
        self.root.lookup(path.segments())
    }

    pub fn lookup_mut(&mut self, path: &SettingPath) -> Option<&mut Value> {
        self.root.lookup_mut(path.segments())
    }

    /// Path of the first value that differs between two documents
    pub fn first_difference(&self, other: &Document) -> Option<(SettingPath, String, String)> {
        first_difference(&self.root, &other.root, SettingPath::root())
    }
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None => "<absent>".to_string(),
        Some(Value::Str(s)) => format!("{:?}", s),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Int(i)) => i.to_string(),
        Some(Value::Float(x)) => x.to_string(),
        Some(other) => other.type_name().to_string(),
    }
}

fn first_difference(a: &Value, b: &Value, path: SettingPath) -> Option<(SettingPath, String, String)> {
    match (a, b) {
        (Value::Group(ga), Value::Group(gb)) => {
            let names_a: Vec<&str> = ga.iter().map(|s| s.name.as_str()).collect();
            let names_b: Vec<&str> = gb.iter().map(|s| s.name.as_str()).collect();
            if names_a != names_b {
                return Some((path, names_a.join(","), names_b.join(",")));
            }
            ga.iter().zip(gb.iter()).find_map(|(sa, sb)| {
                first_difference(&sa.value, &sb.value, path.child(&sa.name))
            })
        }
        (Value::List(la), Value::List(lb)) | (Value::Array(la), Value::Array(lb)) => {
            if la.len() != lb.len() {
                return Some((
                    path,
                    format!("{} elements", la.len()),
                    format!("{} elements", lb.len()),
                ));
            }
            la.iter()
                .zip(lb.iter())
                .enumerate()
                .find_map(|(i, (va, vb))| first_difference(va, vb, path.index(i)))
        }
        _ if a == b => None,
        _ => Some((path, describe(Some(a)), describe(Some(b)))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_path() {
        let doc = Document::parse(
            r#"software = { board = { stable = { copy1 = { images: ( { filename = "a.gz"; } ); }; }; }; };"#,
        )
        .unwrap();

        let path = SettingPath::root()
            .child("software")
            .child("board")
            .child("stable")
            .child("copy1")
            .child("images")
            .index(0)
            .child("filename");
        assert_eq!(doc.lookup(&path), Some(&Value::Str("a.gz".to_string())));
        assert_eq!(path.to_string(), "software.board.stable.copy1.images.[0].filename");
    }

    #[test]
    fn test_lookup_mut_and_set() {
        let mut doc = Document::parse(r#"a = { b = 1; };"#).unwrap();
        let path = SettingPath::root().child("a");
        if let Some(Value::Group(group)) = doc.lookup_mut(&path) {
            group.set("b", Value::Str("two".to_string()));
            group.set("c", Value::Bool(true));
        }
        assert_eq!(
            doc.lookup(&path.child("b")),
            Some(&Value::Str("two".to_string()))
        );
        assert_eq!(doc.lookup(&path.child("c")), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_group_equality_is_order_sensitive() {
        let a = Document::parse("x = 1; y = 2;").unwrap();
        let b = Document::parse("y = 2; x = 1;").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_first_difference() {
        let a = Document::parse(r#"g = { list = ( { h = "aa"; } ); };"#).unwrap();
        let b = Document::parse(r#"g = { list = ( { h = "bb"; } ); };"#).unwrap();

        let (path, expected, actual) = a.first_difference(&b).unwrap();
        assert_eq!(path.to_string(), "g.list.[0].h");
        assert_eq!(expected, "\"aa\"");
        assert_eq!(actual, "\"bb\"");
        assert!(a.first_difference(&a.clone()).is_none());
    }
}
