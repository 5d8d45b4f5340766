// src/manifest/schema.rs

//! Typed walk of the `sw-description` image schema
//!
//! Images live at `software.<board>.stable.<copy>.images`, where `images` is
//! a list of groups. Scalar settings directly under `software` (version,
//! description, ...) are skipped; every group under `software` must carry a
//! `stable` group.

use super::{Document, Group, SettingPath, Value};
use thiserror::Error;

/// Manifest shape errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    #[error("missing setting '{name}' under {parent}")]
    MissingSetting { parent: String, name: String },

    #[error("{path} is a {found}, expected a {expected}")]
    UnexpectedType {
        path: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("image {path} has no '{field}' field")]
    MissingField { path: String, field: &'static str },
}

/// Value of an image's `compressed` field
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecMarker {
    /// Legacy form, `compressed = true;`
    Flag(bool),
    /// Named codec, `compressed = "zlib";`
    Named(String),
}

impl CodecMarker {
    pub fn to_value(&self) -> Value {
        match self {
            Self::Flag(b) => Value::Bool(*b),
            Self::Named(name) => Value::Str(name.clone()),
        }
    }
}

/// One image entry of the manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    /// Location of the image group in the tree
    pub path: SettingPath,
    pub filename: String,
    /// Hex SHA-256; only signed manifests are required to carry it
    pub sha256: Option<String>,
    pub compressed: Option<CodecMarker>,
}

/// Collect every image descriptor in document order
pub fn extract_image_descriptors(doc: &Document) -> Result<Vec<ImageDescriptor>, SchemaError> {
    let root = SettingPath::root();
    let software = require_group(expect_group(doc.root(), &root)?, &root, "software")?;
    let software_path = root.child("software");

    let mut descriptors = Vec::new();
    for board in software.iter() {
        let Value::Group(board_group) = &board.value else {
            continue;
        };
        let board_path = software_path.child(&board.name);
        let stable = require_group(board_group, &board_path, "stable")?;
        let stable_path = board_path.child("stable");

        for copy in stable.iter() {
            let copy_path = stable_path.child(&copy.name);
            let copy_group = expect_group(&copy.value, &copy_path)?;
            let images_path = copy_path.child("images");
            let images = match copy_group.get("images") {
                Some(Value::List(items)) => items,
                Some(other) => {
                    return Err(SchemaError::UnexpectedType {
                        path: images_path.to_string(),
                        expected: "list",
                        found: other.type_name(),
                    })
                }
                None => {
                    return Err(SchemaError::MissingSetting {
                        parent: copy_path.to_string(),
                        name: "images".to_string(),
                    })
                }
            };

            for (index, image) in images.iter().enumerate() {
                let image_path = images_path.index(index);
                let group = expect_group(image, &image_path)?;
                descriptors.push(read_descriptor(group, image_path)?);
            }
        }
    }

    Ok(descriptors)
}

fn read_descriptor(group: &Group, path: SettingPath) -> Result<ImageDescriptor, SchemaError> {
    let filename = optional_str(group, &path, "filename")?.ok_or_else(|| {
        SchemaError::MissingField {
            path: path.to_string(),
            field: "filename",
        }
    })?;
    let sha256 = optional_str(group, &path, "sha256")?;
    let compressed = match group.get("compressed") {
        None => None,
        Some(Value::Bool(b)) => Some(CodecMarker::Flag(*b)),
        Some(Value::Str(s)) => Some(CodecMarker::Named(s.clone())),
        Some(other) => {
            return Err(SchemaError::UnexpectedType {
                path: path.child("compressed").to_string(),
                expected: "boolean or string",
                found: other.type_name(),
            })
        }
    };

    Ok(ImageDescriptor {
        path,
        filename,
        sha256,
        compressed,
    })
}

fn expect_group<'a>(value: &'a Value, path: &SettingPath) -> Result<&'a Group, SchemaError> {
    value.as_group().ok_or_else(|| SchemaError::UnexpectedType {
        path: path.to_string(),
        expected: "group",
        found: value.type_name(),
    })
}

fn require_group<'a>(
    parent: &'a Group,
    parent_path: &SettingPath,
    name: &str,
) -> Result<&'a Group, SchemaError> {
    let value = parent.get(name).ok_or_else(|| SchemaError::MissingSetting {
        parent: parent_path.to_string(),
        name: name.to_string(),
    })?;
    expect_group(value, &parent_path.child(name))
}

fn optional_str(
    group: &Group,
    path: &SettingPath,
    field: &'static str,
) -> Result<Option<String>, SchemaError> {
    match group.get(field) {
        None => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.clone())),
        Some(other) => Err(SchemaError::UnexpectedType {
            path: path.child(field).to_string(),
            expected: "string",
            found: other.type_name(),
        }),
    }
}
