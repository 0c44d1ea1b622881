// CLASSIFICATION: COMMUNITY
// Filename: patch.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-20

//! Application of path changes to JSON trees and patch accumulation.

use serde_json::{Map, Value};

use super::{ChangeKind, ModelError, PathChange, PathSegment};

/// Descend to the parent of the changed node, materializing intermediate
/// maps and lists. Lists are resized to the reported size: longer lists are
/// truncated, shorter ones padded with nulls.
fn descend<'a>(
    root: &'a mut Value,
    path: &[PathSegment],
) -> Result<&'a mut Value, ModelError> {
    let mut node = root;
    for segment in path {
        match segment {
            PathSegment::Key(key) => {
                if !node.is_object() {
                    if node.is_null() {
                        *node = Value::Object(Map::new());
                    } else {
                        return Err(ModelError::WrongNodeType(key.clone(), "object"));
                    }
                }
                node = node
                    .as_object_mut()
                    .expect("object ensured above")
                    .entry(key.clone())
                    .or_insert(Value::Null);
            }
            PathSegment::Item { name, index, size } => {
                if !node.is_object() {
                    if node.is_null() {
                        *node = Value::Object(Map::new());
                    } else {
                        return Err(ModelError::WrongNodeType(name.clone(), "object"));
                    }
                }
                let entry = node
                    .as_object_mut()
                    .expect("object ensured above")
                    .entry(name.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    return Err(ModelError::WrongNodeType(name.clone(), "array"));
                }
                let list = entry.as_array_mut().expect("array ensured above");
                list.resize(*size, Value::Null);
                if *index >= *size {
                    return Err(ModelError::IndexOutOfRange {
                        index: *index,
                        size: *size,
                    });
                }
                node = &mut list[*index];
            }
        }
    }
    Ok(node)
}

/// Apply one committed change to a JSON tree in place.
pub fn apply_change(root: &mut Value, change: &PathChange) -> Result<(), ModelError> {
    let node = descend(root, &change.path)?;
    match change.kind {
        ChangeKind::Property | ChangeKind::ObjectCollection => {
            *node = change.value.clone();
        }
        ChangeKind::GrowingCollection => {
            if change.value.is_null() {
                *node = Value::Array(Vec::new());
                return Ok(());
            }
            if !node.is_array() {
                if node.is_null() {
                    *node = Value::Array(Vec::new());
                } else {
                    return Err(ModelError::WrongNodeType(
                        "growing collection".into(),
                        "array",
                    ));
                }
            }
            let list = node.as_array_mut().expect("array ensured above");
            match &change.value {
                Value::Array(items) => list.extend(items.iter().cloned()),
                other => list.push(other.clone()),
            }
        }
    }
    Ok(())
}

/// Accumulate one change into a patch document under construction.
///
/// The patch mirrors only the touched branches; untouched list slots stay
/// null so the client can align elements by position.
pub fn build_patch(patch: &mut Value, change: &PathChange) -> Result<(), ModelError> {
    if change.path.is_empty() && change.kind != ChangeKind::GrowingCollection {
        *patch = change.value.clone();
        return Ok(());
    }
    apply_change(patch, change)
}
