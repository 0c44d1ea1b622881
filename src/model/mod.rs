// CLASSIFICATION: COMMUNITY
// Filename: mod.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-20

//! Live object-model store with change-path notifications.

mod patch;
mod store;

pub use patch::{apply_change, build_patch};
pub use store::{MessageSeverity, ModelStore};

use serde_json::Value;
use spindle_api::ChangeNode;

/// One node of a change path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Property key.
    Key(String),
    /// Element of a named array, with the array's current size.
    Item {
        /// Array property name.
        name: String,
        /// Element index.
        index: usize,
        /// Array length after the change.
        size: usize,
    },
}

impl PathSegment {
    /// Borrowed view used for filter matching.
    #[must_use]
    pub fn as_change_node(&self) -> ChangeNode<'_> {
        match self {
            PathSegment::Key(key) => ChangeNode::Key(key),
            PathSegment::Item { name, index, .. } => ChangeNode::Item {
                name,
                index: *index,
            },
        }
    }
}

/// How the addressed node changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// A scalar or object property was replaced.
    Property,
    /// An object collection was resized and one element replaced.
    ObjectCollection,
    /// Items were appended to a growing collection, or it was cleared.
    GrowingCollection,
}

/// One committed mutation of the object model.
#[derive(Debug, Clone, PartialEq)]
pub struct PathChange {
    /// What kind of mutation happened.
    pub kind: ChangeKind,
    /// Path from the root to the changed node; empty means root replacement.
    pub path: Vec<PathSegment>,
    /// New value (appended items for growing collections).
    pub value: Value,
}

impl PathChange {
    /// Borrowed path view for filter matching.
    #[must_use]
    pub fn change_nodes(&self) -> Vec<ChangeNode<'_>> {
        self.path.iter().map(PathSegment::as_change_node).collect()
    }
}

/// Errors raised while applying a change to a JSON tree.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// An intermediate node had an incompatible type.
    #[error("node {0:?} is not a {1}")]
    WrongNodeType(String, &'static str),
    /// An item index fell outside the reported collection size.
    #[error("index {index} outside collection of size {size}")]
    IndexOutOfRange {
        /// Offending index.
        index: usize,
        /// Reported collection size.
        size: usize,
    },
}
