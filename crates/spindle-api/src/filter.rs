// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Parse and match subscription filter paths against change paths.
// Author: Lukas Bower

//! Subscription filter path grammar and matching.
//!
//! A filter is a `/`-separated sequence of segments: a plain key matches that
//! key exactly, `name[*]` matches any element of the named array, `name[3]`
//! pins one index, and a trailing `**` matches any remaining suffix. An empty
//! change path (a root replacement) matches every filter.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// One segment of a filter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterSegment {
    /// Match a map key exactly; `"*"` matches any one key.
    Key(String),
    /// Match an element of the named array, optionally pinning the index.
    Array {
        /// Array property name.
        name: String,
        /// Pinned element index, or `None` for any element.
        index: Option<usize>,
    },
    /// Match any remaining suffix (only meaningful as the last segment).
    Wildcard,
}

/// One node of a change path reported by the object-model store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeNode<'a> {
    /// Property key.
    Key(&'a str),
    /// Element of a named array.
    Item {
        /// Array property name.
        name: &'a str,
        /// Element index.
        index: usize,
    },
}

/// A parsed subscription filter path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPath {
    segments: Vec<FilterSegment>,
}

/// Error produced when a filter expression fails to parse.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid filter expression: {0}")]
pub struct FilterParseError(String);

impl FilterPath {
    /// The parsed segments in order.
    #[must_use]
    pub fn segments(&self) -> &[FilterSegment] {
        &self.segments
    }

    /// Whether `path` falls inside the subtree selected by this filter.
    ///
    /// Matching is prefix-based: a change deeper than the filter matches,
    /// and a change to an ancestor of the filtered subtree matches as well
    /// (the subtree contents changed with it).
    #[must_use]
    pub fn matches(&self, path: &[ChangeNode<'_>]) -> bool {
        if path.is_empty() {
            return true;
        }
        let mut nodes = path.iter();
        for segment in &self.segments {
            let Some(node) = nodes.next() else {
                // Change path exhausted above the filter depth: ancestor hit.
                return true;
            };
            match (segment, node) {
                (FilterSegment::Wildcard, _) => return true,
                (FilterSegment::Key(key), ChangeNode::Key(name)) => {
                    if key != "*" && !key.eq_ignore_ascii_case(name) {
                        return false;
                    }
                }
                (FilterSegment::Array { name, index }, ChangeNode::Item { name: n, index: i }) => {
                    if !name.eq_ignore_ascii_case(n) {
                        return false;
                    }
                    if let Some(pinned) = index {
                        if pinned != i {
                            return false;
                        }
                    }
                }
                _ => return false,
            }
        }
        true
    }
}

impl FromStr for FilterPath {
    type Err = FilterParseError;

    fn from_str(expr: &str) -> Result<Self, Self::Err> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(FilterParseError(expr.into()));
        }
        let mut segments = Vec::new();
        for part in trimmed.split('/') {
            if part.is_empty() {
                return Err(FilterParseError(expr.into()));
            }
            if segments.last() == Some(&FilterSegment::Wildcard) {
                // Nothing may follow a suffix wildcard.
                return Err(FilterParseError(expr.into()));
            }
            if part == "**" {
                segments.push(FilterSegment::Wildcard);
                continue;
            }
            if let Some(open) = part.find('[') {
                let close = part
                    .rfind(']')
                    .filter(|c| *c == part.len() - 1 && *c > open)
                    .ok_or_else(|| FilterParseError(expr.into()))?;
                let name = &part[..open];
                let index = &part[open + 1..close];
                if name.is_empty() {
                    return Err(FilterParseError(expr.into()));
                }
                let index = if index == "*" {
                    None
                } else {
                    Some(
                        index
                            .parse::<usize>()
                            .map_err(|_| FilterParseError(expr.into()))?,
                    )
                };
                segments.push(FilterSegment::Array {
                    name: name.to_string(),
                    index,
                });
            } else {
                segments.push(FilterSegment::Key(part.to_string()));
            }
        }
        Ok(Self { segments })
    }
}

impl fmt::Display for FilterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            match segment {
                FilterSegment::Key(key) => write!(f, "{key}")?,
                FilterSegment::Array { name, index: None } => write!(f, "{name}[*]")?,
                FilterSegment::Array {
                    name,
                    index: Some(i),
                } => write!(f, "{name}[{i}]")?,
                FilterSegment::Wildcard => write!(f, "**")?,
            }
        }
        Ok(())
    }
}

impl Serialize for FilterPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FilterPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let expr = String::deserialize(deserializer)?;
        expr.parse().map_err(serde::de::Error::custom)
    }
}
