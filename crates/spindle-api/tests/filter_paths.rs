// Copyright © 2026 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate filter path parsing, serialization, and matching rules.
// Author: Lukas Bower
#![forbid(unsafe_code)]

use spindle_api::{ChangeNode, FilterPath, FilterSegment};

fn parse(expr: &str) -> FilterPath {
    expr.parse().expect("filter parses")
}

#[test]
fn parse_and_display_roundtrip() {
    for expr in ["state/status", "move/axes[*]/**", "job/layers[3]", "**"] {
        assert_eq!(parse(expr).to_string(), expr);
    }
}

#[test]
fn rejects_malformed_expressions() {
    for expr in ["", "state//status", "axes[", "axes[x]", "[*]", "**/state"] {
        assert!(expr.parse::<FilterPath>().is_err(), "{expr:?} should fail");
    }
}

#[test]
fn segment_shapes() {
    let path = parse("move/axes[2]/**");
    assert_eq!(
        path.segments(),
        &[
            FilterSegment::Key("move".into()),
            FilterSegment::Array {
                name: "axes".into(),
                index: Some(2)
            },
            FilterSegment::Wildcard,
        ]
    );
}

#[test]
fn exact_key_match() {
    let filter = parse("state/status");
    assert!(filter.matches(&[ChangeNode::Key("state"), ChangeNode::Key("status")]));
    assert!(!filter.matches(&[ChangeNode::Key("state"), ChangeNode::Key("machineMode")]));
}

#[test]
fn deeper_changes_match_prefix() {
    let filter = parse("state");
    assert!(filter.matches(&[ChangeNode::Key("state"), ChangeNode::Key("status")]));
}

#[test]
fn ancestor_change_matches() {
    // A write replacing all of `state` also changes `state/status`.
    let filter = parse("state/status");
    assert!(filter.matches(&[ChangeNode::Key("state")]));
}

#[test]
fn root_change_matches_everything() {
    let filter = parse("heat/heaters[0]/current");
    assert!(filter.matches(&[]));
}

#[test]
fn array_index_ignored_unless_pinned() {
    let any = parse("move/axes[*]/position");
    let pinned = parse("move/axes[1]/position");
    let change = [
        ChangeNode::Key("move"),
        ChangeNode::Item {
            name: "axes",
            index: 0,
        },
        ChangeNode::Key("position"),
    ];
    assert!(any.matches(&change));
    assert!(!pinned.matches(&change));
}

#[test]
fn wildcard_suffix_matches_any_tail() {
    let filter = parse("sensors/**");
    assert!(filter.matches(&[
        ChangeNode::Key("sensors"),
        ChangeNode::Item {
            name: "analog",
            index: 4
        },
        ChangeNode::Key("lastReading"),
    ]));
    assert!(!filter.matches(&[ChangeNode::Key("state")]));
}

#[test]
fn matching_is_case_insensitive() {
    let filter = parse("State/Status");
    assert!(filter.matches(&[ChangeNode::Key("state"), ChangeNode::Key("status")]));
}

#[test]
fn serde_as_string() {
    let json = serde_json::to_string(&parse("move/axes[*]")).expect("serialize");
    assert_eq!(json, r#""move/axes[*]""#);
    let back: FilterPath = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(back, parse("move/axes[*]"));
}
