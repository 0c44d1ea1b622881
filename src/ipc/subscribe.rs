// CLASSIFICATION: COMMUNITY
// Filename: subscribe.rs v0.5
// Author: Lukas Bower
// Date Modified: 2026-07-23

//! Subscribe-mode processors: full snapshots and accumulated patches.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use log::debug;
use serde_json::{json, Value};
use tokio::sync::broadcast;

use super::connection::IpcConnection;
use crate::context::Context;
use crate::model::{PathChange, PathSegment};
use spindle_api::{
    ClientRequest, FilterPath, FilterSegment, SubscriptionMode, JOB_LAYERS_VERSION,
};

/// Serve one Subscribe-mode connection until it closes or shutdown.
pub async fn process_subscription(
    mut connection: IpcConnection,
    ctx: Arc<Context>,
    mode: SubscriptionMode,
    filters: Vec<FilterPath>,
    client_version: u16,
) -> Result<()> {
    debug!(
        "connection {} subscribed ({mode:?}, {} filters)",
        connection.id,
        filters.len()
    );
    match mode {
        SubscriptionMode::Full => run_full(&mut connection, &ctx, &filters).await,
        SubscriptionMode::Patch => {
            run_patch(&mut connection, &ctx, &filters, client_version).await
        }
    }
}

async fn run_full(
    connection: &mut IpcConnection,
    ctx: &Arc<Context>,
    filters: &[FilterPath],
) -> Result<()> {
    let mut updates = ctx.model.watch_updates();
    let mut shutdown = ctx.shutdown.clone();
    let window = Duration::from_millis(ctx.settings.socket_poll_interval_ms);
    loop {
        let snapshot = filtered_snapshot(&ctx.model.get().await, filters);
        connection.send_line(&snapshot).await?;
        if !await_acknowledge(connection).await? {
            return Ok(());
        }
        loop {
            tokio::select! {
                changed = updates.changed() => {
                    changed?;
                    break;
                }
                _ = tokio::time::sleep(window) => {
                    if connection.peer_gone().await {
                        return Ok(());
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

async fn run_patch(
    connection: &mut IpcConnection,
    ctx: &Arc<Context>,
    filters: &[FilterPath],
    client_version: u16,
) -> Result<()> {
    let mut changes = ctx.model.subscribe_changes();
    let mut shutdown = ctx.shutdown.clone();
    let window = Duration::from_millis(ctx.settings.socket_poll_interval_ms);

    // Clients start from a full snapshot and patch forward from there.
    let snapshot = filtered_snapshot(&ctx.model.get().await, filters);
    connection.send_line(&snapshot).await?;
    if !await_acknowledge(connection).await? {
        return Ok(());
    }

    let mut patch = json!({});
    let mut dirty = false;
    loop {
        tokio::select! {
            change = changes.recv() => match change {
                Ok(change) => {
                    if !accepts(filters, client_version, &change) {
                        continue;
                    }
                    if crate::model::build_patch(&mut patch, &change).is_err() {
                        // An inconsistent diff invalidates the accumulator;
                        // recover through a full resync.
                        let snapshot = filtered_snapshot(&ctx.model.get().await, filters);
                        connection.send_line(&snapshot).await?;
                        if !await_acknowledge(connection).await? {
                            return Ok(());
                        }
                        patch = json!({});
                        dirty = false;
                        continue;
                    }
                    dirty = true;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(
                        "connection {} lagged {skipped} changes; forcing resync",
                        connection.id
                    );
                    let snapshot = filtered_snapshot(&ctx.model.get().await, filters);
                    connection.send_line(&snapshot).await?;
                    if !await_acknowledge(connection).await? {
                        return Ok(());
                    }
                    patch = json!({});
                    dirty = false;
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(()),
            },
            _ = tokio::time::sleep(window) => {
                if dirty {
                    connection.send_line(&patch).await?;
                    if !await_acknowledge(connection).await? {
                        return Ok(());
                    }
                    patch = json!({});
                    dirty = false;
                } else if connection.peer_gone().await {
                    return Ok(());
                }
            }
            _ = shutdown.changed() => return Ok(()),
        }
    }
}

/// Read the client's `Acknowledge`; `false` means the peer went away.
async fn await_acknowledge(connection: &mut IpcConnection) -> Result<bool> {
    match connection.read_line::<ClientRequest>().await? {
        Some(ClientRequest::Acknowledge) => Ok(true),
        Some(other) => bail!("expected Acknowledge, got {other:?}"),
        None => Ok(false),
    }
}

/// Whether a change passes the filter set and version gates.
fn accepts(filters: &[FilterPath], client_version: u16, change: &PathChange) -> bool {
    if client_version < JOB_LAYERS_VERSION && is_job_layers(&change.path) {
        return false;
    }
    if filters.is_empty() {
        return true;
    }
    let nodes = change.change_nodes();
    filters.iter().any(|filter| filter.matches(&nodes))
}

fn is_job_layers(path: &[PathSegment]) -> bool {
    matches!(path.first(), Some(PathSegment::Key(k)) if k.eq_ignore_ascii_case("job"))
        && matches!(
            path.get(1),
            Some(PathSegment::Key(k)) if k.eq_ignore_ascii_case("layers")
        )
}

/// Materialize the union of the filtered subtrees of `tree`.
pub fn filtered_snapshot(tree: &Value, filters: &[FilterPath]) -> Value {
    if filters.is_empty() {
        return tree.clone();
    }
    let mut out = json!({});
    for filter in filters {
        if let Some(extracted) = extract(tree, filter.segments()) {
            deep_merge(&mut out, extracted);
        }
    }
    out
}

fn extract(node: &Value, segments: &[FilterSegment]) -> Option<Value> {
    let Some(segment) = segments.first() else {
        return Some(node.clone());
    };
    let rest = &segments[1..];
    match segment {
        FilterSegment::Wildcard => Some(node.clone()),
        FilterSegment::Key(key) => {
            let object = node.as_object()?;
            if key == "*" {
                let mut out = serde_json::Map::new();
                for (name, child) in object {
                    if let Some(extracted) = extract(child, rest) {
                        out.insert(name.clone(), extracted);
                    }
                }
                return Some(Value::Object(out));
            }
            let (name, child) = object
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(key))?;
            extract(child, rest).map(|extracted| json!({ name.clone(): extracted }))
        }
        FilterSegment::Array { name, index } => {
            let object = node.as_object()?;
            let (actual, child) = object
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))?;
            let list = child.as_array()?;
            let mut out = vec![Value::Null; list.len()];
            let mut any = false;
            for (i, element) in list.iter().enumerate() {
                if index.map_or(false, |pinned| pinned != i) {
                    continue;
                }
                if let Some(extracted) = extract(element, rest) {
                    out[i] = extracted;
                    any = true;
                }
            }
            if any {
                Some(json!({ actual.clone(): out }))
            } else {
                None
            }
        }
    }
}

/// Merge `addition` into `target`, combining objects and aligning arrays.
fn deep_merge(target: &mut Value, addition: Value) {
    match (target, addition) {
        (Value::Object(target), Value::Object(addition)) => {
            for (key, value) in addition {
                match target.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(addition)) => {
            if target.len() < addition.len() {
                target.resize(addition.len(), Value::Null);
            }
            for (slot, value) in target.iter_mut().zip(addition) {
                if slot.is_null() {
                    *slot = value;
                } else if !value.is_null() {
                    deep_merge(slot, value);
                }
            }
        }
        (target, addition) => *target = addition,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeKind;

    fn filter(expr: &str) -> FilterPath {
        expr.parse().expect("filter parses")
    }

    #[test]
    fn snapshot_extracts_single_key_path() {
        let tree = json!({"state": {"status": "idle", "upTime": 5}, "heat": {}});
        let snapshot = filtered_snapshot(&tree, &[filter("state/status")]);
        assert_eq!(snapshot, json!({"state": {"status": "idle"}}));
    }

    #[test]
    fn snapshot_unions_filters() {
        let tree = json!({"state": {"status": "idle"}, "heat": {"heaters": [1, 2]}});
        let snapshot =
            filtered_snapshot(&tree, &[filter("state/status"), filter("heat/heaters[1]")]);
        assert_eq!(
            snapshot,
            json!({"state": {"status": "idle"}, "heat": {"heaters": [null, 2]}})
        );
    }

    #[test]
    fn snapshot_array_wildcard_keeps_alignment() {
        let tree = json!({"move": {"axes": [{"letter": "X", "max": 200}, {"letter": "Y", "max": 180}]}});
        let snapshot = filtered_snapshot(&tree, &[filter("move/axes[*]/letter")]);
        assert_eq!(
            snapshot,
            json!({"move": {"axes": [{"letter": "X"}, {"letter": "Y"}]}})
        );
    }

    #[test]
    fn job_layers_suppressed_for_old_clients() {
        let change = PathChange {
            kind: ChangeKind::GrowingCollection,
            path: vec![
                PathSegment::Key("job".into()),
                PathSegment::Key("layers".into()),
            ],
            value: json!([{ "height": 0.2 }]),
        };
        assert!(!accepts(&[], JOB_LAYERS_VERSION - 1, &change));
        assert!(accepts(&[], JOB_LAYERS_VERSION, &change));
    }

    #[test]
    fn root_change_passes_any_filter() {
        let change = PathChange {
            kind: ChangeKind::Property,
            path: Vec::new(),
            value: json!({}),
        };
        assert!(accepts(&[filter("state/status")], JOB_LAYERS_VERSION, &change));
    }
}
