// CLASSIFICATION: COMMUNITY
// Filename: store.rs v0.4
// Author: Lukas Bower
// Date Modified: 2026-07-20

//! Read/write-locked object-model tree with update notifications.

use std::time::{SystemTime, UNIX_EPOCH};

use log::warn;
use serde_json::{json, Value};
use tokio::sync::{broadcast, watch, RwLock, RwLockReadGuard};

use super::{apply_change, ChangeKind, PathChange, PathSegment};

/// Broadcast capacity per change subscriber; laggards are forced to resync.
const CHANGE_BUFFER: usize = 256;

/// Severity of an object-model message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    /// Informational output.
    Info,
    /// Warning output.
    Warning,
    /// Error output.
    Error,
}

impl MessageSeverity {
    fn as_str(self) -> &'static str {
        match self {
            MessageSeverity::Info => "info",
            MessageSeverity::Warning => "warning",
            MessageSeverity::Error => "error",
        }
    }
}

/// The live object model: one JSON tree behind a read/write lock.
///
/// Writers commit through [`ModelStore::commit`], which bumps a monotonic
/// update counter and fans the change paths out to subscribers. Readers see
/// a consistent snapshot for the lifetime of their guard.
pub struct ModelStore {
    tree: RwLock<Value>,
    version: watch::Sender<u64>,
    changes: broadcast::Sender<PathChange>,
}

impl ModelStore {
    /// Create a store with the boot-time model skeleton.
    #[must_use]
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            tree: RwLock::new(json!({
                "state": { "status": "starting" },
                "network": { "hostname": "", "interfaces": [] },
                "volumes": [],
                "messages": [],
            })),
            version,
            changes,
        }
    }

    /// Take a read guard over the current tree.
    pub async fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.tree.read().await
    }

    /// Snapshot the current tree.
    pub async fn get(&self) -> Value {
        self.tree.read().await.clone()
    }

    /// Receiver that changes whenever a commit lands.
    #[must_use]
    pub fn watch_updates(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    /// Subscribe to individual change paths.
    ///
    /// The channel is bounded: a subscriber that lags receives a
    /// [`broadcast::error::RecvError::Lagged`] and must resync from a full
    /// snapshot.
    #[must_use]
    pub fn subscribe_changes(&self) -> broadcast::Receiver<PathChange> {
        self.changes.subscribe()
    }

    /// Apply a batch of changes and notify subscribers.
    ///
    /// Inconsistent changes are logged and dropped; the store never fails a
    /// commit wholesale.
    pub async fn commit(&self, changes: Vec<PathChange>) {
        let mut applied = Vec::with_capacity(changes.len());
        {
            let mut tree = self.tree.write().await;
            for change in changes {
                match apply_change(&mut tree, &change) {
                    Ok(()) => applied.push(change),
                    Err(err) => warn!("dropping inconsistent model update: {err}"),
                }
            }
        }
        if applied.is_empty() {
            return;
        }
        self.version.send_modify(|v| *v += 1);
        for change in applied {
            let _ = self.changes.send(change);
        }
    }

    /// Replace one property addressed by plain keys.
    pub async fn set_property(&self, path: &[&str], value: Value) {
        let change = PathChange {
            kind: ChangeKind::Property,
            path: path.iter().map(|k| PathSegment::Key((*k).into())).collect(),
            value,
        };
        self.commit(vec![change]).await;
    }

    /// Merge an object-model fragment received from the firmware.
    ///
    /// The fragment is `{"key": <name>, "result": <subtree>}`; a missing key
    /// replaces the whole tree.
    pub async fn merge_module(&self, json: &[u8]) {
        let parsed: Value = match serde_json::from_slice(json) {
            Ok(value) => value,
            Err(err) => {
                warn!("dropping unparsable object model fragment: {err}");
                return;
            }
        };
        let (path, value) = match (parsed.get("key"), parsed.get("result")) {
            (Some(Value::String(key)), Some(result)) if !key.is_empty() => {
                (vec![PathSegment::Key(key.clone())], result.clone())
            }
            (_, Some(result)) => (Vec::new(), result.clone()),
            _ => (Vec::new(), parsed),
        };
        self.commit(vec![PathChange {
            kind: ChangeKind::Property,
            path,
            value,
        }])
        .await;
    }

    /// Append a message to the model log.
    pub async fn message(&self, severity: MessageSeverity, content: &str) {
        let entry = json!({
            "time": unix_time(),
            "type": severity.as_str(),
            "content": content,
        });
        self.commit(vec![PathChange {
            kind: ChangeKind::GrowingCollection,
            path: vec![PathSegment::Key("messages".into())],
            value: json!([entry]),
        }])
        .await;
    }

    /// Drop messages older than `max_age` seconds.
    pub async fn cleanup_messages(&self, max_age: f64) {
        let now = unix_time();
        let (retained, total) = {
            let tree = self.tree.read().await;
            let Some(messages) = tree.get("messages").and_then(Value::as_array) else {
                return;
            };
            let retained: Vec<Value> = messages
                .iter()
                .filter(|m| {
                    let time = m.get("time").and_then(Value::as_f64).unwrap_or(now);
                    now - time <= max_age
                })
                .cloned()
                .collect();
            (retained, messages.len())
        };
        if retained.len() == total {
            return;
        }
        self.commit(vec![PathChange {
            kind: ChangeKind::Property,
            path: vec![PathSegment::Key("messages".into())],
            value: Value::Array(retained),
        }])
        .await;
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_bumps_version_and_broadcasts() {
        let store = ModelStore::new();
        let mut updates = store.watch_updates();
        let mut changes = store.subscribe_changes();

        store.set_property(&["state", "status"], json!("idle")).await;

        updates.changed().await.expect("version bumped");
        let change = changes.recv().await.expect("change delivered");
        assert_eq!(change.value, json!("idle"));
        assert_eq!(
            store.get().await["state"]["status"],
            json!("idle"),
            "read after commit sees the new value"
        );
    }

    #[tokio::test]
    async fn inconsistent_update_is_dropped_not_fatal() {
        let store = ModelStore::new();
        store
            .commit(vec![PathChange {
                kind: ChangeKind::Property,
                // `state/status` is a string; descending through it must fail.
                path: vec![
                    PathSegment::Key("state".into()),
                    PathSegment::Key("status".into()),
                    PathSegment::Key("deep".into()),
                ],
                value: json!(1),
            }])
            .await;
        assert_eq!(store.get().await["state"]["status"], json!("starting"));
    }

    #[tokio::test]
    async fn merge_module_places_fragment_under_key() {
        let store = ModelStore::new();
        store
            .merge_module(br#"{"key": "heat", "result": {"heaters": []}}"#)
            .await;
        assert_eq!(store.get().await["heat"], json!({"heaters": []}));
    }

    #[tokio::test]
    async fn message_cleanup_drops_only_expired() {
        let store = ModelStore::new();
        store.message(MessageSeverity::Info, "fresh").await;
        // Inject an old entry directly through a property commit.
        let mut messages = store.get().await["messages"].as_array().unwrap().clone();
        messages.push(json!({"time": 0.0, "type": "info", "content": "stale"}));
        store.set_property(&["messages"], Value::Array(messages)).await;

        store.cleanup_messages(3600.0).await;
        let remaining = store.get().await["messages"].as_array().unwrap().clone();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0]["content"], json!("fresh"));
    }
}
