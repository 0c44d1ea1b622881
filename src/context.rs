// CLASSIFICATION: COMMUNITY
// Filename: context.rs v0.3
// Author: Lukas Bower
// Date Modified: 2026-07-21

//! Process-wide shared state passed to every component.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

use crate::model::ModelStore;
use crate::scheduler::Scheduler;
use crate::settings::Settings;

/// Shared state of a daemon instance. What would otherwise be global
/// statics lives here and is passed explicitly.
pub struct Context {
    /// Loaded configuration.
    pub settings: Settings,
    /// Live object model.
    pub model: Arc<ModelStore>,
    /// Channel scheduler.
    pub scheduler: Arc<Scheduler>,
    /// Process-wide shutdown signal; `true` means "unwind".
    pub shutdown: watch::Receiver<bool>,
    next_connection_id: AtomicU64,
}

impl Context {
    /// Wire up a context from its parts.
    pub fn new(settings: Settings, shutdown: watch::Receiver<bool>) -> Arc<Self> {
        let model = Arc::new(ModelStore::new());
        let scheduler = Scheduler::new(Arc::clone(&model), settings.macro_dir.clone());
        Arc::new(Self {
            settings,
            model,
            scheduler,
            shutdown,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Allocate a unique IPC connection id.
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Whether shutdown was requested.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}
