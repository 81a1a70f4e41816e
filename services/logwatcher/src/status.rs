//! Per-watcher status shared between the source, dispatcher, and manager.

use serde::Serialize;
use std::sync::{Arc, RwLock};

/// Lifecycle state of one watcher as seen by status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WatcherStatus {
    Starting,
    Running,
    /// The source lost its transport and is reconnecting.
    Degraded,
    Stopped,
    /// The source was rejected by the remote host; not retried.
    AuthFailed,
}

#[derive(Debug)]
struct Inner {
    status: WatcherStatus,
    last_error: Option<String>,
}

/// Shared status cell.  Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct StatusCell(Arc<RwLock<Inner>>);

impl Default for StatusCell {
    fn default() -> Self {
        StatusCell(Arc::new(RwLock::new(Inner {
            status: WatcherStatus::Starting,
            last_error: None,
        })))
    }
}

impl StatusCell {
    pub fn new() -> Self {
        StatusCell::default()
    }

    pub fn set(&self, status: WatcherStatus) {
        self.0.write().expect("status lock poisoned").status = status;
    }

    /// Record an error message without changing the lifecycle state.
    pub fn record_error(&self, error: impl Into<String>) {
        self.0.write().expect("status lock poisoned").last_error = Some(error.into());
    }

    pub fn status(&self) -> WatcherStatus {
        self.0.read().expect("status lock poisoned").status
    }

    pub fn last_error(&self) -> Option<String> {
        self.0.read().expect("status lock poisoned").last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_are_visible_to_all_clones() {
        let cell = StatusCell::new();
        let clone = cell.clone();
        assert_eq!(clone.status(), WatcherStatus::Starting);
        cell.set(WatcherStatus::Running);
        assert_eq!(clone.status(), WatcherStatus::Running);
        cell.record_error("poll failed");
        assert_eq!(clone.last_error().as_deref(), Some("poll failed"));
        assert_eq!(clone.status(), WatcherStatus::Running);
    }
}
