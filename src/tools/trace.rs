//! Optional tool trace recording.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

/// One executed tool call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolTrace {
    pub name: String,
    pub args: Value,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    /// Empty when `error` is set.
    pub output: String,
    pub error: Option<String>,
}

/// Receives one `mark_start` / `record_end` pair per executed call.
///
/// Recording is side-effect only; it never changes control flow.
pub trait ToolTraceRecorder: Send + Sync {
    fn mark_start(&self) {}

    fn record_end(&self, trace: ToolTrace);
}

/// Keeps traces in memory.
#[derive(Debug, Default)]
pub struct InMemoryTraceRecorder {
    started: AtomicUsize,
    traces: Mutex<Vec<ToolTrace>>,
}

impl InMemoryTraceRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> Vec<ToolTrace> {
        self.traces.lock().clone()
    }

    pub fn clear(&self) {
        self.started.store(0, Ordering::Relaxed);
        self.traces.lock().clear();
    }
}

impl ToolTraceRecorder for InMemoryTraceRecorder {
    fn mark_start(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_end(&self, trace: ToolTrace) {
        self.traces.lock().push(trace);
    }
}
