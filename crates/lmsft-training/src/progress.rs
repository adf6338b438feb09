use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    DatasetStarted { dataset: String },
    Fetched { dataset: String },
    DatasetProcessed { dataset: String, conversations: usize, dropped: usize },
    DatasetSkipped { dataset: String, reason: String },
    DatasetFailed { dataset: String, error: String },
    Aggregated { total: usize, duplicates: usize },
    Split { train: usize, test: usize },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::DatasetStarted { dataset } => info!(dataset = %dataset, "dataset started"),
            ProgressEvent::Fetched { dataset } => info!(dataset = %dataset, "dataset fetched"),
            ProgressEvent::DatasetProcessed { dataset, conversations, dropped } => {
                info!(dataset = %dataset, conversations, dropped, "dataset normalized");
            }
            ProgressEvent::DatasetSkipped { dataset, reason } => warn!(dataset = %dataset, reason = %reason, "dataset skipped"),
            ProgressEvent::DatasetFailed { dataset, error } => error!(dataset = %dataset, error = %error, "dataset failed"),
            ProgressEvent::Aggregated { total, duplicates } => info!(total, duplicates, "corpus aggregated"),
            ProgressEvent::Split { train, test } => info!(train, test, "corpus split"),
        }
    }
}

/// Keeps every event; used by tests and by callers that render their own report.
#[derive(Debug, Default)]
pub struct RecordingProgressSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl RecordingProgressSink {
    #[must_use]
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressSink for RecordingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
