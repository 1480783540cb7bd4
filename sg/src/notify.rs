//! Scheduler notifications
//!
//! The host is told to queue another run, to refresh a widget, or about
//! progress. Delivery is fire-and-forget: `SchedulerNotifier` logs sink
//! failures and never hands them back to the computation that triggered them.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Event name for "queue another run"
pub const ADD_QUEUE_EVENT: &str = "exhaustive-add-queue";

/// Event name for widget updates and progress feedback
pub const NODE_FEEDBACK_EVENT: &str = "exhaustive-node-feedback";

/// Errors from event delivery
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Event rejected: {0}")]
    Rejected(String),
}

/// Something the host should hear about
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Queue another execution of the workflow
    AddQueue { node_id: Option<String> },
    /// Show `value` in the named widget of a node
    WidgetUpdate {
        node_id: String,
        widget_name: String,
        value: Value,
    },
    /// Progress of the loop, 1-based
    Progress {
        node_id: Option<String>,
        progress: u64,
        total: u64,
    },
}

impl HostEvent {
    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddQueue { .. } => ADD_QUEUE_EVENT,
            Self::WidgetUpdate { .. } | Self::Progress { .. } => NODE_FEEDBACK_EVENT,
        }
    }

    /// Wire payload
    pub fn payload(&self) -> Value {
        match self {
            Self::AddQueue { node_id } => json!({ "node_id": node_id }),
            Self::WidgetUpdate {
                node_id,
                widget_name,
                value,
            } => json!({
                "node_id": node_id,
                "widget_name": widget_name,
                "type": value_type(value),
                "value": value,
            }),
            Self::Progress {
                node_id,
                progress,
                total,
            } => json!({ "node_id": node_id, "progress": progress, "total": total }),
        }
    }
}

fn value_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "none",
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "int",
        Value::String(_) => "str",
        Value::Array(_) => "list",
        Value::Object(_) => "dict",
    }
}

/// One event as written to an event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub data: Value,
}

impl EventLogEntry {
    pub fn new(event: &HostEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event: event.name().to_string(),
            data: event.payload(),
        }
    }
}

/// Destination for host events
pub trait EventSink {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError>;
}

impl<T: EventSink + ?Sized> EventSink for &T {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        (**self).send(event)
    }
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        (**self).send(event)
    }
}

impl<T: EventSink + ?Sized> EventSink for Arc<T> {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        (**self).send(event)
    }
}

/// Deliver to every sink; the first failure is reported after all were tried
impl EventSink for Vec<Box<dyn EventSink>> {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        let mut first_err = None;
        for sink in self {
            if let Err(e) = sink.send(event)
                && first_err.is_none()
            {
                first_err = Some(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _event: &HostEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes events to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        info!(event = event.name(), payload = %event.payload(), "host event");
        Ok(())
    }
}

/// Appends events as JSON lines
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        debug!(?path, "JsonlSink::new: called");
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlSink {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let line = serde_json::to_string(&EventLogEntry::new(event))?;
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Counts queue requests so a local driver can act as the scheduler
#[derive(Debug, Default)]
pub struct QueueSink {
    pending: AtomicU64,
}

impl QueueSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one pending queue request
    pub fn take(&self) -> bool {
        self.pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    pub fn pending(&self) -> u64 {
        self.pending.load(Ordering::SeqCst)
    }
}

impl EventSink for QueueSink {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        if matches!(event, HostEvent::AddQueue { .. }) {
            self.pending.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<HostEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of queue requests seen
    pub fn queue_requests(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, HostEvent::AddQueue { .. }))
            .count()
    }
}

impl EventSink for RecordingSink {
    fn send(&self, event: &HostEvent) -> Result<(), NotifyError> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event.clone());
        Ok(())
    }
}

/// Fire-and-forget front end over an `EventSink`
#[derive(Debug)]
pub struct SchedulerNotifier<E> {
    sink: E,
    node_name: String,
}

impl<E: EventSink> SchedulerNotifier<E> {
    pub fn new(sink: E, node_name: impl Into<String>) -> Self {
        Self {
            sink,
            node_name: node_name.into(),
        }
    }

    pub fn sink(&self) -> &E {
        &self.sink
    }

    /// Deliver `event`, logging instead of failing
    pub fn send(&self, event: HostEvent) {
        debug!(node = %self.node_name, event = event.name(), "SchedulerNotifier::send: called");
        if let Err(e) = self.sink.send(&event) {
            warn!(node = %self.node_name, event = event.name(), error = %e, "Failed to deliver host event");
        }
    }

    /// Ask for another run and show the upcoming index in `widget_name`
    pub fn request_queue(&self, node_id: Option<&str>, next_index: u64, widget_name: &str) {
        debug!(node = %self.node_name, ?node_id, next_index, "SchedulerNotifier::request_queue: called");
        self.send(HostEvent::AddQueue {
            node_id: node_id.map(str::to_string),
        });
        if let Some(id) = node_id {
            self.update_widget(id, widget_name, json!(next_index));
        }
    }

    pub fn update_widget(&self, node_id: &str, widget_name: &str, value: Value) {
        if node_id.is_empty() {
            return;
        }
        self.send(HostEvent::WidgetUpdate {
            node_id: node_id.to_string(),
            widget_name: widget_name.to_string(),
            value,
        });
    }

    pub fn report_progress(&self, node_id: Option<&str>, progress: u64, total: u64) {
        self.send(HostEvent::Progress {
            node_id: node_id.map(str::to_string),
            progress,
            total,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FailingSink;

    impl EventSink for FailingSink {
        fn send(&self, _event: &HostEvent) -> Result<(), NotifyError> {
            Err(NotifyError::Rejected("offline".to_string()))
        }
    }

    #[test]
    fn test_event_names_and_payloads() {
        let queue = HostEvent::AddQueue {
            node_id: Some("7".to_string()),
        };
        assert_eq!(queue.name(), ADD_QUEUE_EVENT);
        assert_eq!(queue.payload(), json!({"node_id": "7"}));

        let widget = HostEvent::WidgetUpdate {
            node_id: "7".to_string(),
            widget_name: "start_index".to_string(),
            value: json!(3),
        };
        assert_eq!(widget.name(), NODE_FEEDBACK_EVENT);
        assert_eq!(widget.payload()["type"], "int");
        assert_eq!(widget.payload()["value"], 3);
    }

    #[test]
    fn test_request_queue_updates_widget_when_node_known() {
        let sink = RecordingSink::new();
        let notifier = SchedulerNotifier::new(&sink, "test");

        notifier.request_queue(Some("12"), 4, "start_index");
        notifier.request_queue(None, 5, "start_index");

        let events = sink.events();
        assert_eq!(events.len(), 3);
        assert_eq!(sink.queue_requests(), 2);
        assert!(matches!(&events[1], HostEvent::WidgetUpdate { value, .. } if *value == json!(4)));
    }

    #[test]
    fn test_failures_are_swallowed() {
        let notifier = SchedulerNotifier::new(FailingSink, "test");
        notifier.request_queue(Some("1"), 1, "start_index");
        notifier.report_progress(None, 1, 2);
    }

    #[test]
    fn test_fanout_tries_every_sink() {
        let sinks: Vec<Box<dyn EventSink>> = vec![Box::new(FailingSink), Box::new(QueueSink::new())];
        let result = sinks.send(&HostEvent::AddQueue { node_id: None });
        assert!(result.is_err());
    }

    #[test]
    fn test_queue_sink_take() {
        let sink = QueueSink::new();
        assert!(!sink.take());
        sink.send(&HostEvent::AddQueue { node_id: None }).unwrap();
        sink.send(&HostEvent::Progress {
            node_id: None,
            progress: 1,
            total: 2,
        })
        .unwrap();
        assert_eq!(sink.pending(), 1);
        assert!(sink.take());
        assert!(!sink.take());
    }

    #[test]
    fn test_jsonl_sink_appends() {
        let temp = TempDir::new().unwrap();
        let sink = JsonlSink::new(temp.path().join("events").join("events.jsonl"));
        sink.send(&HostEvent::AddQueue { node_id: None }).unwrap();
        sink.send(&HostEvent::Progress {
            node_id: None,
            progress: 1,
            total: 4,
        })
        .unwrap();

        let content = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let entry: EventLogEntry = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(entry.event, NODE_FEEDBACK_EVENT);
        assert_eq!(entry.data["total"], 4);
    }
}
