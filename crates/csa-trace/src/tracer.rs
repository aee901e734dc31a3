use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::event_bus::{Event, EventBus};
use crate::jsonl_appender::JsonlAppender;

#[derive(Serialize)]
struct TraceRecord<'a> {
    #[serde(rename = "type")]
    event_type: &'a str,
    payload: &'a serde_json::Value,
    timestamp: &'a str,
}

/// An [`EventBus`] subscriber that appends every event to `traces.jsonl`
/// (spec.md §4.10). Opt-in: the caller decides whether to attach it.
pub struct Tracer {
    appender: Arc<Mutex<JsonlAppender>>,
    path: PathBuf,
}

impl Tracer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            appender: Arc::new(Mutex::new(JsonlAppender::new(&path))),
            path,
        }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Attaches this tracer to `bus`, subscribing to every event type.
    pub fn attach(&self, bus: &EventBus) {
        let appender = self.appender.clone();
        bus.subscribe_all(Arc::new(move |event: &Event| {
            let record = TraceRecord {
                event_type: event_type_label(event),
                payload: &event.payload,
                timestamp: &event.timestamp,
            };
            appender.lock().unwrap().append(&record);
        }));
    }

    pub fn flush(&self) {
        self.appender.lock().unwrap().flush();
    }
}

fn event_type_label(event: &Event) -> &'static str {
    match event.event_type {
        crate::event_bus::EventType::GoalStarted => "goal_started",
        crate::event_bus::EventType::PhaseChanged => "phase_changed",
        crate::event_bus::EventType::PlanProduced => "plan_produced",
        crate::event_bus::EventType::PlanRejected => "plan_rejected",
        crate::event_bus::EventType::StepExecuted => "step_executed",
        crate::event_bus::EventType::ToolRejected => "tool_rejected",
        crate::event_bus::EventType::HardStop => "hard_stop",
        crate::event_bus::EventType::GoalCompleted => "goal_completed",
    }
}

/// Prints a human-readable line per event to stderr. Opt-in, like `Tracer`.
pub fn attach_console_subscriber(bus: &EventBus) {
    bus.subscribe_all(Arc::new(|event: &Event| {
        tracing::info!(event_type = event_type_label(event), payload = %event.payload, "event");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_bus::EventType;

    #[test]
    fn test_tracer_appends_published_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("traces.jsonl");
        let bus = EventBus::new();
        let tracer = Tracer::new(&path);
        tracer.attach(&bus);
        bus.publish(EventType::GoalStarted, serde_json::json!({"goal": "fix bug"}));
        bus.publish(EventType::ToolRejected, serde_json::json!({"tool": "fs.write_diff"}));
        tracer.flush();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"type\":\"goal_started\""));
        assert!(lines[1].contains("\"type\":\"tool_rejected\""));
    }
}
