use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Typed events the Orchestrator and its collaborators publish over one
/// goal's lifetime (spec.md §4.10).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GoalStarted,
    PhaseChanged,
    PlanProduced,
    PlanRejected,
    StepExecuted,
    ToolRejected,
    HardStop,
    GoalCompleted,
}

impl EventType {
    pub const ALL: [EventType; 8] = [
        EventType::GoalStarted,
        EventType::PhaseChanged,
        EventType::PlanProduced,
        EventType::PlanRejected,
        EventType::StepExecuted,
        EventType::ToolRejected,
        EventType::HardStop,
        EventType::GoalCompleted,
    ];
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: serde_json::Value,
    pub timestamp: String,
}

pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Synchronous in-process publish/subscribe bus (spec.md §4.10). Handlers
/// run in subscription order on the publisher's thread; a panicking
/// handler is caught and logged, never allowed to affect other handlers or
/// the run itself.
#[derive(Default)]
pub struct EventBus {
    handlers: Mutex<HashMap<EventType, Vec<Handler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, event_type: EventType, handler: Handler) {
        self.handlers.lock().unwrap().entry(event_type).or_default().push(handler);
    }

    /// Subscribes `handler` to every event type — the shape Tracer and
    /// console subscribers need, since spec.md's bus only exposes
    /// per-type subscription.
    pub fn subscribe_all(&self, handler: Handler) {
        for event_type in EventType::ALL {
            self.subscribe(event_type, handler.clone());
        }
    }

    pub fn publish(&self, event_type: EventType, payload: serde_json::Value) {
        let event = Event {
            event_type,
            payload,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };
        let handlers = {
            let guard = self.handlers.lock().unwrap();
            guard.get(&event_type).cloned().unwrap_or_default()
        };
        for handler in handlers {
            let result = catch_unwind(AssertUnwindSafe(|| handler(&event)));
            if result.is_err() {
                warn!(event_type = ?event_type, "event handler panicked; ignoring");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_subscribe_and_publish_invokes_handler() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(EventType::GoalStarted, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(EventType::GoalStarted, serde_json::json!({"goal": "x"}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_only_fires_for_its_event_type() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(EventType::GoalStarted, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(EventType::GoalCompleted, serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_subscribe_all_fires_on_every_event_type() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe_all(Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(EventType::GoalStarted, serde_json::json!({}));
        bus.publish(EventType::HardStop, serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_panicking_handler_does_not_prevent_other_handlers() {
        let bus = EventBus::new();
        bus.subscribe(EventType::GoalStarted, Arc::new(|_| panic!("boom")));
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe(EventType::GoalStarted, Arc::new(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        bus.publish(EventType::GoalStarted, serde_json::json!({}));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
