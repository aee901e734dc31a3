//! In-process event bus, JSONL tracing, and session memory (spec.md §4.10).

mod event_bus;
mod jsonl_appender;
mod session_memory;
mod tracer;

pub use event_bus::{Event, EventBus, EventType, Handler};
pub use jsonl_appender::{read_last_n, AppendStats, JsonlAppender};
pub use session_memory::{SessionMemory, Turn};
pub use tracer::{attach_console_subscriber, Tracer};
