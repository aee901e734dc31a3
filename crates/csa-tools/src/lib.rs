//! Tool surface the agent may act through: registry, diff generation, and
//! the `ToolBus` dispatcher (spec.md §4.5/§4.6).

mod diff_generator;
mod registry;
mod tool_bus;

pub use diff_generator::{DiffGenerator, LINE_CAP, MAX_RETRIES};
pub use registry::{ToolDef, ToolRegistry};
pub use tool_bus::{tool_name_for, ExecOutput, FsReadOutput, ToolBus};
