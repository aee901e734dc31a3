use std::collections::HashSet;

use csa_core::{Phase, SideEffect};

/// One entry of the total tool surface (spec.md §3 `Tool`, §4.5
/// `ToolRegistry`). `input_schema` is checked as "does this step carry the
/// fields this tool requires", enforced by [`crate::tool_bus::ToolBus`]
/// rather than a general-purpose JSON-schema validator — the Planner only
/// ever emits already-typed [`csa_core::Step`] values.
#[derive(Clone, Debug)]
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub phase_visibility: HashSet<Phase>,
    pub side_effects: SideEffect,
}

/// The fixed set of tools the ToolBus can dispatch to (spec.md §4.5).
/// `fs.write` is deliberately absent: the Executor translates it into a
/// `fs.read` + DiffGenerator + `fs.write_diff` sequence before it ever
/// reaches the bus.
pub struct ToolRegistry {
    tools: Vec<ToolDef>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        let execution = HashSet::from([Phase::Execution]);
        Self {
            tools: vec![
                ToolDef {
                    name: "fs.read",
                    description: "Read a file's contents and mtime.",
                    phase_visibility: execution.clone(),
                    side_effects: SideEffect::Read,
                },
                ToolDef {
                    name: "fs.create",
                    description: "Create a new file via a deterministic add-file diff.",
                    phase_visibility: execution.clone(),
                    side_effects: SideEffect::Write,
                },
                ToolDef {
                    name: "fs.write_diff",
                    description: "Apply a unified diff to an existing, previously read file.",
                    phase_visibility: execution.clone(),
                    side_effects: SideEffect::Write,
                },
                ToolDef {
                    name: "fs.delete",
                    description: "Delete a file.",
                    phase_visibility: execution.clone(),
                    side_effects: SideEffect::Write,
                },
                ToolDef {
                    name: "exec.run",
                    description: "Run an allowlisted program with structured arguments.",
                    phase_visibility: execution,
                    side_effects: SideEffect::Exec,
                },
            ],
        }
    }
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name).collect()
    }
}
