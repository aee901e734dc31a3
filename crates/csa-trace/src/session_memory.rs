use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::jsonl_appender::{read_last_n, JsonlAppender};

/// One turn of a conversation, persisted verbatim (spec.md §4.10).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

impl Turn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Append-only JSONL of conversation turns (spec.md §4.10, `session.jsonl`).
pub struct SessionMemory {
    appender: JsonlAppender,
    path: PathBuf,
}

impl SessionMemory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            appender: JsonlAppender::new(&path),
            path,
        }
    }

    pub fn append(&mut self, turn: &Turn) {
        self.appender.append(turn);
    }

    pub fn flush(&mut self) {
        self.appender.flush();
    }

    /// Returns the last `n` turns, oldest first. Requires a prior `flush`
    /// to see turns still in the write buffer.
    pub fn last_n(&self, n: usize) -> Vec<Turn> {
        read_last_n(&self.path, n)
    }
}
