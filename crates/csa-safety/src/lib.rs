//! Single source of truth for "may this path/program be touched?"
//! (spec.md §4.1). Never panics or throws — every decision is a `bool`.

mod globset;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use csa_config::config::SafetyConfig;
use regex::Regex;

use globset::glob_match;

/// Hardcoded, non-configurable baseline denies. Project config can only add
/// to the restriction (via `safety.deny` globs), never weaken this list.
const SYSTEM_DENY_PATTERNS: &[&str] = &[
    r"^\.git/",
    r"^\.env(\.|$)",
    r"^\.agent/",
    r"(^|/)id_(rsa|ed25519|dsa|ecdsa)(\.pub)?$",
    r"(^|/)\.ssh/",
    r"(^|/)\.aws/credentials$",
    r"(^|/)\.netrc$",
];

fn system_deny() -> &'static [Regex] {
    static RE: OnceLock<Vec<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        SYSTEM_DENY_PATTERNS
            .iter()
            .map(|p| Regex::new(p).expect("system deny pattern is valid regex"))
            .collect()
    })
}

/// Gatekeeper for filesystem and process access, backed by [`SafetyConfig`].
#[derive(Debug, Clone)]
pub struct Safety {
    repo_root: PathBuf,
    allow: Vec<String>,
    deny: Vec<String>,
    program_allowlist: Vec<String>,
}

impl Safety {
    pub fn new(repo_root: impl Into<PathBuf>, config: &SafetyConfig) -> Self {
        Self {
            repo_root: repo_root.into(),
            allow: config.allow.clone(),
            deny: config.deny.clone(),
            program_allowlist: config.program_allowlist.clone(),
        }
    }

    /// Returns whether `relative_path` may be read or written, in the order
    /// specified by spec.md §4.1.
    pub fn path_allowed(&self, relative_path: &str) -> bool {
        let path = Path::new(relative_path);

        if path.is_absolute() {
            return false;
        }
        if relative_path.starts_with('~') {
            return false;
        }
        if path.components().any(|c| c.as_os_str() == "..") {
            return false;
        }
        if system_deny().iter().any(|re| re.is_match(relative_path)) {
            return false;
        }
        if self.escapes_repo_root(path) {
            return false;
        }

        let allowed = self.allow.iter().any(|g| glob_match(g, relative_path));
        let denied = self.deny.iter().any(|g| glob_match(g, relative_path));
        allowed && !denied
    }

    fn escapes_repo_root(&self, relative: &Path) -> bool {
        let joined = self.repo_root.join(relative);
        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                std::path::Component::ParentDir => {
                    if !normalized.pop() {
                        return true;
                    }
                }
                std::path::Component::CurDir => {}
                other => normalized.push(other.as_os_str()),
            }
        }
        !normalized.starts_with(&self.repo_root)
    }

    /// Returns whether `program` (a basename, never a path with shell
    /// metacharacters) may be executed via `exec.run`.
    pub fn program_allowed(&self, program: &str) -> bool {
        if program.chars().any(|c| matches!(c, ';' | '|' | '&' | '$' | '`' | '>' | '<' | '\n')) {
            return false;
        }
        let basename = Path::new(program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(program);
        self.program_allowlist.iter().any(|p| p == basename)
    }
}
