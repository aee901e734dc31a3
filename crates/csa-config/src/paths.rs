use std::path::PathBuf;

/// XDG application name used to resolve the user-level config directory.
pub const APP_NAME: &str = "agent";

/// Directory under the repo root holding persisted runtime state
/// (spec.md §6 "Persisted state"): `session.jsonl`, `traces.jsonl`,
/// `index.db`, `index.meta.json`.
pub const STATE_DIR_NAME: &str = ".agent";

/// Repo-level config file name (spec.md §6).
pub const REPO_CONFIG_FILE: &str = ".agent.yml";

/// User-level config directory, e.g. `~/.config/agent/` on Linux.
pub fn user_config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|d| d.config_dir().to_path_buf())
}

/// User-level config file path.
pub fn user_config_file() -> Option<PathBuf> {
    user_config_dir().map(|d| d.join("config.yml"))
}

/// Repo-level config file path relative to `repo_root`.
pub fn repo_config_file(repo_root: &std::path::Path) -> PathBuf {
    repo_root.join(REPO_CONFIG_FILE)
}

/// Persisted state directory relative to `repo_root`.
pub fn state_dir(repo_root: &std::path::Path) -> PathBuf {
    repo_root.join(STATE_DIR_NAME)
}

pub fn session_jsonl(repo_root: &std::path::Path) -> PathBuf {
    state_dir(repo_root).join("session.jsonl")
}

pub fn traces_jsonl(repo_root: &std::path::Path) -> PathBuf {
    state_dir(repo_root).join("traces.jsonl")
}

pub fn index_db(repo_root: &std::path::Path) -> PathBuf {
    state_dir(repo_root).join("index.db")
}

pub fn index_meta_json(repo_root: &std::path::Path) -> PathBuf {
    state_dir(repo_root).join("index.meta.json")
}
