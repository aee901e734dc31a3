use std::path::Path;

use csa_core::AppError;

use crate::config::{apply_layer, env_layer, Config, PartialConfig};
use crate::paths::{repo_config_file, user_config_file};

/// Resolves the full layered config for `repo_root` (spec.md §6 precedence:
/// CLI flag > env var > user-level config > repo config > defaults).
///
/// `cli_overrides` is the highest-precedence layer, typically built from
/// parsed CLI flags by the binary crate.
pub fn resolve(repo_root: &Path, cli_overrides: PartialConfig) -> Result<Config, AppError> {
    let mut cfg = Config::default();

    if let Some(repo_layer) = PartialConfig::load_file(&repo_config_file(repo_root))? {
        apply_layer(&mut cfg, repo_layer);
    }

    if let Some(user_path) = user_config_file() {
        if let Some(user_layer) = PartialConfig::load_file(&user_path)? {
            apply_layer(&mut cfg, user_layer);
        }
    }

    apply_layer(&mut cfg, env_layer());
    apply_layer(&mut cfg, cli_overrides);

    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &Config) -> Result<(), AppError> {
    if cfg.auto.max_cycles == 0 {
        return Err(AppError::Config(
            "auto.max_cycles must be at least 1".to_string(),
        ));
    }
    if cfg.retrieval.limit == 0 {
        return Err(AppError::Config(
            "retrieval.limit must be at least 1".to_string(),
        ));
    }
    if cfg.retrieval.chunk_overlap >= cfg.retrieval.chunk_chars {
        return Err(AppError::Config(
            "retrieval.chunk_overlap must be smaller than retrieval.chunk_chars".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_resolve_with_no_files_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = resolve(dir.path(), PartialConfig::default()).unwrap();
        assert_eq!(cfg.model, "llama3");
    }

    #[test]
    fn test_resolve_reads_repo_config_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".agent.yml"), "model: from-repo-file\n").unwrap();
        let cfg = resolve(dir.path(), PartialConfig::default()).unwrap();
        assert_eq!(cfg.model, "from-repo-file");
    }

    #[test]
    fn test_cli_overrides_win_over_repo_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".agent.yml"), "model: from-repo-file\n").unwrap();
        let cli = PartialConfig {
            model: Some("from-cli".into()),
            ..Default::default()
        };
        let cfg = resolve(dir.path(), cli).unwrap();
        assert_eq!(cfg.model, "from-cli");
    }

    #[test]
    fn test_rejects_zero_max_cycles() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".agent.yml"), "auto:\n  max_cycles: 0\n").unwrap();
        let err = resolve(dir.path(), PartialConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_rejects_overlap_ge_chunk_chars() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(".agent.yml"),
            "retrieval:\n  chunk_chars: 100\n  chunk_overlap: 100\n",
        )
        .unwrap();
        let err = resolve(dir.path(), PartialConfig::default()).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
