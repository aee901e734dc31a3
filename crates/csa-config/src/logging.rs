use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Initializes process-wide tracing: human-readable lines to stderr plus a
/// rolling daily file under `.agent/agent.log`, mirroring the teacher's
/// `tracing_subscriber::fmt().with_writer(stderr)` bootstrap with a
/// `tracing-appender` file sink layered in for the persisted trace the
/// Tracer (spec.md §4.10) complements.
///
/// Returns a [`WorkerGuard`] that must be kept alive for the process
/// lifetime or buffered file writes will be dropped on exit.
pub fn init(repo_root: &Path) -> Option<WorkerGuard> {
    let log_dir = crate::paths::state_dir(repo_root);
    if std::fs::create_dir_all(&log_dir).is_err() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::from_default_env())
            .try_init()
            .ok();
        return None;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "agent.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .ok();

    Some(guard)
}
