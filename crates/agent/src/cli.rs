use clap::{Parser, Subcommand};

/// Build version string combining Cargo.toml version and git describe.
fn build_version() -> &'static str {
    static VERSION: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION.get_or_init(|| {
        let cargo_ver = env!("CARGO_PKG_VERSION");
        let git_desc = env!("AGENT_GIT_DESCRIBE");
        if git_desc.is_empty() {
            cargo_ver.to_string()
        } else {
            format!("{cargo_ver} ({git_desc})")
        }
    })
}

#[derive(Parser)]
#[command(name = "agent", version = build_version())]
#[command(about = "Autonomous local coding agent")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Override `.agent.yml`'s `provider:` key.
    #[arg(long, global = true)]
    pub provider: Option<String>,

    /// Override `.agent.yml`'s `planner_model:` key.
    #[arg(long, global = true)]
    pub planner_model: Option<String>,

    /// Override `.agent.yml`'s `developer_model:` key.
    #[arg(long, global = true)]
    pub developer_model: Option<String>,

    /// Override `.agent.yml`'s `reviewer_model:` key.
    #[arg(long, global = true)]
    pub reviewer_model: Option<String>,

    /// Validate and print the plan the Orchestrator would execute, without
    /// dispatching any step through the ToolBus.
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one goal through the agent state machine against the current repo.
    Start {
        /// The goal; read from stdin if omitted.
        goal: Option<String>,
    },

    /// Print the fully resolved configuration (repo + user + env + CLI layers).
    Config,

    /// Report provider reachability, resolved host, and per-role models.
    Diag,
}
