mod cli;
mod commands;
mod context;

use clap::Parser;
use csa_config::config::{PartialConfig, Provider};

use cli::{Cli, Commands};
use context::Context;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let repo_root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(err) => {
            eprintln!("error: cannot resolve current directory: {err}");
            std::process::exit(1);
        }
    };

    let _log_guard = csa_config::logging::init(&repo_root);

    let overrides = cli_overrides(&cli);
    let ctx = match Context::build(&repo_root, overrides).await {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.exit_code());
        }
    };

    let exit_code = match cli.command {
        Commands::Start { goal } => commands::start(ctx, goal, cli.dry_run).await,
        Commands::Config => commands::config(&ctx),
        Commands::Diag => commands::diag(&ctx).await,
    };
    std::process::exit(exit_code);
}

/// Builds the highest-precedence config layer from parsed CLI flags
/// (spec.md §6 precedence: CLI flag > env var > user config > repo config
/// > defaults).
fn cli_overrides(cli: &Cli) -> PartialConfig {
    let provider = cli.provider.as_deref().and_then(|p| match p.to_ascii_lowercase().as_str() {
        "ollama" => Some(Provider::Ollama),
        "openai" => Some(Provider::Openai),
        other => {
            eprintln!("warning: unrecognized --provider '{other}', ignoring");
            None
        }
    });
    PartialConfig {
        provider,
        planner_model: cli.planner_model.clone(),
        developer_model: cli.developer_model.clone(),
        reviewer_model: cli.reviewer_model.clone(),
        ..PartialConfig::default()
    }
}

