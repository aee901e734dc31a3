use std::io::Read;

use csa_core::Phase;
use csa_llm::{LlmParams, ResponseFormat};
use csa_orchestrator::{exit_code_for_state, LlmRoles, Orchestrator};
use csa_trace::Turn;

use crate::context::Context;

/// Runs one goal through the Orchestrator and prints the terminal outcome.
/// Returns the process exit code (spec.md §6).
pub async fn start(mut ctx: Context, goal: Option<String>, dry_run: bool) -> i32 {
    let goal = match goal.or_else(read_goal_from_stdin) {
        Some(g) if !g.trim().is_empty() => g,
        _ => {
            eprintln!("error: no goal provided (pass it as an argument or pipe it on stdin)");
            return 1;
        }
    };

    ctx.session_memory.append(&Turn::new("user", goal.as_str()));

    let roles = LlmRoles {
        classifier: &*ctx.classifier_llm,
        planner: &*ctx.planner_llm,
        developer: &*ctx.developer_llm,
    };
    let hard_stops = ctx.hard_stops();
    let dry_run = dry_run || ctx.config.auto.dry_run;
    let orchestrator = Orchestrator::new(
        ctx.repo_root.clone(),
        goal.as_str(),
        roles,
        &ctx.tool_bus,
        &ctx.safety,
        &ctx.event_bus,
        ctx.index.as_ref(),
        ctx.config.retrieval.limit,
        hard_stops,
    )
    .with_dry_run(dry_run);

    let state = orchestrator.run().await;

    let summary = state
        .observations
        .last()
        .map(|o| o.summary.clone())
        .unwrap_or_else(|| format!("{:?}", state.phase));
    ctx.session_memory.append(&Turn::new("agent", summary.as_str()));
    ctx.session_memory.flush();
    ctx.tracer.flush();

    match state.phase {
        Phase::Done => println!("{summary}"),
        Phase::Halted => {
            eprintln!(
                "halted: {} (cycle {}, last error: {})\nsee {} for the full trace",
                state.errors.last().map(|e| e.message.as_str()).unwrap_or("unknown reason"),
                state.cycle,
                state.last_error_signature,
                ctx.tracer.path().display()
            );
        }
        _ => unreachable!("Orchestrator::run only returns a terminal phase"),
    }

    exit_code_for_state(&state)
}

fn read_goal_from_stdin() -> Option<String> {
    if atty_is_terminal() {
        return None;
    }
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf).ok()?;
    Some(buf)
}

fn atty_is_terminal() -> bool {
    use std::io::IsTerminal;
    std::io::stdin().is_terminal()
}

/// Prints the fully resolved configuration as YAML (spec.md §6 `config`).
pub fn config(ctx: &Context) -> i32 {
    match serde_yaml::to_string(&ctx.config) {
        Ok(yaml) => {
            println!("{yaml}");
            0
        }
        Err(err) => {
            eprintln!("error: failed to serialize config: {err}");
            1
        }
    }
}

/// Reports provider reachability and the resolved per-role models
/// (spec.md §6 `diag`).
pub async fn diag(ctx: &Context) -> i32 {
    println!("provider:         {:?}", ctx.config.provider);
    println!("host:             {}", ctx.provider_host());
    println!("model:            {}", ctx.config.model);
    println!("planner_model:    {}", ctx.config.planner_model);
    println!("developer_model:  {}", ctx.config.developer_model);
    println!("reviewer_model:   {}", ctx.config.reviewer_model);
    println!("embed_model:      {}", ctx.config.embed_model);
    println!("index built:      {}", ctx.index.is_some());

    let params = LlmParams { max_tokens: Some(1), ..LlmParams::default() };
    match ctx.classifier_llm.query("ping", &params, ResponseFormat::Text).await {
        Ok(_) => {
            println!("reachable:        yes");
            0
        }
        Err(err) => {
            println!("reachable:        no ({err})");
            2
        }
    }
}
