//! Relay agent runtime — Demo CLI
//!
//! Drives agent loops and sequential workflows against an offline,
//! deterministic model, so every command runs without network access or
//! credentials.
//!
//! Usage:
//!   cargo run -p demo -- agent --task "Write a haiku about rust" --max-loops 3
//!   cargo run -p demo -- agent --task "Outline a talk" --max-loops auto --until-done --save talk.json
//!   cargo run -p demo -- resume --state talk.json --task "Now add a conclusion"
//!   cargo run -p demo -- pipeline
//!   cargo run -p demo -- workflow --file demo/workflows/blog.toml

mod canned;
mod console;
mod pipeline;

use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use relay_contracts::{
    config::{AgentConfig, MaxLoops, StopCondition},
    error::{RelayError, RelayResult},
    outcome::RunOutcome,
};
use relay_core::{config::load_agent_config, CancelSignal, Flow};
use relay_workflow::{WorkflowManifest, WorkflowOutcome};

use crate::{canned::CannedInvoker, console::ConsoleReviewer};

/// Revisions the canned model produces before emitting the done token.
const CANNED_DONE_AFTER: usize = 3;

// ── CLI definition ────────────────────────────────────────────────────────────

/// Relay — iterative LLM agent loops and sequential workflows.
#[derive(Parser)]
#[command(
    name = "demo",
    about = "Relay agent runtime demo",
    long_about = "Runs Relay agent loops and workflows against an offline canned model,\n\
                  showing retries, stopping conditions, state persistence, and chaining."
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a single agent loop on a task.
    Agent {
        #[arg(long)]
        task: String,
        /// A positive number of loops, or "auto".
        #[arg(long, value_parser = parse_max_loops)]
        max_loops: Option<MaxLoops>,
        /// Load the agent configuration from a TOML file.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Stop when the response contains <DONE>.
        #[arg(long)]
        until_done: bool,
        /// Review every response on stdin.
        #[arg(long)]
        interactive: bool,
        /// Make the first N model calls fail.
        #[arg(long, default_value_t = 0)]
        flaky: u32,
        /// Abort the run after this many milliseconds.
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Save the agent state here after the run.
        #[arg(long)]
        save: Option<PathBuf>,
    },
    /// Restore a saved agent and continue it with a new task.
    Resume {
        #[arg(long)]
        state: PathBuf,
        #[arg(long)]
        task: String,
    },
    /// Run the four-stage topic → draft → review → distribution pipeline.
    Pipeline,
    /// Run a workflow declared in a TOML manifest.
    Workflow {
        #[arg(long)]
        file: PathBuf,
    },
}

fn parse_max_loops(s: &str) -> Result<MaxLoops, String> {
    if s == "auto" {
        return Ok(MaxLoops::Auto);
    }
    match s.parse::<u32>() {
        Ok(0) | Err(_) => Err(format!("'{s}' is not a positive integer or \"auto\"")),
        Ok(n) => Ok(MaxLoops::fixed(n)),
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() {
    // Initialize structured logging.  Set RUST_LOG=debug for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    print_banner();

    let result = match cli.command {
        Command::Agent {
            task,
            max_loops,
            config,
            until_done,
            interactive,
            flaky,
            timeout_ms,
            save,
        } => run_agent(AgentArgs {
            task,
            max_loops,
            config,
            until_done,
            interactive,
            flaky,
            timeout_ms,
            save,
        }),
        Command::Resume { state, task } => run_resume(state, &task),
        Command::Pipeline => pipeline::run_pipeline(),
        Command::Workflow { file } => run_workflow(file),
    };

    match result {
        Ok(()) => {
            println!("Done.");
        }
        Err(e) => {
            eprintln!("Demo error: {}", e);
            std::process::exit(1);
        }
    }
}

// ── Commands ──────────────────────────────────────────────────────────────────

struct AgentArgs {
    task: String,
    max_loops: Option<MaxLoops>,
    config: Option<PathBuf>,
    until_done: bool,
    interactive: bool,
    flaky: u32,
    timeout_ms: Option<u64>,
    save: Option<PathBuf>,
}

fn run_agent(args: AgentArgs) -> RelayResult<()> {
    let mut config = match &args.config {
        Some(path) => load_agent_config(path)?,
        None => AgentConfig::new("demo-agent"),
    };
    if let Some(max_loops) = args.max_loops {
        config.max_loops = max_loops;
    }
    if args.until_done {
        config.stopping_condition = Some(StopCondition::done_token());
    }
    config.interactive |= args.interactive;

    let mut invoker = CannedInvoker::new(config.agent_name.clone()).with_flaky_start(args.flaky);
    if config.stopping_condition.is_some() {
        invoker = invoker.with_done_after(CANNED_DONE_AFTER);
    }

    let mut flow = Flow::new(Arc::new(invoker), config);
    if flow.config().interactive {
        flow.set_reviewer(ConsoleReviewer);
    }

    let cancel = match args.timeout_ms {
        Some(ms) => CancelSignal::with_deadline(std::time::Duration::from_millis(ms)),
        None => CancelSignal::new(),
    };
    let outcome = flow.run_with_cancel(&args.task, &cancel)?;
    print_outcome(&flow, &outcome);

    if let Some(path) = &args.save {
        flow.save_state(path)?;
        println!("State saved to {}", path.display());
    }
    Ok(())
}

fn run_resume(path: PathBuf, task: &str) -> RelayResult<()> {
    let invoker = CannedInvoker::new("resumed").with_done_after(CANNED_DONE_AFTER);
    let mut flow = Flow::new(Arc::new(invoker), AgentConfig::default());
    flow.load_state(&path)?;
    println!(
        "Restored '{}' with {} turn(s) from {}",
        flow.name(),
        flow.history().len(),
        path.display()
    );

    if flow.config().interactive {
        flow.set_reviewer(ConsoleReviewer);
    }
    let outcome = flow.run_with_cancel(task, &CancelSignal::new())?;
    print_outcome(&flow, &outcome);

    flow.save_state(&path)?;
    println!("State saved to {}", path.display());
    Ok(())
}

fn run_workflow(path: PathBuf) -> RelayResult<()> {
    let manifest = WorkflowManifest::from_file(&path)?;
    let agents = manifest.build_agents(Arc::new(
        CannedInvoker::new(manifest.name.clone()).with_done_after(CANNED_DONE_AFTER),
    ))?;
    for agent in agents.values() {
        let mut flow = agent.lock().map_err(|_| RelayError::AgentUnavailable {
            reason: "agent lock poisoned before the workflow started".to_string(),
        })?;
        if flow.config().interactive {
            flow.set_reviewer(ConsoleReviewer);
        }
    }

    let mut workflow = manifest.build_with_agents(&agents)?;
    let outcome = workflow.run()?;

    let report = serde_json::to_string_pretty(&workflow.snapshot()).map_err(|e| RelayError::IoError {
        path: "<stdout>".to_string(),
        reason: format!("failed to render workflow report: {e}"),
    })?;
    println!("{report}");
    if let WorkflowOutcome::Cancelled { index } = outcome {
        println!("Workflow cancelled at task {index}.");
    }
    Ok(())
}

// ── Output ────────────────────────────────────────────────────────────────────

fn print_outcome(flow: &Flow, outcome: &RunOutcome) {
    println!("Transcript for '{}':", flow.name());
    for turn in flow.history() {
        println!("  {}: {}", turn.role.label(), turn.text);
    }
    println!();
    println!(
        "Finished after {} loop(s) ({:?}), execution {}",
        outcome.loops_completed, outcome.termination, outcome.execution_id
    );
    println!("Final response: {}", outcome.response);
    println!();
}

fn print_banner() {
    println!();
    println!("Relay — Iterative LLM Agent Runtime");
    println!("Offline Demo (canned model)");
    println!("===================================");
    println!();
    println!("Per loop iteration:");
    println!("  [1] Check cancellation and the max_loops bound");
    println!("  [2] Build the prompt from the system prompt and transcript");
    println!("  [3] Invoke the model, retrying transient failures");
    println!("  [4] Filter the response and append it to the transcript");
    println!("  [5] Ask the reviewer (interactive mode), then test the stopping condition");
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_loops() {
        assert_eq!(parse_max_loops("auto"), Ok(MaxLoops::Auto));
        assert_eq!(parse_max_loops("3"), Ok(MaxLoops::fixed(3)));
        assert!(parse_max_loops("0").is_err());
        assert!(parse_max_loops("many").is_err());
    }

    #[test]
    fn test_bundled_blog_workflow_runs() {
        let manifest = WorkflowManifest::from_toml_str(include_str!("../workflows/blog.toml")).unwrap();
        let mut workflow = manifest
            .build(Arc::new(CannedInvoker::new("blog").with_done_after(CANNED_DONE_AFTER)))
            .unwrap();

        let outcome = workflow.run().unwrap();

        assert!(matches!(outcome, WorkflowOutcome::Completed { .. }));
        assert_eq!(workflow.len(), 3);
    }
}
