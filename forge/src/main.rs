//! Interactive front end for the generation pipeline.
//!
//! Each input line is a project request and starts a fresh run against the
//! configured workspace. `graph` prints the stage graph; `exit`, `quit` or
//! `end` leave the session.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use forge::agents::coder::StepOutcome;
use forge::core::machine::render_mermaid;
use forge::core::state::FinishReason;
use forge::core::types::ProjectIntent;
use forge::io::approval::ConsoleApproval;
use forge::io::backend::CodexBackend;
use forge::io::config::{DEFAULT_CONFIG_FILE, load_config};
use forge::io::workspace::Workspace;
use forge::logging;
use forge::orchestrator::{Orchestrator, OrchestratorSettings, RunEvent, RunOutcome};

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "end"];

#[derive(Parser)]
#[command(
    name = "forge",
    version,
    about = "Plan, review and generate a software project step by step"
)]
struct Cli {
    /// Path to the TOML config file. A missing file means defaults.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init();

    let config = load_config(&cli.config)
        .with_context(|| format!("load config {}", cli.config.display()))?;
    let workspace = Workspace::open(&config.workspace_root)
        .context("open workspace")?
        .with_output_limit(config.output_limit_bytes);
    let backend = CodexBackend::new(&config, workspace.root())?;
    println!("Workspace: {}", workspace.root().display());

    let mut orchestrator = Orchestrator::new(
        workspace,
        backend,
        ConsoleApproval::stdio(),
        OrchestratorSettings::from(&config),
    )?;

    loop {
        let Some(line) = orchestrator
            .approval_mut()
            .ask("\nWhat would you like to build? ")?
        else {
            break;
        };
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let command = request.to_ascii_lowercase();
        if EXIT_WORDS.contains(&command.as_str()) {
            break;
        }
        if command == "graph" {
            print!("{}", render_mermaid());
            continue;
        }

        match orchestrator.run(ProjectIntent::new(request), print_event) {
            Ok(outcome) => print_outcome(&outcome),
            Err(err) => eprintln!("Run failed: {err:#}"),
        }
    }
    println!("Goodbye.");
    Ok(())
}

fn print_event(event: &RunEvent<'_>) {
    match event {
        RunEvent::StageEntered(stage) => println!("-> {stage}"),
        RunEvent::PlanReady(plan) => {
            println!("Plan ready: {} ({} files)", plan.name, plan.files.len());
        }
        RunEvent::TaskPlanReady(task_plan) => {
            println!("Task plan ready: {} steps", task_plan.len());
        }
        RunEvent::Revising { shape, edit } => println!("Revising {shape}: {edit}"),
        RunEvent::StepFinished(report) => {
            let status = match &report.outcome {
                StepOutcome::Completed { summary } => format!("ok: {summary}"),
                StepOutcome::Failed { error } => format!("failed: {error}"),
            };
            println!(
                "Step {} {} ({:.1}s) {status}",
                report.index + 1,
                report.filepath,
                report.elapsed.as_secs_f64()
            );
        }
        RunEvent::Finished(_) => {}
    }
}

fn print_outcome(outcome: &RunOutcome) {
    let failed = outcome.reports.iter().filter(|r| !r.succeeded()).count();
    match outcome.finish {
        FinishReason::Completed => println!(
            "Done: {}/{} steps, {failed} failed.",
            outcome.steps_completed, outcome.steps_total
        ),
        FinishReason::Overrun {
            step_index,
            elapsed,
        } => println!(
            "Stopped early: step {} took {:.1}s; {}/{} steps visited, {failed} failed.",
            step_index + 1,
            elapsed.as_secs_f64(),
            outcome.steps_completed,
            outcome.steps_total
        ),
    }
}
