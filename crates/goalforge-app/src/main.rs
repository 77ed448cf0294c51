//! goalforge - drive a project's goals from request to applied edits
//!
//! Talks to the project backend over HTTP (files, branches, model, goals) and runs each
//! pending goal through testing and implementation.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use goalforge_adapters::{
    logging, ApiClient, Config, GoalStore, HttpBranchStager, HttpFileStore, HttpGoalStore,
    HttpLlmClient,
};
use goalforge_core::{AttemptSpec, Goal};
use goalforge_engine::{
    Collaborators, EngineSettings, GoalOutcome, GoalPhaseController, OutcomeStatus, RunControl,
    RunFlags,
};
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "goalforge",
    about = "Turn project goals into applied, staged edits",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process the pending goals of a project
    Run(RunArgs),
    /// Write a default config file
    InitConfig {
        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Project whose goals are processed
    #[arg(long, env = "GOALFORGE_PROJECT")]
    project: String,

    /// Only process these goal ids (repeatable)
    #[arg(long = "goal")]
    goals: Vec<String>,

    /// Attempts per stage: a count ("3") or a list ("1,3")
    #[arg(long)]
    attempts: Option<String>,

    /// Accept stages that end without edits
    #[arg(long)]
    allow_empty_stage: bool,

    /// Run implementation even for coverage-remediation goals
    #[arg(long)]
    force_implementation: bool,

    /// Backend API base URL
    #[arg(long)]
    api_url: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Print one JSON outcome per line instead of the summary table
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();
    match args.command {
        Command::InitConfig { force } => init_config(force),
        Command::Run(run_args) => run(run_args).await,
    }
}

fn init_config(force: bool) -> Result<ExitCode> {
    if let Some(path) = Config::config_path() {
        if path.exists() && !force {
            eprintln!("  Config already exists at {}", path.display());
            eprintln!("  Use --force to overwrite it.");
            return Ok(ExitCode::FAILURE);
        }
    }
    let path = Config::default().save()?;
    println!("Wrote {}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn load_config(args: &RunArgs) -> Result<Config> {
    let mut config = Config::load();
    config.apply_env_overrides();

    if let Some(url) = &args.api_url {
        config.api_base_url = url.trim().to_string();
    }
    if let Some(raw) = &args.attempts {
        config.attempts =
            AttemptSpec::parse(raw).ok_or_else(|| anyhow!("Invalid --attempts value {:?}", raw))?;
    }
    config.allow_empty_stage |= args.allow_empty_stage;
    config.force_implementation |= args.force_implementation;
    config.log_json |= args.log_json;

    config
        .validate()
        .with_context(|| format!("Invalid configuration ({})", Config::config_location()))?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let config = load_config(&args)?;
    logging::init(&config.log_level, config.log_json)?;

    let api = ApiClient::new(&config.api_base_url, config.request_timeout_secs)?;
    let goal_store = Arc::new(HttpGoalStore::new(api.clone()));
    let collaborators = Collaborators {
        files: Arc::new(HttpFileStore::new(api.clone())),
        stager: Arc::new(HttpBranchStager::new(api.clone())),
        llm: Arc::new(HttpLlmClient::new(api)),
        goals: goal_store.clone(),
    };

    let settings = EngineSettings::from_config(&config);
    let flags = RunFlags::default();
    tokio::spawn({
        let flags = flags.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling at the next checkpoint");
                flags.cancel();
            }
        }
    });
    let control = RunControl::from_flags(flags, settings.pause_poll_interval);
    let controller = GoalPhaseController::new(collaborators, settings).with_control(control);

    let goals = goal_store
        .list_goals(&args.project)
        .await
        .with_context(|| format!("Could not list goals for project {}", args.project))?;
    let pending: Vec<Goal> = goals
        .into_iter()
        .filter(|goal| !goal.phase.is_terminal())
        .filter(|goal| args.goals.is_empty() || args.goals.contains(&goal.id))
        .collect();

    if pending.is_empty() {
        println!("No pending goals for project {}", args.project);
        return Ok(ExitCode::SUCCESS);
    }
    tracing::info!(project = %args.project, pending = pending.len(), "processing goals");

    let outcomes = controller.process_goals(&args.project, &pending).await;
    for outcome in &outcomes {
        if args.json {
            println!("{}", serde_json::to_string(outcome)?);
        } else {
            println!("{}", summary_line(outcome));
        }
    }

    let cancelled = outcomes.iter().any(|o| o.status == OutcomeStatus::Cancelled);
    let failed = outcomes.iter().any(|o| o.status == OutcomeStatus::Failed);
    Ok(if cancelled {
        ExitCode::from(130)
    } else if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn summary_line(outcome: &GoalOutcome) -> String {
    let detail = outcome
        .message
        .clone()
        .or_else(|| outcome.skipped_reason.clone())
        .unwrap_or_else(|| {
            format!(
                "{} applied, {} skipped",
                outcome.edits_applied, outcome.edits_skipped
            )
        });
    format!(
        "{:<10} {}  {}",
        outcome.status.as_str(),
        outcome.goal_id,
        detail
    )
}
