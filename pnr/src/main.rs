//! Predicate-gated workflow orchestrator.
//!
//! Loads a domain file, picks one CPUX, and reconciles its design chunks until
//! all are completed or no chunk can make progress.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use pnr::core::types::{Condition, TruthValue};
use pnr::exit_codes;
use pnr::io::backend::Dispatcher;
use pnr::io::config::{RunnerConfig, load_config};
use pnr::io::container::ContainerBackend;
use pnr::io::docker::DockerCli;
use pnr::io::domain_store::{load_domain, select_cpux};
use pnr::io::process_backend::ProcessBackend;
use pnr::io::run_report::{RunReport, write_run_report};
use pnr::logging;
use pnr::reconcile::{LoopStop, ReconcileConfig, Reconciler};
use pnr::store::PredicateStore;

const SETTINGS_FILE: &str = "pnr.toml";

#[derive(Parser)]
#[command(
    name = "pnr",
    version,
    about = "Predicate-gated workflow orchestrator"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile one CPUX until every chunk completes or progress stalls.
    Run(RunArgs),
    /// Check a domain file against the schema and invariants.
    Validate {
        /// Domain JSON file.
        #[arg(long)]
        domain: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Domain JSON file.
    #[arg(long)]
    domain: PathBuf,

    /// Id of the CPUX to run.
    #[arg(long)]
    cpux: String,

    /// Runner settings (TOML). Defaults to `pnr.toml` next to the domain file.
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Seed a fact before the first tick, e.g. `--assert system_ready=Y`.
    #[arg(long = "assert", value_name = "PROMPT=TV", value_parser = parse_assertion)]
    asserts: Vec<(String, TruthValue)>,

    /// Write a JSON run report here when the loop stops.
    #[arg(long)]
    report: Option<PathBuf>,

    /// Exit with a distinct code when the loop stalls instead of 0.
    #[arg(long)]
    fail_on_stall: bool,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => cmd_run(&args),
        Command::Validate { domain } => cmd_validate(&domain),
    }
}

fn cmd_validate(domain_path: &Path) -> Result<i32> {
    let domain = load_domain(domain_path)?;
    for (id, cpux) in &domain.cpuxs {
        println!("{id}: {} chunks", cpux.design_chunks.len());
    }
    Ok(exit_codes::OK)
}

fn cmd_run(args: &RunArgs) -> Result<i32> {
    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(|| default_settings_path(&args.domain));
    let settings = load_config(&settings_path)?;
    let domain = load_domain(&args.domain)?;
    let cpux = select_cpux(&domain, &args.cpux)?;

    for dir in [&settings.status_dir, &settings.config_dir] {
        fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    }

    let store = PredicateStore::new();
    let mut reconciler = Reconciler::new(
        cpux,
        store.clone(),
        backends(&settings),
        ReconcileConfig {
            tick_interval: settings.tick_interval(),
            max_iterations: settings.iteration_cap(),
            status_dir: settings.status_dir.clone(),
        },
    );
    for (prompt, tv) in &args.asserts {
        info!(%prompt, %tv, "asserting fact from command line");
        store.set(prompt.clone(), Condition::new(prompt.clone(), *tv));
    }

    let started = Instant::now();
    let outcome = reconciler.run()?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    for (name, status) in &outcome.statuses {
        println!("{name}\t{status}");
    }
    if let Some(path) = &args.report {
        let report = RunReport::from_outcome(&domain.name, &outcome, duration_ms);
        write_run_report(path, &report)?;
        info!(report = %path.display(), "run report written");
    }

    Ok(match outcome.stop {
        LoopStop::Complete => exit_codes::OK,
        LoopStop::Stalled { .. } if args.fail_on_stall => exit_codes::STALLED,
        LoopStop::Stalled { .. } => exit_codes::OK,
    })
}

fn backends(settings: &RunnerConfig) -> Dispatcher<ProcessBackend, ContainerBackend<DockerCli>> {
    Dispatcher::new(
        ProcessBackend::new(&settings.process),
        ContainerBackend::new(
            DockerCli::new(&settings.container),
            &settings.status_dir,
            &settings.config_dir,
        ),
    )
}

fn default_settings_path(domain: &Path) -> PathBuf {
    domain
        .parent()
        .map_or_else(|| PathBuf::from(SETTINGS_FILE), |dir| dir.join(SETTINGS_FILE))
}

/// Parse `PROMPT=TV` where TV is one of Y, N, U.
fn parse_assertion(raw: &str) -> Result<(String, TruthValue), String> {
    let (prompt, tv) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected PROMPT=TV, got '{raw}'"))?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(format!("empty prompt in '{raw}'"));
    }
    Ok((prompt.to_string(), tv.trim().parse()?))
}
