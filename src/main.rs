//! # Main — CLI Entry Point
//!
//! Routes subcommands to the execution functions in `cli.rs`. Handles the
//! shared concerns: `.env` loading, logging setup and configuration.
//!
//! ## Subcommands
//!
//! - `plan`: assess an image and print the round-1 decision.
//! - `run`: plan, confirm and execute a full case under the safety guard.
//! - `parse-log`: parse a historical case log into a case record.
//! - `learn`: ingest logs, rebuild the learned policy, show corpus statistics.
//!
//! ## Global Options
//!
//! - `--config` / `FACEGUARD_CONFIG`: path to `faceguard.toml` (defaults apply when absent).
//! - `--threads`: Rayon thread pool size for corpus scans (0 = all cores).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use faceguard::policy::Profile;

#[derive(Parser)]
#[command(
    name = "faceguard",
    version,
    about = "Identity-safe enhancement of forensic face images"
)]
struct Cli {
    /// Path to faceguard.toml (or set FACEGUARD_CONFIG)
    #[arg(long, env = "FACEGUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Number of rayon worker threads (defaults to all logical cores)
    #[arg(long)]
    threads: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assess an image and print the planned actions as JSON
    Plan {
        /// Source image
        #[arg(long)]
        image: PathBuf,
        /// Policy profile (defaults to pipeline.mode)
        #[arg(long)]
        mode: Option<Profile>,
        /// Read raw quality facts from this JSON file instead of running the provider
        #[arg(long)]
        facts: Option<PathBuf>,
    },
    /// Plan, confirm and execute one case
    Run {
        /// Source image
        #[arg(long)]
        image: PathBuf,
        /// Policy profile (defaults to pipeline.mode)
        #[arg(long)]
        mode: Option<Profile>,
        /// Execute without asking for confirmation
        #[arg(long)]
        yes: bool,
        /// Disable the safety guard (also disables learning)
        #[arg(long)]
        no_guard: bool,
        /// Hand the finished case to the learner
        #[arg(long)]
        learn: bool,
        /// Write the text case log to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Print Prometheus metrics after the case
        #[arg(long)]
        metrics: bool,
    },
    /// Parse a case log and print the case record as JSON
    ParseLog {
        /// Case log file
        #[arg(long)]
        log: PathBuf,
    },
    /// Adaptive learner maintenance
    Learn {
        #[command(subcommand)]
        action: LearnAction,
    },
}

#[derive(Subcommand)]
enum LearnAction {
    /// Parse, store and count a finished case log
    Ingest {
        /// Case log file
        #[arg(long)]
        log: PathBuf,
    },
    /// Rebuild the learned policy from every stored case
    Rebuild,
    /// Regenerate and print global statistics
    Stats,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shippers, human-readable on stderr otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    cli::configure_rayon(cli.threads);
    let config = faceguard::config::load(cli.config.as_deref())?;

    match &cli.command {
        Commands::Plan { image, mode, facts } => {
            cli::run_plan(config, image, *mode, facts.as_deref())
        }
        Commands::Run {
            image,
            mode,
            yes,
            no_guard,
            learn,
            audit_log,
            metrics,
        } => cli::run_case(
            config,
            cli::RunOptions {
                image: image.clone(),
                mode: *mode,
                yes: *yes,
                no_guard: *no_guard,
                learn: *learn,
                audit_log: audit_log.clone(),
                metrics: *metrics,
            },
        ),
        Commands::ParseLog { log } => cli::run_parse_log(log),
        Commands::Learn { action } => cli::run_learn(config, action),
    }
}
