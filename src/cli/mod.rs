//! Command-line interface for auditrun.
//!
//! Provides commands for serving the HTTP/WebSocket API, running the
//! pipeline headless, and inspecting the resolved configuration.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::LogObserver;
use crate::config::{self, ResolvedConfig};
use crate::core::Orchestrator;
use crate::domain::{RunConfig, RunStatus, StepName};
use crate::server;

/// auditrun - storefront audit pipeline orchestrator
#[derive(Parser, Debug)]
#[command(name = "auditrun")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (skips .auditrun/config.yaml discovery)
    #[arg(long, global = true, env = "AUDITRUN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Project root the workers run in
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the HTTP API and the live event stream
    Serve {
        /// Address to bind to (e.g. 127.0.0.1:8000)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Run the pipeline once in the foreground, logging every event
    Run {
        /// Niche to audit (defaults to the configured niche)
        #[arg(short, long)]
        niche: Option<String>,

        /// Maximum number of sites to process
        #[arg(short, long)]
        max_sites: Option<u32>,
    },

    /// Show resolved configuration
    Config,

    /// List the pipeline steps and the command each one runs
    Steps,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let mut cfg = config::load_config(self.config.as_deref())?;
        if let Some(root) = self.root {
            cfg.project_root = root;
        }

        match self.command {
            Commands::Serve { bind } => {
                if let Some(bind) = bind {
                    cfg.bind = bind;
                }
                server::start_server(cfg).await
            }
            Commands::Run { niche, max_sites } => {
                let run_config = RunConfig {
                    niche: niche.unwrap_or_else(|| cfg.defaults.niche.clone()),
                    max_sites: max_sites.unwrap_or(cfg.defaults.max_sites),
                };
                run_headless(&cfg, run_config).await
            }
            Commands::Config => {
                show_config(&cfg);
                Ok(())
            }
            Commands::Steps => {
                list_steps(&cfg);
                Ok(())
            }
        }
    }
}

/// Run the pipeline without a server; Ctrl-C requests a stop
async fn run_headless(cfg: &ResolvedConfig, run_config: RunConfig) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(cfg));
    orchestrator
        .hub()
        .connect(Arc::new(LogObserver::new()))
        .await
        .context("Failed to attach event logger")?;

    let outcome = orchestrator
        .start(run_config)
        .await
        .context("Invalid run configuration")?;
    eprintln!("{}", outcome.message);

    tokio::select! {
        _ = orchestrator.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nStopping...");
            orchestrator.stop();
            orchestrator.wait_idle().await;
        }
    }

    let state = orchestrator.status();
    println!("Run ID: {}", state.run_id.map(|id| id.to_string()).unwrap_or_default());
    println!("Status: {}", state.status);
    println!("\nStep statuses:");
    for (step, step_state) in &state.steps {
        match &step_state.error {
            Some(error) => println!("  {:<13} {} ({})", step.as_str(), step_state.status, error),
            None => println!("  {:<13} {}", step.as_str(), step_state.status),
        }
    }

    match state.status {
        RunStatus::Failed => anyhow::bail!(
            "{}",
            state.error.unwrap_or_else(|| "Pipeline failed".to_string())
        ),
        _ => Ok(()),
    }
}

fn show_config(cfg: &ResolvedConfig) {
    println!("auditrun configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!("Project root: {}", cfg.project_root.display());
    println!();
    println!("Server:");
    println!("  Bind:            {}", cfg.bind);
    println!("  Max connections: {}", cfg.max_connections);
    println!("  CORS origins:    {}", cfg.cors_origins.join(", "));
    println!();
    println!("Run defaults:");
    println!("  Niche:     {}", cfg.defaults.niche);
    println!("  Max sites: {}", cfg.defaults.max_sites);
    println!();
    println!("Limits:");
    match cfg.step_timeout {
        Some(timeout) => println!("  Step timeout: {}s", timeout.as_secs()),
        None => println!("  Step timeout: (none)"),
    }
}

fn list_steps(cfg: &ResolvedConfig) {
    println!("{:<4} {:<13} COMMAND", "#", "STEP");
    println!("{}", "-".repeat(75));

    for step in StepName::ALL {
        let invocation = cfg
            .workers
            .resolve(step, &cfg.defaults, &cfg.project_root);
        let marker = if invocation.worker_path.exists() {
            ""
        } else {
            "  (missing, will be skipped)"
        };
        println!(
            "{:<4} {:<13} {}{}",
            step.index() + 1,
            step.as_str(),
            invocation.command_line(),
            marker
        );
    }
}
