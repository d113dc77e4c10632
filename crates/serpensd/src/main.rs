//! serpensd — the Serpens deployment daemon.
//!
//! Runs the signed deploy webhook and exposes the operator commands that
//! work against the same config files:
//!
//! ```text
//! serpensd serve
//! serpensd validate services/light/serpens.yml
//! serpensd status light
//! serpensd undeploy light --domain light.serpens.local
//! serpensd allocations
//! ```

mod app;
mod config;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use serpens_core::Validator;

use crate::config::DaemonConfig;

const DEFAULT_FILTER: &str = "info,serpensd=debug,serpens=debug";

#[derive(Parser)]
#[command(name = "serpensd", about = "Serpens deployment daemon")]
struct Cli {
    /// Daemon config file.
    #[arg(long, global = true, default_value = "/etc/serpens/serpens.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the webhook, allocation and health endpoints.
    Serve {
        /// Overrides `listen` from the config file.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Validate a local serpens.yml and print every violation.
    Validate { file: PathBuf },
    /// Show what the orchestrator reports for a service.
    Status { service: String },
    /// Remove a service's stack, routing and published ports.
    Undeploy {
        service: String,
        /// Domain whose ingress rules are removed.
        #[arg(long)]
        domain: String,
    },
    /// Print the current domain and port allocations.
    Allocations,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: &Path) -> Result<DaemonConfig> {
    if path.exists() {
        DaemonConfig::from_file(path)
    } else {
        warn!(path = ?path, "config file not found, using defaults");
        Ok(DaemonConfig::default())
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = load_config(&cli.config)?;

    match cli.command {
        Command::Serve { listen } => serve(config, listen).await,
        Command::Validate { file } => validate(&config, &file),
        Command::Status { service } => status(&config, &service).await,
        Command::Undeploy { service, domain } => undeploy(&config, &service, &domain).await,
        Command::Allocations => allocations(&config),
    }
}

async fn serve(config: DaemonConfig, listen: Option<SocketAddr>) -> Result<ExitCode> {
    info!("Serpens daemon starting");

    let secret = config.webhook_secret()?;
    let coordinator = Arc::new(app::build_coordinator(&config)?);
    if coordinator.allow_list().is_empty() {
        warn!("allow-list is empty, every webhook will be refused");
    }

    let router = serpens_api::build_router(serpens_api::ApiState::new(coordinator, secret));
    let addr = listen.unwrap_or(config.listen);

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    info!("Serpens daemon stopped");
    Ok(ExitCode::SUCCESS)
}

fn validate(config: &DaemonConfig, file: &Path) -> Result<ExitCode> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let validator = Validator::new(config.policy())?;

    match validator.check(&content) {
        Ok(service) => {
            println!(
                "{}: valid ({} on {}:{})",
                file.display(),
                service.name(),
                service.routing.domain,
                service.routing.port
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(violations) => {
            println!("{}: {} violation(s)", file.display(), violations.len());
            for violation in &violations {
                println!("  - {violation}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn status(config: &DaemonConfig, service: &str) -> Result<ExitCode> {
    let status = app::stack_deployer(config).status(service).await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(ExitCode::SUCCESS)
}

async fn undeploy(config: &DaemonConfig, service: &str, domain: &str) -> Result<ExitCode> {
    let coordinator = app::build_coordinator(config)?;
    let report = coordinator.teardown(service, domain).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.is_clean() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn allocations(config: &DaemonConfig) -> Result<ExitCode> {
    let registry = serpens_state::AllocationRegistry::new(
        app::routing_store(config),
        app::ports_store(config),
        config.policy(),
    );
    let allocations = registry.current_allocations()?;
    println!("{}", serde_json::to_string_pretty(&allocations)?);
    Ok(ExitCode::SUCCESS)
}
