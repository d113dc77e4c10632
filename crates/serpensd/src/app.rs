//! Wiring: builds the pipeline collaborators from a [`DaemonConfig`].

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use serpens_core::Validator;
use serpens_deploy::{DeployCoordinator, GitHubRawFetcher};
use serpens_stack::{DockerStackClient, StackDeployer};
use serpens_state::{AllocationRegistry, FileStore, PortUpdater, RoutingUpdater, SystemctlReloader};

use crate::config::DaemonConfig;

pub fn routing_store(config: &DaemonConfig) -> FileStore {
    FileStore::new(&config.routing.path, &config.routing.backup_dir, "config", "yml")
}

pub fn ports_store(config: &DaemonConfig) -> FileStore {
    FileStore::new(&config.ports.path, &config.ports.backup_dir, "ports", "json")
}

pub fn stack_deployer(config: &DaemonConfig) -> StackDeployer {
    let client = DockerStackClient::new(&config.stack.docker_binary, &config.stack.work_dir);
    StackDeployer::new(Arc::new(client), &config.image_owner).with_network(&config.stack.network)
}

/// Assemble the production coordinator.
pub fn build_coordinator(config: &DaemonConfig) -> Result<DeployCoordinator> {
    let policy = config.policy();
    let validator = Validator::new(policy.clone()).context("failed to build validator")?;
    let fetcher = GitHubRawFetcher::new(&config.config_base_url, &config.config_branch)
        .context("failed to build config fetcher")?;
    let allow = config.allow_list()?;

    // Clones share the per-file writer locks.
    let routing_store = routing_store(config);
    let ports_store = ports_store(config);

    let reloader = SystemctlReloader::new(&config.routing.proxy_unit, config.routing.use_sudo);
    let routing = RoutingUpdater::new(routing_store.clone(), Arc::new(reloader));
    let ports = PortUpdater::new(ports_store.clone());
    let registry = AllocationRegistry::new(routing_store, ports_store, policy);

    info!(
        repositories = allow.len(),
        domain = %config.platform_domain,
        routing = ?config.routing.path,
        ports = ?config.ports.path,
        "deploy pipeline configured"
    );

    Ok(DeployCoordinator::new(
        allow,
        Arc::new(fetcher),
        validator,
        registry,
        stack_deployer(config),
        routing,
        ports,
    ))
}
