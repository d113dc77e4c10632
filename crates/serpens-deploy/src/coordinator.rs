//! Deploy coordinator — drives one webhook through the pipeline.
//!
//! ```text
//! received → verified → fetched → validated → conflict-checked
//!          → deployed → routed → ported → done
//! ```
//!
//! Any stage can fail, which ends the run. A failure is attributed to the
//! stage being entered. Mutations made by earlier stages stay in place: a
//! stack that deployed but could not be routed keeps running, and the
//! operator clears it with [`DeployCoordinator::teardown`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use serpens_core::Validator;
use serpens_state::{AllocationRegistry, ConflictCheck, PortUpdater, RoutingUpdater};
use serpens_stack::StackDeployer;

use crate::allow::AllowList;
use crate::error::DeployError;
use crate::fetch::ConfigFetcher;

/// Pipeline stages, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Received,
    Verified,
    Fetched,
    Validated,
    ConflictChecked,
    Deployed,
    Routed,
    Ported,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Received => "received",
            Stage::Verified => "verified",
            Stage::Fetched => "fetched",
            Stage::Validated => "validated",
            Stage::ConflictChecked => "conflict-checked",
            Stage::Deployed => "deployed",
            Stage::Routed => "routed",
            Stage::Ported => "ported",
            Stage::Done => "done",
        }
    }

    /// The stage after this one (`Done` is terminal).
    pub fn next(self) -> Stage {
        match self {
            Stage::Received => Stage::Verified,
            Stage::Verified => Stage::Fetched,
            Stage::Fetched => Stage::Validated,
            Stage::Validated => Stage::ConflictChecked,
            Stage::ConflictChecked => Stage::Deployed,
            Stage::Deployed => Stage::Routed,
            Stage::Routed => Stage::Ported,
            Stage::Ported | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deploy request that passed the webhook signature check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployRequest {
    /// `owner/name` of the repository that sent the webhook.
    pub repository: String,
    pub service: String,
    pub tag: String,
}

impl DeployRequest {
    /// Owner half of `repository`, empty when it has no `/`.
    pub fn repository_owner(&self) -> &str {
        self.repository.split_once('/').map_or("", |(owner, _)| owner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Done,
    Failed { stage: Stage, error: String },
}

/// What a pipeline run did.
#[derive(Debug, Clone, Serialize)]
pub struct DeployReport {
    pub service: String,
    pub tag: String,
    /// Stages reached, in order.
    pub stages: Vec<Stage>,
    /// The domain and port already belonged to this service.
    pub redeploy: bool,
    pub outcome: Outcome,
    /// Violations or conflicts behind a rejection.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl DeployReport {
    fn new(request: &DeployRequest) -> Self {
        Self {
            service: request.service.clone(),
            tag: request.tag.clone(),
            stages: vec![Stage::Received],
            redeploy: false,
            outcome: Outcome::Done,
            details: Vec::new(),
        }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(service = %self.service, stage = %stage, "pipeline advanced");
        self.stages.push(stage);
    }

    pub fn last_stage(&self) -> Stage {
        self.stages.last().copied().unwrap_or(Stage::Received)
    }

    pub fn reached(&self, stage: Stage) -> bool {
        self.stages.contains(&stage)
    }

    pub fn is_done(&self) -> bool {
        self.outcome == Outcome::Done
    }

    /// Stage the run failed entering, if it failed.
    pub fn failed_at(&self) -> Option<Stage> {
        match self.outcome {
            Outcome::Failed { stage, .. } => Some(stage),
            Outcome::Done => None,
        }
    }
}

/// What an operator teardown did. Each step runs regardless of the others.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TeardownReport {
    pub service: String,
    pub failures: Vec<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs the deploy pipeline against the configured collaborators.
pub struct DeployCoordinator {
    allow: AllowList,
    fetcher: Arc<dyn ConfigFetcher>,
    validator: Validator,
    registry: AllocationRegistry,
    deployer: StackDeployer,
    routing: RoutingUpdater,
    ports: PortUpdater,
}

impl DeployCoordinator {
    pub fn new(
        allow: AllowList,
        fetcher: Arc<dyn ConfigFetcher>,
        validator: Validator,
        registry: AllocationRegistry,
        deployer: StackDeployer,
        routing: RoutingUpdater,
        ports: PortUpdater,
    ) -> Self {
        Self {
            allow,
            fetcher,
            validator,
            registry,
            deployer,
            routing,
            ports,
        }
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow
    }

    pub fn registry(&self) -> &AllocationRegistry {
        &self.registry
    }

    pub fn deployer(&self) -> &StackDeployer {
        &self.deployer
    }

    /// Run the pipeline on a background task.
    pub fn spawn(self: &Arc<Self>, request: DeployRequest) -> JoinHandle<DeployReport> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move { coordinator.run(request).await })
    }

    /// Run the pipeline to completion or first failure. Never returns an
    /// error: the report carries the outcome.
    pub async fn run(&self, request: DeployRequest) -> DeployReport {
        let mut report = DeployReport::new(&request);
        info!(
            service = %request.service,
            tag = %request.tag,
            repository = %request.repository,
            "deployment started"
        );

        match self.drive(&request, &mut report).await {
            Ok(()) => {
                report.advance(Stage::Done);
                info!(
                    service = %request.service,
                    tag = %request.tag,
                    redeploy = report.redeploy,
                    "deployment complete"
                );
            }
            Err(e) => {
                let stage = report.last_stage().next();
                match &e {
                    DeployError::Validation(violations) => {
                        for violation in violations {
                            warn!(service = %request.service, %violation, "config violation");
                        }
                        report.details = violations.clone();
                    }
                    DeployError::Conflict(conflicts) => {
                        for conflict in conflicts {
                            warn!(service = %request.service, %conflict, "allocation conflict");
                        }
                        report.details = conflicts.iter().map(ToString::to_string).collect();
                    }
                    _ => {}
                }
                error!(
                    service = %request.service,
                    tag = %request.tag,
                    stage = %stage,
                    error = %e,
                    "deployment failed"
                );
                report.outcome = Outcome::Failed {
                    stage,
                    error: e.to_string(),
                };
            }
        }
        report
    }

    async fn drive(&self, req: &DeployRequest, report: &mut DeployReport) -> Result<(), DeployError> {
        if !self.allow.allows(&req.repository) {
            return Err(DeployError::Auth(format!(
                "repository {} is not allowed",
                req.repository
            )));
        }
        report.advance(Stage::Verified);

        let content = self
            .fetcher
            .fetch(&req.repository, &req.service)
            .await
            .map_err(|e| DeployError::external(Stage::Fetched, e))?;
        report.advance(Stage::Fetched);

        let config = self.validator.check(&content).map_err(DeployError::Validation)?;
        if config.name() != req.service {
            return Err(DeployError::Validation(vec![format!(
                "service.name: '{}' does not match the requested service '{}'",
                config.name(),
                req.service
            )]));
        }
        report.advance(Stage::Validated);

        let domain = config.routing.domain.as_str();
        let port = config.routing.port;
        report.redeploy = match self.registry.is_owned_by(&req.service, domain, port) {
            Ok(owned) => owned,
            Err(e) => {
                warn!(service = %req.service, error = %e, "could not read allocations for redeploy check");
                false
            }
        };
        if report.redeploy {
            debug!(service = %req.service, domain, port, "redeploy of owned allocation, skipping conflict check");
        } else {
            match self.registry.check_conflict(&req.service, domain, port) {
                ConflictCheck::Clear => {}
                ConflictCheck::Conflicts(conflicts) => return Err(DeployError::Conflict(conflicts)),
                ConflictCheck::Unknown { reason } => {
                    warn!(service = %req.service, %reason, "conflict check inconclusive, proceeding");
                }
            }
        }
        report.advance(Stage::ConflictChecked);

        self.deployer
            .deploy(&req.service, &config, &req.tag, req.repository_owner())
            .await
            .map_err(|e| DeployError::external(Stage::Deployed, e))?;
        report.advance(Stage::Deployed);

        self.routing
            .add(&req.service, &config.routing)
            .await
            .map_err(|e| DeployError::external(Stage::Routed, e))?;
        report.advance(Stage::Routed);

        self.ports
            .add(&req.service, port)
            .await
            .map_err(|e| DeployError::external(Stage::Ported, e))?;
        report.advance(Stage::Ported);

        Ok(())
    }

    /// Remove `service`'s stack, its routing for `domain`, and its ports.
    pub async fn teardown(&self, service: &str, domain: &str) -> TeardownReport {
        let mut report = TeardownReport {
            service: service.to_string(),
            failures: Vec::new(),
        };

        if let Err(e) = self.deployer.remove(service).await {
            error!(service, error = %e, "failed to remove stack");
            report.failures.push(format!("stack: {e}"));
        }
        if let Err(e) = self.routing.remove(service, domain).await {
            error!(service, domain, error = %e, "failed to remove routing");
            report.failures.push(format!("routing: {e}"));
        }
        if let Err(e) = self.ports.remove(service).await {
            error!(service, error = %e, "failed to withdraw ports");
            report.failures.push(format!("ports: {e}"));
        }

        if report.is_clean() {
            info!(service, domain, "service torn down");
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::StaticConfigFetcher;
    use serpens_core::PlatformPolicy;
    use serpens_stack::InMemoryOrchestrator;
    use serpens_state::{FileStore, RecordingReloader};
    use tempfile::TempDir;

    const REPO: &str = "octo/serpens";

    const ROUTING: &str = "tunnel: abc\ningress:\n- hostname: docs.serpens.local\n  service: http://docs:4000\n- service: http_status:404\n";

    fn config(name: &str, domain: &str, port: u32) -> String {
        format!(
            r#"version: "1.0"
service:
  name: {name}
  image: ghcr.io/${{GITHUB_REPOSITORY_OWNER}}/{name}:${{TAG}}
routing:
  domain: {domain}
  port: {port}
resources:
  memory: 128m
healthcheck:
  endpoint: /health
"#
        )
    }

    struct Harness {
        _dir: TempDir,
        fetcher: Arc<StaticConfigFetcher>,
        orchestrator: Arc<InMemoryOrchestrator>,
        reloader: Arc<RecordingReloader>,
        routing: RoutingUpdater,
        ports: PortUpdater,
        coordinator: DeployCoordinator,
    }

    fn harness() -> Harness {
        harness_with_owner("octo")
    }

    fn harness_with_owner(image_owner: &str) -> Harness {
        let dir = TempDir::new().unwrap();
        let routing_store = FileStore::new(
            dir.path().join("config.yml"),
            dir.path().join("backups"),
            "config",
            "yml",
        );
        let ports_store = FileStore::new(
            dir.path().join("ports.json"),
            dir.path().join("backups"),
            "ports",
            "json",
        );
        std::fs::write(routing_store.path(), ROUTING).unwrap();

        let fetcher = Arc::new(StaticConfigFetcher::new());
        fetcher.insert(REPO, "light", config("light", "light.serpens.local", 5000));
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let reloader = Arc::new(RecordingReloader::default());
        let routing = RoutingUpdater::new(routing_store.clone(), reloader.clone());
        let ports = PortUpdater::new(ports_store.clone());
        let policy = PlatformPolicy::default();

        let coordinator = DeployCoordinator::new(
            AllowList::new([REPO]),
            fetcher.clone(),
            Validator::new(policy.clone()).unwrap(),
            AllocationRegistry::new(routing_store, ports_store, policy),
            StackDeployer::new(orchestrator.clone(), image_owner),
            routing.clone(),
            ports.clone(),
        );

        Harness {
            _dir: dir,
            fetcher,
            orchestrator,
            reloader,
            routing,
            ports,
            coordinator,
        }
    }

    fn request(service: &str, tag: &str) -> DeployRequest {
        DeployRequest {
            repository: REPO.to_string(),
            service: service.to_string(),
            tag: tag.to_string(),
        }
    }

    #[tokio::test]
    async fn happy_path_reaches_done() {
        let h = harness();
        let report = h.coordinator.run(request("light", "v3")).await;

        assert!(report.is_done(), "{report:?}");
        assert_eq!(
            report.stages,
            vec![
                Stage::Received,
                Stage::Verified,
                Stage::Fetched,
                Stage::Validated,
                Stage::ConflictChecked,
                Stage::Deployed,
                Stage::Routed,
                Stage::Ported,
                Stage::Done,
            ]
        );
        assert!(!report.redeploy);

        let stack = h.orchestrator.stack("light").unwrap();
        assert_eq!(stack.image(), Some("ghcr.io/octo/light:v3"));
        assert_eq!(h.routing.current().unwrap().rules_for("light.serpens.local").count(), 1);
        assert!(h.ports.current().unwrap().owner_of(5000).is_some());
        assert_eq!(h.reloader.reloads(), 1);
    }

    #[tokio::test]
    async fn unset_image_owner_uses_repository_owner() {
        let h = harness_with_owner("");
        let report = h.coordinator.run(request("light", "v3")).await;

        assert!(report.is_done(), "{report:?}");
        assert_eq!(
            h.orchestrator.stack("light").unwrap().image(),
            Some("ghcr.io/octo/light:v3")
        );
    }

    #[test]
    fn repository_owner_split() {
        assert_eq!(request("light", "v3").repository_owner(), "octo");
        let mut bare = request("light", "v3");
        bare.repository = "serpens".to_string();
        assert_eq!(bare.repository_owner(), "");
    }

    #[tokio::test]
    async fn disallowed_repository_touches_nothing() {
        let h = harness();
        let mut req = request("light", "v3");
        req.repository = "mallory/serpens".to_string();

        let report = h.coordinator.run(req).await;

        assert_eq!(report.failed_at(), Some(Stage::Verified));
        assert_eq!(h.fetcher.fetches(), 0);
        assert_eq!(h.orchestrator.submissions(), 0);
    }

    #[tokio::test]
    async fn missing_config_fails_at_fetch() {
        let h = harness();
        let report = h.coordinator.run(request("dark", "v1")).await;
        assert_eq!(report.failed_at(), Some(Stage::Fetched));
        assert_eq!(h.orchestrator.submissions(), 0);
    }

    #[tokio::test]
    async fn out_of_range_port_never_reaches_deployer() {
        let h = harness();
        h.fetcher.insert(REPO, "light", config("light", "light.serpens.local", 70000));

        let report = h.coordinator.run(request("light", "v3")).await;

        assert_eq!(report.failed_at(), Some(Stage::Validated));
        assert!(report.details.iter().any(|v| v.contains("3000") && v.contains("9999")));
        assert_eq!(h.orchestrator.submissions(), 0);
        assert_eq!(h.reloader.reloads(), 0);
    }

    #[tokio::test]
    async fn config_for_another_service_is_rejected() {
        let h = harness();
        h.fetcher.insert(REPO, "light", config("dark", "dark.serpens.local", 5000));

        let report = h.coordinator.run(request("light", "v3")).await;
        assert_eq!(report.failed_at(), Some(Stage::Validated));
    }

    #[tokio::test]
    async fn second_deploy_takes_redeploy_path() {
        let h = harness();
        assert!(h.coordinator.run(request("light", "v3")).await.is_done());

        let report = h.coordinator.run(request("light", "v4")).await;

        assert!(report.is_done(), "{report:?}");
        assert!(report.redeploy);
        assert_eq!(h.orchestrator.submissions(), 2);
        assert_eq!(
            h.orchestrator.stack("light").unwrap().image(),
            Some("ghcr.io/octo/light:v4")
        );
        assert_eq!(h.routing.current().unwrap().rules_for("light.serpens.local").count(), 1);
    }

    #[tokio::test]
    async fn taken_domain_is_a_conflict() {
        let h = harness();
        h.fetcher.insert(REPO, "light", config("light", "docs.serpens.local", 5000));

        let report = h.coordinator.run(request("light", "v3")).await;

        assert_eq!(report.failed_at(), Some(Stage::ConflictChecked));
        assert!(!report.redeploy);
        assert_eq!(report.details.len(), 1);
        assert!(report.details[0].contains("docs-2.serpens.local"));
        assert_eq!(h.orchestrator.submissions(), 0);
    }

    #[tokio::test]
    async fn orchestrator_rejection_stops_before_routing() {
        let h = harness();
        h.orchestrator.set_fail_submit(true);

        let report = h.coordinator.run(request("light", "v3")).await;

        assert_eq!(report.failed_at(), Some(Stage::Deployed));
        assert_eq!(std::fs::read_to_string(h.routing.store().path()).unwrap(), ROUTING);
        assert!(h.ports.current().unwrap().ports.is_empty());
    }

    #[tokio::test]
    async fn routing_failure_leaves_stack_and_skips_ports() {
        let h = harness();
        h.reloader.set_failing(true);

        let report = h.coordinator.run(request("light", "v3")).await;

        assert_eq!(report.failed_at(), Some(Stage::Routed));
        assert!(h.orchestrator.stack("light").is_some());
        assert_eq!(std::fs::read_to_string(h.routing.store().path()).unwrap(), ROUTING);
        assert!(!h.ports.store().path().exists());
    }

    #[tokio::test]
    async fn unreadable_port_table_does_not_block_conflict_check() {
        let h = harness();
        std::fs::write(h.ports.store().path(), "{ not json").unwrap();

        let report = h.coordinator.run(request("light", "v3")).await;

        assert!(report.reached(Stage::ConflictChecked));
        assert!(report.reached(Stage::Routed));
        assert_eq!(report.failed_at(), Some(Stage::Ported));
    }

    #[tokio::test]
    async fn teardown_clears_everything() {
        let h = harness();
        assert!(h.coordinator.run(request("light", "v3")).await.is_done());

        let report = h.coordinator.teardown("light", "light.serpens.local").await;

        assert!(report.is_clean(), "{report:?}");
        assert!(h.orchestrator.stack("light").is_none());
        assert_eq!(
            h.routing.current().unwrap(),
            serpens_state::RoutingTable::parse(ROUTING).unwrap()
        );
        assert!(h.ports.current().unwrap().ports.is_empty());
    }

    #[tokio::test]
    async fn teardown_steps_are_independent() {
        let h = harness();
        assert!(h.coordinator.run(request("light", "v3")).await.is_done());
        h.orchestrator.set_fail_remove(true);

        let report = h.coordinator.teardown("light", "light.serpens.local").await;

        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].starts_with("stack:"));
        assert!(h.ports.current().unwrap().ports.is_empty());
    }

    #[tokio::test]
    async fn spawned_run_reports_through_handle() {
        let h = harness();
        let coordinator = Arc::new(h.coordinator);
        let report = coordinator.spawn(request("light", "v3")).await.unwrap();
        assert!(report.is_done());
    }

    #[test]
    fn stage_order_and_names() {
        assert_eq!(Stage::ConflictChecked.to_string(), "conflict-checked");
        assert_eq!(Stage::Received.next(), Stage::Verified);
        assert_eq!(Stage::Done.next(), Stage::Done);
        assert!(Stage::Deployed < Stage::Routed);
    }
}
