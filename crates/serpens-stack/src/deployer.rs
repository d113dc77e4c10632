//! StackDeployer — the stack-level operations the pipeline calls.

use std::sync::Arc;

use tracing::{info, warn};

use serpens_core::ServiceConfig;

use crate::error::{StackError, StackResult};
use crate::orchestrator::{OrchestratorClient, ServiceStatus};
use crate::stack::{DEFAULT_NETWORK, StackDescription};

/// Deploys, removes and inspects service stacks.
#[derive(Clone)]
pub struct StackDeployer {
    client: Arc<dyn OrchestratorClient>,
    network: String,
    image_owner: String,
}

impl StackDeployer {
    /// `image_owner` replaces the owner placeholder in image templates.
    /// When empty, the owner of the requesting repository is used.
    pub fn new(client: Arc<dyn OrchestratorClient>, image_owner: impl Into<String>) -> Self {
        Self {
            client,
            network: DEFAULT_NETWORK.to_string(),
            image_owner: image_owner.into(),
        }
    }

    pub fn with_network(mut self, network: impl Into<String>) -> Self {
        self.network = network.into();
        self
    }

    fn owner<'a>(&'a self, repository_owner: &'a str) -> &'a str {
        if self.image_owner.is_empty() {
            repository_owner
        } else {
            &self.image_owner
        }
    }

    /// The stack `deploy` would submit.
    pub fn describe(
        &self,
        name: &str,
        config: &ServiceConfig,
        tag: &str,
        repository_owner: &str,
    ) -> StackDescription {
        let image = config.image_ref(self.owner(repository_owner), tag);
        StackDescription::build(name, config, &image, &self.network)
    }

    /// Submit the stack for `name` at `tag`.
    ///
    /// Success means the orchestrator accepted the description. Service
    /// health converges afterwards through the stack's own healthcheck.
    pub async fn deploy(
        &self,
        name: &str,
        config: &ServiceConfig,
        tag: &str,
        repository_owner: &str,
    ) -> StackResult<()> {
        if self.owner(repository_owner).is_empty() {
            return Err(StackError::Rejected {
                name: name.to_string(),
                reason: "no image owner configured or known from the repository".to_string(),
            });
        }
        let stack = self.describe(name, config, tag, repository_owner);
        self.client.submit(&stack).await?;
        info!(
            service = name,
            image = stack.image().unwrap_or_default(),
            replicas = config.deployment.replicas,
            "stack deployed"
        );
        Ok(())
    }

    pub async fn remove(&self, name: &str) -> StackResult<()> {
        self.client.remove(name).await?;
        info!(service = name, "stack removed");
        Ok(())
    }

    /// Current state of `name`. Lookup failures read as not running.
    pub async fn status(&self, name: &str) -> ServiceStatus {
        match self.client.status(name).await {
            Ok(status) => status,
            Err(e) => {
                warn!(service = name, error = %e, "failed to get service status");
                ServiceStatus::stopped()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{DockerStackClient, InMemoryOrchestrator};
    use serpens_core::config::parse_document;

    const LIGHT: &str = r#"
version: "1.0"
service:
  name: light
  image: ghcr.io/${GITHUB_REPOSITORY_OWNER}/light:${TAG}
routing:
  domain: light.serpens.local
  port: 5000
resources:
  memory: 128m
"#;

    fn light() -> ServiceConfig {
        ServiceConfig::from_document(parse_document(LIGHT).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn deploy_substitutes_image_and_reports_status() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = StackDeployer::new(orchestrator.clone(), "octo");

        deployer.deploy("light", &light(), "v3", "octo").await.unwrap();

        let status = deployer.status("light").await;
        assert!(status.running);
        assert_eq!(status.replicas, Some(1));
        assert_eq!(status.image.as_deref(), Some("ghcr.io/octo/light:v3"));
    }

    #[tokio::test]
    async fn identical_resubmission_is_noop() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = StackDeployer::new(orchestrator.clone(), "octo");

        deployer.deploy("light", &light(), "v3", "octo").await.unwrap();
        deployer.deploy("light", &light(), "v3", "octo").await.unwrap();
        assert_eq!(orchestrator.submissions(), 1);

        deployer.deploy("light", &light(), "v4", "octo").await.unwrap();
        assert_eq!(orchestrator.submissions(), 2);
    }

    #[tokio::test]
    async fn rejection_propagates() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        orchestrator.set_fail_submit(true);
        let deployer = StackDeployer::new(orchestrator.clone(), "octo");

        let err = deployer.deploy("light", &light(), "v3", "octo").await.unwrap_err();
        assert!(matches!(err, StackError::Rejected { .. }));
        assert!(orchestrator.stack("light").is_none());
    }

    #[tokio::test]
    async fn empty_owner_falls_back_to_repository_owner() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = StackDeployer::new(orchestrator.clone(), "");

        deployer.deploy("light", &light(), "v3", "octo").await.unwrap();
        assert_eq!(
            orchestrator.stack("light").unwrap().image(),
            Some("ghcr.io/octo/light:v3")
        );

        let configured = StackDeployer::new(orchestrator.clone(), "acme");
        let stack = configured.describe("light", &light(), "v3", "octo");
        assert_eq!(stack.image(), Some("ghcr.io/acme/light:v3"));
    }

    #[tokio::test]
    async fn unknown_owner_is_rejected() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = StackDeployer::new(orchestrator.clone(), "");

        let err = deployer.deploy("light", &light(), "v3", "").await.unwrap_err();
        assert!(matches!(err, StackError::Rejected { .. }));
        assert_eq!(orchestrator.submissions(), 0);
    }

    #[tokio::test]
    async fn remove_then_status_is_stopped() {
        let orchestrator = Arc::new(InMemoryOrchestrator::new());
        let deployer = StackDeployer::new(orchestrator.clone(), "octo");

        deployer.deploy("light", &light(), "v3", "octo").await.unwrap();
        deployer.remove("light").await.unwrap();
        assert_eq!(deployer.status("light").await, ServiceStatus::stopped());
    }

    #[tokio::test]
    async fn status_lookup_failure_reads_as_stopped() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = DockerStackClient::new(dir.path().join("no-such-docker"), dir.path());
        let deployer = StackDeployer::new(Arc::new(client), "octo");

        assert_eq!(deployer.status("light").await, ServiceStatus::stopped());
    }

    #[test]
    fn custom_network() {
        let deployer = StackDeployer::new(Arc::new(InMemoryOrchestrator::new()), "octo")
            .with_network("edge");
        let stack = deployer.describe("light", &light(), "v3", "octo");
        assert!(stack.networks.contains_key("edge"));
        assert_eq!(stack.services["light"].networks, vec!["edge"]);
    }
}
