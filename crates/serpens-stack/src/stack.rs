//! Compose-format stack descriptions.
//!
//! One service per stack, attached to the shared overlay network, pinned to
//! a manager node, with resource limits, a restart policy and a healthcheck
//! derived from `serpens.yml`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use serpens_core::ServiceConfig;
use serpens_core::config::DEFAULT_VOLUME_SIZE;

use crate::error::{StackError, StackResult};

pub const COMPOSE_VERSION: &str = "3.8";
pub const DEFAULT_NETWORK: &str = "serpens-net";
pub const PLACEMENT_CONSTRAINT: &str = "node.role==manager";

/// A complete stack, ready to hand to an orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackDescription {
    /// Stack namespace. Not part of the compose document.
    #[serde(skip)]
    pub name: String,
    pub version: String,
    pub services: BTreeMap<String, StackService>,
    pub networks: BTreeMap<String, NetworkSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub volumes: BTreeMap<String, VolumeSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackService {
    pub image: String,
    pub networks: Vec<String>,
    pub deploy: DeploySpec,
    pub healthcheck: HealthcheckSpec,
    #[serde(default)]
    pub environment: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploySpec {
    pub replicas: u32,
    pub placement: Placement,
    pub resources: Resources,
    pub restart_policy: RestartPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub constraints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub limits: Limits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub memory: String,
    pub cpus: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub condition: String,
    pub delay: String,
    pub max_attempts: u32,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            condition: "on-failure".to_string(),
            delay: "5s".to_string(),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthcheckSpec {
    pub test: Vec<String>,
    pub interval: String,
    pub timeout: String,
    pub retries: u32,
    pub start_period: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    pub driver: String,
    pub driver_opts: BTreeMap<String, String>,
}

impl StackDescription {
    /// Build the stack for `name` running `image`.
    pub fn build(name: &str, config: &ServiceConfig, image: &str, network: &str) -> Self {
        let hc = &config.healthcheck;
        let healthcheck = HealthcheckSpec {
            test: vec![
                "CMD".to_string(),
                "curl".to_string(),
                "-f".to_string(),
                format!("http://localhost:{}{}", config.routing.port, hc.endpoint()),
            ],
            interval: hc.interval().to_string(),
            timeout: hc.timeout().to_string(),
            retries: hc.retries(),
            start_period: hc.start_period().to_string(),
        };

        let mut volumes = BTreeMap::new();
        let mut mounts = Vec::with_capacity(config.volumes.len());
        for vol in &config.volumes {
            let vol_name = format!("{name}_{}", vol.name);
            let size = vol.size.as_deref().unwrap_or(DEFAULT_VOLUME_SIZE);
            volumes.insert(
                vol_name.clone(),
                VolumeSpec {
                    driver: "local".to_string(),
                    driver_opts: BTreeMap::from([("size".to_string(), size.to_string())]),
                },
            );
            let mode = if vol.readonly { "ro" } else { "rw" };
            mounts.push(format!("{vol_name}:{}:{mode}", vol.path));
        }

        let service = StackService {
            image: image.to_string(),
            networks: vec![network.to_string()],
            deploy: DeploySpec {
                replicas: config.deployment.replicas,
                placement: Placement {
                    constraints: vec![PLACEMENT_CONSTRAINT.to_string()],
                },
                resources: Resources {
                    limits: Limits {
                        memory: config.resources.memory.clone(),
                        cpus: config.cpu().to_string(),
                    },
                },
                restart_policy: RestartPolicy::default(),
            },
            healthcheck,
            environment: config.environment.clone(),
            volumes: mounts,
        };

        Self {
            name: name.to_string(),
            version: COMPOSE_VERSION.to_string(),
            services: BTreeMap::from([(name.to_string(), service)]),
            networks: BTreeMap::from([(network.to_string(), NetworkSpec { external: true })]),
            volumes,
        }
    }

    /// The image of the stack's service.
    pub fn image(&self) -> Option<&str> {
        self.services.get(&self.name).map(|s| s.image.as_str())
    }

    pub fn replicas(&self) -> Option<u32> {
        self.services.get(&self.name).map(|s| s.deploy.replicas)
    }

    pub fn to_yaml(&self) -> StackResult<String> {
        serde_yaml::to_string(self).map_err(|e| StackError::Serialize(e.to_string()))
    }
}
