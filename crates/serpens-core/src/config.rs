//! serpens.yml configuration model.
//!
//! A config arrives as YAML text fetched from the service repository. It is
//! first parsed into an untyped document (so the validator can report every
//! problem at once), then converted into [`ServiceConfig`].

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::policy::{OWNER_PLACEHOLDER, TAG_PLACEHOLDER};

/// Healthcheck endpoint used when the config omits one.
pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";
pub const DEFAULT_HEALTH_INTERVAL: &str = "30s";
pub const DEFAULT_HEALTH_TIMEOUT: &str = "5s";
pub const DEFAULT_HEALTH_RETRIES: u32 = 3;
/// Startup grace period before failed probes count.
pub const DEFAULT_HEALTH_START_PERIOD: &str = "10s";
pub const DEFAULT_CPU: f64 = 0.5;
pub const DEFAULT_VOLUME_SIZE: &str = "1Gi";

/// Errors raised while parsing or converting a config document.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid validation pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A single deployable unit, as declared in `services/<name>/serpens.yml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
    pub service: ServiceSection,
    pub routing: RoutingConfig,
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub deployment: DeploymentConfig,
    #[serde(default)]
    pub healthcheck: HealthcheckConfig,
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    #[serde(default)]
    pub environment: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    pub name: String,
    /// Image reference template, e.g. `ghcr.io/${GITHUB_REPOSITORY_OWNER}/light:${TAG}`.
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutingConfig {
    pub domain: String,
    pub port: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathRoute>,
}

/// A path-specific route under the service domain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PathRoute {
    pub path: String,
    /// Backend port for this path; defaults to the service port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourcesConfig {
    /// `<int><m|M|g|G>`.
    pub memory: String,
    #[serde(default, deserialize_with = "optional_number")]
    pub cpu: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentConfig {
    #[serde(default = "default_replicas")]
    pub replicas: u32,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cap_add: Option<Vec<String>>,
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
            privileged: false,
            network_mode: None,
            cap_add: None,
        }
    }
}

fn default_replicas() -> u32 {
    1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HealthcheckConfig {
    pub endpoint: Option<String>,
    pub interval: Option<String>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    /// Startup grace period.
    pub initial_delay: Option<String>,
}

impl HealthcheckConfig {
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_deref().unwrap_or(DEFAULT_HEALTH_ENDPOINT)
    }

    pub fn interval(&self) -> &str {
        self.interval.as_deref().unwrap_or(DEFAULT_HEALTH_INTERVAL)
    }

    pub fn timeout(&self) -> &str {
        self.timeout.as_deref().unwrap_or(DEFAULT_HEALTH_TIMEOUT)
    }

    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_HEALTH_RETRIES)
    }

    pub fn start_period(&self) -> &str {
        self.initial_delay
            .as_deref()
            .unwrap_or(DEFAULT_HEALTH_START_PERIOD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeConfig {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default)]
    pub readonly: bool,
}

impl ServiceConfig {
    /// Convert an already-parsed document.
    pub fn from_document(doc: serde_yaml::Value) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_value(doc)?)
    }

    pub fn name(&self) -> &str {
        &self.service.name
    }

    pub fn cpu(&self) -> f64 {
        self.resources.cpu.unwrap_or(DEFAULT_CPU)
    }

    /// Substitute the owner and tag placeholders in the image template.
    pub fn image_ref(&self, owner: &str, tag: &str) -> String {
        self.service
            .image
            .replace(OWNER_PLACEHOLDER, owner)
            .replace(TAG_PLACEHOLDER, tag)
    }
}

/// Parse YAML text into an untyped document.
pub fn parse_document(content: &str) -> Result<serde_yaml::Value, ConfigError> {
    Ok(serde_yaml::from_str(content)?)
}

/// Accept `version: "1.0"` as well as the bare YAML float `version: 1.0`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Str(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Str(s) => s,
        Raw::Int(i) => i.to_string(),
        Raw::Float(f) => format!("{f:?}"),
    })
}

/// Accept `cpu: 0.5` as well as `cpu: "0.5"`.
fn optional_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(f64),
        Str(String),
    }

    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Num(n)) => Ok(Some(n)),
        Some(Raw::Str(s)) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
