//! serpens.toml daemon configuration.
//!
//! Every field has a default, so an empty file (or no file) yields a
//! working single-host setup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use serpens_core::PlatformPolicy;
use serpens_deploy::AllowList;

/// Overrides `webhook_secret_file` when set.
pub const SECRET_ENV: &str = "SERPENS_WEBHOOK_SECRET";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen: SocketAddr,
    pub webhook_secret_file: PathBuf,
    pub allowed_repositories: Vec<String>,
    /// JSON file `{"repositories": [...]}`, merged with `allowed_repositories`.
    pub allowed_repositories_file: Option<PathBuf>,
    pub platform_domain: String,
    /// Substituted for the owner placeholder in image templates. Empty
    /// means the owner of the repository that sent the webhook.
    pub image_owner: String,
    pub config_branch: String,
    pub config_base_url: String,
    pub routing: RoutingSection,
    pub ports: PortsSection,
    pub stack: StackSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingSection {
    pub path: PathBuf,
    pub backup_dir: PathBuf,
    /// systemd unit restarted after each ingress change.
    pub proxy_unit: String,
    pub use_sudo: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsSection {
    pub path: PathBuf,
    pub backup_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackSection {
    pub network: String,
    pub docker_binary: PathBuf,
    /// Where stack files are staged before submission.
    pub work_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8000)),
            webhook_secret_file: PathBuf::from("/app/configs/webhook_secret.txt"),
            allowed_repositories: Vec::new(),
            allowed_repositories_file: None,
            platform_domain: "serpens.local".to_string(),
            image_owner: String::new(),
            config_branch: serpens_deploy::fetch::DEFAULT_BRANCH.to_string(),
            config_base_url: serpens_deploy::fetch::DEFAULT_BASE_URL.to_string(),
            routing: RoutingSection::default(),
            ports: PortsSection::default(),
            stack: StackSection::default(),
        }
    }
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/etc/cloudflared/config.yml"),
            backup_dir: PathBuf::from("/etc/cloudflared/backups"),
            proxy_unit: "cloudflared".to_string(),
            use_sudo: true,
        }
    }
}

impl Default for PortsSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/www/port-config/ports.json"),
            backup_dir: PathBuf::from("/var/www/port-config/backups"),
        }
    }
}

impl Default for StackSection {
    fn default() -> Self {
        Self {
            network: serpens_stack::stack::DEFAULT_NETWORK.to_string(),
            docker_binary: PathBuf::from("docker"),
            work_dir: std::env::temp_dir().join("serpens"),
        }
    }
}

#[derive(Deserialize)]
struct RepositoriesFile {
    repositories: Vec<String>,
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn policy(&self) -> PlatformPolicy {
        PlatformPolicy::with_domain(&self.platform_domain)
    }

    /// The webhook key: `$SERPENS_WEBHOOK_SECRET`, else the secret file.
    pub fn webhook_secret(&self) -> Result<String> {
        self.secret_from(std::env::var(SECRET_ENV).ok())
    }

    fn secret_from(&self, env: Option<String>) -> Result<String> {
        if let Some(secret) = env.filter(|s| !s.trim().is_empty()) {
            return Ok(secret.trim().to_string());
        }
        let secret = std::fs::read_to_string(&self.webhook_secret_file).with_context(|| {
            format!(
                "failed to read webhook secret {}",
                self.webhook_secret_file.display()
            )
        })?;
        Ok(secret.trim().to_string())
    }

    /// Inline repositories plus those in `allowed_repositories_file`.
    pub fn allow_list(&self) -> Result<AllowList> {
        let mut repositories = self.allowed_repositories.clone();
        if let Some(path) = &self.allowed_repositories_file {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file: RepositoriesFile = serde_json::from_str(&content)
                .with_context(|| format!("invalid allow-list {}", path.display()))?;
            repositories.extend(file.repositories);
        }
        Ok(AllowList::new(repositories))
    }
}
