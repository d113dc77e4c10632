//! Tunnel ingress table and the updater that edits it.
//!
//! The table is the tunnel daemon's YAML config. Only `ingress` is touched;
//! other top-level keys (tunnel id, credentials file) are carried through
//! verbatim. Rules are matched first-to-last by the daemon, so:
//!
//! - exactly one catch-all rule exists, and it is last;
//! - a domain's path rules come before its bare-hostname rule, longest
//!   path first.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use serpens_core::RoutingConfig;

use crate::error::{StateError, StateResult};
use crate::reload::ProxyReloader;
use crate::store::FileStore;

/// Backend of the terminal rule.
pub const CATCH_ALL_SERVICE: &str = "http_status:404";

/// One ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub service: String,
}

impl IngressRule {
    pub fn catch_all() -> Self {
        Self {
            hostname: None,
            path: None,
            service: CATCH_ALL_SERVICE.to_string(),
        }
    }

    /// A rule routing `hostname` (and optionally `path`) to `http://<service>:<port>`.
    pub fn to_service(hostname: &str, path: Option<&str>, service: &str, port: u16) -> Self {
        Self {
            hostname: Some(hostname.to_string()),
            path: path.map(str::to_string),
            service: format!("http://{service}:{port}"),
        }
    }

    /// A rule with neither hostname nor path matches everything.
    pub fn is_catch_all(&self) -> bool {
        self.hostname.is_none() && self.path.is_none()
    }

    /// Backend host and port parsed from `scheme://host:port`.
    pub fn target(&self) -> Option<(&str, u16)> {
        let (_, rest) = self.service.split_once("://")?;
        let authority = rest.split('/').next()?;
        let (host, port) = authority.rsplit_once(':')?;
        Some((host, port.parse().ok()?))
    }
}

/// The whole ingress config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    /// Keys other than `ingress`, preserved in order.
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
    #[serde(default)]
    pub ingress: Vec<IngressRule>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self {
            extra: serde_yaml::Mapping::new(),
            ingress: vec![IngressRule::catch_all()],
        }
    }
}

impl RoutingTable {
    pub fn parse(content: &str) -> StateResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content).map_err(|e| StateError::Parse(format!("routing table: {e}")))
    }

    pub fn to_yaml(&self) -> StateResult<String> {
        serde_yaml::to_string(self).map_err(|e| StateError::Serialize(e.to_string()))
    }

    /// Rules whose hostname is `domain`.
    pub fn rules_for<'a>(&'a self, domain: &'a str) -> impl Iterator<Item = &'a IngressRule> + 'a {
        self.ingress
            .iter()
            .filter(move |r| r.hostname.as_deref() == Some(domain))
    }

    /// Reduce the table to exactly one catch-all, placed last.
    ///
    /// The first existing catch-all's backend is kept.
    pub fn normalize(&mut self) {
        let catch_all = self
            .ingress
            .iter()
            .find(|r| r.is_catch_all())
            .cloned()
            .unwrap_or_else(IngressRule::catch_all);
        self.ingress.retain(|r| !r.is_catch_all());
        self.ingress.push(catch_all);
    }

    /// A copy of this table with `service`'s rules for `routing.domain`
    /// replaced by freshly computed ones, inserted just before the catch-all.
    pub fn with_service(&self, service: &str, routing: &RoutingConfig) -> Self {
        let mut table = self.without_domain(&routing.domain);
        table.normalize();

        let mut paths: Vec<_> = routing.paths.iter().collect();
        // Stable: equal-length paths keep their declared order.
        paths.sort_by(|a, b| b.path.len().cmp(&a.path.len()));

        let mut block: Vec<IngressRule> = paths
            .into_iter()
            .map(|p| {
                IngressRule::to_service(
                    &routing.domain,
                    Some(&p.path),
                    service,
                    p.port.unwrap_or(routing.port),
                )
            })
            .collect();
        block.push(IngressRule::to_service(&routing.domain, None, service, routing.port));

        let at = table.ingress.len() - 1;
        table.ingress.splice(at..at, block);
        table
    }

    /// A copy of this table without any rule for `domain`.
    pub fn without_domain(&self, domain: &str) -> Self {
        let mut table = self.clone();
        table
            .ingress
            .retain(|r| r.hostname.as_deref() != Some(domain));
        table
    }
}

/// Adds and removes a service's ingress rules, reloading the daemon after
/// each change.
#[derive(Clone)]
pub struct RoutingUpdater {
    store: FileStore,
    reloader: Arc<dyn ProxyReloader>,
}

impl RoutingUpdater {
    pub fn new(store: FileStore, reloader: Arc<dyn ProxyReloader>) -> Self {
        Self { store, reloader }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    /// The latest committed table.
    pub fn current(&self) -> StateResult<RoutingTable> {
        match self.store.read()? {
            Some(content) => RoutingTable::parse(&content),
            None => Ok(RoutingTable::default()),
        }
    }

    /// Route `routing.domain` to `service`.
    ///
    /// On any failure the previous file is restored and the add counts as
    /// not applied.
    pub async fn add(&self, service: &str, routing: &RoutingConfig) -> StateResult<()> {
        let mut txn = self.store.begin().await?;
        let table = match txn.read()? {
            Some(content) => RoutingTable::parse(&content)?,
            None => RoutingTable::default(),
        };

        let updated = table.with_service(service, routing);
        if updated == table {
            debug!(service, domain = %routing.domain, "ingress already up to date");
            txn.commit();
            return Ok(());
        }

        txn.write(&updated.to_yaml()?)?;
        self.reloader.reload().await?;
        txn.commit();

        info!(
            service,
            domain = %routing.domain,
            paths = routing.paths.len(),
            "ingress rules added"
        );
        Ok(())
    }

    /// Drop every rule for `domain`. Unknown domains are a no-op.
    pub async fn remove(&self, service: &str, domain: &str) -> StateResult<()> {
        let mut txn = self.store.begin().await?;
        let Some(content) = txn.read()? else {
            txn.commit();
            return Ok(());
        };
        let table = RoutingTable::parse(&content)?;
        let updated = table.without_domain(domain);
        if updated.ingress.len() == table.ingress.len() {
            debug!(service, domain, "no ingress rules to remove");
            txn.commit();
            return Ok(());
        }

        txn.write(&updated.to_yaml()?)?;
        self.reloader.reload().await?;
        txn.commit();

        info!(service, domain, "ingress rules removed");
        Ok(())
    }
}
