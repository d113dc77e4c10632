//! Published port table.
//!
//! A JSON document listing the ports the edge exposes, one entry per
//! service:
//!
//! ```json
//! {
//!   "ports": [
//!     { "name": "light", "external_port": 5000, "internal_port": 5000,
//!       "protocol": "tcp", "enabled": true }
//!   ],
//!   "updated": "2025-05-01T12:00:00.000Z"
//! }
//! ```

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StateError, StateResult};
use crate::store::FileStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortEntry {
    /// Owning service.
    pub name: String,
    pub external_port: u16,
    pub internal_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_enabled() -> bool {
    true
}

impl PortEntry {
    pub fn tcp(service: &str, port: u16) -> Self {
        Self {
            name: service.to_string(),
            external_port: port,
            internal_port: port,
            protocol: default_protocol(),
            enabled: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortTable {
    #[serde(default)]
    pub ports: Vec<PortEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<String>,
}

impl PortTable {
    pub fn parse(content: &str) -> StateResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(content).map_err(|e| StateError::Parse(format!("port table: {e}")))
    }

    pub fn to_json(&self) -> StateResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StateError::Serialize(e.to_string()))
    }

    /// Entry publishing `port`, if any.
    pub fn owner_of(&self, port: u16) -> Option<&PortEntry> {
        self.ports.iter().find(|p| p.external_port == port)
    }

    pub fn entries_for<'a>(&'a self, service: &'a str) -> impl Iterator<Item = &'a PortEntry> + 'a {
        self.ports.iter().filter(move |p| p.name == service)
    }

    fn stamp(&mut self) {
        self.updated = Some(
            chrono::Utc::now()
                .to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        );
    }
}

/// Publishes and withdraws a service's port.
#[derive(Debug, Clone)]
pub struct PortUpdater {
    store: FileStore,
}

impl PortUpdater {
    pub fn new(store: FileStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }

    pub fn current(&self) -> StateResult<PortTable> {
        match self.store.read()? {
            Some(content) => PortTable::parse(&content),
            None => Ok(PortTable::default()),
        }
    }

    /// Publish `port` for `service`, replacing any port it published before.
    ///
    /// Publishing a port the service already owns is a successful no-op.
    /// A port owned by a different service is refused.
    pub async fn add(&self, service: &str, port: u16) -> StateResult<()> {
        let mut txn = self.store.begin().await?;
        let mut table = match txn.read()? {
            Some(content) => PortTable::parse(&content)?,
            None => PortTable::default(),
        };

        if let Some(existing) = table.owner_of(port) {
            if existing.name == service {
                warn!(service, port, "port already published for service");
                txn.commit();
                return Ok(());
            }
            return Err(StateError::PortTaken {
                port,
                owner: existing.name.clone(),
            });
        }

        let replaced = table.ports.len();
        table.ports.retain(|p| p.name != service);
        let replaced = replaced - table.ports.len();
        table.ports.push(PortEntry::tcp(service, port));
        table.stamp();

        txn.write(&table.to_json()?)?;
        txn.commit();

        info!(service, port, replaced, "port published");
        Ok(())
    }

    /// Withdraw every port published for `service`. Unknown services are a no-op.
    pub async fn remove(&self, service: &str) -> StateResult<()> {
        let mut txn = self.store.begin().await?;
        let Some(content) = txn.read()? else {
            txn.commit();
            return Ok(());
        };
        let mut table = PortTable::parse(&content)?;

        let before = table.ports.len();
        table.ports.retain(|p| p.name != service);
        if table.ports.len() == before {
            debug!(service, "no published ports to remove");
            txn.commit();
            return Ok(());
        }
        table.stamp();

        txn.write(&table.to_json()?)?;
        txn.commit();

        info!(service, removed = before - table.ports.len(), "ports withdrawn");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::staging_path;
    use tempfile::TempDir;

    const TABLE: &str = r#"{
  "ports": [
    { "name": "docs", "external_port": 4000, "internal_port": 4000, "protocol": "tcp", "enabled": true }
  ],
  "updated": "2025-01-01T00:00:00.000Z"
}"#;

    fn updater(dir: &TempDir) -> PortUpdater {
        let store = FileStore::new(
            dir.path().join("ports.json"),
            dir.path().join("backups"),
            "ports",
            "json",
        );
        std::fs::write(store.path(), TABLE).unwrap();
        PortUpdater::new(store)
    }

    #[tokio::test]
    async fn add_publishes_tcp_entry() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);

        updater.add("light", 5000).await.unwrap();

        let table = updater.current().unwrap();
        assert_eq!(table.ports.len(), 2);
        assert_eq!(table.owner_of(5000), Some(&PortEntry::tcp("light", 5000)));
        let stamp = table.updated.unwrap();
        assert!(stamp.ends_with('Z'));
        assert_ne!(stamp, "2025-01-01T00:00:00.000Z");
    }

    #[tokio::test]
    async fn add_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);

        updater.add("light", 5000).await.unwrap();
        let once = std::fs::read_to_string(updater.store().path()).unwrap();
        updater.add("light", 5000).await.unwrap();
        let twice = std::fs::read_to_string(updater.store().path()).unwrap();

        assert_eq!(once, twice);
        assert_eq!(updater.current().unwrap().entries_for("light").count(), 1);
    }

    #[tokio::test]
    async fn add_moves_service_to_new_port() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);

        updater.add("light", 5000).await.unwrap();
        updater.add("light", 5001).await.unwrap();

        let table = updater.current().unwrap();
        let ports: Vec<_> = table.entries_for("light").map(|p| p.external_port).collect();
        assert_eq!(ports, vec![5001]);
    }

    #[tokio::test]
    async fn add_refuses_port_of_other_service() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);

        let err = updater.add("light", 4000).await.unwrap_err();
        assert!(matches!(err, StateError::PortTaken { port: 4000, ref owner } if owner == "docs"));
        assert_eq!(std::fs::read_to_string(updater.store().path()).unwrap(), TABLE);
    }

    #[tokio::test]
    async fn remove_then_remove_again() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);

        updater.add("light", 5000).await.unwrap();
        updater.remove("light").await.unwrap();
        assert!(updater.current().unwrap().owner_of(5000).is_none());
        assert_eq!(updater.current().unwrap().ports.len(), 1);

        let before = std::fs::read_to_string(updater.store().path()).unwrap();
        updater.remove("light").await.unwrap();
        assert_eq!(std::fs::read_to_string(updater.store().path()).unwrap(), before);
    }

    #[tokio::test]
    async fn failed_write_leaves_pre_call_contents() {
        let dir = TempDir::new().unwrap();
        let updater = updater(&dir);
        std::fs::create_dir(staging_path(updater.store().path())).unwrap();

        assert!(updater.add("light", 5000).await.is_err());
        assert_eq!(std::fs::read_to_string(updater.store().path()).unwrap(), TABLE);
    }

    #[tokio::test]
    async fn missing_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let updater = PortUpdater::new(FileStore::new(
            dir.path().join("ports.json"),
            dir.path().join("backups"),
            "ports",
            "json",
        ));
        assert_eq!(updater.current().unwrap(), PortTable::default());
        updater.remove("light").await.unwrap();
        assert!(!updater.store().path().exists());

        updater.add("light", 5000).await.unwrap();
        assert_eq!(updater.current().unwrap().ports.len(), 1);
    }
}
