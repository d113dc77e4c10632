//! Domain and port allocations, derived from the routing and port tables.
//!
//! Nothing here is stored. Every call re-reads both files, so a conflict
//! check always sees the latest committed state.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use serpens_core::PlatformPolicy;
use serpens_core::policy::port_range;

use crate::error::StateResult;
use crate::ports::PortTable;
use crate::routing::RoutingTable;
use crate::store::FileStore;

/// Most suggestions offered per conflict.
pub const MAX_SUGGESTIONS: usize = 3;

/// A domain and/or port owned by a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allocation {
    pub domain: Option<String>,
    pub port: Option<u16>,
    pub service: String,
}

/// A candidate domain or port already owned by another service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Conflict {
    Domain {
        domain: String,
        owner: String,
        suggestions: Vec<String>,
    },
    Port {
        port: u16,
        owner: String,
        suggestions: Vec<u16>,
    },
}

impl std::fmt::Display for Conflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Conflict::Domain { domain, owner, suggestions } => {
                write!(f, "domain {domain} is already taken by {owner}")?;
                if !suggestions.is_empty() {
                    write!(f, " (try {})", suggestions.join(", "))?;
                }
                Ok(())
            }
            Conflict::Port { port, owner, suggestions } => {
                write!(f, "port {port} is already in use by {owner}")?;
                if !suggestions.is_empty() {
                    let ports: Vec<String> = suggestions.iter().map(u16::to_string).collect();
                    write!(f, " (available: {})", ports.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

/// Outcome of a conflict check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictCheck {
    Clear,
    Conflicts(Vec<Conflict>),
    /// The tables could not be read. Not proof of a conflict.
    Unknown { reason: String },
}

/// Read-only view over the routing and port tables.
#[derive(Debug, Clone)]
pub struct AllocationRegistry {
    routing: FileStore,
    ports: FileStore,
    policy: PlatformPolicy,
}

impl AllocationRegistry {
    pub fn new(routing: FileStore, ports: FileStore, policy: PlatformPolicy) -> Self {
        Self { routing, ports, policy }
    }

    /// Every allocation in the committed tables.
    ///
    /// One entry per routed domain (owned by the backend its bare-hostname
    /// rule targets), plus one per published port no routed entry covers.
    pub fn current_allocations(&self) -> StateResult<Vec<Allocation>> {
        let routing = match self.routing.read()? {
            Some(content) => RoutingTable::parse(&content)?,
            None => RoutingTable::default(),
        };
        let ports = match self.ports.read()? {
            Some(content) => PortTable::parse(&content)?,
            None => PortTable::default(),
        };
        Ok(self.merge(&routing, &ports))
    }

    fn merge(&self, routing: &RoutingTable, ports: &PortTable) -> Vec<Allocation> {
        let mut allocations: Vec<Allocation> = Vec::new();

        for rule in &routing.ingress {
            let Some(domain) = rule.hostname.as_deref() else {
                continue;
            };
            if allocations.iter().any(|a| a.domain.as_deref() == Some(domain)) {
                continue;
            }
            // Prefer the bare-hostname rule; fall back to the first path rule.
            let rule = routing
                .rules_for(domain)
                .find(|r| r.path.is_none())
                .unwrap_or(rule);
            let (service, port) = match rule.target() {
                Some((host, port)) if host != "localhost" => (host.to_string(), Some(port)),
                Some((_, port)) => (self.policy.base_label(domain).to_string(), Some(port)),
                None => (self.policy.base_label(domain).to_string(), None),
            };
            allocations.push(Allocation {
                domain: Some(domain.to_string()),
                port,
                service,
            });
        }

        for entry in &ports.ports {
            let covered = allocations
                .iter()
                .any(|a| a.port == Some(entry.external_port) && a.service == entry.name);
            if !covered {
                allocations.push(Allocation {
                    domain: None,
                    port: Some(entry.external_port),
                    service: entry.name.clone(),
                });
            }
        }

        allocations
    }

    /// Whether `domain` and `port` both already belong to `service`.
    ///
    /// Owner identity is checked against the current tables, so a domain
    /// left behind by a different service never passes as a redeploy.
    pub fn is_owned_by(&self, service: &str, domain: &str, port: u16) -> StateResult<bool> {
        let allocations = self.current_allocations()?;
        let owns_domain = allocations
            .iter()
            .any(|a| a.domain.as_deref() == Some(domain) && a.service == service);
        let port_owners: Vec<&str> = allocations
            .iter()
            .filter(|a| a.port == Some(port))
            .map(|a| a.service.as_str())
            .collect();
        Ok(owns_domain && !port_owners.is_empty() && port_owners.iter().all(|o| *o == service))
    }

    /// Check `domain` and `port` against allocations owned by other services.
    pub fn check_conflict(&self, service: &str, domain: &str, port: u16) -> ConflictCheck {
        match self.current_allocations() {
            Ok(allocations) => {
                let conflicts = self.conflicts_in(&allocations, service, domain, port);
                if conflicts.is_empty() {
                    ConflictCheck::Clear
                } else {
                    ConflictCheck::Conflicts(conflicts)
                }
            }
            Err(e) => {
                warn!(service, domain, port, error = %e, "could not read allocations for conflict check");
                ConflictCheck::Unknown {
                    reason: e.to_string(),
                }
            }
        }
    }

    fn conflicts_in(
        &self,
        allocations: &[Allocation],
        service: &str,
        domain: &str,
        port: u16,
    ) -> Vec<Conflict> {
        let mut conflicts = Vec::new();

        let taken_domains: BTreeSet<&str> =
            allocations.iter().filter_map(|a| a.domain.as_deref()).collect();
        if let Some(owner) = allocations
            .iter()
            .find(|a| a.domain.as_deref() == Some(domain) && a.service != service)
        {
            conflicts.push(Conflict::Domain {
                domain: domain.to_string(),
                owner: owner.service.clone(),
                suggestions: self.domain_suggestions(domain, &taken_domains),
            });
        }

        let taken_ports: BTreeSet<u16> = allocations.iter().filter_map(|a| a.port).collect();
        if let Some(owner) = allocations
            .iter()
            .find(|a| a.port == Some(port) && a.service != service)
        {
            conflicts.push(Conflict::Port {
                port,
                owner: owner.service.clone(),
                suggestions: port_range()
                    .filter(|p| !taken_ports.contains(p))
                    .take(MAX_SUGGESTIONS)
                    .collect(),
            });
        }

        conflicts
    }

    fn domain_suggestions(&self, domain: &str, taken: &BTreeSet<&str>) -> Vec<String> {
        let base = self.policy.base_label(domain);
        let candidates = [
            format!("{base}-2"),
            format!("{base}-3"),
            format!("{base}-app"),
            format!("my-{base}"),
            format!("{base}-svc"),
        ];
        let mut suggestions: Vec<String> = Vec::new();
        for label in candidates {
            let candidate = self.policy.domain_for(&label);
            if candidate != domain
                && !taken.contains(candidate.as_str())
                && !suggestions.contains(&candidate)
            {
                suggestions.push(candidate);
            }
            if suggestions.len() == MAX_SUGGESTIONS {
                break;
            }
        }
        suggestions
    }
}
