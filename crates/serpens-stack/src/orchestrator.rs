//! Orchestrator clients.
//!
//! [`OrchestratorClient`] is the narrow capability the deployer needs:
//! submit a stack, remove it, ask what is running. [`DockerStackClient`]
//! drives Docker Swarm through the `docker` CLI; [`InMemoryOrchestrator`]
//! keeps stacks in a map for tests and dry runs.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{StackError, StackResult};
use crate::stack::StackDescription;

/// What the orchestrator reports for a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl ServiceStatus {
    pub fn stopped() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    /// Converge the orchestrator to `stack`. Resubmitting an identical
    /// stack is a no-op; a changed one rolls the service.
    async fn submit(&self, stack: &StackDescription) -> StackResult<()>;

    async fn remove(&self, name: &str) -> StackResult<()>;

    async fn status(&self, name: &str) -> StackResult<ServiceStatus>;
}

// ── Docker CLI ─────────────────────────────────────────────────

/// Drives `docker stack` against the local Swarm manager.
#[derive(Debug, Clone)]
pub struct DockerStackClient {
    docker: PathBuf,
    work_dir: PathBuf,
}

impl DockerStackClient {
    /// `docker` is the CLI binary; stack files are staged under `work_dir`.
    pub fn new(docker: impl Into<PathBuf>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            docker: docker.into(),
            work_dir: work_dir.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> StackResult<String> {
        debug!(docker = %self.docker.display(), ?args, "running docker");
        let output = Command::new(&self.docker)
            .args(args)
            .output()
            .await
            .map_err(|e| StackError::Spawn {
                program: self.docker.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Rejected {
                name: args.last().copied().unwrap_or_default().to_string(),
                reason: format!("docker {} exited with {}: {}", args.join(" "), output.status, stderr.trim()),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// One line of `docker service ls --format '{{json .}}'`.
#[derive(Debug, Deserialize)]
struct ServiceLine {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Replicas", default)]
    replicas: String,
}

fn parse_service_ls(stdout: &str) -> StackResult<ServiceStatus> {
    let Some(line) = stdout.lines().map(str::trim).find(|l| !l.is_empty()) else {
        return Ok(ServiceStatus::stopped());
    };
    let svc: ServiceLine =
        serde_json::from_str(line).map_err(|e| StackError::Parse(format!("{e}: {line}")))?;
    // "1/2" is running/desired.
    let replicas = svc
        .replicas
        .split('/')
        .nth(1)
        .and_then(|desired| desired.trim().parse().ok());
    Ok(ServiceStatus {
        running: true,
        replicas,
        image: (!svc.image.is_empty()).then_some(svc.image),
    })
}

#[async_trait]
impl OrchestratorClient for DockerStackClient {
    async fn submit(&self, stack: &StackDescription) -> StackResult<()> {
        std::fs::create_dir_all(&self.work_dir)?;
        let mut file = tempfile::Builder::new()
            .prefix(&format!("{}-", stack.name))
            .suffix("-stack.yml")
            .tempfile_in(&self.work_dir)?;
        file.write_all(stack.to_yaml()?.as_bytes())?;
        file.flush()?;

        let path = file.path().display().to_string();
        self.run(&["stack", "deploy", "-c", &path, &stack.name]).await?;
        info!(stack = %stack.name, "stack submitted");
        // `file` is removed on drop.
        Ok(())
    }

    async fn remove(&self, name: &str) -> StackResult<()> {
        self.run(&["stack", "rm", name]).await?;
        info!(stack = %name, "stack removed");
        Ok(())
    }

    async fn status(&self, name: &str) -> StackResult<ServiceStatus> {
        let filter = format!("label=com.docker.stack.namespace={name}");
        let stdout = self
            .run(&["service", "ls", "--filter", &filter, "--format", "{{json .}}"])
            .await?;
        parse_service_ls(&stdout)
    }
}

// ── In-memory ──────────────────────────────────────────────────

/// Keeps submitted stacks in memory. Submissions and removals can be made
/// to fail.
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    stacks: Mutex<HashMap<String, StackDescription>>,
    submissions: AtomicUsize,
    fail_submit: AtomicBool,
    fail_remove: AtomicBool,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_remove(&self, fail: bool) {
        self.fail_remove.store(fail, Ordering::SeqCst);
    }

    /// Number of accepted submissions that changed a stack.
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::SeqCst)
    }

    pub fn stack(&self, name: &str) -> Option<StackDescription> {
        self.lock().get(name).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, StackDescription>> {
        self.stacks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl OrchestratorClient for InMemoryOrchestrator {
    async fn submit(&self, stack: &StackDescription) -> StackResult<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(StackError::Rejected {
                name: stack.name.clone(),
                reason: "submission disabled".to_string(),
            });
        }
        let mut stacks = self.lock();
        if stacks.get(&stack.name) == Some(stack) {
            return Ok(());
        }
        stacks.insert(stack.name.clone(), stack.clone());
        self.submissions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, name: &str) -> StackResult<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(StackError::Rejected {
                name: name.to_string(),
                reason: "removal disabled".to_string(),
            });
        }
        self.lock().remove(name);
        Ok(())
    }

    async fn status(&self, name: &str) -> StackResult<ServiceStatus> {
        Ok(match self.lock().get(name) {
            Some(stack) => ServiceStatus {
                running: true,
                replicas: stack.replicas(),
                image: stack.image().map(str::to_string),
            },
            None => ServiceStatus::stopped(),
        })
    }
}
