//! serpens-stack — turns a validated service config into a running stack.
//!
//! # Components
//!
//! - **`stack`** — `StackDescription`, the compose document submitted to the orchestrator
//! - **`orchestrator`** — `OrchestratorClient` capability (Docker CLI, in-memory)
//! - **`deployer`** — `StackDeployer` (deploy, remove, status)

pub mod deployer;
pub mod error;
pub mod orchestrator;
pub mod stack;

pub use deployer::StackDeployer;
pub use error::{StackError, StackResult};
pub use orchestrator::{DockerStackClient, InMemoryOrchestrator, OrchestratorClient, ServiceStatus};
pub use stack::StackDescription;
