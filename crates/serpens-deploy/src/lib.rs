//! serpens-deploy — the deploy pipeline.
//!
//! A verified webhook names a service and an image tag. The
//! [`DeployCoordinator`] takes it from there: fetch the service's
//! `serpens.yml`, validate it, check it against existing allocations,
//! deploy the stack, then route and publish it. Every step either
//! succeeds or ends the pipeline; nothing is retried and nothing already
//! applied by an earlier step is undone.
//!
//! # Components
//!
//! - **`fetch`** — `ConfigFetcher` capability (raw GitHub, in-memory)
//! - **`coordinator`** — `DeployCoordinator` state machine, `DeployReport`, teardown
//! - **`allow`** — repository allow-list shared with the webhook gateway

pub mod allow;
pub mod coordinator;
pub mod error;
pub mod fetch;

pub use allow::AllowList;
pub use coordinator::{DeployCoordinator, DeployReport, DeployRequest, Outcome, Stage, TeardownReport};
pub use error::{DeployError, FetchError, FetchResult};
pub use fetch::{ConfigFetcher, GitHubRawFetcher, StaticConfigFetcher};
