//! serpens-state — the config files Serpens mutates on every deploy.
//!
//! Two files hold all routing state: the tunnel daemon's ingress table
//! (YAML) and the published port table (JSON). Neither lives in a database,
//! so every mutation goes through a [`FileStore`] transaction: take the
//! per-file lock, copy the live file into the backup archive, rewrite it
//! atomically, and restore the latest backup on any failure.
//!
//! # Components
//!
//! - **`store`** — `FileStore` / `Transaction` (backup, atomic write, restore)
//! - **`routing`** — `RoutingTable` and `RoutingUpdater`
//! - **`ports`** — `PortTable` and `PortUpdater`
//! - **`allocations`** — `AllocationRegistry`, derived on every call
//! - **`reload`** — `ProxyReloader` capability for the tunnel daemon

pub mod allocations;
pub mod error;
pub mod fs;
pub mod ports;
pub mod reload;
pub mod routing;
pub mod store;

pub use allocations::{Allocation, AllocationRegistry, Conflict, ConflictCheck};
pub use error::{StateError, StateResult};
pub use ports::{PortEntry, PortTable, PortUpdater};
pub use reload::{ProxyReloader, RecordingReloader, SystemctlReloader};
pub use routing::{IngressRule, RoutingTable, RoutingUpdater};
pub use store::{FileStore, Transaction};
