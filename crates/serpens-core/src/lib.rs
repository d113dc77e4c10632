//! serpens-core — shared types for the Serpens deployment platform.
//!
//! - **`config`** — the `serpens.yml` service model
//! - **`policy`** — platform-wide limits (domain suffix, port range, memory caps)
//! - **`validator`** — pure, total validation of a raw config document

pub mod config;
pub mod policy;
pub mod validator;

pub use config::{
    ConfigError, DeploymentConfig, HealthcheckConfig, PathRoute, ResourcesConfig, RoutingConfig,
    ServiceConfig, ServiceSection, VolumeConfig,
};
pub use policy::PlatformPolicy;
pub use validator::{Validation, Validator};
