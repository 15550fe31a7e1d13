//! Configuration for the jobsup supervisor.
//!
//! Loads [`SupervisorConfig`] from files, inline JSON or defaults, applies
//! per-field environment overrides, enforces guard rails and installs the
//! tracing subscriber used by the supervisor binaries.
#![allow(missing_docs)]

pub mod loader;
pub mod models;
pub mod telemetry;
pub mod validation;

pub use loader::ConfigSource;
pub use models::{ReconnectPolicy, StoreConfig, SupervisorConfig};
pub use telemetry::init_tracing;
pub use validation::{ConfigError, ConfigWarning, apply_guard_rails};
