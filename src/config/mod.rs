//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ControllerConfig (validated, immutable)
//!     → routes/services seeded into the RouteTable
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → routing::reconcile_config computes a Batch delta
//!     → RouteTable::publish swaps in a new snapshot
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Only routes and services hot-reload; listener, timeouts and health
//!   settings apply at startup

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdminConfig, CertificateConfig, ControllerConfig, EndpointConfig, HealthCheckConfig,
    ListenerConfig, LogFormat, ObservabilityConfig, ProbeProtocol, RegistryConfig, RegistryKind,
    RouteConfig, ServiceConfig, TimeoutConfig, TlsConfig,
};
pub use validation::ValidationError;
pub use watcher::ConfigWatcher;
