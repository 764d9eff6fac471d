//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters, gauges, histograms)
//!     → access_log.rs (one record per proxied request)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Request ID flows from the HTTP layer into every access record
//! - Metrics are cheap (atomic increments behind the `metrics` facade)

pub mod access_log;
pub mod logging;
pub mod metrics;

pub use access_log::AccessLog;
