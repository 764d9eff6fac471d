//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active health checks (active.rs):
//!     Periodic timer
//!     → Probe each distinct endpoint of the current snapshot (TCP or HTTP)
//!     → Feed the outcome to its state.rs tracker
//!     → On transition: publish SetHealth into the route table
//!
//! State machine (state.rs):
//!     Unknown → Healthy ←→ Unhealthy
//!     With thresholds to prevent flapping
//! ```
//!
//! # Design Decisions
//! - State transitions require consecutive successes/failures
//! - Health state is per-endpoint address, shared by every service using it
//! - The route table is the source of truth; trackers resync to it so
//!   registry readiness hints and probes never disagree for long

pub mod active;
pub mod state;

pub use active::HealthChecker;
pub use state::HealthState;
