//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Logging/metrics → Route table
//!     → Endpoint watcher, health checker, pool evictor, config reloader
//!     → Admin, TLS and plaintext listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → listeners drain → tasks exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Listeners start last (traffic only when routing state is seeded)
//! - Every background task owns a shutdown receiver

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{run, StartupError};
