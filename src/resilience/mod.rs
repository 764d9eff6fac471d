//! Resilience helpers.
//!
//! # Data Flow
//! ```text
//! Registry subscription lost:
//!     → backoff.rs (exponential delay with jitter, capped)
//!     → reconnect, then full resync
//! ```
//!
//! # Design Decisions
//! - Backoff never exceeds its cap, even after jitter
//! - Jitter spreads reconnects from many controllers

pub mod backoff;

pub use backoff::calculate_backoff;
