//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Config routes / registry events / health transitions
//!     → Delta
//!     → table.rs (serialized publish, copy-on-write)
//!     → RouteSnapshot (immutable, versioned, Arc-shared)
//!
//! Incoming Request (host, path)
//!     → RouteTable::current()
//!     → snapshot.rs (host lookup, longest prefix)
//!     → matched Route or NoMatch
//! ```
//!
//! # Design Decisions
//! - Snapshots are immutable; every accepted delta produces a new one
//! - No regex in hot path (prefix matching only)
//! - Deterministic: longest prefix wins, ties go to the newest route
//! - Explicit NoMatch rather than silent default

pub mod matcher;
pub mod route;
pub mod snapshot;
pub mod table;

pub use route::{Endpoint, EndpointSpec, Health, Route, Service, ServiceId};
pub use snapshot::{RouteSnapshot, ANY_HOST};
pub use table::{preview, reconcile_config, Delta, PublishError, RouteTable};
