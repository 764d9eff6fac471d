//! Request forwarding subsystem.
//!
//! # Data Flow
//! ```text
//! Request
//!     → engine.rs: validate host/path (400)
//!     → pin the current RouteSnapshot
//!     → match route (404) → rewrite path
//!     → Balancer::select (503)
//!     → pool.rs: pooled or fresh HTTP/1.1 connection (5s connect)
//!         stale pooled connection → replay on a fresh one
//!         connect failure → one retry on a different endpoint → 502
//!     → send, wait for response headers (route timeout → 504)
//!     → body.rs: stream the response, idle-gap bounded by the route timeout
//!     → end of stream: connection back to the pool, snapshot released,
//!       access record emitted
//! ```
//!
//! # Design Decisions
//! - Bodies are streamed both ways, never buffered
//! - A request pins one snapshot for its whole life
//! - Only requests the upstream never answered are retried: connect
//!   failures, and bodiless idempotent requests on a connection that
//!   closed under them

pub mod body;
pub mod engine;
pub mod error;
pub mod headers;
pub mod pool;

pub use body::UpstreamBody;
pub use engine::ProxyEngine;
pub use error::ProxyError;
pub use pool::{ConnectError, PooledConn, UpstreamPool};
