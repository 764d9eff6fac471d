//! Endpoint discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Registry (memory / config file / Kubernetes EndpointSlices)
//!     → subscribe(): stream of RegistryEvent
//!     → list(): point-in-time ServiceListing set
//!
//! watcher.rs:
//!     subscribe → list → resync (compensating Batch) → apply events
//!     subscription lost → backoff (1s doubling to 30s, jitter) → repeat
//! ```
//!
//! # Design Decisions
//! - Registries only describe endpoints; services are declared by config
//! - A reconnect never trusts a resumed stream; it always resyncs
//! - Events and listings for undeclared services are ignored

pub mod file;
#[cfg(feature = "kubernetes")]
pub mod kubernetes;
pub mod memory;
pub mod registry;
pub mod watcher;

pub use file::{diff_listings, static_listing, FileRegistry};
#[cfg(feature = "kubernetes")]
pub use kubernetes::KubernetesRegistry;
pub use memory::MemoryRegistry;
pub use registry::{EventStream, Registry, RegistryError, RegistryEvent, ServiceListing};
pub use watcher::{event_delta, resync_delta, EndpointWatcher};
