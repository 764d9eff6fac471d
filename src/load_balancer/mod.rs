//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → service identified
//!     → snapshot lookup (endpoint set for the service)
//!     → filter routable endpoints (not Unhealthy, not excluded)
//!     → Apply the route's policy (or the service default):
//!         - round_robin.rs (per-service cursor)
//!         - least_conn.rs (fewest in-flight requests)
//!         - weighted.rs (probability proportional to weight)
//!     → Return endpoint or NoHealthyEndpoint
//! ```
//!
//! # Design Decisions
//! - Strategies only see the already-filtered candidate list
//! - Endpoint state comes from the snapshot; only in-flight counts and
//!   round-robin cursors live here
//! - Zero routable endpoints is an explicit error, never a wait

pub mod in_flight;
pub mod least_conn;
pub mod round_robin;
pub mod weighted;

use std::net::SocketAddr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::routing::{Endpoint, Route, RouteSnapshot, ServiceId};

pub use in_flight::{InFlight, InFlightGuard};
pub use least_conn::LeastConnections;
pub use round_robin::RoundRobin;
pub use weighted::Weighted;

/// Endpoint selection policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    #[default]
    RoundRobin,
    LeastConnections,
    Weighted,
}

/// A strategy choosing among routable endpoints.
pub trait LoadBalancer: Send + Sync + std::fmt::Debug {
    /// Index into `candidates` of the endpoint to use.
    fn next_endpoint(&self, service: &ServiceId, candidates: &[&Endpoint]) -> Option<usize>;
}

/// No endpoint of a service can take traffic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no healthy endpoint for service {service}")]
pub struct NoHealthyEndpoint {
    pub service: ServiceId,
}

/// Dispatches selections to the configured strategy.
#[derive(Debug)]
pub struct Balancer {
    round_robin: RoundRobin,
    least_conn: LeastConnections,
    weighted: Weighted,
    in_flight: Arc<InFlight>,
}

impl Balancer {
    pub fn new() -> Self {
        let in_flight = Arc::new(InFlight::new());
        Self {
            round_robin: RoundRobin::new(),
            least_conn: LeastConnections::new(in_flight.clone()),
            weighted: Weighted::new(),
            in_flight,
        }
    }

    /// Select an endpoint for `route` from `snapshot`, skipping `exclude`.
    pub fn select(
        &self,
        snapshot: &RouteSnapshot,
        route: &Route,
        exclude: &[SocketAddr],
    ) -> Result<Endpoint, NoHealthyEndpoint> {
        let no_endpoint = || NoHealthyEndpoint {
            service: route.service.clone(),
        };
        let service = snapshot.service(&route.service).ok_or_else(no_endpoint)?;

        let candidates: Vec<&Endpoint> = service
            .endpoints
            .iter()
            .filter(|e| e.health.is_routable() && !exclude.contains(&e.address))
            .collect();
        if candidates.is_empty() {
            return Err(no_endpoint());
        }

        let policy = route.policy.unwrap_or(service.policy);
        let strategy: &dyn LoadBalancer = match policy {
            Policy::RoundRobin => &self.round_robin,
            Policy::LeastConnections => &self.least_conn,
            Policy::Weighted => &self.weighted,
        };

        strategy
            .next_endpoint(&service.id, &candidates)
            .and_then(|i| candidates.get(i))
            .map(|e| (*e).clone())
            .ok_or_else(no_endpoint)
    }

    /// Mark a request as started on `addr` until the guard drops.
    pub fn track(&self, addr: SocketAddr) -> InFlightGuard {
        self.in_flight.track(addr)
    }

    pub fn in_flight(&self) -> &Arc<InFlight> {
        &self.in_flight
    }

    /// Forget state for endpoints and services gone from `snapshot`.
    ///
    /// Counters of removed endpoints that still carry requests stay until
    /// those requests finish.
    pub fn prune(&self, snapshot: &RouteSnapshot) {
        let endpoints = snapshot.endpoints();
        self.in_flight.retain(|addr| endpoints.contains(addr));
        self.round_robin.retain(|service| snapshot.service(service).is_some());
    }
}

impl Default for Balancer {
    fn default() -> Self {
        Self::new()
    }
}
