//! Immutable, versioned routing state.
//!
//! A snapshot combines every route with the endpoint sets of the services
//! those routes reference. Requests hold an `Arc<RouteSnapshot>` for their
//! whole lifetime, so a request never sees a mix of old and new state.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use crate::routing::matcher::{normalize_host, prefix_matches};
use crate::routing::route::{Health, Route, Service, ServiceId};

/// Host key for routes that match any host.
pub const ANY_HOST: &str = "*";

/// Point-in-time view of routes and endpoint health.
#[derive(Debug, Clone, Default)]
pub struct RouteSnapshot {
    pub(crate) version: u64,
    /// Host → routes ordered by longest prefix first, then newest first.
    pub(crate) routes: HashMap<String, Vec<Arc<Route>>>,
    pub(crate) services: HashMap<ServiceId, Arc<Service>>,
}

impl RouteSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Find the route for a request.
    ///
    /// Routes for the exact host are consulted first; catch-all routes only
    /// when none of them match. Within a host the longest matching prefix
    /// wins, ties going to the most recently published route.
    pub fn match_route(&self, host: &str, path: &str) -> Option<&Arc<Route>> {
        let host = normalize_host(host);
        self.match_host(&host, path)
            .or_else(|| self.match_host(ANY_HOST, path))
    }

    fn match_host(&self, host: &str, path: &str) -> Option<&Arc<Route>> {
        self.routes
            .get(host)?
            .iter()
            .find(|route| prefix_matches(&route.path_prefix, path))
    }

    /// The route registered for exactly this host and prefix.
    pub fn match_route_exact(&self, host: &str, path_prefix: &str) -> Option<&Arc<Route>> {
        self.routes
            .get(host)?
            .iter()
            .find(|r| r.path_prefix == path_prefix)
    }

    pub fn service(&self, id: &ServiceId) -> Option<&Arc<Service>> {
        self.services.get(id)
    }

    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    /// All routes, ordered by host then match precedence.
    pub fn routes(&self) -> Vec<&Arc<Route>> {
        let mut hosts: Vec<&String> = self.routes.keys().collect();
        hosts.sort();
        hosts
            .into_iter()
            .flat_map(|host| self.routes[host].iter())
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    /// Distinct endpoint addresses across all services.
    pub fn endpoints(&self) -> BTreeSet<SocketAddr> {
        self.services
            .values()
            .flat_map(|s| s.endpoints.iter().map(|e| e.address))
            .collect()
    }

    /// Health recorded for an address, from the first service containing it.
    pub fn health_of(&self, address: SocketAddr) -> Option<Health> {
        self.services
            .values()
            .find_map(|s| s.endpoint(address))
            .map(|e| e.health)
    }

    pub(crate) fn sort_host(routes: &mut [Arc<Route>]) {
        routes.sort_by(|a, b| {
            b.path_prefix
                .len()
                .cmp(&a.path_prefix.len())
                .then(b.seq.cmp(&a.seq))
        });
    }
}
