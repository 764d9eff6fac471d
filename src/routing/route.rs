//! Routing data model.
//!
//! Routes point at services by [`ServiceId`]; services own their endpoint
//! sets. Both live inside a [`RouteSnapshot`](crate::routing::RouteSnapshot)
//! and are never mutated in place once published.

use std::borrow::Borrow;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Serialize, Serializer};

use crate::config::{RouteConfig, ServiceConfig};
use crate::load_balancer::Policy;
use crate::routing::matcher::normalize_host;

/// Handle naming a logical upstream group.
///
/// Cloning shares the underlying name; it never copies it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Arc<str>);

impl ServiceId {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ServiceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl Serialize for ServiceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Endpoint health as seen by the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    /// Not probed yet.
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
}

impl Health {
    /// Whether the endpoint may receive traffic. Unknown endpoints are
    /// routable so traffic flows before the first probes complete.
    pub fn is_routable(self) -> bool {
        self != Health::Unhealthy
    }

    /// Gauge value used for metrics (1 healthy, 0 unhealthy, -1 unknown).
    pub fn as_gauge(self) -> f64 {
        match self {
            Health::Healthy => 1.0,
            Health::Unhealthy => 0.0,
            Health::Unknown => -1.0,
        }
    }
}

/// Registry-facing description of an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSpec {
    pub address: SocketAddr,
    pub weight: u32,
    /// Readiness reported by the registry, if it reports any.
    pub ready: Option<bool>,
}

impl EndpointSpec {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            weight: 1,
            ready: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_ready(mut self, ready: bool) -> Self {
        self.ready = Some(ready);
        self
    }
}

/// A concrete upstream instance inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub address: SocketAddr,
    pub weight: u32,
    pub health: Health,
    pub last_probe: Option<SystemTime>,
}

impl Endpoint {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            weight: 1,
            health: Health::Unknown,
            last_probe: None,
        }
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_health(mut self, health: Health) -> Self {
        self.health = health;
        self
    }
}

impl From<&EndpointSpec> for Endpoint {
    fn from(spec: &EndpointSpec) -> Self {
        let health = match spec.ready {
            Some(false) => Health::Unhealthy,
            _ => Health::Unknown,
        };
        Endpoint::new(spec.address)
            .with_weight(spec.weight)
            .with_health(health)
    }
}

/// A service and its current endpoint set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Service {
    pub id: ServiceId,
    pub policy: Policy,
    pub endpoints: Vec<Endpoint>,
}

impl Service {
    pub fn new(id: ServiceId, policy: Policy) -> Self {
        Self {
            id,
            policy,
            endpoints: Vec::new(),
        }
    }

    pub fn endpoint(&self, address: SocketAddr) -> Option<&Endpoint> {
        self.endpoints.iter().find(|e| e.address == address)
    }
}

impl From<&ServiceConfig> for Service {
    fn from(config: &ServiceConfig) -> Self {
        Service::new(ServiceId::new(&config.name), config.policy)
    }
}

/// An ingress rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub name: String,
    /// Lowercase host, or `*` for the catch-all.
    pub host: String,
    pub path_prefix: String,
    pub rewrite_target: Option<String>,
    pub service: ServiceId,
    pub timeout: Option<Duration>,
    pub policy: Option<Policy>,
    /// Publish sequence, assigned by the route table.
    #[serde(skip)]
    pub(crate) seq: u64,
}

impl Route {
    pub fn new(
        name: impl Into<String>,
        host: &str,
        path_prefix: impl Into<String>,
        service: ServiceId,
    ) -> Self {
        Self {
            name: name.into(),
            host: normalize_host(host),
            path_prefix: path_prefix.into(),
            rewrite_target: None,
            service,
            timeout: None,
            policy: None,
            seq: 0,
        }
    }

    pub fn with_rewrite(mut self, target: impl Into<String>) -> Self {
        self.rewrite_target = Some(target.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Whether two routes describe the same rule, ignoring publish order.
    pub fn same_rule(&self, other: &Route) -> bool {
        Route { seq: 0, ..self.clone() } == Route { seq: 0, ..other.clone() }
    }
}

impl From<&RouteConfig> for Route {
    fn from(config: &RouteConfig) -> Self {
        let mut route = Route::new(
            config.name.clone(),
            &config.host,
            config.path_prefix.clone(),
            ServiceId::new(&config.service),
        );
        route.rewrite_target = config.rewrite_target.clone();
        route.timeout = config.timeout_secs.map(Duration::from_secs);
        route.policy = config.policy;
        route
    }
}
