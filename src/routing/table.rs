//! Snapshot manager.
//!
//! # Responsibilities
//! - Hold the current [`RouteSnapshot`] behind an atomic pointer
//! - Apply deltas copy-on-write and publish the result atomically
//! - Reject deltas that reference unknown services or endpoints
//!
//! # Design Decisions
//! - Single writer: publishes are serialized by a mutex that is never held
//!   across I/O
//! - Readers never lock: `current()` is a single atomic load
//! - A delta that changes nothing does not bump the version
//! - A failing `Batch` leaves the published snapshot untouched

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::ControllerConfig;
use crate::load_balancer::Policy;
use crate::observability::metrics;
use crate::routing::matcher::normalize_host;
use crate::routing::route::{Endpoint, EndpointSpec, Health, Route, Service, ServiceId};
use crate::routing::snapshot::RouteSnapshot;

/// An additive or subtractive change to routing state.
#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    /// Add a route, replacing any route with the same host and prefix.
    UpsertRoute(Route),
    RemoveRoute { host: String, path_prefix: String },
    /// Declare a service or change its default policy.
    DeclareService { service: ServiceId, policy: Policy },
    RemoveService(ServiceId),
    /// Add an endpoint to a service or update its weight.
    UpsertEndpoint { service: ServiceId, endpoint: EndpointSpec },
    RemoveEndpoint { service: ServiceId, address: SocketAddr },
    /// Set the health of an address in every service that contains it.
    SetHealth {
        address: SocketAddr,
        health: Health,
        probed_at: Option<SystemTime>,
    },
    /// Apply several deltas as one unit.
    Batch(Vec<Delta>),
}

/// Reasons a delta is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("unknown service {0}")]
    UnknownService(ServiceId),

    #[error("no service contains endpoint {0}")]
    UnknownEndpoint(SocketAddr),
}

/// Shared, versioned routing state.
pub struct RouteTable {
    current: ArcSwap<RouteSnapshot>,
    /// Serializes writers; holds the route publish sequence.
    writer: Mutex<u64>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(RouteSnapshot::default()),
            writer: Mutex::new(0),
        }
    }

    /// Seed routes and service declarations from configuration.
    pub fn from_config(config: &ControllerConfig) -> Self {
        let table = Self::new();
        let delta = reconcile_config(&table.current(), config);
        if let Err(e) = table.publish(delta) {
            tracing::error!(error = %e, "Failed to seed route table from config");
        }
        table
    }

    /// The latest snapshot. Dropping the `Arc` releases it.
    pub fn current(&self) -> Arc<RouteSnapshot> {
        self.current.load_full()
    }

    /// Apply a delta and publish the resulting snapshot.
    ///
    /// Returns the version that is current after the call.
    pub fn publish(&self, delta: Delta) -> Result<u64, PublishError> {
        let mut seq = self.writer.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Route table writer lock poisoned, recovering");
            poisoned.into_inner()
        });

        let base = self.current.load_full();
        let mut next = (*base).clone();
        let mut next_seq = *seq;

        let changed = match apply(&mut next, delta, &mut next_seq) {
            Ok(changed) => changed,
            Err(e) => {
                tracing::warn!(error = %e, version = base.version, "Rejected routing delta");
                return Err(e);
            }
        };
        if !changed {
            return Ok(base.version);
        }

        *seq = next_seq;
        next.version = base.version + 1;
        let version = next.version;
        self.current.store(Arc::new(next));

        metrics::record_snapshot_version(version);
        tracing::debug!(version, "Published route snapshot");
        Ok(version)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

fn apply(snapshot: &mut RouteSnapshot, delta: Delta, seq: &mut u64) -> Result<bool, PublishError> {
    match delta {
        Delta::UpsertRoute(mut route) => {
            match snapshot.services.get_key_value(&route.service) {
                // Share the table's handle rather than the caller's copy
                Some((id, _)) => route.service = id.clone(),
                None => tracing::warn!(
                    route = %route.name,
                    service = %route.service,
                    "Route references an unknown service; it will answer 503"
                ),
            }

            let routes = snapshot.routes.entry(route.host.clone()).or_default();
            let existing = routes
                .iter()
                .position(|r| r.path_prefix == route.path_prefix);
            if let Some(pos) = existing {
                if routes[pos].same_rule(&route) {
                    return Ok(false);
                }
                tracing::info!(
                    host = %route.host,
                    path_prefix = %route.path_prefix,
                    replaced = %routes[pos].name,
                    route = %route.name,
                    "Replacing route with identical host and prefix"
                );
                routes.remove(pos);
            }

            *seq += 1;
            route.seq = *seq;
            routes.push(Arc::new(route));
            RouteSnapshot::sort_host(routes);
            Ok(true)
        }
        Delta::RemoveRoute { host, path_prefix } => {
            let host = normalize_host(&host);
            let Some(routes) = snapshot.routes.get_mut(&host) else {
                return Ok(false);
            };
            let before = routes.len();
            routes.retain(|r| r.path_prefix != path_prefix);
            let removed = routes.len() != before;
            if routes.is_empty() {
                snapshot.routes.remove(&host);
            }
            Ok(removed)
        }
        Delta::DeclareService { service, policy } => match snapshot.services.get_mut(&service) {
            Some(existing) if existing.policy == policy => Ok(false),
            Some(existing) => {
                Arc::make_mut(existing).policy = policy;
                Ok(true)
            }
            None => {
                snapshot
                    .services
                    .insert(service.clone(), Arc::new(Service::new(service, policy)));
                Ok(true)
            }
        },
        Delta::RemoveService(service) => {
            let removed = snapshot.services.remove(&service).is_some();
            if removed {
                tracing::info!(service = %service, "Service removed");
            }
            Ok(removed)
        }
        Delta::UpsertEndpoint { service, endpoint } => {
            let known_health = if endpoint.ready == Some(false) {
                None
            } else {
                snapshot.health_of(endpoint.address)
            };
            let entry = snapshot
                .services
                .get_mut(&service)
                .ok_or(PublishError::UnknownService(service))?;

            let current_weight = entry.endpoint(endpoint.address).map(|e| e.weight);
            match current_weight {
                Some(weight) if weight == endpoint.weight => Ok(false),
                Some(_) => {
                    let svc = Arc::make_mut(entry);
                    for e in svc.endpoints.iter_mut().filter(|e| e.address == endpoint.address) {
                        e.weight = endpoint.weight;
                    }
                    Ok(true)
                }
                None => {
                    let mut added = Endpoint::from(&endpoint);
                    if let Some(health) = known_health {
                        added.health = health;
                    }
                    Arc::make_mut(entry).endpoints.push(added);
                    Ok(true)
                }
            }
        }
        Delta::RemoveEndpoint { service, address } => {
            let entry = snapshot
                .services
                .get_mut(&service)
                .ok_or(PublishError::UnknownService(service))?;
            if entry.endpoint(address).is_none() {
                return Ok(false);
            }
            Arc::make_mut(entry).endpoints.retain(|e| e.address != address);
            Ok(true)
        }
        Delta::SetHealth {
            address,
            health,
            probed_at,
        } => {
            let mut found = false;
            let mut changed = false;
            for entry in snapshot.services.values_mut() {
                let Some((current_health, last_probe)) =
                    entry.endpoint(address).map(|e| (e.health, e.last_probe))
                else {
                    continue;
                };
                found = true;
                let stale_probe = probed_at.is_some() && last_probe != probed_at;
                if current_health == health && !stale_probe {
                    continue;
                }
                let svc = Arc::make_mut(entry);
                for e in svc.endpoints.iter_mut().filter(|e| e.address == address) {
                    e.health = health;
                    if probed_at.is_some() {
                        e.last_probe = probed_at;
                    }
                }
                changed = true;
            }
            if !found {
                return Err(PublishError::UnknownEndpoint(address));
            }
            Ok(changed)
        }
        Delta::Batch(deltas) => {
            let mut changed = false;
            for delta in deltas {
                changed |= apply(snapshot, delta, seq)?;
            }
            Ok(changed)
        }
    }
}

/// The snapshot `delta` would produce on top of `snapshot`, without
/// publishing anything.
pub fn preview(snapshot: &RouteSnapshot, delta: Delta) -> Result<RouteSnapshot, PublishError> {
    let mut next = snapshot.clone();
    let mut seq = 0;
    apply(&mut next, delta, &mut seq)?;
    Ok(next)
}

/// Compute the delta that brings `current` in line with the routes and
/// services of `config`.
pub fn reconcile_config(current: &RouteSnapshot, config: &ControllerConfig) -> Delta {
    let mut deltas = Vec::new();

    for service in &config.services {
        deltas.push(Delta::DeclareService {
            service: ServiceId::new(&service.name),
            policy: service.policy,
        });
    }

    // Later duplicates win
    let mut desired: HashMap<(String, String), Route> = HashMap::new();
    for route_config in &config.routes {
        let route = Route::from(route_config);
        desired.insert((route.host.clone(), route.path_prefix.clone()), route);
    }

    for route in current.routes() {
        let key = (route.host.clone(), route.path_prefix.clone());
        if !desired.contains_key(&key) {
            deltas.push(Delta::RemoveRoute {
                host: key.0,
                path_prefix: key.1,
            });
        }
    }

    // Keep config order so publish sequence follows file order
    for route_config in &config.routes {
        let route = Route::from(route_config);
        let key = (route.host.clone(), route.path_prefix.clone());
        let Some(wanted) = desired.remove(&key) else {
            continue;
        };
        let unchanged = current
            .match_route_exact(&key.0, &key.1)
            .is_some_and(|existing| existing.same_rule(&wanted));
        if !unchanged {
            deltas.push(Delta::UpsertRoute(wanted));
        }
    }

    for service in current.services() {
        if !config.services.iter().any(|s| s.name == service.id.as_str()) {
            deltas.push(Delta::RemoveService(service.id.clone()));
        }
    }

    Delta::Batch(deltas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RouteConfig, ServiceConfig};
    use std::thread;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    fn table_with_service(name: &str) -> RouteTable {
        let table = RouteTable::new();
        table
            .publish(Delta::DeclareService {
                service: name.into(),
                policy: Policy::RoundRobin,
            })
            .unwrap();
        table
    }

    fn route(name: &str, host: &str, prefix: &str, service: &str) -> Delta {
        Delta::UpsertRoute(Route::new(name, host, prefix, service.into()))
    }

    #[test]
    fn longest_prefix_wins() {
        let table = table_with_service("web");
        table
            .publish(Delta::Batch(vec![
                route("root", "app.example.com", "/", "web"),
                route("api", "app.example.com", "/api", "web"),
                route("api-v2", "app.example.com", "/api/v2", "web"),
            ]))
            .unwrap();

        let snapshot = table.current();
        let name = |path| snapshot.match_route("app.example.com", path).map(|r| r.name.as_str());
        assert_eq!(name("/"), Some("root"));
        assert_eq!(name("/static/app.js"), Some("root"));
        assert_eq!(name("/api/users"), Some("api"));
        assert_eq!(name("/api/v2/users"), Some("api-v2"));
        assert!(snapshot.match_route("other.example.com", "/").is_none());
    }

    #[test]
    fn exact_host_beats_catch_all() {
        let table = table_with_service("web");
        table
            .publish(Delta::Batch(vec![
                route("fallback", "*", "/", "web"),
                route("app", "APP.example.com", "/app", "web"),
            ]))
            .unwrap();

        let snapshot = table.current();
        assert_eq!(snapshot.match_route("app.example.com:8080", "/app/x").unwrap().name, "app");
        assert_eq!(snapshot.match_route("app.example.com", "/other").unwrap().name, "fallback");
        assert_eq!(snapshot.match_route("anything.test", "/").unwrap().name, "fallback");
    }

    #[test]
    fn same_rule_is_replaced_by_newest() {
        let table = table_with_service("a");
        table
            .publish(Delta::DeclareService {
                service: "b".into(),
                policy: Policy::RoundRobin,
            })
            .unwrap();
        table.publish(route("first", "h", "/x", "a")).unwrap();
        table.publish(route("second", "h", "/x", "b")).unwrap();

        let snapshot = table.current();
        assert_eq!(snapshot.route_count(), 1);
        let matched = snapshot.match_route("h", "/x/1").unwrap();
        assert_eq!(matched.name, "second");
        assert_eq!(matched.service.as_str(), "b");
    }

    #[test]
    fn unknown_service_endpoint_rejected() {
        let table = table_with_service("web");
        let before = table.current().version();
        let err = table
            .publish(Delta::UpsertEndpoint {
                service: "ghost".into(),
                endpoint: EndpointSpec::new(addr(80)),
            })
            .unwrap_err();
        assert_eq!(err, PublishError::UnknownService("ghost".into()));
        assert_eq!(table.current().version(), before);
    }

    #[test]
    fn route_to_unknown_service_is_accepted() {
        let table = RouteTable::new();
        table.publish(route("r", "h", "/", "ghost")).unwrap();
        let snapshot = table.current();
        let matched = snapshot.match_route("h", "/").unwrap();
        assert!(snapshot.service(&matched.service).is_none());
    }

    #[test]
    fn failed_batch_applies_nothing() {
        let table = table_with_service("web");
        let before = table.current();
        let result = table.publish(Delta::Batch(vec![
            Delta::UpsertEndpoint {
                service: "web".into(),
                endpoint: EndpointSpec::new(addr(80)),
            },
            Delta::UpsertEndpoint {
                service: "ghost".into(),
                endpoint: EndpointSpec::new(addr(81)),
            },
        ]));
        assert!(result.is_err());

        let after = table.current();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(after.service(&"web".into()).unwrap().endpoints.is_empty());
    }

    #[test]
    fn held_snapshot_is_unaffected_by_publish() {
        let table = table_with_service("web");
        table.publish(route("r", "h", "/", "web")).unwrap();
        let held = table.current();

        table
            .publish(Delta::RemoveRoute {
                host: "h".into(),
                path_prefix: "/".into(),
            })
            .unwrap();

        assert!(held.match_route("h", "/").is_some());
        assert!(table.current().match_route("h", "/").is_none());
        assert_eq!(table.current().version(), held.version() + 1);
    }

    #[test]
    fn noop_delta_keeps_version() {
        let table = table_with_service("web");
        let version = table.current().version();
        assert_eq!(
            table
                .publish(Delta::DeclareService {
                    service: "web".into(),
                    policy: Policy::RoundRobin,
                })
                .unwrap(),
            version
        );
    }

    #[test]
    fn set_health_applies_to_every_service() {
        let table = table_with_service("a");
        table
            .publish(Delta::Batch(vec![
                Delta::DeclareService {
                    service: "b".into(),
                    policy: Policy::RoundRobin,
                },
                Delta::UpsertEndpoint {
                    service: "a".into(),
                    endpoint: EndpointSpec::new(addr(80)),
                },
                Delta::UpsertEndpoint {
                    service: "b".into(),
                    endpoint: EndpointSpec::new(addr(80)),
                },
            ]))
            .unwrap();

        table
            .publish(Delta::SetHealth {
                address: addr(80),
                health: Health::Unhealthy,
                probed_at: Some(SystemTime::now()),
            })
            .unwrap();

        let snapshot = table.current();
        for name in ["a", "b"] {
            let service = snapshot.service(&name.into()).unwrap();
            assert_eq!(service.endpoints[0].health, Health::Unhealthy);
            assert!(service.endpoints[0].last_probe.is_some());
        }

        assert_eq!(
            table.publish(Delta::SetHealth {
                address: addr(99),
                health: Health::Healthy,
                probed_at: None,
            }),
            Err(PublishError::UnknownEndpoint(addr(99)))
        );
    }

    #[test]
    fn new_endpoint_adopts_known_health() {
        let table = table_with_service("a");
        table
            .publish(Delta::Batch(vec![
                Delta::DeclareService {
                    service: "b".into(),
                    policy: Policy::RoundRobin,
                },
                Delta::UpsertEndpoint {
                    service: "a".into(),
                    endpoint: EndpointSpec::new(addr(80)),
                },
                Delta::SetHealth {
                    address: addr(80),
                    health: Health::Healthy,
                    probed_at: None,
                },
                Delta::UpsertEndpoint {
                    service: "b".into(),
                    endpoint: EndpointSpec::new(addr(80)),
                },
            ]))
            .unwrap();
        let snapshot = table.current();
        assert_eq!(snapshot.service(&"b".into()).unwrap().endpoints[0].health, Health::Healthy);
    }

    #[test]
    fn reconcile_removes_stale_routes_and_services() {
        let mut config = ControllerConfig::default();
        config.services.push(ServiceConfig {
            name: "web".into(),
            policy: Policy::RoundRobin,
            endpoints: vec![],
        });
        config.routes.push(RouteConfig {
            name: "root".into(),
            host: "app.example.com".into(),
            path_prefix: "/".into(),
            rewrite_target: None,
            service: "web".into(),
            timeout_secs: None,
            policy: None,
        });
        let table = RouteTable::from_config(&config);
        assert_eq!(table.current().route_count(), 1);

        // Reapplying the same config is a no-op
        let version = table.current().version();
        table.publish(reconcile_config(&table.current(), &config)).unwrap();
        assert_eq!(table.current().version(), version);

        let mut next = config.clone();
        next.routes[0].path_prefix = "/v2".into();
        next.services[0].name = "web2".into();
        next.routes[0].service = "web2".into();
        table.publish(reconcile_config(&table.current(), &next)).unwrap();

        let snapshot = table.current();
        assert_eq!(snapshot.route_count(), 1);
        assert!(snapshot.match_route("app.example.com", "/").is_none());
        assert!(snapshot.match_route("app.example.com", "/v2").is_some());
        assert!(snapshot.service(&"web".into()).is_none());
        assert!(snapshot.service(&"web2".into()).is_some());
    }

    #[test]
    fn readers_never_see_route_without_endpoints() {
        let table = Arc::new(RouteTable::new());

        let writer = {
            let table = table.clone();
            thread::spawn(move || {
                for i in 0..200u16 {
                    let service = ServiceId::new(format!("svc-{}", i));
                    table
                        .publish(Delta::Batch(vec![
                            Delta::DeclareService {
                                service: service.clone(),
                                policy: Policy::RoundRobin,
                            },
                            Delta::UpsertEndpoint {
                                service: service.clone(),
                                endpoint: EndpointSpec::new(addr(1000 + i)),
                            },
                            Delta::UpsertRoute(Route::new(
                                format!("r{}", i),
                                "h",
                                format!("/{}", i),
                                service,
                            )),
                        ]))
                        .unwrap();
                }
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || {
                    for _ in 0..500 {
                        let snapshot = table.current();
                        for route in snapshot.routes() {
                            let service = snapshot
                                .service(&route.service)
                                .expect("route published without its service");
                            assert_eq!(service.endpoints.len(), 1);
                        }
                    }
                })
            })
            .collect();

        writer.join().unwrap();
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(table.current().route_count(), 200);
    }
}
