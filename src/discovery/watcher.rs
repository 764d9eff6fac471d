//! Registry subscription with reconnect and resync.
//!
//! # State Transitions
//! ```text
//! Connecting → (subscribe + list ok) → Resynced → Streaming
//! Streaming  → (stream error or end)  → Backoff
//! Connecting → (error)                → Backoff
//! Backoff    → (delay elapsed)        → Connecting
//! ```
//!
//! The attempt counter resets once a resync succeeds, so a healthy
//! subscription that later drops starts again from the initial delay.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use tokio::sync::broadcast;

use crate::config::RegistryConfig;
use crate::discovery::registry::{Registry, RegistryError, RegistryEvent, ServiceListing};
use crate::observability::metrics;
use crate::resilience::calculate_backoff;
use crate::routing::{Delta, EndpointSpec, Health, RouteSnapshot, RouteTable, ServiceId};

/// Deltas that make `snapshot` agree with `listings`.
///
/// Only services declared in the snapshot are reconciled. A declared
/// service missing from the listings has no endpoints. Returns `None` when
/// nothing differs.
pub fn resync_delta(snapshot: &RouteSnapshot, listings: &[ServiceListing]) -> Option<Delta> {
    let mut listed: HashMap<&ServiceId, BTreeMap<SocketAddr, &EndpointSpec>> = HashMap::new();
    for listing in listings {
        let endpoints = listed.entry(&listing.service).or_default();
        for endpoint in &listing.endpoints {
            endpoints.entry(endpoint.address).or_insert(endpoint);
        }
    }

    let mut services: Vec<_> = snapshot.services().collect();
    services.sort_by(|a, b| a.id.cmp(&b.id));

    let mut deltas = Vec::new();
    let empty = BTreeMap::new();
    for service in services {
        let wanted = listed.get(&service.id).unwrap_or(&empty);

        for endpoint in &service.endpoints {
            if !wanted.contains_key(&endpoint.address) {
                deltas.push(Delta::RemoveEndpoint {
                    service: service.id.clone(),
                    address: endpoint.address,
                });
            }
        }

        for (address, spec) in wanted {
            match service.endpoint(*address) {
                None => deltas.push(Delta::UpsertEndpoint {
                    service: service.id.clone(),
                    endpoint: (*spec).clone(),
                }),
                Some(current) => {
                    if current.weight != spec.weight {
                        deltas.push(Delta::UpsertEndpoint {
                            service: service.id.clone(),
                            endpoint: (*spec).clone(),
                        });
                    }
                    if let Some(health) = spec.ready.and_then(|ready| hinted_health(current.health, ready)) {
                        deltas.push(Delta::SetHealth {
                            address: *address,
                            health,
                            probed_at: None,
                        });
                    }
                }
            }
        }
    }

    for listing in listings {
        if snapshot.service(&listing.service).is_none() {
            tracing::debug!(service = %listing.service, "Ignoring listing for undeclared service");
        }
    }

    if deltas.is_empty() {
        None
    } else {
        Some(Delta::Batch(deltas))
    }
}

/// Health change implied by a readiness hint, if any.
///
/// Not ready forces `Unhealthy`. Ready only lifts an `Unhealthy` endpoint
/// back to `Unknown`; probes decide when it is `Healthy`.
fn hinted_health(current: Health, ready: bool) -> Option<Health> {
    match (current, ready) {
        (Health::Unhealthy, true) => Some(Health::Unknown),
        (Health::Unhealthy, false) => None,
        (_, false) => Some(Health::Unhealthy),
        (_, true) => None,
    }
}

/// Translate one registry event into a delta against `snapshot`.
pub fn event_delta(snapshot: &RouteSnapshot, event: RegistryEvent) -> Option<Delta> {
    match event {
        RegistryEvent::EndpointAdded { service, endpoint } => {
            // A known endpoint re-announced with readiness carries a health hint
            let hint = snapshot
                .service(&service)?
                .endpoint(endpoint.address)
                .zip(endpoint.ready)
                .and_then(|(current, ready)| hinted_health(current.health, ready));
            let address = endpoint.address;
            let upsert = Delta::UpsertEndpoint { service, endpoint };
            Some(match hint {
                Some(health) => Delta::Batch(vec![
                    upsert,
                    Delta::SetHealth {
                        address,
                        health,
                        probed_at: None,
                    },
                ]),
                None => upsert,
            })
        }
        RegistryEvent::EndpointRemoved { service, address } => {
            snapshot.service(&service)?.endpoint(address)?;
            Some(Delta::RemoveEndpoint { service, address })
        }
        RegistryEvent::HealthHint {
            service,
            address,
            ready,
        } => {
            let current = snapshot.service(&service)?.endpoint(address)?;
            let health = hinted_health(current.health, ready)?;
            Some(Delta::SetHealth {
                address,
                health,
                probed_at: None,
            })
        }
    }
}

/// Keeps the route table's endpoint sets in step with a registry.
pub struct EndpointWatcher<R> {
    registry: Arc<R>,
    table: Arc<RouteTable>,
    initial_backoff_ms: u64,
    max_backoff_ms: u64,
}

impl<R: Registry> EndpointWatcher<R> {
    pub fn new(registry: Arc<R>, table: Arc<RouteTable>, config: &RegistryConfig) -> Self {
        Self {
            registry,
            table,
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Endpoint watcher starting");
        let mut attempt: u32 = 0;

        loop {
            tokio::select! {
                outcome = self.session(&mut attempt) => match outcome {
                    Ok(()) => tracing::warn!("Registry subscription ended"),
                    Err(e) => tracing::warn!(error = %e, "Registry subscription lost"),
                },
                _ = shutdown.recv() => {
                    tracing::info!("Endpoint watcher received shutdown signal, exiting loop");
                    return;
                }
            }

            attempt = attempt.saturating_add(1);
            let delay = calculate_backoff(attempt, self.initial_backoff_ms, self.max_backoff_ms);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to registry");
            metrics::record_reconnect();

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.recv() => {
                    tracing::info!("Endpoint watcher received shutdown signal, exiting loop");
                    return;
                }
            }
        }
    }

    /// One subscription lifetime: subscribe, resync, then follow events.
    async fn session(&self, attempt: &mut u32) -> Result<(), RegistryError> {
        let mut events = self.registry.subscribe().await?;
        let listings = self.registry.list().await?;
        self.resync(&listings);
        *attempt = 0;

        while let Some(event) = events.next().await {
            self.apply(event?);
        }
        Ok(())
    }

    /// Reconcile the table against a full listing.
    pub fn resync(&self, listings: &[ServiceListing]) {
        let snapshot = self.table.current();
        let Some(delta) = resync_delta(&snapshot, listings) else {
            tracing::debug!(version = snapshot.version(), "Resync found no drift");
            return;
        };
        match self.table.publish(delta) {
            Ok(version) => tracing::info!(version, "Resynced endpoints with registry"),
            Err(e) => tracing::warn!(error = %e, "Resync rejected"),
        }
    }

    fn apply(&self, event: RegistryEvent) {
        let snapshot = self.table.current();
        let Some(delta) = event_delta(&snapshot, event) else {
            return;
        };
        if let Err(e) = self.table.publish(delta) {
            tracing::debug!(error = %e, "Registry event not applied");
        }
    }
}
