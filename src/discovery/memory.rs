//! In-process registry.
//!
//! Used for tests and embedding. It can be disconnected and reconnected
//! to exercise subscription loss: mutations made while disconnected are
//! visible to `list` but never delivered as events.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard};

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;

use crate::discovery::registry::{EventStream, Registry, RegistryError, RegistryEvent, ServiceListing};
use crate::routing::{EndpointSpec, ServiceId};

type Subscriber = mpsc::UnboundedSender<Result<RegistryEvent, RegistryError>>;

#[derive(Default)]
struct Inner {
    services: BTreeMap<ServiceId, Vec<EndpointSpec>>,
    subscribers: Vec<Subscriber>,
    disconnected: bool,
}

#[derive(Default)]
pub struct MemoryRegistry {
    inner: Mutex<Inner>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an endpoint or replace its spec.
    pub fn upsert(&self, service: impl Into<ServiceId>, endpoint: EndpointSpec) {
        let service = service.into();
        let mut inner = self.lock();
        let endpoints = inner.services.entry(service.clone()).or_default();
        match endpoints.iter_mut().find(|e| e.address == endpoint.address) {
            Some(existing) => *existing = endpoint.clone(),
            None => endpoints.push(endpoint.clone()),
        }
        inner.broadcast(RegistryEvent::EndpointAdded { service, endpoint });
    }

    pub fn remove(&self, service: impl Into<ServiceId>, address: SocketAddr) {
        let service = service.into();
        let mut inner = self.lock();
        if let Some(endpoints) = inner.services.get_mut(&service) {
            endpoints.retain(|e| e.address != address);
        }
        inner.broadcast(RegistryEvent::EndpointRemoved { service, address });
    }

    pub fn set_ready(&self, service: impl Into<ServiceId>, address: SocketAddr, ready: bool) {
        let service = service.into();
        let mut inner = self.lock();
        if let Some(endpoint) = inner
            .services
            .get_mut(&service)
            .and_then(|eps| eps.iter_mut().find(|e| e.address == address))
        {
            endpoint.ready = Some(ready);
        }
        inner.broadcast(RegistryEvent::HealthHint {
            service,
            address,
            ready,
        });
    }

    /// Drop every subscription and refuse new ones until `reconnect`.
    pub fn disconnect(&self) {
        let mut inner = self.lock();
        inner.disconnected = true;
        for subscriber in inner.subscribers.drain(..) {
            let _ = subscriber.send(Err(RegistryError::Disconnected));
        }
    }

    pub fn reconnect(&self) {
        self.lock().disconnected = false;
    }

    pub fn subscriber_count(&self) -> usize {
        let mut inner = self.lock();
        inner.subscribers.retain(|s| !s.is_closed());
        inner.subscribers.len()
    }
}

impl Inner {
    fn broadcast(&mut self, event: RegistryEvent) {
        if self.disconnected {
            return;
        }
        self.subscribers.retain(|s| s.send(Ok(event.clone())).is_ok());
    }
}

impl Registry for MemoryRegistry {
    async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        let mut inner = self.lock();
        if inner.disconnected {
            return Err(RegistryError::Unavailable("registry disconnected".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        inner.subscribers.push(tx);

        let events = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(events.boxed())
    }

    async fn list(&self) -> Result<Vec<ServiceListing>, RegistryError> {
        let inner = self.lock();
        if inner.disconnected {
            return Err(RegistryError::Unavailable("registry disconnected".into()));
        }
        Ok(inner
            .services
            .iter()
            .map(|(service, endpoints)| ServiceListing {
                service: service.clone(),
                endpoints: endpoints.clone(),
            })
            .collect())
    }
}
