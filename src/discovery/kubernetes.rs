//! Kubernetes EndpointSlice registry.
//!
//! EndpointSlices are grouped by their `kubernetes.io/service-name` label
//! into services named `namespace/service`. A Service usually has several
//! slices, so endpoints are aggregated across all of them and
//! deduplicated by address before being compared.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

use futures_util::stream::{self, StreamExt};
use k8s_openapi::api::discovery::v1::EndpointSlice;
use kube::api::{Api, ListParams};
use kube::runtime::watcher::{self, Event};
use kube::{Client, ResourceExt};

use crate::discovery::file::diff_listings;
use crate::discovery::registry::{EventStream, Registry, RegistryError, RegistryEvent, ServiceListing};
use crate::routing::{EndpointSpec, ServiceId};

const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";

pub struct KubernetesRegistry {
    client: Client,
    namespace: Option<String>,
}

impl KubernetesRegistry {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    /// Connect using the in-cluster or kubeconfig credentials.
    pub async fn try_default(namespace: Option<String>) -> Result<Self, RegistryError> {
        Ok(Self::new(Client::try_default().await?, namespace))
    }

    fn api(&self) -> Api<EndpointSlice> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

/// Service id and endpoints described by one slice.
pub fn slice_endpoints(slice: &EndpointSlice) -> Option<(ServiceId, Vec<EndpointSpec>)> {
    let namespace = slice.namespace().unwrap_or_else(|| "default".to_string());
    let service_name = slice.labels().get(SERVICE_NAME_LABEL)?;
    let service = ServiceId::new(format!("{}/{}", namespace, service_name));

    // Prefer port named "http", else take the first port
    let port = slice
        .ports
        .as_ref()
        .and_then(|ports| {
            ports
                .iter()
                .find(|p| p.name.as_deref() == Some("http"))
                .or_else(|| ports.first())
                .and_then(|p| p.port)
        })
        .and_then(|p| u16::try_from(p).ok())?;

    let mut endpoints = Vec::new();
    for endpoint in &slice.endpoints {
        // Unset readiness means ready
        let ready = endpoint
            .conditions
            .as_ref()
            .and_then(|c| c.ready)
            .unwrap_or(true);
        for address in &endpoint.addresses {
            match address.parse::<IpAddr>() {
                Ok(ip) => endpoints.push(EndpointSpec::new(SocketAddr::new(ip, port)).with_ready(ready)),
                Err(_) => tracing::warn!(address = %address, "Skipping unparsable EndpointSlice address"),
            }
        }
    }
    Some((service, endpoints))
}

/// Slices seen so far, keyed by service then slice name.
#[derive(Default)]
struct SliceIndex {
    services: HashMap<ServiceId, HashMap<String, Vec<EndpointSpec>>>,
}

impl SliceIndex {
    fn listing(&self, service: &ServiceId) -> ServiceListing {
        let mut merged: BTreeMap<SocketAddr, EndpointSpec> = BTreeMap::new();
        for endpoints in self.services.get(service).into_iter().flat_map(|s| s.values()) {
            for endpoint in endpoints {
                merged.entry(endpoint.address).or_insert_with(|| endpoint.clone());
            }
        }
        ServiceListing {
            service: service.clone(),
            endpoints: merged.into_values().collect(),
        }
    }

    fn listings(&self) -> Vec<ServiceListing> {
        self.services.keys().map(|s| self.listing(s)).collect()
    }

    /// Record a slice and return the events it implies.
    fn apply(&mut self, slice: &EndpointSlice) -> Vec<RegistryEvent> {
        let Some((service, endpoints)) = slice_endpoints(slice) else {
            return Vec::new();
        };
        let before = self.listing(&service);
        self.services
            .entry(service.clone())
            .or_default()
            .insert(slice.name_any(), endpoints);
        changes(&before, &self.listing(&service))
    }

    fn delete(&mut self, slice: &EndpointSlice) -> Vec<RegistryEvent> {
        let Some((service, _)) = slice_endpoints(slice) else {
            return Vec::new();
        };
        let before = self.listing(&service);
        if let Some(slices) = self.services.get_mut(&service) {
            slices.remove(&slice.name_any());
            if slices.is_empty() {
                self.services.remove(&service);
            }
        }
        changes(&before, &self.listing(&service))
    }
}

/// Membership and weight changes plus readiness flips.
fn changes(before: &ServiceListing, after: &ServiceListing) -> Vec<RegistryEvent> {
    diff_listings(std::slice::from_ref(before), std::slice::from_ref(after))
        .into_iter()
        .map(|event| match event {
            // Same address and weight: only readiness moved
            RegistryEvent::EndpointAdded { service, endpoint }
                if before
                    .endpoints
                    .iter()
                    .any(|e| e.address == endpoint.address && e.weight == endpoint.weight) =>
            {
                RegistryEvent::HealthHint {
                    service,
                    address: endpoint.address,
                    ready: endpoint.ready.unwrap_or(true),
                }
            }
            other => other,
        })
        .collect()
}

impl Registry for KubernetesRegistry {
    async fn subscribe(&self) -> Result<EventStream, RegistryError> {
        let mut index = SliceIndex::default();
        let events = watcher::watcher(self.api(), watcher::Config::default()).flat_map(move |event| {
            let items: Vec<Result<RegistryEvent, RegistryError>> = match event {
                Ok(Event::Apply(slice)) | Ok(Event::InitApply(slice)) => {
                    index.apply(&slice).into_iter().map(Ok).collect()
                }
                Ok(Event::Delete(slice)) => index.delete(&slice).into_iter().map(Ok).collect(),
                Ok(Event::Init) => Vec::new(),
                Ok(Event::InitDone) => {
                    tracing::debug!("EndpointSlice watcher initial sync complete");
                    Vec::new()
                }
                Err(e) => vec![Err(RegistryError::from(e))],
            };
            stream::iter(items)
        });
        Ok(events.boxed())
    }

    async fn list(&self) -> Result<Vec<ServiceListing>, RegistryError> {
        let slices = self.api().list(&ListParams::default()).await?;
        let mut index = SliceIndex::default();
        for slice in &slices.items {
            index.apply(slice);
        }
        Ok(index.listings())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::discovery::v1::{Endpoint, EndpointConditions, EndpointPort};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn slice(name: &str, addresses: &[(&str, bool)], port: i32) -> EndpointSlice {
        EndpointSlice {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("shop".to_string()),
                labels: Some([(SERVICE_NAME_LABEL.to_string(), "cart".to_string())].into()),
                ..Default::default()
            },
            address_type: "IPv4".to_string(),
            endpoints: addresses
                .iter()
                .map(|(ip, ready)| Endpoint {
                    addresses: vec![ip.to_string()],
                    conditions: Some(EndpointConditions {
                        ready: Some(*ready),
                        ..Default::default()
                    }),
                    ..Default::default()
                })
                .collect(),
            ports: Some(vec![
                EndpointPort {
                    name: Some("metrics".to_string()),
                    port: Some(9100),
                    ..Default::default()
                },
                EndpointPort {
                    name: Some("http".to_string()),
                    port: Some(port),
                    ..Default::default()
                },
            ]),
        }
    }

    #[test]
    fn slice_uses_http_port_and_namespaced_id() {
        let (service, endpoints) = slice_endpoints(&slice("a", &[("10.1.0.1", true)], 8080)).unwrap();
        assert_eq!(service.as_str(), "shop/cart");
        assert_eq!(endpoints[0].address, "10.1.0.1:8080".parse().unwrap());
        assert_eq!(endpoints[0].ready, Some(true));
    }

    #[test]
    fn slices_aggregate_and_dedupe() {
        let mut index = SliceIndex::default();
        index.apply(&slice("a", &[("10.1.0.1", true), ("10.1.0.2", true)], 8080));
        index.apply(&slice("b", &[("10.1.0.2", true), ("10.1.0.3", true)], 8080));

        let listing = index.listing(&"shop/cart".into());
        assert_eq!(listing.endpoints.len(), 3);

        let events = index.delete(&slice("a", &[], 8080));
        assert_eq!(
            events,
            vec![RegistryEvent::EndpointRemoved {
                service: "shop/cart".into(),
                address: "10.1.0.1:8080".parse().unwrap(),
            }]
        );
    }

    #[test]
    fn readiness_flip_is_a_hint() {
        let mut index = SliceIndex::default();
        index.apply(&slice("a", &[("10.1.0.1", true)], 8080));
        let events = index.apply(&slice("a", &[("10.1.0.1", false)], 8080));
        assert_eq!(
            events,
            vec![RegistryEvent::HealthHint {
                service: "shop/cart".into(),
                address: "10.1.0.1:8080".parse().unwrap(),
                ready: false,
            }]
        );
    }
}
