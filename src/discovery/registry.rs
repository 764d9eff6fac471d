//! The registry capability consumed by the endpoint watcher.

use std::future::Future;
use std::net::SocketAddr;

use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::config::ConfigError;
use crate::routing::{EndpointSpec, ServiceId};

/// Change notifications. The stream ending, or yielding an error, means the
/// subscription is lost.
pub type EventStream = BoxStream<'static, Result<RegistryEvent, RegistryError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// An endpoint appeared or its weight changed.
    EndpointAdded {
        service: ServiceId,
        endpoint: EndpointSpec,
    },
    EndpointRemoved {
        service: ServiceId,
        address: SocketAddr,
    },
    /// Registry-side readiness of an endpoint changed.
    HealthHint {
        service: ServiceId,
        address: SocketAddr,
        ready: bool,
    },
}

/// Every endpoint of one service at a point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceListing {
    pub service: ServiceId,
    pub endpoints: Vec<EndpointSpec>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry unavailable: {0}")]
    Unavailable(String),

    #[error("registry subscription closed")]
    Disconnected,

    #[error("config registry error: {0}")]
    Config(#[from] ConfigError),

    #[error("file watch error: {0}")]
    Watch(#[from] notify::Error),

    #[cfg(feature = "kubernetes")]
    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[cfg(feature = "kubernetes")]
    #[error("kubernetes watch error: {0}")]
    KubeWatch(#[from] kube::runtime::watcher::Error),
}

/// A source of service endpoints.
pub trait Registry: Send + Sync + 'static {
    /// Open a change subscription.
    fn subscribe(&self) -> impl Future<Output = Result<EventStream, RegistryError>> + Send;

    /// Current endpoints of every service the registry knows.
    fn list(&self) -> impl Future<Output = Result<Vec<ServiceListing>, RegistryError>> + Send;
}
