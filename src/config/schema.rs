//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the controller.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::load_balancer::Policy;

/// Root configuration for the ingress controller.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ControllerConfig {
    /// Listener configuration (bind address, TLS).
    pub listener: ListenerConfig,

    /// Ingress rules mapping host/path to services.
    pub routes: Vec<RouteConfig>,

    /// Service declarations. Static endpoints are only consumed by the
    /// static registry.
    pub services: Vec<ServiceConfig>,

    /// Upstream registry selection and reconnect behavior.
    pub registry: RegistryConfig,

    /// Health check settings.
    pub health_check: HealthCheckConfig,

    /// Timeout and connection pool configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Plaintext bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS listener.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent in-flight requests (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// TLS bind address (e.g., "0.0.0.0:8443").
    #[serde(default = "default_tls_bind")]
    pub bind_address: String,

    /// Certificates, selected per connection by SNI. The first entry is
    /// served to clients that send no (or an unknown) server name.
    pub certificates: Vec<CertificateConfig>,
}

fn default_tls_bind() -> String {
    "0.0.0.0:8443".to_string()
}

/// A certificate/key pair and the hosts it serves.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CertificateConfig {
    /// Host names, exact (`app.example.com`) or wildcard (`*.example.com`).
    pub hosts: Vec<String>,

    /// Path to certificate chain (PEM).
    pub cert_path: String,

    /// Path to private key (PEM).
    pub key_path: String,
}

/// Ingress rule mapping (host, path prefix) to a service.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Host to match. `*` matches any host without a more specific rule.
    #[serde(default = "default_host")]
    pub host: String,

    /// Path prefix to match.
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,

    /// Replacement for the matched prefix before forwarding.
    #[serde(default)]
    pub rewrite_target: Option<String>,

    /// Service to forward to.
    pub service: String,

    /// Per-route response/idle timeout override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Per-route load balancing policy override.
    #[serde(default)]
    pub policy: Option<Policy>,
}

fn default_host() -> String {
    "*".to_string()
}

fn default_path_prefix() -> String {
    "/".to_string()
}

/// A logical upstream group.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServiceConfig {
    /// Service identifier referenced by routes.
    pub name: String,

    /// Default load balancing policy for routes targeting this service.
    #[serde(default)]
    pub policy: Policy,

    /// Static endpoints (static registry only).
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

/// A static upstream endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EndpointConfig {
    /// Endpoint address (e.g., "10.0.0.5:8080").
    pub address: String,

    /// Weight for weighted load balancing (default: 1).
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Which registry supplies endpoints.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RegistryKind {
    /// Endpoints come from `[[services]]` in the config file.
    #[default]
    Static,
    /// Endpoints come from Kubernetes EndpointSlices.
    Kubernetes,
}

/// Registry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub kind: RegistryKind,

    /// Namespace to watch (Kubernetes only). `None` watches all namespaces.
    pub namespace: Option<String>,

    /// First reconnect delay after losing the subscription.
    pub initial_backoff_ms: u64,

    /// Upper bound for the reconnect delay.
    pub max_backoff_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            kind: RegistryKind::Static,
            namespace: None,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Probe protocol.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeProtocol {
    #[default]
    Tcp,
    Http,
}

/// Health check configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// Enable active health checks.
    pub enabled: bool,

    /// Probe protocol (TCP connect or HTTP GET).
    pub protocol: ProbeProtocol,

    /// Path to probe for HTTP health checks.
    pub path: String,

    /// Probe interval in milliseconds.
    pub interval_ms: u64,

    /// Per-probe timeout in milliseconds. Must be below the interval.
    pub timeout_ms: u64,

    /// Number of consecutive successes before marking healthy.
    pub healthy_threshold: u32,

    /// Number of consecutive failures before marking unhealthy.
    pub unhealthy_threshold: u32,

    /// Cap on probes in flight at once.
    pub max_concurrent_probes: usize,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            protocol: ProbeProtocol::Tcp,
            path: "/healthz".to_string(),
            interval_ms: 5_000,
            timeout_ms: 2_000,
            healthy_threshold: 2,
            unhealthy_threshold: 3,
            max_concurrent_probes: 64,
        }
    }
}

/// Timeout configuration for the upstream side.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Default wait for response headers, and maximum gap between response
    /// body frames, in seconds. Routes may override.
    pub response_secs: u64,

    /// Pooled connections idle longer than this are evicted.
    pub pool_idle_secs: u64,

    /// Idle connections kept per endpoint.
    pub max_idle_per_endpoint: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            response_secs: 30,
            pool_idle_secs: 60,
            max_idle_per_endpoint: 32,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: ControllerConfig = toml::from_str(
            r#"
            [[routes]]
            name = "frontend"
            host = "app.example.com"
            service = "frontend"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.routes[0].path_prefix, "/");
        assert_eq!(config.routes[0].rewrite_target, None);
        assert_eq!(config.health_check.interval_ms, 5_000);
        assert_eq!(config.health_check.timeout_ms, 2_000);
        assert_eq!(config.timeouts.connect_secs, 5);
        assert_eq!(config.timeouts.response_secs, 30);
        assert_eq!(config.timeouts.pool_idle_secs, 60);
        assert_eq!(config.registry.kind, RegistryKind::Static);
    }

    #[test]
    fn full_service_section_parses() {
        let config: ControllerConfig = toml::from_str(
            r#"
            [registry]
            kind = "kubernetes"
            namespace = "demo"

            [health_check]
            protocol = "http"
            path = "/ready"

            [[services]]
            name = "backend"
            policy = "weighted"

            [[services.endpoints]]
            address = "10.0.0.1:8080"
            weight = 3

            [[services.endpoints]]
            address = "10.0.0.2:8080"

            [[routes]]
            name = "api"
            host = "app.example.com"
            path_prefix = "/api"
            rewrite_target = "/"
            service = "backend"
            timeout_secs = 10
            policy = "least_connections"
            "#,
        )
        .unwrap();

        assert_eq!(config.registry.kind, RegistryKind::Kubernetes);
        assert_eq!(config.registry.namespace.as_deref(), Some("demo"));
        assert_eq!(config.health_check.protocol, ProbeProtocol::Http);
        assert_eq!(config.services[0].policy, Policy::Weighted);
        assert_eq!(config.services[0].endpoints[0].weight, 3);
        assert_eq!(config.services[0].endpoints[1].weight, 1);
        assert_eq!(config.routes[0].policy, Some(Policy::LeastConnections));
        assert_eq!(config.routes[0].timeout_secs, Some(10));
    }
}
