//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, probe timeout below interval)
//! - Validate addresses and path prefixes
//! - Report routes that reference undeclared services
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - A route naming an unknown service is a warning: that route serves 503
//!   while the rest of the controller keeps running
//! - Duplicate (host, path_prefix) pairs are a warning: the later entry wins

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ControllerConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: String, value: String },

    #[error("route {route:?}: path prefix {prefix:?} must start with '/'")]
    InvalidPathPrefix { route: String, prefix: String },

    #[error("service {0:?} declared more than once")]
    DuplicateService(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ControllerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.listener.max_connections == 0 {
        errors.push(invalid("listener.max_connections", "must be greater than 0"));
    }
    if let Some(tls) = &config.listener.tls {
        check_address(&mut errors, "listener.tls.bind_address", &tls.bind_address);
        if tls.certificates.is_empty() {
            errors.push(invalid("listener.tls.certificates", "at least one certificate is required"));
        }
        for (i, cert) in tls.certificates.iter().enumerate() {
            if cert.hosts.is_empty() {
                errors.push(invalid(
                    &format!("listener.tls.certificates[{}].hosts", i),
                    "at least one host is required",
                ));
            }
        }
    }

    let mut services = HashSet::new();
    for service in &config.services {
        if service.name.is_empty() {
            errors.push(invalid("services.name", "must not be empty"));
        }
        if !services.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        for endpoint in &service.endpoints {
            check_address(
                &mut errors,
                &format!("services.{}.endpoints", service.name),
                &endpoint.address,
            );
        }
    }

    let mut seen_rules = HashSet::new();
    for route in &config.routes {
        if route.name.is_empty() {
            errors.push(invalid("routes.name", "must not be empty"));
        }
        if route.host.is_empty() {
            errors.push(invalid(&format!("routes.{}.host", route.name), "must not be empty"));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::InvalidPathPrefix {
                route: route.name.clone(),
                prefix: route.path_prefix.clone(),
            });
        }
        if let Some(rewrite) = &route.rewrite_target {
            if !rewrite.starts_with('/') {
                errors.push(invalid(
                    &format!("routes.{}.rewrite_target", route.name),
                    "must start with '/'",
                ));
            }
        }
        if route.timeout_secs == Some(0) {
            errors.push(invalid(&format!("routes.{}.timeout_secs", route.name), "must be greater than 0"));
        }
        if !services.contains(route.service.as_str()) {
            tracing::warn!(
                route = %route.name,
                service = %route.service,
                "Route references an undeclared service; it will answer 503"
            );
        }
        if !seen_rules.insert((route.host.to_ascii_lowercase(), route.path_prefix.as_str())) {
            tracing::warn!(
                route = %route.name,
                host = %route.host,
                path_prefix = %route.path_prefix,
                "Duplicate host/path rule; the later route wins"
            );
        }
    }

    let health = &config.health_check;
    if health.interval_ms == 0 {
        errors.push(invalid("health_check.interval_ms", "must be greater than 0"));
    }
    if health.timeout_ms == 0 || health.timeout_ms >= health.interval_ms {
        errors.push(invalid("health_check.timeout_ms", "must be greater than 0 and below interval_ms"));
    }
    if health.healthy_threshold == 0 {
        errors.push(invalid("health_check.healthy_threshold", "must be at least 1"));
    }
    if health.unhealthy_threshold == 0 {
        errors.push(invalid("health_check.unhealthy_threshold", "must be at least 1"));
    }
    if health.max_concurrent_probes == 0 {
        errors.push(invalid("health_check.max_concurrent_probes", "must be at least 1"));
    }
    if !health.path.starts_with('/') {
        errors.push(invalid("health_check.path", "must start with '/'"));
    }

    let timeouts = &config.timeouts;
    if timeouts.connect_secs == 0 {
        errors.push(invalid("timeouts.connect_secs", "must be greater than 0"));
    }
    if timeouts.response_secs == 0 {
        errors.push(invalid("timeouts.response_secs", "must be greater than 0"));
    }
    if timeouts.pool_idle_secs == 0 {
        errors.push(invalid("timeouts.pool_idle_secs", "must be greater than 0"));
    }

    let registry = &config.registry;
    if registry.initial_backoff_ms == 0 || registry.initial_backoff_ms > registry.max_backoff_ms {
        errors.push(invalid(
            "registry.initial_backoff_ms",
            "must be greater than 0 and not above max_backoff_ms",
        ));
    }

    if config.observability.metrics_enabled {
        check_address(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }
    if config.admin.enabled {
        check_address(&mut errors, "admin.bind_address", &config.admin.bind_address);
        if config.admin.api_key.is_empty() {
            errors.push(invalid("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn invalid(field: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

fn check_address(errors: &mut Vec<ValidationError>, field: &str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: field.to_string(),
            value: value.to_string(),
        });
    }
}
