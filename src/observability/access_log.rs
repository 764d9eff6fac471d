//! Per-request access records.
//!
//! A record is built as the request moves through the proxy and is emitted
//! exactly once: when the response stream ends, fails, or is dropped by the
//! client, or right away for responses the proxy generates itself.

use std::net::SocketAddr;
use std::time::{Instant, SystemTime};

use crate::observability::metrics;

/// Access log target, filterable with `RUST_LOG=access_log=info`.
pub const TARGET: &str = "access_log";

#[derive(Debug)]
pub struct AccessLog {
    request_id: String,
    method: String,
    host: String,
    path: String,
    route: Option<String>,
    endpoint: Option<SocketAddr>,
    status: u16,
    bytes: u64,
    error: Option<&'static str>,
    started: Instant,
    emitted: bool,
}

impl AccessLog {
    pub fn start(request_id: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            method: method.into(),
            host: String::new(),
            path: path.into(),
            route: None,
            endpoint: None,
            status: 0,
            bytes: 0,
            error: None,
            started: Instant::now(),
            emitted: false,
        }
    }

    pub fn set_host(&mut self, host: &str) {
        self.host = host.to_string();
    }

    pub fn set_route(&mut self, route: &str) {
        self.route = Some(route.to_string());
    }

    pub fn set_endpoint(&mut self, endpoint: SocketAddr) {
        self.endpoint = Some(endpoint);
    }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    pub fn set_error(&mut self, kind: &'static str) {
        self.error = Some(kind);
    }

    pub fn add_bytes(&mut self, n: usize) {
        self.bytes += n as u64;
    }

    pub fn route(&self) -> &str {
        self.route.as_deref().unwrap_or("none")
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Log the record and update request metrics. Later calls are no-ops.
    pub fn emit(&mut self) {
        if self.emitted {
            return;
        }
        self.emitted = true;

        let latency_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        let timestamp = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let endpoint = self.endpoint.map(|e| e.to_string());

        tracing::info!(
            target: TARGET,
            timestamp,
            request_id = %self.request_id,
            method = %self.method,
            host = %self.host,
            path = %self.path,
            route = self.route(),
            endpoint = endpoint.as_deref().unwrap_or("-"),
            status = self.status,
            latency_ms,
            bytes = self.bytes,
            error = self.error.unwrap_or("-"),
        );
        metrics::record_request(self.route(), self.status, self.started);
    }
}

impl Drop for AccessLog {
    fn drop(&mut self) {
        self.emit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_once() {
        let mut log = AccessLog::start("req-1", "GET", "/api");
        log.set_route("api");
        log.set_status(200);
        log.add_bytes(10);
        log.add_bytes(5);
        log.emit();
        assert!(log.emitted);
        assert_eq!(log.bytes, 15);
        // Drop after emit must not log again
        log.emit();
        assert!(log.emitted);
    }

    #[test]
    fn route_defaults_to_none() {
        let log = AccessLog::start("req-2", "GET", "/");
        assert_eq!(log.route(), "none");
    }
}
