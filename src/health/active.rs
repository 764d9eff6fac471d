//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe every endpoint in the live snapshot
//! - Bound probe concurrency and per-probe duration
//! - Publish health transitions to the route table

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::Request;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};

use crate::config::{HealthCheckConfig, ProbeProtocol};
use crate::health::state::HealthState;
use crate::observability::metrics;
use crate::routing::{Delta, PublishError, RouteTable};

/// Runs one kind of probe against an address.
#[derive(Clone)]
struct Prober {
    protocol: ProbeProtocol,
    path: Arc<str>,
    timeout: Duration,
    client: Client<HttpConnector, Body>,
}

impl Prober {
    async fn probe(&self, addr: SocketAddr) -> bool {
        match self.protocol {
            ProbeProtocol::Tcp => self.probe_tcp(addr).await,
            ProbeProtocol::Http => self.probe_http(addr).await,
        }
    }

    async fn probe_tcp(&self, addr: SocketAddr) -> bool {
        match time::timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %addr, error = %e, "TCP probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(endpoint = %addr, "TCP probe timed out");
                false
            }
        }
    }

    async fn probe_http(&self, addr: SocketAddr) -> bool {
        let request = match Request::builder()
            .method("GET")
            .uri(format!("http://{}{}", addr, self.path))
            .header("user-agent", "ingress-controller-health-check")
            .body(Body::empty())
        {
            Ok(req) => req,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build health check request");
                return false;
            }
        };

        match time::timeout(self.timeout, self.client.request(request)).await {
            Ok(Ok(response)) => {
                let success = response.status().is_success();
                if !success {
                    tracing::debug!(endpoint = %addr, status = %response.status(), "HTTP probe failed: non-success status");
                }
                success
            }
            Ok(Err(e)) => {
                tracing::debug!(endpoint = %addr, error = %e, "HTTP probe failed: connection error");
                false
            }
            Err(_) => {
                tracing::debug!(endpoint = %addr, "HTTP probe timed out");
                false
            }
        }
    }
}

/// Periodic prober feeding health transitions into the route table.
pub struct HealthChecker {
    table: Arc<RouteTable>,
    config: HealthCheckConfig,
    prober: Prober,
    probe_limit: Arc<Semaphore>,
    trackers: HashMap<SocketAddr, HealthState>,
}

impl HealthChecker {
    pub fn new(table: Arc<RouteTable>, config: HealthCheckConfig) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        let prober = Prober {
            protocol: config.protocol,
            path: Arc::from(config.path.as_str()),
            timeout: Duration::from_millis(config.timeout_ms),
            client,
        };
        let probe_limit = Arc::new(Semaphore::new(config.max_concurrent_probes.max(1)));

        Self {
            table,
            config,
            prober,
            probe_limit,
            trackers: HashMap::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            protocol = ?self.config.protocol,
            "Health checker starting"
        );

        let mut ticker = time::interval(Duration::from_millis(self.config.interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health checker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every endpoint of the current snapshot once.
    pub async fn check_all(&mut self) {
        let endpoints = self.table.current().endpoints();
        self.trackers.retain(|addr, _| endpoints.contains(addr));

        let mut probes = JoinSet::new();
        for addr in endpoints {
            let prober = self.prober.clone();
            let limit = self.probe_limit.clone();
            probes.spawn(async move {
                let _permit = limit.acquire_owned().await;
                (addr, prober.probe(addr).await)
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((addr, success)) => self.record(addr, success),
                Err(e) => tracing::error!(error = %e, "Health probe task failed"),
            }
        }
    }

    fn record(&mut self, addr: SocketAddr, success: bool) {
        let Some(observed) = self.table.current().health_of(addr) else {
            // Removed while the probe was in flight
            self.trackers.remove(&addr);
            return;
        };

        let (healthy_threshold, unhealthy_threshold) =
            (self.config.healthy_threshold, self.config.unhealthy_threshold);
        let tracker = self
            .trackers
            .entry(addr)
            .or_insert_with(|| HealthState::new(healthy_threshold, unhealthy_threshold));
        tracker.sync(observed);

        let Some(health) = tracker.record(success) else {
            return;
        };

        tracing::info!(endpoint = %addr, from = ?observed, to = ?health, "Endpoint health changed");
        metrics::record_endpoint_health(addr, health);

        let delta = Delta::SetHealth {
            address: addr,
            health,
            probed_at: Some(SystemTime::now()),
        };
        match self.table.publish(delta) {
            Ok(_) => {}
            Err(PublishError::UnknownEndpoint(_)) => {
                self.trackers.remove(&addr);
            }
            Err(e) => tracing::warn!(endpoint = %addr, error = %e, "Failed to publish health change"),
        }
    }
}
