//! Per-request proxy pipeline.

use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::uri::Scheme;
use axum::http::{Request, Response, Uri, Version};
use axum::response::IntoResponse;
use hyper::body::{Body as HttpBody, Incoming};
use tokio::sync::broadcast;
use tokio::time;

use crate::config::TimeoutConfig;
use crate::load_balancer::{Balancer, InFlightGuard};
use crate::observability::{metrics, AccessLog};
use crate::proxy::body::{Lease, UpstreamBody};
use crate::proxy::error::ProxyError;
use crate::proxy::headers::{self, X_REQUEST_ID};
use crate::proxy::pool::{ConnectError, PooledConn, UpstreamPool};
use crate::routing::matcher::{request_host, rewrite_path};
use crate::routing::{RouteSnapshot, RouteTable};

/// Endpoints tried per request: the first pick plus one retry.
const MAX_CONNECT_ATTEMPTS: usize = 2;

/// A response whose headers arrived, with what it still holds.
struct Forwarded {
    response: Response<Incoming>,
    endpoint: SocketAddr,
    conn: PooledConn,
    in_flight: InFlightGuard,
    snapshot: Arc<RouteSnapshot>,
    timeout: Duration,
}

enum Attempt {
    Sent(Response<Incoming>, PooledConn),
    /// The upstream never answered; the request can go elsewhere.
    Unsent(Request<Body>, ConnectError),
}

pub struct ProxyEngine {
    table: Arc<RouteTable>,
    balancer: Arc<Balancer>,
    pool: Arc<UpstreamPool>,
    response_timeout: Duration,
}

impl ProxyEngine {
    pub fn new(
        table: Arc<RouteTable>,
        balancer: Arc<Balancer>,
        pool: Arc<UpstreamPool>,
        config: &TimeoutConfig,
    ) -> Self {
        Self {
            table,
            balancer,
            pool,
            response_timeout: Duration::from_secs(config.response_secs),
        }
    }

    pub fn table(&self) -> &Arc<RouteTable> {
        &self.table
    }

    pub fn balancer(&self) -> &Arc<Balancer> {
        &self.balancer
    }

    pub fn pool(&self) -> &Arc<UpstreamPool> {
        &self.pool
    }

    /// Periodically drop expired idle connections and balancer state for
    /// endpoints that left the route table, until shutdown.
    pub async fn run_housekeeping(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = (self.pool.idle_timeout() / 2).max(Duration::from_millis(100));
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.housekeep(),
                _ = shutdown.recv() => break,
            }
        }
    }

    fn housekeep(&self) {
        let evicted = self.pool.evict_idle();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle upstream connections");
        }
        self.balancer.prune(&self.table.current());
    }

    /// Proxy one request and produce the client response.
    pub async fn handle(&self, request: Request<Body>, peer: SocketAddr, scheme: Scheme) -> Response<Body> {
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-")
            .to_string();
        let mut log = AccessLog::start(request_id, request.method().as_str(), request.uri().path());

        match self.forward(request, peer, &scheme, &mut log).await {
            Ok(forwarded) => self.respond(forwarded, log),
            Err(e) => reject(e, log),
        }
    }

    async fn forward(
        &self,
        request: Request<Body>,
        peer: SocketAddr,
        scheme: &Scheme,
        log: &mut AccessLog,
    ) -> Result<Forwarded, ProxyError> {
        let host = request_host(request.uri(), request.headers())
            .ok_or(ProxyError::MalformedRequest("missing or invalid host"))?;
        log.set_host(&host);
        let path = request.uri().path();
        if !path.starts_with('/') {
            return Err(ProxyError::MalformedRequest("path must start with '/'"));
        }

        let snapshot = self.table.current();
        let route = snapshot
            .match_route(&host, path)
            .cloned()
            .ok_or(ProxyError::NoRouteMatch)?;
        log.set_route(&route.name);

        let upstream_path = match &route.rewrite_target {
            Some(target) => rewrite_path(path, &route.path_prefix, target),
            None => path.to_string(),
        };
        let path_and_query = match request.uri().query() {
            Some(query) => format!("{}?{}", upstream_path, query),
            None => upstream_path,
        };
        let original_host = request
            .uri()
            .authority()
            .map(|a| a.as_str().to_string());

        let (mut parts, body) = request.into_parts();
        parts.uri = Uri::builder()
            .path_and_query(path_and_query)
            .build()
            .map_err(|_| ProxyError::MalformedRequest("invalid rewritten path"))?;
        parts.version = Version::HTTP_11;
        let original_host = original_host.or_else(|| {
            parts
                .headers
                .get(axum::http::header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        });
        headers::strip_hop_by_hop(&mut parts.headers);
        headers::set_forwarded(&mut parts.headers, peer, scheme.as_str(), original_host.as_deref());
        let mut request = Request::from_parts(parts, body);

        let timeout = route.timeout.unwrap_or(self.response_timeout);
        let mut tried: Vec<SocketAddr> = Vec::with_capacity(MAX_CONNECT_ATTEMPTS);
        let mut last_failure: Option<ConnectError> = None;

        loop {
            let endpoint = match self.balancer.select(&snapshot, &route, &tried) {
                Ok(endpoint) => endpoint.address,
                // Nothing left to retry on: report the connect failure
                Err(e) => {
                    return Err(match last_failure {
                        Some(failure) => ProxyError::UpstreamConnectFailure(failure),
                        None => e.into(),
                    })
                }
            };
            log.set_endpoint(endpoint);
            let in_flight = self.balancer.track(endpoint);

            let outcome = match self.pool.checkout(endpoint).await {
                Ok(conn) => self.send(conn, request, timeout).await?,
                Err(e) => Attempt::Unsent(request, e),
            };

            match outcome {
                Attempt::Sent(response, conn) => {
                    return Ok(Forwarded {
                        response,
                        endpoint,
                        conn,
                        in_flight,
                        snapshot,
                        timeout,
                    });
                }
                Attempt::Unsent(unsent, failure) => {
                    tracing::warn!(
                        request_id = %log.request_id(),
                        endpoint = %endpoint,
                        error = %failure,
                        "Upstream connect failed"
                    );
                    metrics::record_upstream_error(endpoint, "connect");
                    request = unsent;
                    tried.push(endpoint);
                    if tried.len() >= MAX_CONNECT_ATTEMPTS {
                        return Err(ProxyError::UpstreamConnectFailure(failure));
                    }
                    last_failure = Some(failure);
                }
            }
        }
    }

    /// Send over `conn`, waiting at most `timeout` for response headers.
    ///
    /// A reused connection that dies before any response arrives is
    /// replaced by a fresh one to the same endpoint. If the fresh one drops
    /// the request too, the caller may try another endpoint.
    async fn send(
        &self,
        mut conn: PooledConn,
        request: Request<Body>,
        timeout: Duration,
    ) -> Result<Attempt, ProxyError> {
        let endpoint = conn.addr();

        let (request, error) = match exchange(&mut conn, request, timeout).await? {
            Exchange::Answered(response) => return Ok(Attempt::Sent(response, conn)),
            Exchange::Dropped(request, error) if conn.is_reused() => (request, error),
            Exchange::Dropped(request, source) => {
                return Ok(Attempt::Unsent(
                    request,
                    ConnectError::Dropped { addr: endpoint, source },
                ))
            }
        };
        drop(conn);

        tracing::debug!(endpoint = %endpoint, error = %error, "Pooled connection was stale, reconnecting");
        let mut fresh = match self.pool.connect(endpoint).await {
            Ok(conn) => conn,
            Err(e) => return Ok(Attempt::Unsent(request, e)),
        };
        match exchange(&mut fresh, request, timeout).await? {
            Exchange::Answered(response) => Ok(Attempt::Sent(response, fresh)),
            Exchange::Dropped(request, source) => Ok(Attempt::Unsent(
                request,
                ConnectError::Dropped { addr: endpoint, source },
            )),
        }
    }

    fn respond(&self, forwarded: Forwarded, mut log: AccessLog) -> Response<Body> {
        let Forwarded {
            response,
            endpoint,
            conn,
            in_flight,
            snapshot,
            timeout,
        } = forwarded;

        let status = response.status();
        metrics::record_upstream(endpoint, status.as_u16());
        log.set_status(status.as_u16());

        let (mut parts, body) = response.into_parts();
        headers::strip_hop_by_hop(&mut parts.headers);
        let lease = Lease {
            pool: self.pool.clone(),
            conn,
            snapshot,
            in_flight,
        };
        Response::from_parts(parts, Body::new(UpstreamBody::new(body, timeout, lease, log)))
    }
}

enum Exchange {
    Answered(Response<Incoming>),
    /// The connection closed before any response and the request can be
    /// sent again.
    Dropped(Request<Body>, hyper::Error),
}

/// One request/response exchange on `conn`.
async fn exchange(conn: &mut PooledConn, request: Request<Body>, timeout: Duration) -> Result<Exchange, ProxyError> {
    let endpoint = conn.addr();
    let replay = replayable_copy(&request);

    match time::timeout(timeout, conn.sender.try_send_request(request)).await {
        Err(_) => Err(upstream_timeout(endpoint, timeout)),
        Ok(Ok(response)) => Ok(Exchange::Answered(response)),
        Ok(Err(mut e)) => {
            let unsent = e.take_message();
            let error = e.into_error();
            // Written but unanswered: only a bodiless idempotent request may go again
            let resend = unsent.or_else(|| replay.filter(|_| connection_lost(&error)));
            match resend {
                Some(request) => Ok(Exchange::Dropped(request, error)),
                None => Err(upstream_failure(endpoint, error)),
            }
        }
    }
}

/// The connection ended before a response: closed, reset or aborted.
fn connection_lost(error: &hyper::Error) -> bool {
    if error.is_incomplete_message() || error.is_canceled() {
        return true;
    }
    let mut source = std::error::Error::source(error);
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            );
        }
        source = e.source();
    }
    false
}

/// A copy of `request` to send again if the connection dies under it.
///
/// Only idempotent methods with a known-empty body qualify.
fn replayable_copy(request: &Request<Body>) -> Option<Request<Body>> {
    if !request.method().is_idempotent() || HttpBody::size_hint(request.body()).exact() != Some(0) {
        return None;
    }
    let mut copy = Request::new(Body::empty());
    *copy.method_mut() = request.method().clone();
    *copy.uri_mut() = request.uri().clone();
    *copy.version_mut() = request.version();
    *copy.headers_mut() = request.headers().clone();
    Some(copy)
}

fn upstream_timeout(endpoint: SocketAddr, timeout: Duration) -> ProxyError {
    metrics::record_upstream_error(endpoint, "timeout");
    ProxyError::UpstreamTimeout(timeout)
}

fn upstream_failure(endpoint: SocketAddr, error: hyper::Error) -> ProxyError {
    metrics::record_upstream_error(endpoint, "request");
    ProxyError::UpstreamRequest(error)
}

/// Answer locally and log why.
fn reject(error: ProxyError, mut log: AccessLog) -> Response<Body> {
    match &error {
        ProxyError::NoRouteMatch | ProxyError::MalformedRequest(_) => {
            tracing::debug!(request_id = %log.request_id(), error = %error, "Request rejected");
        }
        _ => {
            tracing::warn!(
                request_id = %log.request_id(),
                route = log.route(),
                error = %error,
                "Request failed"
            );
        }
    }
    metrics::record_request_error(log.route(), error.kind());
    log.set_status(error.status().as_u16());
    log.set_error(error.kind());
    log.emit();
    error.into_response()
}
