//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router that hands every request to the proxy engine
//! - Configure HTTP/1.1 and HTTP/2 support
//! - Wire up middleware (tracing, concurrency limit, request ID)
//! - Serve plaintext and TLS listeners until shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{uri::Scheme, Request},
    response::Response,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::proxy::ProxyEngine;

/// Grace period for in-flight TLS connections at shutdown.
const TLS_DRAIN: Duration = Duration::from_secs(30);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ProxyEngine>,
    pub scheme: Scheme,
}

/// HTTP front end of the ingress controller.
pub struct HttpServer {
    engine: Arc<ProxyEngine>,
    max_connections: usize,
}

impl HttpServer {
    pub fn new(engine: Arc<ProxyEngine>, config: &ListenerConfig) -> Self {
        Self {
            engine,
            max_connections: config.max_connections,
        }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self, scheme: Scheme) -> Router {
        let state = AppState {
            engine: self.engine.clone(),
            scheme,
        };
        Router::new()
            .fallback(proxy_handler)
            .with_state(state)
            .layer(GlobalConcurrencyLimitLayer::new(self.max_connections))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Serve plaintext HTTP/1.1 and h2c on `listener` until shutdown.
    pub async fn run(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self
            .router(Scheme::HTTP)
            .into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until shutdown.
    pub async fn run_tls(
        &self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTPS server draining");
            drain.graceful_shutdown(Some(TLS_DRAIN));
        });

        let app = self
            .router(Scheme::HTTPS)
            .into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Hands every request to the proxy engine.
async fn proxy_handler(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    state.engine.handle(request, peer, state.scheme.clone()).await
}
