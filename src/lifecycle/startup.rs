//! Startup orchestration.
//!
//! # Responsibilities
//! - Load and validate configuration
//! - Initialize all subsystems in dependency order
//! - Start background tasks (endpoint watcher, health checks, housekeeping, reload)
//! - Bind listeners and begin accepting traffic

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{load_config, ConfigError, ConfigWatcher, ControllerConfig, RegistryKind};
use crate::discovery::{resync_delta, static_listing, EndpointWatcher, FileRegistry};
use crate::health::HealthChecker;
use crate::http::HttpServer;
use crate::lifecycle::{signals, Shutdown};
use crate::load_balancer::Balancer;
use crate::net::{rustls_config, TlsError};
use crate::observability::{logging, metrics};
use crate::proxy::{ProxyEngine, UpstreamPool};
use crate::routing::{preview, reconcile_config, Delta, RouteTable};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid {what} address '{value}'")]
    Address { what: &'static str, value: String },

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(#[from] TlsError),

    #[error("config watcher failed: {0}")]
    Watch(#[from] notify::Error),

    #[error("registry unavailable: {0}")]
    Registry(String),

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}

fn parse_addr(what: &'static str, value: &str) -> Result<SocketAddr, StartupError> {
    value.parse().map_err(|_| StartupError::Address {
        what,
        value: value.to_string(),
    })
}

/// Run the controller until a shutdown signal arrives.
pub async fn run(config_path: &Path, watch: bool) -> Result<(), StartupError> {
    let config = load_config(config_path)?;
    logging::init(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        routes = config.routes.len(),
        services = config.services.len(),
        registry = ?config.registry.kind,
        "ingress-controller starting"
    );

    if config.observability.metrics_enabled {
        let addr = parse_addr("metrics", &config.observability.metrics_address)?;
        metrics::init_metrics(addr);
    }

    let table = Arc::new(RouteTable::from_config(&config));
    if config.registry.kind == RegistryKind::Static {
        seed_static_endpoints(&table, &config);
    }
    let balancer = Arc::new(Balancer::new());
    let pool = Arc::new(UpstreamPool::new(&config.timeouts));
    let engine = Arc::new(ProxyEngine::new(
        table.clone(),
        balancer.clone(),
        pool,
        &config.timeouts,
    ));

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    spawn_endpoint_watcher(&config, config_path, watch, &table, &shutdown).await?;

    if config.health_check.enabled {
        let checker = HealthChecker::new(table.clone(), config.health_check.clone());
        tokio::spawn(checker.run(shutdown.subscribe()));
    } else {
        tracing::info!("Active health checks disabled");
    }

    tokio::spawn(engine.clone().run_housekeeping(shutdown.subscribe()));

    // Dropping the notify handle stops the watch, so it lives until run returns
    let _config_watcher = if watch {
        let (watcher, updates) = ConfigWatcher::new(config_path);
        let handle = watcher.run()?;
        tokio::spawn(reload_loop(
            table.clone(),
            config.registry.kind,
            updates,
            shutdown.subscribe(),
        ));
        Some(handle)
    } else {
        None
    };

    if config.admin.enabled {
        let addr = parse_addr("admin", &config.admin.bind_address)?;
        let listener = bind(addr).await?;
        let app = setup_admin_router(AdminState::new(
            table.clone(),
            balancer.clone(),
            &config.admin.api_key,
        ));
        let mut rx = shutdown.subscribe();
        tracing::info!(address = %addr, "Admin API listening");
        tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.recv().await;
                })
                .await;
            if let Err(e) = served {
                tracing::error!(error = %e, "Admin server failed");
            }
        });
    }

    let server = Arc::new(HttpServer::new(engine, &config.listener));

    if let Some(tls) = &config.listener.tls {
        let addr = parse_addr("TLS listener", &tls.bind_address)?;
        let tls_config = rustls_config(tls)?;
        let tls_server = server.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            if let Err(e) = tls_server.run_tls(addr, tls_config, rx).await {
                tracing::error!(error = %e, "HTTPS server failed");
            }
        });
    }

    let addr = parse_addr("listener", &config.listener.bind_address)?;
    let listener = bind(addr).await?;
    let served = server.run(listener, shutdown.subscribe()).await;

    // Stop background tasks if the server exited on its own
    shutdown.trigger();
    served?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn bind(address: SocketAddr) -> Result<TcpListener, StartupError> {
    TcpListener::bind(address)
        .await
        .map_err(|source| StartupError::Bind { address, source })
}

/// Publish the endpoints listed in the config file so the first request
/// already has upstreams to choose from.
fn seed_static_endpoints(table: &RouteTable, config: &ControllerConfig) {
    let Some(delta) = resync_delta(&table.current(), &static_listing(config)) else {
        return;
    };
    match table.publish(delta) {
        Ok(version) => tracing::info!(version, "Seeded static endpoints"),
        Err(e) => tracing::error!(error = %e, "Failed to seed static endpoints"),
    }
}

async fn spawn_endpoint_watcher(
    config: &ControllerConfig,
    config_path: &Path,
    watch: bool,
    table: &Arc<RouteTable>,
    shutdown: &Shutdown,
) -> Result<(), StartupError> {
    match config.registry.kind {
        // Without --watch the static endpoints never change after seeding
        RegistryKind::Static if !watch => Ok(()),
        RegistryKind::Static => {
            let registry = Arc::new(FileRegistry::new(PathBuf::from(config_path)));
            let watcher = EndpointWatcher::new(registry, table.clone(), &config.registry);
            tokio::spawn(watcher.run(shutdown.subscribe()));
            Ok(())
        }
        #[cfg(feature = "kubernetes")]
        RegistryKind::Kubernetes => {
            let registry = crate::discovery::KubernetesRegistry::try_default(
                config.registry.namespace.clone(),
            )
            .await
            .map_err(|e| StartupError::Registry(e.to_string()))?;
            let watcher = EndpointWatcher::new(Arc::new(registry), table.clone(), &config.registry);
            tokio::spawn(watcher.run(shutdown.subscribe()));
            Ok(())
        }
        #[cfg(not(feature = "kubernetes"))]
        RegistryKind::Kubernetes => Err(StartupError::Registry(
            "built without the `kubernetes` feature".to_string(),
        )),
    }
}

/// Apply reloaded configs to the live table.
///
/// Routes and service declarations are reconciled first. For the static
/// registry the endpoint listing follows in the same batch, so a newly
/// declared service never exists without its endpoints.
async fn reload_loop(
    table: Arc<RouteTable>,
    registry: RegistryKind,
    mut updates: mpsc::UnboundedReceiver<ControllerConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let config = tokio::select! {
            update = updates.recv() => match update {
                Some(config) => config,
                None => return,
            },
            _ = shutdown.recv() => {
                tracing::info!("Config reloader received shutdown signal, exiting loop");
                return;
            }
        };

        if config.registry.kind != registry {
            tracing::warn!("Registry kind changes require a restart; ignoring");
        }

        let current = table.current();
        let routes = reconcile_config(&current, &config);
        let mut deltas = vec![routes.clone()];
        if registry == RegistryKind::Static {
            if let Ok(staged) = preview(&current, routes) {
                deltas.extend(resync_delta(&staged, &static_listing(&config)));
            }
        }

        match table.publish(Delta::Batch(deltas)) {
            Ok(version) => tracing::info!(version, "Applied reloaded configuration"),
            Err(e) => tracing::error!(error = %e, "Reloaded configuration rejected; keeping current"),
        }
    }
}
