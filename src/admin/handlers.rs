use std::net::SocketAddr;
use std::time::UNIX_EPOCH;

use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::load_balancer::Policy;
use crate::routing::Health;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub snapshot_version: u64,
    pub routes: usize,
    pub services: usize,
    pub endpoints: usize,
}

#[derive(Serialize)]
pub struct RouteStatus {
    pub name: String,
    pub host: String,
    pub path_prefix: String,
    pub rewrite_target: Option<String>,
    pub service: String,
    pub timeout_secs: Option<u64>,
    pub policy: Option<Policy>,
    /// False when the route names an undeclared service.
    pub service_declared: bool,
}

#[derive(Serialize)]
pub struct EndpointStatus {
    pub address: SocketAddr,
    pub weight: u32,
    pub health: Health,
    /// Seconds since the Unix epoch of the last health transition.
    pub last_probe: Option<u64>,
    pub in_flight: usize,
}

#[derive(Serialize)]
pub struct ServiceStatus {
    pub service: String,
    pub policy: Policy,
    pub endpoints: Vec<EndpointStatus>,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let snapshot = state.table.current();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        snapshot_version: snapshot.version(),
        routes: snapshot.route_count(),
        services: snapshot.services().count(),
        endpoints: snapshot.endpoints().len(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteStatus>> {
    let snapshot = state.table.current();
    let routes = snapshot
        .routes()
        .into_iter()
        .map(|route| RouteStatus {
            name: route.name.clone(),
            host: route.host.clone(),
            path_prefix: route.path_prefix.clone(),
            rewrite_target: route.rewrite_target.clone(),
            service: route.service.to_string(),
            timeout_secs: route.timeout.map(|t| t.as_secs()),
            policy: route.policy,
            service_declared: snapshot.service(&route.service).is_some(),
        })
        .collect();
    Json(routes)
}

pub async fn get_endpoints(State(state): State<AdminState>) -> Json<Vec<ServiceStatus>> {
    let snapshot = state.table.current();
    let in_flight = state.balancer.in_flight();

    let mut services: Vec<ServiceStatus> = snapshot
        .services()
        .map(|service| ServiceStatus {
            service: service.id.to_string(),
            policy: service.policy,
            endpoints: service
                .endpoints
                .iter()
                .map(|e| EndpointStatus {
                    address: e.address,
                    weight: e.weight,
                    health: e.health,
                    last_probe: e
                        .last_probe
                        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                        .map(|d| d.as_secs()),
                    in_flight: in_flight.count(e.address),
                })
                .collect(),
        })
        .collect();
    services.sort_by(|a, b| a.service.cmp(&b.service));
    Json(services)
}
