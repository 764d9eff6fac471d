//! Authenticated admin API.
//!
//! # Endpoints
//! - `GET /admin/status`: version, uptime, snapshot version, counts
//! - `GET /admin/routes`: every route in the live snapshot
//! - `GET /admin/endpoints`: endpoints per service with health and load

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::load_balancer::Balancer;
use crate::routing::RouteTable;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub table: Arc<RouteTable>,
    pub balancer: Arc<Balancer>,
    pub api_key: Arc<str>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(table: Arc<RouteTable>, balancer: Arc<Balancer>, api_key: &str) -> Self {
        Self {
            table,
            balancer,
            api_key: Arc::from(api_key),
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/endpoints", get(get_endpoints))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Delta, EndpointSpec, Route};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn state() -> AdminState {
        let table = Arc::new(RouteTable::new());
        table
            .publish(Delta::Batch(vec![
                Delta::DeclareService {
                    service: "web".into(),
                    policy: crate::load_balancer::Policy::RoundRobin,
                },
                Delta::UpsertEndpoint {
                    service: "web".into(),
                    endpoint: EndpointSpec::new("127.0.0.1:3001".parse().unwrap()),
                },
                Delta::UpsertRoute(Route::new("root", "app.example.com", "/", "web".into())),
            ]))
            .unwrap();
        AdminState::new(table, Arc::new(Balancer::new()), "secret")
    }

    fn get(path: &str, key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);
        if let Some(key) = key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn rejects_missing_or_wrong_key() {
        let app = setup_admin_router(state());
        let response = app.clone().oneshot(get("/admin/status", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app.oneshot(get("/admin/status", Some("nope"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_routes_and_endpoints() {
        let app = setup_admin_router(state());

        let response = app.clone().oneshot(get("/admin/routes", Some("secret"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let routes: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(routes[0]["name"], "root");
        assert_eq!(routes[0]["service_declared"], true);

        let response = app.oneshot(get("/admin/endpoints", Some("secret"))).await.unwrap();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let services: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(services[0]["service"], "web");
        assert_eq!(services[0]["endpoints"][0]["health"], "unknown");
        assert_eq!(services[0]["endpoints"][0]["in_flight"], 0);
    }
}
