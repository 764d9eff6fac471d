//! HTTP ingress controller library.

pub mod config;
pub mod discovery;
pub mod http;
pub mod net;
pub mod proxy;
pub mod routing;
pub mod health;
pub mod load_balancer;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod admin;

pub use config::schema::ControllerConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::ProxyEngine;
pub use routing::RouteTable;
