//! Request error taxonomy.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::load_balancer::NoHealthyEndpoint;
use crate::proxy::pool::ConnectError;

/// Boxed error used for streamed bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("malformed request: {0}")]
    MalformedRequest(&'static str),

    #[error("no route matches the request")]
    NoRouteMatch,

    #[error(transparent)]
    NoHealthyEndpoint(#[from] NoHealthyEndpoint),

    #[error("upstream connect failure: {0}")]
    UpstreamConnectFailure(#[source] ConnectError),

    #[error("upstream did not respond within {0:?}")]
    UpstreamTimeout(Duration),

    #[error("upstream request failed: {0}")]
    UpstreamRequest(#[source] hyper::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MalformedRequest(_) => StatusCode::BAD_REQUEST,
            ProxyError::NoRouteMatch => StatusCode::NOT_FOUND,
            ProxyError::NoHealthyEndpoint(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamConnectFailure(_) | ProxyError::UpstreamRequest(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::MalformedRequest(_) => "malformed_request",
            ProxyError::NoRouteMatch => "no_route_match",
            ProxyError::NoHealthyEndpoint(_) => "no_healthy_endpoint",
            ProxyError::UpstreamConnectFailure(_) => "upstream_connect_failure",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
            ProxyError::UpstreamRequest(_) => "upstream_request_failure",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let message = match &self {
            ProxyError::MalformedRequest(_) => "Bad request",
            ProxyError::NoRouteMatch => "No matching route found",
            ProxyError::NoHealthyEndpoint(_) => "No healthy upstream endpoint",
            ProxyError::UpstreamConnectFailure(_) | ProxyError::UpstreamRequest(_) => {
                "Upstream request failed"
            }
            ProxyError::UpstreamTimeout(_) => "Upstream timed out",
        };
        (self.status(), message).into_response()
    }
}

/// A response body stalled longer than the route timeout.
#[derive(Debug, Error)]
#[error("upstream body idle for {0:?}")]
pub struct BodyTimeout(pub Duration);
