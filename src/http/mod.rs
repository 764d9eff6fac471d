//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection (HTTP/1.1 or h2c)      TLS connection (SNI cert, ALPN h2/http1.1)
//!     → axum::serve                         → axum_server::bind_rustls
//!     → server.rs middleware: request id → trace span → concurrency limit
//!     → ProxyEngine::handle
//!     → streamed response
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
