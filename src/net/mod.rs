//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TLS connection
//!     → tls.rs (ClientHello SNI → certificate: exact host, *.domain, default)
//!     → ALPN picks h2 or http/1.1
//!     → Hand off to HTTP layer
//! ```
//!
//! # Design Decisions
//! - TLS is optional; plaintext listeners skip this layer
//! - Certificates are loaded once at startup; a bad file fails startup

pub mod tls;

pub use tls::{rustls_config, SniCertResolver, TlsError};
