//! TLS termination with rustls and SNI certificate selection.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum_server::tls_rustls::RustlsConfig;
use rustls::crypto::aws_lc_rs;
use rustls::server::{ClientHello, ResolvesServerCert};
use rustls::sign::CertifiedKey;
use rustls::ServerConfig;
use rustls_pemfile::{certs, private_key};
use thiserror::Error;

use crate::config::TlsConfig;

#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no certificates found in {0:?}")]
    NoCertificates(PathBuf),

    #[error("no private key found in {0:?}")]
    NoPrivateKey(PathBuf),

    #[error("TLS configuration error: {0}")]
    Rustls(#[from] rustls::Error),

    #[error("no TLS certificates configured")]
    Empty,
}

/// Host name lookup with wildcard and default fallback.
#[derive(Debug)]
struct HostMap<T> {
    exact: HashMap<String, T>,
    /// Keyed by the suffix after `*.`
    wildcard: HashMap<String, T>,
    default: Option<T>,
}

impl<T: Clone> HostMap<T> {
    fn new() -> Self {
        Self {
            exact: HashMap::new(),
            wildcard: HashMap::new(),
            default: None,
        }
    }

    fn insert(&mut self, host: &str, value: T) {
        let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        if self.default.is_none() {
            self.default = Some(value.clone());
        }
        match host.strip_prefix("*.") {
            Some(suffix) => self.wildcard.insert(suffix.to_string(), value),
            None => self.exact.insert(host, value),
        };
    }

    fn lookup(&self, server_name: Option<&str>) -> Option<T> {
        let Some(name) = server_name else {
            return self.default.clone();
        };
        let name = name.trim_end_matches('.').to_ascii_lowercase();
        if let Some(value) = self.exact.get(&name) {
            return Some(value.clone());
        }
        if let Some((_, parent)) = name.split_once('.') {
            if let Some(value) = self.wildcard.get(parent) {
                return Some(value.clone());
            }
        }
        self.default.clone()
    }
}

/// Picks a certificate from the ClientHello server name.
///
/// Exact host first, then a `*.domain` wildcard one label up, then the
/// first configured certificate.
#[derive(Debug)]
pub struct SniCertResolver {
    hosts: HostMap<Arc<CertifiedKey>>,
}

impl SniCertResolver {
    pub fn new() -> Self {
        Self {
            hosts: HostMap::new(),
        }
    }

    pub fn add(&mut self, host: &str, key: Arc<CertifiedKey>) {
        self.hosts.insert(host, key);
    }

    pub fn from_config(config: &TlsConfig) -> Result<Self, TlsError> {
        if config.certificates.is_empty() {
            return Err(TlsError::Empty);
        }
        let mut resolver = Self::new();
        for cert in &config.certificates {
            let key = Arc::new(load_certified_key(Path::new(&cert.cert_path), Path::new(&cert.key_path))?);
            for host in &cert.hosts {
                resolver.add(host, key.clone());
            }
            tracing::info!(hosts = ?cert.hosts, cert_path = %cert.cert_path, "Loaded TLS certificate");
        }
        Ok(resolver)
    }
}

impl Default for SniCertResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolvesServerCert for SniCertResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        self.hosts.lookup(client_hello.server_name())
    }
}

/// Read a PEM certificate chain and private key.
pub fn load_certified_key(cert_path: &Path, key_path: &Path) -> Result<CertifiedKey, TlsError> {
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| TlsError::Io { path, source }
    };

    let mut cert_reader = BufReader::new(File::open(cert_path).map_err(io_err(cert_path))?);
    let chain = certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err(cert_path))?;
    if chain.is_empty() {
        return Err(TlsError::NoCertificates(cert_path.to_path_buf()));
    }

    let mut key_reader = BufReader::new(File::open(key_path).map_err(io_err(key_path))?);
    let key = private_key(&mut key_reader)
        .map_err(io_err(key_path))?
        .ok_or_else(|| TlsError::NoPrivateKey(key_path.to_path_buf()))?;

    let signing_key = aws_lc_rs::sign::any_supported_type(&key)?;
    Ok(CertifiedKey::new(chain, signing_key))
}

/// rustls server config with SNI resolution and h2/http1.1 ALPN.
pub fn server_config(resolver: SniCertResolver) -> Result<Arc<ServerConfig>, TlsError> {
    let mut config = ServerConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(resolver));
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];
    Ok(Arc::new(config))
}

/// Build the axum-server TLS config for a listener.
pub fn rustls_config(config: &TlsConfig) -> Result<RustlsConfig, TlsError> {
    let resolver = SniCertResolver::from_config(config)?;
    Ok(RustlsConfig::from_config(server_config(resolver)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts() -> HostMap<&'static str> {
        let mut map = HostMap::new();
        map.insert("app.example.com", "app");
        map.insert("*.example.com", "wild");
        map.insert("API.other.org.", "api");
        map
    }

    #[test]
    fn exact_wins_over_wildcard() {
        assert_eq!(hosts().lookup(Some("app.example.com")), Some("app"));
        assert_eq!(hosts().lookup(Some("APP.example.com")), Some("app"));
    }

    #[test]
    fn wildcard_covers_one_label() {
        let map = hosts();
        assert_eq!(map.lookup(Some("shop.example.com")), Some("wild"));
        // Deeper names fall through to the default
        assert_eq!(map.lookup(Some("a.b.example.com")), Some("app"));
    }

    #[test]
    fn normalizes_configured_hosts() {
        assert_eq!(hosts().lookup(Some("api.other.org")), Some("api"));
    }

    #[test]
    fn missing_sni_uses_first_certificate() {
        assert_eq!(hosts().lookup(None), Some("app"));
        assert_eq!(hosts().lookup(Some("unknown.net")), Some("app"));
    }

    #[test]
    fn missing_files_are_io_errors() {
        let err = load_certified_key(Path::new("/nonexistent/cert.pem"), Path::new("/nonexistent/key.pem"))
            .unwrap_err();
        assert!(matches!(err, TlsError::Io { .. }));
    }
}
