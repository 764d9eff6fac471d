//! HTTP/1.1 upstream connection pool.
//!
//! Key features:
//! - Per-endpoint idle lists (LIFO, most recently used first)
//! - Keepalive connection reuse after a cleanly finished response
//! - Idle connection eviction after `pool_idle_secs`
//! - Bounded idle connections per endpoint

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use dashmap::DashMap;
use hyper::client::conn::http1::{self, SendRequest};
use hyper_util::rt::TokioIo;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time;

use crate::config::TimeoutConfig;

/// Failure to obtain a usable upstream connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },

    #[error("connect to {addr} failed: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP handshake with {addr} failed: {source}")]
    Handshake {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },

    #[error("connection to {addr} closed before a response: {source}")]
    Dropped {
        addr: SocketAddr,
        #[source]
        source: hyper::Error,
    },
}

/// A connection checked out of the pool.
pub struct PooledConn {
    addr: SocketAddr,
    pub(crate) sender: SendRequest<Body>,
    reused: bool,
}

impl PooledConn {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection already carried an earlier request.
    pub fn is_reused(&self) -> bool {
        self.reused
    }
}

impl std::fmt::Debug for PooledConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConn")
            .field("addr", &self.addr)
            .field("reused", &self.reused)
            .finish()
    }
}

struct IdleConn {
    sender: SendRequest<Body>,
    idle_since: Instant,
}

pub struct UpstreamPool {
    idle: DashMap<SocketAddr, Vec<IdleConn>>,
    connect_timeout: Duration,
    idle_timeout: Duration,
    max_idle_per_endpoint: usize,
}

impl UpstreamPool {
    pub fn new(config: &TimeoutConfig) -> Self {
        Self::with_settings(
            Duration::from_secs(config.connect_secs),
            Duration::from_secs(config.pool_idle_secs),
            config.max_idle_per_endpoint,
        )
    }

    pub fn with_settings(connect_timeout: Duration, idle_timeout: Duration, max_idle_per_endpoint: usize) -> Self {
        Self {
            idle: DashMap::new(),
            connect_timeout,
            idle_timeout,
            max_idle_per_endpoint,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// A ready connection to `addr`: an idle one if any is still usable,
    /// otherwise a new one.
    pub async fn checkout(&self, addr: SocketAddr) -> Result<PooledConn, ConnectError> {
        while let Some(mut conn) = self.take_idle(addr) {
            match time::timeout(self.connect_timeout, conn.sender.ready()).await {
                Ok(Ok(())) => return Ok(conn),
                _ => tracing::debug!(endpoint = %addr, "Discarding unusable pooled connection"),
            }
        }
        self.connect(addr).await
    }

    fn take_idle(&self, addr: SocketAddr) -> Option<PooledConn> {
        let mut idle = self.idle.get_mut(&addr)?;
        while let Some(conn) = idle.pop() {
            if conn.idle_since.elapsed() >= self.idle_timeout || conn.sender.is_closed() {
                continue;
            }
            return Some(PooledConn {
                addr,
                sender: conn.sender,
                reused: true,
            });
        }
        None
    }

    /// Open a new connection, bounded by the connect timeout.
    pub async fn connect(&self, addr: SocketAddr) -> Result<PooledConn, ConnectError> {
        let stream = match time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => return Err(ConnectError::Io { addr, source }),
            Err(_) => {
                return Err(ConnectError::Timeout {
                    addr,
                    timeout: self.connect_timeout,
                })
            }
        };
        let _ = stream.set_nodelay(true);

        let (sender, connection) = http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|source| ConnectError::Handshake { addr, source })?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(endpoint = %addr, error = %e, "Upstream connection closed with error");
            }
        });

        tracing::debug!(endpoint = %addr, "Opened upstream connection");
        Ok(PooledConn {
            addr,
            sender,
            reused: false,
        })
    }

    /// Return a connection after its response finished cleanly.
    pub fn checkin(&self, conn: PooledConn) {
        if conn.sender.is_closed() {
            return;
        }
        let mut idle = self.idle.entry(conn.addr).or_default();
        if idle.len() >= self.max_idle_per_endpoint {
            // Pool full, drop the connection
            return;
        }
        idle.push(IdleConn {
            sender: conn.sender,
            idle_since: Instant::now(),
        });
    }

    /// Drop connections idle for longer than the idle timeout.
    pub fn evict_idle(&self) -> usize {
        let mut evicted = 0;
        self.idle.retain(|_, conns| {
            let before = conns.len();
            conns.retain(|c| c.idle_since.elapsed() < self.idle_timeout && !c.sender.is_closed());
            evicted += before - conns.len();
            !conns.is_empty()
        });
        evicted
    }

    pub fn idle_count(&self, addr: SocketAddr) -> usize {
        self.idle.get(&addr).map(|c| c.len()).unwrap_or(0)
    }

    pub fn total_idle(&self) -> usize {
        self.idle.iter().map(|entry| entry.value().len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Accepts connections and answers every request with a fixed 200.
    async fn keepalive_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(_) => {
                                let _ = socket
                                    .write_all(b"HTTP/1.1 200 OK\r\ncontent-length: 2\r\n\r\nok")
                                    .await;
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn pool(idle: Duration, max_idle: usize) -> UpstreamPool {
        UpstreamPool::with_settings(Duration::from_secs(1), idle, max_idle)
    }

    #[tokio::test]
    async fn connect_refused_is_io_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = pool(Duration::from_secs(60), 4).checkout(addr).await.unwrap_err();
        assert!(matches!(err, ConnectError::Io { .. }));
    }

    #[tokio::test]
    async fn checkin_then_checkout_reuses() {
        let addr = keepalive_backend().await;
        let pool = pool(Duration::from_secs(60), 4);

        let conn = pool.checkout(addr).await.unwrap();
        assert!(!conn.is_reused());
        pool.checkin(conn);
        assert_eq!(pool.idle_count(addr), 1);

        let conn = pool.checkout(addr).await.unwrap();
        assert!(conn.is_reused());
        assert_eq!(pool.idle_count(addr), 0);
    }

    #[tokio::test]
    async fn respects_max_idle() {
        let addr = keepalive_backend().await;
        let pool = pool(Duration::from_secs(60), 2);

        let conns = vec![
            pool.connect(addr).await.unwrap(),
            pool.connect(addr).await.unwrap(),
            pool.connect(addr).await.unwrap(),
        ];
        for conn in conns {
            pool.checkin(conn);
        }
        assert_eq!(pool.idle_count(addr), 2);
        assert_eq!(pool.total_idle(), 2);
    }

    #[tokio::test]
    async fn evicts_expired_connections() {
        let addr = keepalive_backend().await;
        let pool = pool(Duration::from_millis(50), 4);

        let conn = pool.connect(addr).await.unwrap();
        pool.checkin(conn);
        assert_eq!(pool.evict_idle(), 0);

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pool.evict_idle(), 1);
        assert_eq!(pool.total_idle(), 0);
    }

    #[tokio::test]
    async fn expired_connection_not_reused() {
        let addr = keepalive_backend().await;
        let pool = pool(Duration::from_millis(30), 4);

        let conn = pool.connect(addr).await.unwrap();
        pool.checkin(conn);
        tokio::time::sleep(Duration::from_millis(60)).await;

        let conn = pool.checkout(addr).await.unwrap();
        assert!(!conn.is_reused());
    }
}
