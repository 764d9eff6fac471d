//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ingress_controller::config::{parse_config, ControllerConfig};
use ingress_controller::discovery::{resync_delta, static_listing};
use ingress_controller::http::HttpServer;
use ingress_controller::lifecycle::Shutdown;
use ingress_controller::load_balancer::Balancer;
use ingress_controller::proxy::{ProxyEngine, UpstreamPool};
use ingress_controller::routing::RouteTable;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;

/// How a [`MockBackend`] answers.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Echo the request head, then close with `connection: close`.
    Echo,
    /// Echo the request head and keep serving the same connection.
    KeepAlive,
    /// Answer as if keeping the connection alive, then drop it anyway.
    CloseAfterResponse,
    /// A chunked body of `chunks` chunks of `chunk_size` bytes, `gap` apart.
    /// With a `gate`, everything after the first chunk waits for it.
    Chunked {
        chunks: usize,
        chunk_size: usize,
        gap: Duration,
        gate: Option<Arc<Notify>>,
    },
}

/// A raw-TCP HTTP/1.1 backend.
///
/// Every response carries `x-backend: <name>`. Echo replies carry the
/// request head exactly as received as their body.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub name: &'static str,
    hits: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl MockBackend {
    pub async fn start(name: &'static str) -> Self {
        Self::start_with_delay(name, Duration::ZERO).await
    }

    /// A backend that waits `delay` before answering.
    pub async fn start_with_delay(name: &'static str, delay: Duration) -> Self {
        Self::spawn(name, delay, Reply::Echo).await
    }

    pub async fn start_with(name: &'static str, reply: Reply) -> Self {
        Self::spawn(name, Duration::ZERO, reply).await
    }

    async fn spawn(name: &'static str, delay: Duration, reply: Reply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));
        let open = Arc::new(AtomicUsize::new(0));

        let (counter, accepted, live) = (hits.clone(), connections.clone(), open.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                live.fetch_add(1, Ordering::SeqCst);
                let (counter, live, reply) = (counter.clone(), live.clone(), reply.clone());
                tokio::spawn(async move {
                    serve(socket, name, delay, &reply, &counter).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self {
            addr,
            name,
            hits,
            connections,
            open,
        }
    }

    /// Requests answered so far.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Connections still being served.
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

async fn serve(mut socket: TcpStream, name: &'static str, delay: Duration, reply: &Reply, hits: &AtomicUsize) {
    loop {
        let Some(head) = read_head(&mut socket).await else {
            return;
        };
        hits.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;

        match reply {
            Reply::Echo => {
                let _ = socket.write_all(echo(name, &head, true).as_bytes()).await;
                let _ = socket.shutdown().await;
                return;
            }
            Reply::KeepAlive => {
                if socket.write_all(echo(name, &head, false).as_bytes()).await.is_err() {
                    return;
                }
            }
            Reply::CloseAfterResponse => {
                let _ = socket.write_all(echo(name, &head, false).as_bytes()).await;
                return;
            }
            Reply::Chunked {
                chunks,
                chunk_size,
                gap,
                gate,
            } => {
                let _ = stream_chunks(&mut socket, name, *chunks, *chunk_size, *gap, gate.as_deref()).await;
                return;
            }
        }
    }
}

fn echo(name: &str, head: &str, close: bool) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nx-backend: {}\r\ncontent-type: text/plain\r\ncontent-length: {}\r\n{}\r\n{}",
        name,
        head.len(),
        if close { "connection: close\r\n" } else { "" },
        head
    )
}

async fn stream_chunks(
    socket: &mut TcpStream,
    name: &str,
    chunks: usize,
    chunk_size: usize,
    gap: Duration,
    gate: Option<&Notify>,
) -> std::io::Result<()> {
    let head = format!("HTTP/1.1 200 OK\r\nx-backend: {name}\r\ntransfer-encoding: chunked\r\n\r\n");
    socket.write_all(head.as_bytes()).await?;
    let chunk = format!("{:x}\r\n{}\r\n", chunk_size, "x".repeat(chunk_size));
    for i in 0..chunks {
        if i == 1 {
            if let Some(gate) = gate {
                gate.notified().await;
            }
        }
        if i > 0 {
            tokio::time::sleep(gap).await;
        }
        socket.write_all(chunk.as_bytes()).await?;
        socket.flush().await?;
    }
    socket.write_all(b"0\r\n\r\n").await?;
    socket.shutdown().await
}

async fn read_head(socket: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            buf.truncate(end);
            return String::from_utf8(buf).ok();
        }
    }
}

/// An address nothing listens on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

/// A running controller front end backed by an in-process route table.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub table: Arc<RouteTable>,
    pub balancer: Arc<Balancer>,
    pub pool: Arc<UpstreamPool>,
    pub shutdown: Shutdown,
}

impl TestProxy {
    /// Start a proxy for `config`, seeding its static endpoints.
    pub async fn start(config: ControllerConfig) -> Self {
        let table = Arc::new(RouteTable::from_config(&config));
        if let Some(delta) = resync_delta(&table.current(), &static_listing(&config)) {
            table.publish(delta).unwrap();
        }
        let balancer = Arc::new(Balancer::new());
        let pool = Arc::new(UpstreamPool::new(&config.timeouts));
        let engine = Arc::new(ProxyEngine::new(
            table.clone(),
            balancer.clone(),
            pool.clone(),
            &config.timeouts,
        ));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Shutdown::new();
        let server = HttpServer::new(engine, &config.listener);
        let rx = shutdown.subscribe();
        tokio::spawn(async move {
            let _ = server.run(listener, rx).await;
        });

        Self {
            addr,
            table,
            balancer,
            pool,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestProxy {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Parse a TOML config, panicking on errors.
pub fn config(toml: &str) -> ControllerConfig {
    parse_config(toml).unwrap()
}

/// A client that never reuses connections or consults proxy env vars.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
