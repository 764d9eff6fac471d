//! Streaming upstream response body.
//!
//! The body owns everything a request holds on to while its response is in
//! flight: the snapshot it was routed with, the endpoint's in-flight
//! guard and the upstream connection. They are released when the stream
//! finishes, fails, or is dropped. Only a cleanly finished stream returns
//! its connection to the pool.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use hyper::body::{Body, Bytes, Frame, Incoming, SizeHint};
use tokio::time::{Instant, Sleep};

use crate::load_balancer::InFlightGuard;
use crate::observability::{metrics, AccessLog};
use crate::proxy::error::{BodyTimeout, BoxError};
use crate::proxy::pool::{PooledConn, UpstreamPool};
use crate::routing::RouteSnapshot;

/// Resources held until the response completes.
pub struct Lease {
    pub pool: Arc<UpstreamPool>,
    pub conn: PooledConn,
    pub snapshot: Arc<RouteSnapshot>,
    pub in_flight: InFlightGuard,
}

pub struct UpstreamBody {
    inner: Incoming,
    idle_timeout: Duration,
    idle: Pin<Box<Sleep>>,
    lease: Option<Lease>,
    log: AccessLog,
    done: bool,
}

impl UpstreamBody {
    pub fn new(inner: Incoming, idle_timeout: Duration, lease: Lease, log: AccessLog) -> Self {
        Self {
            inner,
            idle_timeout,
            idle: Box::pin(tokio::time::sleep(idle_timeout)),
            lease: Some(lease),
            log,
            done: false,
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if let Some(lease) = self.lease.take() {
            lease.pool.checkin(lease.conn);
        }
        self.log.emit();
    }

    fn fail(&mut self, kind: &'static str) {
        self.done = true;
        if let Some(lease) = self.lease.take() {
            metrics::record_upstream_error(lease.conn.addr(), kind);
        }
        self.log.set_error(kind);
        self.log.emit();
    }
}

impl Body for UpstreamBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.log.add_bytes(data.len());
                }
                let deadline = Instant::now() + this.idle_timeout;
                this.idle.as_mut().reset(deadline);
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(Some(Err(e))) => {
                tracing::warn!(request_id = %this.log.request_id(), error = %e, "Upstream response body failed");
                this.fail("body_error");
                Poll::Ready(Some(Err(e.into())))
            }
            Poll::Ready(None) => {
                this.finish();
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.idle.as_mut().poll(cx).is_ready() {
                    tracing::warn!(
                        request_id = %this.log.request_id(),
                        timeout = ?this.idle_timeout,
                        "Upstream response body stalled"
                    );
                    this.fail("body_timeout");
                    return Poll::Ready(Some(Err(Box::new(BodyTimeout(this.idle_timeout)))));
                }
                Poll::Pending
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.done || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for UpstreamBody {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        if self.inner.is_end_stream() {
            // Empty bodies may never be polled
            self.finish();
        } else {
            self.log.set_error("client_closed");
            self.done = true;
        }
    }
}
