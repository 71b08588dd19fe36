//! Streaming server.
//!
//! Each accepted connection carries one manifest or segment request. The
//! [`SegmentRequestHandler`] decides the response length, either trusting
//! the length the player asked for or consulting the decision service
//! itself, and streams the body under the transport's send window.
//!
//! # Status codes
//!
//! - `200` - manifest or segment served
//! - `404` - unknown path, unknown segment, or no usable segment table
//! - `502` - the decision service picked a quality outside the ladder
//! - `503` - the decision service could not be reached

mod cache;
mod handler;

pub use cache::TableCache;
pub use handler::SegmentRequestHandler;

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use spdash_common::Result;
use spdash_http::{BoxedStream, Transport, TransportOutcome, DEFAULT_SEND_WINDOW};

use crate::abr::DecisionService;
use crate::config::ServerConfig;

/// Default upper bound on one body write.
pub const DEFAULT_CHUNK_LIMIT: usize = 1024;

/// Default manifest body length when the request does not name one.
pub const DEFAULT_MANIFEST_LENGTH: u64 = 1232;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// State shared by all connections of one server.
pub struct ServerContext {
    pub tables: TableCache,
    /// Table used when a request names none.
    pub default_table: Option<PathBuf>,
    pub decision: Arc<dyn DecisionService>,
    pub chunk_limit: usize,
    pub manifest_length: u64,
}

impl ServerContext {
    pub fn new(decision: Arc<dyn DecisionService>) -> Self {
        Self {
            tables: TableCache::default(),
            default_table: None,
            decision,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            manifest_length: DEFAULT_MANIFEST_LENGTH,
        }
    }

    pub fn from_config(config: &ServerConfig, decision: Arc<dyn DecisionService>) -> Self {
        Self::new(decision)
            .with_default_table(config.video_table.clone())
            .with_chunk_limit(config.chunk_limit)
    }

    #[must_use]
    pub fn with_default_table(mut self, path: Option<PathBuf>) -> Self {
        self.default_table = path;
        self
    }

    #[must_use]
    pub fn with_chunk_limit(mut self, limit: usize) -> Self {
        self.chunk_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn with_manifest_length(mut self, length: u64) -> Self {
        self.manifest_length = length;
        self
    }
}

/// Serve one connection to completion.
pub async fn serve_connection(
    ctx: Arc<ServerContext>,
    stream: BoxedStream,
    send_window: usize,
    cancel: CancellationToken,
) -> Result<TransportOutcome> {
    let mut handler = SegmentRequestHandler::new(ctx);
    let outcome = Transport::new(stream)
        .with_send_window(send_window)
        .with_cancel(cancel)
        .run(&mut handler)
        .await?;
    if outcome == TransportOutcome::PeerClosed && handler.body_total() > 0 {
        tracing::debug!(
            sent = handler.body_sent(),
            total = handler.body_total(),
            "Peer closed mid-response"
        );
    }
    Ok(outcome)
}

/// TCP front end for [`serve_connection`].
pub struct StreamingServer {
    ctx: Arc<ServerContext>,
    send_window: usize,
}

impl StreamingServer {
    pub fn new(ctx: ServerContext) -> Self {
        Self {
            ctx: Arc::new(ctx),
            send_window: DEFAULT_SEND_WINDOW,
        }
    }

    #[must_use]
    pub fn with_send_window(mut self, window: usize) -> Self {
        self.send_window = window.max(1);
        self
    }

    pub fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    /// Accept connections until `shutdown` fires. In-flight responses are
    /// cancelled with it.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "Streaming server listening");
        loop {
            let Some((stream, peer)) = accept_next(|| listener.accept(), &shutdown).await else {
                break;
            };
            if let Err(e) = stream.set_nodelay(true) {
                tracing::debug!(peer = %peer, error = %e, "Could not disable Nagle");
            }
            let ctx = Arc::clone(&self.ctx);
            let cancel = shutdown.child_token();
            let window = self.send_window;
            tokio::spawn(async move {
                match serve_connection(ctx, Box::new(stream), window, cancel).await {
                    Ok(outcome) => tracing::trace!(peer = %peer, ?outcome, "Connection done"),
                    Err(e) => tracing::warn!(peer = %peer, error = %e, "Connection failed"),
                }
            });
        }
        tracing::info!("Streaming server stopped");
        Ok(())
    }
}

/// Wait for the next connection. A failed accept is logged and retried after
/// a short pause; `None` only once `shutdown` fires.
pub(crate) async fn accept_next<S, P, F, Fut>(
    mut accept: F,
    shutdown: &CancellationToken,
) -> Option<(S, P)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<(S, P)>>,
{
    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => return None,
            accepted = accept() => accepted,
        };
        match accepted {
            Ok(conn) => return Some(conn),
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::select! {
                    _ = shutdown.cancelled() => return None,
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[tokio::test(start_paused = true)]
    async fn test_accept_errors_do_not_end_the_loop() {
        let mut results: VecDeque<io::Result<(u32, &str)>> = VecDeque::from([
            Err(io::Error::from_raw_os_error(24)),
            Err(io::Error::new(io::ErrorKind::ConnectionAborted, "aborted")),
            Ok((7, "peer")),
        ]);
        let shutdown = CancellationToken::new();
        let started = tokio::time::Instant::now();

        let conn = accept_next(
            || {
                let next = results.pop_front();
                async move { next.unwrap_or_else(|| Err(io::ErrorKind::WouldBlock.into())) }
            },
            &shutdown,
        )
        .await;

        assert_eq!(conn, Some((7, "peer")));
        assert!(started.elapsed() >= ACCEPT_BACKOFF * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backoff() {
        let shutdown = CancellationToken::new();
        let cancel = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
        });

        let conn: Option<((), ())> = accept_next(
            || async { Err(io::Error::from(io::ErrorKind::ConnectionReset)) },
            &shutdown,
        )
        .await;
        assert!(conn.is_none());
    }
}
