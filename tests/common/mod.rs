//! Shared test harness for integration tests.
//!
//! Provides [`DuplexConnector`], which wires every player connection to an
//! in-process [`serve_connection`] over an in-memory duplex pipe, plus
//! scripted decision services and segment-table fixtures.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use spdash::abr::{DecisionRequest, DecisionResponse, DecisionService};
use spdash::server::{serve_connection, ServerContext};
use spdash_common::{Error, Result};
use spdash_http::{BoxedStream, Connector};
use tokio_util::sync::CancellationToken;

/// 4 s segments, ladder `[400000, 1000000]`, 2 segments.
pub const SCENARIO_A: &str = "4000000\n400000 1000000\n1000 1100\n2000 2200\n";

/// 1 s segments, three qualities, four segments.
pub const FOUR_SEGMENTS: &str =
    "1000000\n300000 750000 1200000\n100 110 120 130\n200 220 240 260\n300 330 360 390\n";

/// Write `contents` to `<dir>/<name>` and return the path.
pub fn write_table(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, contents).expect("failed to write table");
    path
}

/// Connects the player to an in-process streaming server.
pub struct DuplexConnector {
    ctx: Arc<ServerContext>,
    send_window: usize,
    pipe_capacity: usize,
    connections: AtomicUsize,
    cancel: CancellationToken,
}

impl DuplexConnector {
    pub fn new(ctx: ServerContext) -> Self {
        Self::with_window(ctx, 2048)
    }

    pub fn with_window(ctx: ServerContext, send_window: usize) -> Self {
        Self {
            ctx: Arc::new(ctx),
            send_window,
            pipe_capacity: 64 * 1024,
            connections: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
        }
    }

    /// Bound the in-flight bytes of each pipe, forcing the reader to see
    /// the body in several pieces.
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self
    }

    /// Connections opened so far: the manifest plus one per segment.
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Segment requests issued so far.
    pub fn segment_requests(&self) -> usize {
        self.connections().saturating_sub(1)
    }
}

#[async_trait]
impl Connector for DuplexConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let (client, server) = tokio::io::duplex(self.pipe_capacity);
        let ctx = Arc::clone(&self.ctx);
        let window = self.send_window;
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let _ = serve_connection(ctx, Box::new(server), window, cancel).await;
        });
        Ok(Box::new(client))
    }

    fn peer(&self) -> String {
        "duplex".to_string()
    }
}

/// Nothing listens there.
pub struct RefusingConnector;

#[async_trait]
impl Connector for RefusingConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
    }

    fn peer(&self) -> String {
        "nowhere".to_string()
    }
}

/// Answers with scripted qualities, repeating the last one, and records every
/// request it sees. Cookies count the decisions: `"1"`, `"2"`, ...
#[derive(Default)]
pub struct ScriptedDecision {
    qualities: Mutex<VecDeque<i64>>,
    last: Mutex<i64>,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl ScriptedDecision {
    pub fn new(qualities: impl IntoIterator<Item = i64>) -> Arc<Self> {
        Arc::new(Self {
            qualities: Mutex::new(qualities.into_iter().collect()),
            ..Default::default()
        })
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DecisionService for ScriptedDecision {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        let mut requests = self.requests.lock();
        requests.push(request.clone());
        let quality = match self.qualities.lock().pop_front() {
            Some(q) => {
                *self.last.lock() = q;
                q
            }
            None => *self.last.lock(),
        };
        Ok(DecisionResponse::new(quality, requests.len().to_string()))
    }
}

/// Always unreachable; counts attempts.
#[derive(Default)]
pub struct UnreachableDecision {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DecisionService for UnreachableDecision {
    async fn decide(&self, _request: &DecisionRequest) -> Result<DecisionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::decision_unavailable("connection refused"))
    }
}

/// Takes `delay` of virtual time before delegating.
pub struct DelayedDecision<D> {
    pub delay: Duration,
    pub inner: Arc<D>,
}

#[async_trait]
impl<D: DecisionService> DecisionService for DelayedDecision<D> {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        tokio::time::sleep(self.delay).await;
        self.inner.decide(request).await
    }
}

/// Always answers `quality` with the same `cookie`; records every request.
pub struct FixedCookieDecision {
    pub quality: i64,
    pub cookie: String,
    requests: Mutex<Vec<DecisionRequest>>,
}

impl FixedCookieDecision {
    pub fn new(quality: i64, cookie: &str) -> Arc<Self> {
        Arc::new(Self {
            quality,
            cookie: cookie.to_string(),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<DecisionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl DecisionService for FixedCookieDecision {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        self.requests.lock().push(request.clone());
        Ok(DecisionResponse::new(self.quality, self.cookie.clone()))
    }
}
