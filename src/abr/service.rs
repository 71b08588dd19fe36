//! Reference decision service.
//!
//! [`BufferBasedAbr`] maps the buffer level linearly onto the ladder between a
//! reservoir and a cushion: below the reservoir it picks the lowest quality,
//! above reservoir + cushion the highest. Its cookie counts the decisions made
//! for the session so far.

use async_trait::async_trait;
use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use spdash_common::{Error, Result};
use spdash_http::{
    ConnectionHandler, FrameWriter, Head, RequestParser, ResponseHead, Transport,
};

use super::{DecisionRequest, DecisionResponse, DecisionService};
use crate::server::accept_next;

/// Buffer-based quality selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferBasedAbr {
    reservoir: Duration,
    cushion: Duration,
}

impl BufferBasedAbr {
    pub fn new(reservoir: Duration, cushion: Duration) -> Self {
        Self { reservoir, cushion }
    }

    /// Quality for a buffer level on a ladder of `levels` qualities.
    pub fn choose(&self, buffer: Duration, levels: usize) -> usize {
        let top = levels.saturating_sub(1);
        if buffer <= self.reservoir || top == 0 {
            return 0;
        }
        if self.cushion.is_zero() || buffer >= self.reservoir + self.cushion {
            return top;
        }
        let fraction = (buffer - self.reservoir).as_secs_f64() / self.cushion.as_secs_f64();
        ((fraction * top as f64).floor() as usize).min(top)
    }

    /// Answer one decision request.
    pub fn respond(&self, request: &DecisionRequest) -> DecisionResponse {
        let buffer = if request.buffer.is_finite() && request.buffer > 0.0 {
            Duration::from_secs_f64(request.buffer)
        } else {
            Duration::ZERO
        };
        let quality = self.choose(buffer, request.bitrate_array.len());
        let count = request
            .cookie
            .as_deref()
            .and_then(|c| c.parse::<u64>().ok())
            .unwrap_or(0);
        DecisionResponse::new(quality as i64, (count + 1).to_string())
    }
}

impl Default for BufferBasedAbr {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(10))
    }
}

#[async_trait]
impl DecisionService for BufferBasedAbr {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        Ok(self.respond(request))
    }
}

/// Serves [`BufferBasedAbr`] decisions over TCP, one exchange per connection.
pub struct DecisionServer {
    abr: BufferBasedAbr,
}

impl DecisionServer {
    pub fn new(abr: BufferBasedAbr) -> Self {
        Self { abr }
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
        let abr = Arc::new(self.abr);
        let addr: Option<SocketAddr> = listener.local_addr().ok();
        tracing::info!(addr = ?addr, "Decision service listening");
        loop {
            let Some((stream, peer)) = accept_next(|| listener.accept(), &shutdown).await else {
                break;
            };
            let abr = Arc::clone(&abr);
            let cancel = shutdown.child_token();
            tokio::spawn(async move {
                let _ = stream.set_nodelay(true);
                let mut handler = DecisionHandler::new(*abr);
                let result = Transport::new(Box::new(stream))
                    .with_cancel(cancel)
                    .run(&mut handler)
                    .await;
                if let Err(e) = result {
                    tracing::warn!(peer = %peer, error = %e, "Decision exchange failed");
                }
            });
        }
        tracing::info!("Decision service stopped");
        Ok(())
    }
}

/// Parses one JSON decision request and writes the answer.
struct DecisionHandler {
    abr: BufferBasedAbr,
    parser: RequestParser,
    body: Vec<u8>,
    out: Option<FrameWriter>,
}

impl DecisionHandler {
    fn new(abr: BufferBasedAbr) -> Self {
        Self {
            abr,
            parser: RequestParser::new(),
            body: Vec::new(),
            out: None,
        }
    }

    fn answer(&self) -> Bytes {
        match serde_json::from_slice::<DecisionRequest>(&self.body) {
            Ok(request) => {
                let response = self.abr.respond(&request);
                tracing::debug!(
                    next_chunk = request.next_chunk_id,
                    buffer_secs = request.buffer,
                    quality = response.quality,
                    "Decided"
                );
                // Serializing a struct of plain fields cannot fail.
                let body = serde_json::to_vec(&response).unwrap_or_default();
                ResponseHead::ok()
                    .header("Content-Type", "application/json")
                    .encode_with_body(&body)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Malformed decision request");
                ResponseHead::new(400, "Bad Request").encode_with_body(e.to_string().as_bytes())
            }
        }
    }
}

#[async_trait]
impl ConnectionHandler for DecisionHandler {
    async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
        Ok(self.out.as_mut().and_then(|w| w.next_chunk(window)))
    }

    async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        let feed = self.parser.feed(data)?;
        self.body.extend_from_slice(&feed.body);
        if self.parser.is_complete() && self.out.is_none() {
            self.out = Some(FrameWriter::new(self.answer()));
        }
        Ok(())
    }

    fn on_closed(&mut self) -> Result<()> {
        if self.out.is_none() {
            return Err(Error::connection("client closed before sending a request"));
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.out.as_ref().is_some_and(FrameWriter::is_finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abr::SessionSnapshot;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[test]
    fn test_choose_maps_buffer_onto_ladder() {
        let abr = BufferBasedAbr::default();
        assert_eq!(abr.choose(secs(0.0), 6), 0);
        assert_eq!(abr.choose(secs(5.0), 6), 0);
        assert_eq!(abr.choose(secs(7.0), 6), 1);
        assert_eq!(abr.choose(secs(10.0), 6), 2);
        assert_eq!(abr.choose(secs(14.9), 6), 4);
        assert_eq!(abr.choose(secs(15.0), 6), 5);
        assert_eq!(abr.choose(secs(60.0), 6), 5);
    }

    #[test]
    fn test_single_level_ladder() {
        assert_eq!(BufferBasedAbr::default().choose(secs(60.0), 1), 0);
        assert_eq!(BufferBasedAbr::default().choose(secs(60.0), 0), 0);
    }

    #[test]
    fn test_cookie_counts_decisions() {
        let abr = BufferBasedAbr::default();
        let mut snap = SessionSnapshot::default();
        let first = abr.respond(&snap.decision_request(&[1.0, 2.0]));
        assert_eq!(first.cookie_str(), "1");

        snap.cookie = first.cookie_str().to_string();
        let second = abr.respond(&snap.decision_request(&[1.0, 2.0]));
        assert_eq!(second.cookie_str(), "2");
    }

    #[tokio::test]
    async fn test_serves_over_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(
            DecisionServer::new(BufferBasedAbr::default()).serve(listener, shutdown.clone()),
        );

        let client = crate::abr::HttpDecisionClient::new(addr.to_string());
        let snap = SessionSnapshot {
            buffer: Duration::from_secs(20),
            ..Default::default()
        };
        let response = client
            .decide(&snap.decision_request(&[1.0, 2.0, 3.0]))
            .await
            .unwrap();
        assert_eq!(response, DecisionResponse::new(2, "1"));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }
}
