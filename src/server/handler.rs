//! Per-connection request handler.
//!
//! Reads one request, works out the response length, and streams a body of
//! exactly that many filler bytes under the transport's send window.

use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use spdash_common::headers::{
    CONTENT_LENGTH, COOKIE, LAST_CHUNK_SIZE, LAST_QUALITY, PATH_TO_VIDEO, REQUIRE_LENGTH,
    VIDEO_PATH,
};
use spdash_common::{Error, RequestTarget, Result};
use spdash_http::{ConnectionHandler, FrameWriter, Head, RequestHead, RequestParser, ResponseHead};

use super::ServerContext;
use crate::abr::SessionSnapshot;

/// Serves one manifest or segment request.
pub struct SegmentRequestHandler {
    ctx: Arc<ServerContext>,
    parser: RequestParser,
    head: Option<FrameWriter>,
    body_total: u64,
    body_sent: u64,
    filler: Bytes,
}

impl SegmentRequestHandler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        let filler = Bytes::from(vec![0u8; ctx.chunk_limit.max(1)]);
        Self {
            ctx,
            parser: RequestParser::new(),
            head: None,
            body_total: 0,
            body_sent: 0,
            filler,
        }
    }

    /// Declared body length of the response, once decided.
    pub fn body_total(&self) -> u64 {
        self.body_total
    }

    /// Body bytes handed to the transport so far.
    pub fn body_sent(&self) -> u64 {
        self.body_sent
    }

    /// Build the response head for `request`, `Content-Length` included.
    pub async fn respond(&self, request: &RequestHead) -> ResponseHead {
        let required = request.headers.get_parsed::<u64>(REQUIRE_LENGTH).unwrap_or(0);
        let response = match RequestTarget::parse(&request.path) {
            None => error_response(404, "Not Found"),
            Some(RequestTarget::Manifest) => self.manifest(request, required).await,
            Some(RequestTarget::Segment { index, quality }) if required > 0 => {
                // The player decided; serve what it asked for.
                let response = sized(required)
                    .header(LAST_QUALITY, quality)
                    .header(COOKIE, request.headers.get(COOKIE).unwrap_or(""));
                log_segment(index, &response);
                response
            }
            Some(RequestTarget::Segment { index, .. }) => self.decide(index, request).await,
        };
        tracing::debug!(
            path = %request.path,
            status = response.status,
            length = response.headers.get(CONTENT_LENGTH).unwrap_or("0"),
            quality = response.headers.get(LAST_QUALITY).unwrap_or("-"),
            "Prepared response"
        );
        response
    }

    async fn manifest(&self, request: &RequestHead, required: u64) -> ResponseHead {
        if let Some(path) = request.headers.get(VIDEO_PATH) {
            if let Err(e) = self.ctx.tables.get_or_load(Path::new(path)).await {
                tracing::warn!(path = %path, error = %e, "Announced segment table not usable");
            }
        }
        let length = if required > 0 {
            required
        } else {
            self.ctx.manifest_length
        };
        sized(length).header(LAST_QUALITY, 0).header(COOKIE, "")
    }

    /// Server-side decision: consult the decision service with the state the
    /// player forwarded and size the response from our own table.
    async fn decide(&self, index: u32, request: &RequestHead) -> ResponseHead {
        let Some(table_path) = request
            .headers
            .get(PATH_TO_VIDEO)
            .map(PathBuf::from)
            .or_else(|| self.ctx.default_table.clone())
        else {
            tracing::warn!(segment = index, "No segment table for request");
            return error_response(404, "Not Found");
        };
        let table = match self.ctx.tables.get_or_load(&table_path).await {
            Ok(table) => table,
            Err(e) => {
                tracing::warn!(
                    path = %table_path.display(),
                    error = %e,
                    "Segment table not usable"
                );
                return error_response(404, "Not Found");
            }
        };
        // Every quality row has the same length, so row 0 bounds the index.
        if table.try_size_of(0, index as usize).is_none() {
            tracing::warn!(segment = index, "Segment outside table");
            return error_response(404, "Not Found");
        }

        let mut snapshot = SessionSnapshot::from_headers(&request.headers, index);
        snapshot.next_segment = index;
        let decision = match self
            .ctx
            .decision
            .decide(&snapshot.decision_request(table.bitrates()))
            .await
        {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(segment = index, error = %e, "Decision failed");
                return error_response(503, "Service Unavailable");
            }
        };
        let quality = match Error::check_quality(decision.quality, table.quality_count()) {
            Ok(q) => q,
            Err(e) => {
                tracing::warn!(segment = index, error = %e, "Decision rejected");
                return error_response(502, "Bad Gateway");
            }
        };
        let Some(size) = table.try_size_of(quality, index as usize) else {
            return error_response(404, "Not Found");
        };

        let response = sized(size)
            .header(LAST_QUALITY, quality)
            .header(COOKIE, decision.cookie_str());
        log_segment(index, &response);
        response
    }
}

#[async_trait]
impl ConnectionHandler for SegmentRequestHandler {
    async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
        let Some(head) = self.head.as_mut() else {
            return Ok(None);
        };
        if let Some(chunk) = head.next_chunk(window) {
            return Ok(Some(chunk));
        }

        let remaining = self.body_total - self.body_sent;
        let n = remaining
            .min(window as u64)
            .min(self.filler.len() as u64) as usize;
        if n == 0 {
            return Ok(None);
        }
        self.body_sent += n as u64;
        Ok(Some(self.filler.slice(..n)))
    }

    async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        self.parser.feed(data)?;
        if !self.parser.is_complete() || self.head.is_some() {
            return Ok(());
        }
        let Some(request) = self.parser.take_head() else {
            return Ok(());
        };
        let response = self.respond(&request).await;
        self.body_total = response.headers.content_length()?.unwrap_or(0);
        self.head = Some(FrameWriter::new(response.encode()));
        Ok(())
    }

    fn on_closed(&mut self) -> Result<()> {
        if self.head.is_none() {
            tracing::debug!("Peer closed before completing a request");
        }
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.head.as_ref().is_some_and(FrameWriter::is_finished)
            && self.body_sent == self.body_total
    }
}

/// `200 OK` declaring a body of `length` bytes.
fn sized(length: u64) -> ResponseHead {
    ResponseHead::ok()
        .header(CONTENT_LENGTH, length)
        .header(LAST_CHUNK_SIZE, length)
}

fn error_response(status: u16, reason: &str) -> ResponseHead {
    ResponseHead::new(status, reason).header(CONTENT_LENGTH, 0)
}

fn log_segment(segment: u32, response: &ResponseHead) {
    tracing::info!(
        segment,
        quality = response.headers.get(LAST_QUALITY).unwrap_or("-"),
        size = response.headers.get(LAST_CHUNK_SIZE).unwrap_or("0"),
        "Serving segment"
    );
}
