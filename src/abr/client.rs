//! Decision-service client.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use spdash_common::{Error, Result};
use spdash_http::{
    ConnectionHandler, Connector, FrameWriter, Head, RequestHead, ResponseParser, TcpConnector,
    Transport,
};

use super::{DecisionRequest, DecisionResponse, DecisionService};

/// Calls an external decision service over a fresh connection per decision.
///
/// The request is a `POST /` with the JSON-encoded [`DecisionRequest`] as
/// body. The response body is read until its declared length, or until the
/// service closes the connection if it declares none.
pub struct HttpDecisionClient {
    connector: Arc<dyn Connector>,
    timeout: Option<Duration>,
}

impl HttpDecisionClient {
    /// Client for a service listening at `endpoint` (`host:port`).
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_connector(Arc::new(TcpConnector::new(endpoint)))
    }

    pub fn with_connector(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            timeout: None,
        }
    }

    /// Give up on a decision after `timeout`. Expiry is reported as
    /// [`Error::DecisionUnavailable`] like any other failure.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn exchange(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        let body = serde_json::to_vec_pretty(request)
            .map_err(|e| Error::decision_unavailable(format!("encode request: {e}")))?;
        let frame = RequestHead::post("/")
            .header("Content-Type", "application/json")
            .encode_with_body(&body);

        let stream = self.connector.connect().await.map_err(|e| {
            Error::decision_unavailable(format!("connect to {}: {e}", self.connector.peer()))
        })?;

        let mut exchange = Exchange {
            out: FrameWriter::new(frame),
            parser: ResponseParser::new().close_delimited(),
            body: Vec::new(),
        };
        Transport::new(stream)
            .run(&mut exchange)
            .await
            .map_err(|e| Error::decision_unavailable(e.to_string()))?;

        let head = exchange
            .parser
            .head()
            .ok_or_else(|| Error::decision_unavailable("no response"))?;
        if !head.is_success() {
            return Err(Error::decision_unavailable(format!(
                "service answered {} {}",
                head.status, head.reason
            )));
        }

        serde_json::from_slice(&exchange.body)
            .map_err(|e| Error::decision_unavailable(format!("malformed response: {e}")))
    }
}

#[async_trait]
impl DecisionService for HttpDecisionClient {
    async fn decide(&self, request: &DecisionRequest) -> Result<DecisionResponse> {
        tracing::debug!(
            peer = %self.connector.peer(),
            next_chunk = request.next_chunk_id,
            buffer_secs = request.buffer,
            "Requesting decision"
        );
        let response = match self.timeout {
            Some(t) => tokio::time::timeout(t, self.exchange(request))
                .await
                .map_err(|_| Error::decision_unavailable(format!("no answer within {t:?}")))?,
            None => self.exchange(request).await,
        }?;
        tracing::debug!(quality = response.quality, "Decision received");
        Ok(response)
    }
}

/// One request out, one response in.
struct Exchange {
    out: FrameWriter,
    parser: ResponseParser,
    body: Vec<u8>,
}

#[async_trait]
impl ConnectionHandler for Exchange {
    async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
        Ok(self.out.next_chunk(window))
    }

    async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        let feed = self.parser.feed(data)?;
        self.body.extend_from_slice(&feed.body);
        Ok(())
    }

    fn on_closed(&mut self) -> Result<()> {
        self.parser.finish()?;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.parser.is_complete()
    }
}
