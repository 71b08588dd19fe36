//! One request/response exchange on a fresh connection.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use spdash_common::{Error, Result};
use spdash_http::{
    ConnectionHandler, Connector, FrameWriter, Head, RequestHead, ResponseHead, ResponseParser,
    Transport, TransportOutcome,
};

use super::trace::RequestTrace;
use crate::clock::Clock;

/// A completed response.
#[derive(Debug)]
pub(crate) struct Fetched {
    pub head: ResponseHead,
    pub body_len: u64,
    pub trace: RequestTrace,
}

/// How a fetch ended without error.
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    Done(Fetched),
    /// The session was stopped while the request was in flight.
    Stopped(RequestTrace),
}

/// Send `request` and collect the response.
///
/// Framing problems and non-2xx statuses become [`Error::Connection`].
pub(crate) async fn fetch(
    connector: &dyn Connector,
    request: RequestHead,
    clock: Clock,
    send_window: usize,
    running: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<FetchOutcome> {
    let stream = connector
        .connect()
        .await
        .map_err(|e| Error::connection(format!("connect to {}: {e}", connector.peer())))?;

    let mut handler = FetchHandler {
        out: FrameWriter::new(request.encode()),
        parser: ResponseParser::new(),
        trace: RequestTrace::new(),
        clock,
        running,
    };
    let outcome = Transport::new(stream)
        .with_send_window(send_window)
        .with_cancel(cancel)
        .run(&mut handler)
        .await
        .map_err(Error::into_connection)?;

    match outcome {
        TransportOutcome::Cancelled => return Ok(FetchOutcome::Stopped(handler.trace)),
        TransportOutcome::PeerClosed if !handler.running.load(Ordering::SeqCst) => {
            return Ok(FetchOutcome::Stopped(handler.trace));
        }
        TransportOutcome::PeerClosed | TransportOutcome::Completed => {}
    }

    let body_len = handler.parser.body_received();
    let head = handler
        .parser
        .take_head()
        .ok_or_else(|| Error::connection("connection closed without a response"))?;
    if !head.is_success() {
        return Err(Error::connection(format!(
            "{} answered {} {}",
            request.path, head.status, head.reason
        )));
    }
    Ok(FetchOutcome::Done(Fetched {
        head,
        body_len,
        trace: handler.trace,
    }))
}

/// Client side of one exchange. Becomes a no-op once the session stops.
struct FetchHandler {
    out: FrameWriter,
    parser: ResponseParser,
    trace: RequestTrace,
    clock: Clock,
    running: Arc<AtomicBool>,
}

impl FetchHandler {
    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionHandler for FetchHandler {
    async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
        if !self.running() {
            return Ok(None);
        }
        if self.out.written() == 0 {
            self.trace.request_sent(self.clock.now());
        }
        Ok(self.out.next_chunk(window))
    }

    async fn on_data(&mut self, data: &[u8]) -> Result<()> {
        if !self.running() {
            return Ok(());
        }
        let feed = self.parser.feed(data)?;
        if feed.head_completed {
            tracing::trace!("Response headers available");
        }
        if !feed.body.is_empty() {
            self.trace.response_received(self.clock.now(), feed.body.len());
        }
        Ok(())
    }

    fn on_closed(&mut self) -> Result<()> {
        if !self.running() {
            return Ok(());
        }
        self.parser.finish()?;
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.parser.is_complete()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spdash_http::BoxedStream;
    use std::io;

    struct Once(parking_lot::Mutex<Option<tokio_test::io::Mock>>);

    #[async_trait]
    impl Connector for Once {
        async fn connect(&self) -> io::Result<BoxedStream> {
            self.0
                .lock()
                .take()
                .map(|m| Box::new(m) as BoxedStream)
                .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "refused"))
        }

        fn peer(&self) -> String {
            "mock".to_string()
        }
    }

    fn connector(mock: Option<tokio_test::io::Mock>) -> Once {
        Once(parking_lot::Mutex::new(mock))
    }

    async fn run(connector: &Once) -> Result<FetchOutcome> {
        fetch(
            connector,
            RequestHead::get("/mpd"),
            Clock::new(),
            2048,
            Arc::new(AtomicBool::new(true)),
            CancellationToken::new(),
        )
        .await
    }

    #[tokio::test]
    async fn test_body_split_across_receives() {
        let mock = tokio_test::io::Builder::new()
            .write(b"GET /mpd HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\nX-LastQuality: 0\r\n\r\nab")
            .read(b"cd")
            .read(b"ef")
            .build();
        let outcome = run(&connector(Some(mock))).await.unwrap();
        let FetchOutcome::Done(fetched) = outcome else {
            panic!("expected a response");
        };
        assert_eq!(fetched.body_len, 6);
        assert_eq!(fetched.trace.receives(), 3);
        assert_eq!(fetched.head.headers.get("X-LastQuality"), Some("0"));
    }

    #[tokio::test]
    async fn test_error_status_is_connection_error() {
        let mock = tokio_test::io::Builder::new()
            .write(b"GET /mpd HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n")
            .build();
        let err = run(&connector(Some(mock))).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_error() {
        let mock = tokio_test::io::Builder::new()
            .write(b"GET /mpd HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 6\r\n\r\nab")
            .build();
        let err = run(&connector(Some(mock))).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let err = run(&connector(None)).await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}
