//! Transport adapter.
//!
//! Wraps a connection-oriented byte stream and turns it into three kinds of
//! notifications for a [`ConnectionHandler`]: the transport can accept more
//! bytes, bytes were received, and the peer closed. One transport carries one
//! request/response exchange; a new exchange needs a new connection.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use spdash_common::{Error, Result};

/// Default number of bytes the transport accepts per send-ready notification.
pub const DEFAULT_SEND_WINDOW: usize = 2048;

const READ_BUF_SIZE: usize = 16 * 1024;

/// Any bidirectional byte stream.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// Opens new connections to a fixed peer.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> io::Result<BoxedStream>;

    /// Human-readable peer name for logs.
    fn peer(&self) -> String;
}

/// Connects over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: None,
        }
    }

    /// Fail the connect attempt after `timeout`.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> io::Result<BoxedStream> {
        let connect = tokio::net::TcpStream::connect(&self.addr);
        let stream = match self.timeout {
            Some(t) => tokio::time::timeout(t, connect)
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))??,
            None => connect.await?,
        };
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }

    fn peer(&self) -> String {
        self.addr.clone()
    }
}

/// Receiver of transport notifications.
///
/// Handlers are called sequentially from one task; a handler suspended in an
/// `await` holds up its own connection only.
#[async_trait]
pub trait ConnectionHandler: Send {
    /// The transport can accept up to `window` bytes. Return the next piece
    /// to write, or `None` if there is nothing to send right now.
    async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>>;

    /// Bytes arrived from the peer.
    async fn on_data(&mut self, data: &[u8]) -> Result<()>;

    /// The peer closed its side of the connection.
    fn on_closed(&mut self) -> Result<()>;

    /// The exchange is complete and the transport may close.
    fn is_finished(&self) -> bool;
}

/// How a transport run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    /// The handler reported the exchange finished.
    Completed,
    /// The peer closed the connection first.
    PeerClosed,
    /// The owner cancelled the transport.
    Cancelled,
}

/// Drives one connection.
pub struct Transport {
    stream: BoxedStream,
    send_window: usize,
    cancel: CancellationToken,
}

impl Transport {
    pub fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            send_window: DEFAULT_SEND_WINDOW,
            cancel: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn with_send_window(mut self, window: usize) -> Self {
        self.send_window = window.max(1);
        self
    }

    /// Stop the run when `cancel` fires.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run the exchange to completion.
    ///
    /// Pending output is always flushed before reading, so a handler's bytes
    /// go out in the order it produced them. Handler errors end the run and
    /// are returned unchanged; I/O errors become [`Error::Connection`].
    pub async fn run<H: ConnectionHandler + ?Sized>(
        mut self,
        handler: &mut H,
    ) -> Result<TransportOutcome> {
        let mut buf = vec![0u8; READ_BUF_SIZE];
        loop {
            if self.cancel.is_cancelled() {
                tracing::debug!("Transport cancelled");
                return Ok(TransportOutcome::Cancelled);
            }
            if handler.is_finished() {
                // Peer may already be gone; the exchange itself is complete.
                let _ = self.stream.shutdown().await;
                return Ok(TransportOutcome::Completed);
            }

            if let Some(chunk) = handler.on_send_ready(self.send_window).await? {
                debug_assert!(chunk.len() <= self.send_window);
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(TransportOutcome::Cancelled),
                    written = self.stream.write_all(&chunk) => {
                        written.map_err(|e| Error::connection(format!("send failed: {e}")))?;
                        tracing::trace!(bytes = chunk.len(), "Sent");
                    }
                }
                continue;
            }

            let read = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(TransportOutcome::Cancelled),
                read = self.stream.read(&mut buf) => read,
            };
            match read {
                Ok(0) => {
                    tracing::trace!("Peer closed");
                    handler.on_closed()?;
                    return Ok(if handler.is_finished() {
                        TransportOutcome::Completed
                    } else {
                        TransportOutcome::PeerClosed
                    });
                }
                Ok(n) => handler.on_data(&buf[..n]).await?,
                Err(e) => return Err(Error::connection(format!("receive failed: {e}"))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Head, RequestHead, ResponseHead};
    use crate::parser::{RequestParser, ResponseParser};
    use crate::writer::FrameWriter;

    /// Sends one request, collects the response body.
    struct Fetch {
        out: FrameWriter,
        parser: ResponseParser,
        body: Vec<u8>,
        receives: usize,
    }

    #[async_trait]
    impl ConnectionHandler for Fetch {
        async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
            Ok(self.out.next_chunk(window))
        }

        async fn on_data(&mut self, data: &[u8]) -> Result<()> {
            self.receives += 1;
            let feed = self.parser.feed(data)?;
            self.body.extend_from_slice(&feed.body);
            Ok(())
        }

        fn on_closed(&mut self) -> Result<()> {
            self.parser.finish().map_err(Error::from)
        }

        fn is_finished(&self) -> bool {
            self.parser.is_complete()
        }
    }

    /// Answers one request with a body of `len` bytes.
    struct Serve {
        parser: RequestParser,
        out: Option<FrameWriter>,
        len: usize,
        largest_write: usize,
    }

    #[async_trait]
    impl ConnectionHandler for Serve {
        async fn on_send_ready(&mut self, window: usize) -> Result<Option<Bytes>> {
            let chunk = self.out.as_mut().and_then(|w| w.next_chunk(window));
            if let Some(c) = &chunk {
                self.largest_write = self.largest_write.max(c.len());
            }
            Ok(chunk)
        }

        async fn on_data(&mut self, data: &[u8]) -> Result<()> {
            if self.parser.feed(data)?.head_completed {
                let body = vec![7u8; self.len];
                self.out = Some(FrameWriter::new(ResponseHead::ok().encode_with_body(&body)));
            }
            Ok(())
        }

        fn on_closed(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_finished(&self) -> bool {
            self.out.as_ref().is_some_and(FrameWriter::is_finished)
        }
    }

    #[tokio::test]
    async fn test_exchange_over_small_pipe() {
        let (client, server) = tokio::io::duplex(64);
        let server_task = tokio::spawn(async move {
            let mut handler = Serve {
                parser: RequestParser::new(),
                out: None,
                len: 5000,
                largest_write: 0,
            };
            let outcome = Transport::new(Box::new(server))
                .with_send_window(100)
                .run(&mut handler)
                .await
                .unwrap();
            (outcome, handler.largest_write)
        });

        let mut fetch = Fetch {
            out: FrameWriter::new(RequestHead::get("/mpd").encode()),
            parser: ResponseParser::new(),
            body: Vec::new(),
            receives: 0,
        };
        let outcome = Transport::new(Box::new(client))
            .with_send_window(4)
            .run(&mut fetch)
            .await
            .unwrap();

        assert_eq!(outcome, TransportOutcome::Completed);
        assert_eq!(fetch.body.len(), 5000);
        assert!(fetch.receives > 1);

        let (server_outcome, largest) = server_task.await.unwrap();
        assert_eq!(server_outcome, TransportOutcome::Completed);
        assert!(largest <= 100);
    }

    #[tokio::test]
    async fn test_cancel_ends_run() {
        let (client, _server) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let mut fetch = Fetch {
            out: FrameWriter::new(RequestHead::get("/mpd").encode()),
            parser: ResponseParser::new(),
            body: Vec::new(),
            receives: 0,
        };
        let transport = Transport::new(Box::new(client)).with_cancel(cancel.clone());
        let run = tokio::spawn(async move { transport.run(&mut fetch).await });
        cancel.cancel();
        assert_eq!(run.await.unwrap().unwrap(), TransportOutcome::Cancelled);
    }

    #[tokio::test]
    async fn test_peer_close_mid_body_is_an_error() {
        let stream = tokio_test::io::Builder::new()
            .write(b"GET /mpd HTTP/1.1\r\n\r\n")
            .read(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nabc")
            .build();
        let mut fetch = Fetch {
            out: FrameWriter::new(RequestHead::get("/mpd").encode()),
            parser: ResponseParser::new(),
            body: Vec::new(),
            receives: 0,
        };
        let err = Transport::new(Box::new(stream))
            .run(&mut fetch)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
        assert_eq!(fetch.body, b"abc");
    }
}
