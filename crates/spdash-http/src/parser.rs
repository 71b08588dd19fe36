//! Incremental frame parser.
//!
//! Bytes arrive in arbitrary chunks. The header section is parsed only once
//! the blank-line terminator has been accumulated; until then no body bytes
//! are released. After the head, exactly `Content-Length` body bytes are
//! delivered and anything beyond that is a framing error.

use bytes::{Bytes, BytesMut};

use crate::error::FramingError;
use crate::headers::Headers;
use crate::message::{Head, RequestHead, ResponseHead, TERMINATOR};

/// Default upper bound on the header section.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

pub type RequestParser = MessageParser<RequestHead>;
pub type ResponseParser = MessageParser<ResponseHead>;

/// What one [`MessageParser::feed`] call produced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Feed {
    /// The header section completed during this call. True at most once
    /// per frame.
    pub head_completed: bool,
    /// Body bytes released by this call.
    pub body: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingHead,
    Body { remaining: u64 },
    CloseDelimited,
    Complete,
}

/// Parser for one request or one response.
#[derive(Debug)]
pub struct MessageParser<H> {
    phase: Phase,
    buf: BytesMut,
    head: Option<H>,
    body_received: u64,
    max_head: usize,
    close_delimited: bool,
}

impl<H: Head> MessageParser<H> {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingHead,
            buf: BytesMut::new(),
            head: None,
            body_received: 0,
            max_head: MAX_HEAD_SIZE,
            close_delimited: false,
        }
    }

    /// Treat a frame without `Content-Length` as running until the peer
    /// closes, instead of having an empty body. Used only for the
    /// decision-service exchange, whose peer may not declare a length.
    #[must_use]
    pub fn close_delimited(mut self) -> Self {
        self.close_delimited = true;
        self
    }

    /// Consume the next chunk of input.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Feed, FramingError> {
        match self.phase {
            Phase::AwaitingHead => self.feed_head(chunk),
            Phase::Body { .. } | Phase::CloseDelimited => Ok(Feed {
                head_completed: false,
                body: self.take_body(Bytes::copy_from_slice(chunk))?,
            }),
            Phase::Complete if chunk.is_empty() => Ok(Feed::default()),
            Phase::Complete => Err(FramingError::BodyOverrun { extra: chunk.len() }),
        }
    }

    /// Signal end of input. Fails if the frame is incomplete.
    pub fn finish(&mut self) -> Result<(), FramingError> {
        match self.phase {
            Phase::AwaitingHead => Err(FramingError::IncompleteHead),
            Phase::Body { remaining } => Err(FramingError::Truncated { missing: remaining }),
            Phase::CloseDelimited | Phase::Complete => {
                self.phase = Phase::Complete;
                Ok(())
            }
        }
    }

    /// The parsed head, once the header section is complete.
    pub fn head(&self) -> Option<&H> {
        self.head.as_ref()
    }

    /// Take the parsed head out of the parser.
    pub fn take_head(&mut self) -> Option<H> {
        self.head.take()
    }

    /// Whether the whole declared body has been delivered.
    pub fn is_complete(&self) -> bool {
        self.phase == Phase::Complete
    }

    pub fn body_received(&self) -> u64 {
        self.body_received
    }

    fn feed_head(&mut self, chunk: &[u8]) -> Result<Feed, FramingError> {
        // Only rescan the tail that could contain a terminator split across chunks.
        let scan_from = self.buf.len().saturating_sub(TERMINATOR.len() - 1);
        self.buf.extend_from_slice(chunk);

        let Some(pos) = find(&self.buf[scan_from..], TERMINATOR).map(|p| p + scan_from) else {
            if self.buf.len() > self.max_head {
                return Err(FramingError::HeadTooLarge(self.max_head));
            }
            return Ok(Feed::default());
        };
        if pos > self.max_head {
            return Err(FramingError::HeadTooLarge(self.max_head));
        }

        let head_bytes = self.buf.split_to(pos + TERMINATOR.len());
        let head = parse_head::<H>(&head_bytes[..pos])?;
        let declared = head.headers().content_length()?;
        self.head = Some(head);
        self.phase = match declared {
            Some(0) => Phase::Complete,
            Some(len) => Phase::Body { remaining: len },
            None if self.close_delimited => Phase::CloseDelimited,
            None => Phase::Complete,
        };

        let rest = self.buf.split().freeze();
        let body = if rest.is_empty() {
            Bytes::new()
        } else {
            self.take_body(rest)?
        };
        Ok(Feed {
            head_completed: true,
            body,
        })
    }

    fn take_body(&mut self, data: Bytes) -> Result<Bytes, FramingError> {
        match self.phase {
            Phase::Body { remaining } => {
                let len = data.len() as u64;
                if len > remaining {
                    return Err(FramingError::BodyOverrun {
                        extra: (len - remaining) as usize,
                    });
                }
                let remaining = remaining - len;
                self.phase = if remaining == 0 {
                    Phase::Complete
                } else {
                    Phase::Body { remaining }
                };
                self.body_received += len;
                Ok(data)
            }
            Phase::CloseDelimited => {
                self.body_received += data.len() as u64;
                Ok(data)
            }
            Phase::Complete if data.is_empty() => Ok(data),
            Phase::Complete => Err(FramingError::BodyOverrun { extra: data.len() }),
            Phase::AwaitingHead => unreachable!("body bytes before head"),
        }
    }
}

impl<H: Head> Default for MessageParser<H> {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_head<H: Head>(raw: &[u8]) -> Result<H, FramingError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| FramingError::MalformedHeader(String::from_utf8_lossy(raw).into_owned()))?;
    let mut lines = text.split("\r\n");
    let start = lines
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| FramingError::MalformedStartLine(String::new()))?;

    let mut headers = Headers::new();
    for line in lines {
        headers.parse_line(line)?;
    }
    H::from_parts(start, headers)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &[u8] =
        b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nX-LastQuality: 1\r\n\r\n0123456789";

    #[test]
    fn test_whole_frame_in_one_chunk() {
        let mut parser = ResponseParser::new();
        let feed = parser.feed(RESPONSE).unwrap();
        assert!(feed.head_completed);
        assert_eq!(&feed.body[..], b"0123456789");
        assert!(parser.is_complete());
        let head = parser.head().unwrap();
        assert_eq!(head.status, 200);
        assert_eq!(head.headers.get("X-LastQuality"), Some("1"));
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut parser = ResponseParser::new();
        let mut head_events = 0;
        let mut body = Vec::new();
        for byte in RESPONSE {
            let feed = parser.feed(std::slice::from_ref(byte)).unwrap();
            if feed.head_completed {
                head_events += 1;
            }
            if parser.phase == Phase::AwaitingHead {
                assert!(feed.body.is_empty());
            }
            body.extend_from_slice(&feed.body);
        }
        assert_eq!(head_events, 1);
        assert_eq!(body, b"0123456789");
        assert!(parser.is_complete());
        assert_eq!(parser.body_received(), 10);
    }

    #[test]
    fn test_terminator_split_across_chunks() {
        let mut parser = RequestParser::new();
        let feed = parser
            .feed(b"GET /mpd HTTP/1.1\r\nX-Require-Length: 5\r\n\r")
            .unwrap();
        assert!(!feed.head_completed);
        let feed = parser.feed(b"\n").unwrap();
        assert!(feed.head_completed);
        assert_eq!(parser.head().unwrap().path, "/mpd");
        assert!(parser.is_complete());
    }

    #[test]
    fn test_body_overrun() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nab").unwrap();
        assert_eq!(
            parser.feed(b"c"),
            Err(FramingError::BodyOverrun { extra: 1 })
        );

        let mut parser = ResponseParser::new();
        assert_eq!(
            parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nabc"),
            Err(FramingError::BodyOverrun { extra: 1 })
        );
    }

    #[test]
    fn test_truncated_body() {
        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nab").unwrap();
        assert_eq!(parser.finish(), Err(FramingError::Truncated { missing: 3 }));

        let mut parser = ResponseParser::new();
        parser.feed(b"HTTP/1.1 200 OK\r\n").unwrap();
        assert_eq!(parser.finish(), Err(FramingError::IncompleteHead));
    }

    #[test]
    fn test_close_delimited_body() {
        let mut parser = ResponseParser::new().close_delimited();
        let feed = parser.feed(b"HTTP/1.1 200 OK\r\n\r\n{\"quality\":").unwrap();
        assert_eq!(&feed.body[..], b"{\"quality\":");
        let feed = parser.feed(b"1}").unwrap();
        assert_eq!(&feed.body[..], b"1}");
        assert!(!parser.is_complete());
        parser.finish().unwrap();
        assert!(parser.is_complete());
    }

    #[test]
    fn test_missing_length_means_empty_body() {
        let mut parser = RequestParser::new();
        let feed = parser.feed(b"GET /seg-0-0 HTTP/1.1\r\nX-Require-Length: 0\r\n\r\n").unwrap();
        assert!(feed.head_completed);
        assert!(parser.is_complete());
    }

    #[test]
    fn test_head_too_large() {
        let mut parser = RequestParser::new();
        parser.max_head = 16;
        let err = parser.feed(b"GET /a-very-long-path HTTP/1.1\r\n").unwrap_err();
        assert_eq!(err, FramingError::HeadTooLarge(16));
    }

    #[test]
    fn test_malformed_header() {
        let mut parser = RequestParser::new();
        let err = parser.feed(b"GET / HTTP/1.1\r\nbroken\r\n\r\n").unwrap_err();
        assert!(matches!(err, FramingError::MalformedHeader(_)));
    }
}
