//! Request and response heads.
//!
//! A head is the start line plus the header section. Encoding always ends
//! with the blank-line terminator; bodies are handled separately so they can
//! be streamed.

use bytes::{BufMut, Bytes, BytesMut};

use spdash_common::headers::CONTENT_LENGTH;

use crate::error::FramingError;
use crate::headers::{escape_value, Headers};

pub const VERSION: &str = "HTTP/1.1";
pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Common behaviour of request and response heads.
pub trait Head: Sized {
    /// Build a head from its start line and parsed headers.
    fn from_parts(start_line: &str, headers: Headers) -> Result<Self, FramingError>;

    fn headers(&self) -> &Headers;

    fn headers_mut(&mut self) -> &mut Headers;

    fn start_line(&self) -> String;

    /// Wire form of the head, terminator included.
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        buf.put_slice(self.start_line().as_bytes());
        buf.put_slice(CRLF);
        for (name, value) in self.headers().iter() {
            buf.put_slice(name.as_bytes());
            buf.put_slice(b": ");
            buf.put_slice(escape_value(value).as_bytes());
            buf.put_slice(CRLF);
        }
        buf.put_slice(CRLF);
        buf.freeze()
    }

    /// Encode the head followed by a complete in-memory body, setting
    /// `Content-Length` to the body size.
    fn encode_with_body(mut self, body: &[u8]) -> Bytes {
        self.headers_mut().insert(CONTENT_LENGTH, body.len());
        let head = self.encode();
        let mut buf = BytesMut::with_capacity(head.len() + body.len());
        buf.put_slice(&head);
        buf.put_slice(body);
        buf.freeze()
    }
}

/// Request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub headers: Headers,
}

impl RequestHead {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: Headers::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new("GET", path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new("POST", path)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Head for RequestHead {
    fn from_parts(start_line: &str, headers: Headers) -> Result<Self, FramingError> {
        let mut parts = start_line.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(method), Some(path), Some(_version), None) => Ok(Self {
                method: method.to_string(),
                path: path.to_string(),
                headers,
            }),
            _ => Err(FramingError::MalformedStartLine(start_line.to_string())),
        }
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn start_line(&self) -> String {
        format!("{} {} {}", self.method, self.path, VERSION)
    }
}

/// Status line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub reason: String,
    pub headers: Headers,
}

impl ResponseHead {
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Headers::new(),
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl std::fmt::Display) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Head for ResponseHead {
    fn from_parts(start_line: &str, headers: Headers) -> Result<Self, FramingError> {
        let malformed = || FramingError::MalformedStartLine(start_line.to_string());
        let mut parts = start_line.splitn(3, ' ');
        let _version = parts.next().filter(|v| !v.is_empty()).ok_or_else(malformed)?;
        let status = parts
            .next()
            .and_then(|s| s.parse::<u16>().ok())
            .ok_or_else(malformed)?;
        let reason = parts.next().unwrap_or("").trim().to_string();
        Ok(Self {
            status,
            reason,
            headers,
        })
    }

    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn start_line(&self) -> String {
        format!("{} {} {}", VERSION, self.status, self.reason)
    }
}
