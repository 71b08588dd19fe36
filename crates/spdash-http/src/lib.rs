//! Spdash-HTTP: the framed request/response exchange used between player,
//! server, and decision service.
//!
//! This is not an HTTP/1.1 implementation. A connection carries exactly one
//! request and one response; bodies are always length-delimited; header names
//! are case-sensitive.
//!
//! # Modules
//!
//! - `headers` - header map with typed accessors
//! - `message` - request/response heads and their wire encoding
//! - `parser` - incremental parser fed with arbitrary-sized chunks
//! - `writer` - partial-write producer that resumes where the transport
//!   stopped accepting bytes
//! - `transport` - drives a byte stream and delivers send-ready, data, and
//!   close notifications to a [`ConnectionHandler`]

pub mod error;
pub mod headers;
pub mod message;
pub mod parser;
pub mod transport;
pub mod writer;

pub use error::FramingError;
pub use headers::Headers;
pub use message::{Head, RequestHead, ResponseHead};
pub use parser::{Feed, MessageParser, RequestParser, ResponseParser};
pub use transport::{
    AsyncStream, BoxedStream, ConnectionHandler, Connector, TcpConnector, Transport,
    TransportOutcome, DEFAULT_SEND_WINDOW,
};
pub use writer::FrameWriter;
