//! Spdash-Common: Shared types, constants, and error taxonomy.
//!
//! This crate provides common functionality used across spdash:
//!
//! - **Error Handling**: the session error taxonomy and result alias
//! - **Typed IDs**: [`SessionId`] for naming streaming sessions
//! - **Core Types**: player states, deployment modes, session outcomes
//! - **Protocol Constants**: request paths and header names shared by the
//!   player and the server handler
//!
//! # Examples
//!
//! ```
//! use spdash_common::{headers, AbrMode, Error, PlayerState, Result, SessionId};
//!
//! let id = SessionId::from("client-7");
//! assert_eq!(id.as_str(), "client-7");
//!
//! assert!(PlayerState::Finished.is_terminal());
//! assert_eq!(AbrMode::default(), AbrMode::Server);
//! assert_eq!(headers::COOKIE, "X-Cookie");
//!
//! fn example() -> Result<()> {
//!     Err(Error::decision_unavailable("connection refused"))
//! }
//! assert!(example().is_err());
//! ```

pub mod error;
pub mod headers;
pub mod ids;
pub mod types;

pub use error::{Error, Result};
pub use ids::*;
pub use types::*;
