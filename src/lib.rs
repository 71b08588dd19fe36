//! Spdash - adaptive-bitrate segment streaming
//!
//! This library crate exposes the player, the streaming server handler, the
//! decision-service client and reference service, for the binary and for
//! integration testing.

pub mod abr;
pub mod clock;
pub mod config;
pub mod player;
pub mod server;
