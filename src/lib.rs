//! # rc-link Library
//!
//! Frame transport and link session for a handset talking to an RF module
//! over a serial byte stream.
//!
//! - [`transport`] turns a lossy byte stream into frames (and back) with a
//!   pluggable [`codec`]
//! - [`session`] brings the module up, tracks command acks and sends the
//!   channel-data heartbeat
//! - [`serial`] connects a transport to a real port; [`telemetry`] records
//!   frame traces from the [`events`] bus

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod events;
pub mod serial;
pub mod session;
pub mod telemetry;
pub mod transport;
