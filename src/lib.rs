//! # Price Relay
//!
//! This crate turns a pull-based HTTP pricing API into a push stream over
//! TCP. A client opens a socket, sends a product id once, and from then on
//! receives a message every time that product's price changes, for as long
//! as the connection stays open.
//!
//! ## Features
//!
//! - One worker thread per connection; accepting never waits on a worker.
//! - Periodic backend polling with change detection (only changes are sent).
//! - Bounded retries with exponential backoff while the backend is unreachable.
//! - Explicit message framing (newline-delimited by default).
//! - Graceful shutdown: every open connection is closed before exit.
//!
//! ## Architecture Overview
//!
//! - [`tcp_server`](crate::tcp_server) — Listener/acceptor, dispatches connections.
//! - [`worker`](crate::worker) — Per-connection state machine.
//! - [`session`](crate::session) — State owned by one connection.
//! - [`price_poller`](crate::price_poller) — Backend requests and outcome classification.
//! - [`change_detector`](crate::change_detector) — Decides whether a snapshot is new.
//! - [`price_snapshot`](crate::price_snapshot) — Decoded price reading.
//! - [`product_id`](crate::product_id) — Identifier validation.
//! - [`framing`](crate::framing) — Server-to-client message framing.
//! - [`shutdown`](crate::shutdown) — Process-wide cancellation signal.
//! - [`config`](crate::config) — Address resolution and relay settings.
//! - [`defs`](crate::defs) — Shared constants and timing parameters.
//! - [`errors`](crate::errors) — Error types used across modules.
//!
//! ## TCP Protocol
//!
//! - Client → server: a single message of at most 16 bytes holding decimal
//!   digits, optionally padded with whitespace.
//! - Server → client: one frame per price change, carrying the backend's
//!   JSON body verbatim. On an invalid id or a backend error the server
//!   sends one plain-text frame and closes the connection.
//!
//! ## Example: Running the Server
//!
//! ```no_run
//! use std::sync::Arc;
//! use price_relay::config::{BackendConfig, RelayConfig};
//! use price_relay::price_poller::HttpPricePoller;
//! use price_relay::shutdown::ShutdownSignal;
//! use price_relay::tcp_server::TcpServer;
//! use price_relay::worker::WorkerSettings;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::new("127.0.0.1", 8050, BackendConfig::new("127.0.0.1", 4000));
//!     let poller = Arc::new(HttpPricePoller::new(&config.backend)?);
//!
//!     let server = TcpServer::new(
//!         &config.bind_addr,
//!         poller,
//!         WorkerSettings::from(&config),
//!         config.dispatch,
//!         ShutdownSignal::new(),
//!     )?;
//!     server.start()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unreachable_pub)]

pub mod change_detector;
pub mod config;
pub mod defs;
pub mod errors;
pub mod framing;
pub mod price_poller;
pub mod price_snapshot;
pub mod product_id;
pub mod session;
pub mod shutdown;
pub mod tcp_server;
pub mod worker;

#[cfg(test)]
mod test_support;
