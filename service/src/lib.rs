//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! # Telbridge Connection Bridge Service
//!
//! This crate implements a multi-transport connection bridge: clients
//! connect over raw TCP, Telnet, or WebSocket, and each admitted connection
//! is relayed to an upstream TCP target. Telnet transports have their
//! in-band negotiation filtered and refused so only clean payload crosses
//! the bridge.
//!
//! ## Architecture
//!
//! - [`BridgeServer`] — one listener: bind, accept, graceful shutdown.
//! - [`ServerConfig`] / [`Transport`] — what the listener speaks and how
//!   connections are limited and timed out.
//! - `resolver` — turns a request (or configuration) into a [`Target`]:
//!   path mappings, the `{ws_path}/{host}/{port}` subpath form, the
//!   `target` query parameter, then the default target.
//! - [`ConnectionRegistry`] — capacity admission and live accounting;
//!   admission returns a [`RegistryGuard`] whose drop releases the slot
//!   exactly once.
//! - [`Bridge`] — the relay engine: bounded upstream dial, duplex relay
//!   with first-closer-wins termination, idle timeout, WebSocket
//!   heartbeat, byte accounting.
//! - [`ByteChannel`] — framing-agnostic client side; [`RawChannel`] for
//!   sockets, [`WsChannel`] for WebSocket messages, over a plain or
//!   TLS-terminated [`ClientStream`].
//! - [`MonitorSnapshot`] — JSON view of the registry served on the
//!   WebSocket listener's monitor path without consuming a slot.
//!
//! ## Usage Example
//!
//! ```no_run
//! use telbridge_service::{BridgeServer, ServerConfig, Target, Transport};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::new(Transport::WsTelnet)
//!     .with_bind("0.0.0.0", 8123)
//!     .with_default_target(Target::new("mud.example.com", 4000))
//!     .with_monitor("/monitor");
//! let server = BridgeServer::new(config).await?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

#![warn(
    clippy::cargo,
    missing_docs,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(clippy::module_name_repetitions)]

mod bridge;
mod config;
mod error;
mod listener;
mod monitor;
mod registry;
pub mod resolver;
mod server;
mod stream;
mod types;

pub use self::bridge::{Bridge, TerminationReason};
pub use self::config::{ServerConfig, Transport};
pub use self::error::{BridgeError, Result};
pub use self::monitor::{ConnectionReport, MonitorSnapshot, TargetReport};
pub use self::registry::{ConnectionRegistry, ConnectionStats, RegistryGuard};
pub use self::server::BridgeServer;
pub use self::stream::{ByteChannel, ClientStream, RawChannel, WsChannel};
pub use self::types::{ConnectionId, ConnectionInfo, ConnectionState, ServerSnapshot, Target};
