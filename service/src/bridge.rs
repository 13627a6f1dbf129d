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

//! The relay engine
//!
//! A [`Bridge`] owns one admitted connection end to end: it dials the
//! resolved upstream, then relays bytes in both directions until either
//! side closes, a timeout fires, or the server shuts down. Whichever
//! happens first wins; the other side is closed and the registry slot is
//! released by the guard when the bridge is dropped.

use crate::config::ServerConfig;
use crate::error::BridgeError;
use crate::registry::{ConnectionStats, RegistryGuard};
use crate::stream::ByteChannel;
use crate::types::ConnectionState;
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telbridge_telnetfilter::TelnetFilter;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

const UPSTREAM_READ_SIZE: usize = 8192;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Why a bridge terminated
#[derive(Debug)]
pub enum TerminationReason {
    /// Client closed its side first
    ClientClosed,
    /// Upstream closed its side first
    UpstreamClosed,
    /// No data relayed within the idle timeout
    IdleTimeout,
    /// WebSocket peer stopped answering pings
    HeartbeatTimeout,
    /// Server shutdown was requested
    Shutdown,
    /// The client side failed
    ClientError(BridgeError),
    /// The upstream side failed
    UpstreamError(BridgeError),
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientClosed => write!(f, "client closed"),
            Self::UpstreamClosed => write!(f, "upstream closed"),
            Self::IdleTimeout => write!(f, "idle timeout"),
            Self::HeartbeatTimeout => write!(f, "heartbeat timeout"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::ClientError(err) => write!(f, "client error: {err}"),
            Self::UpstreamError(err) => write!(f, "upstream error: {err}"),
        }
    }
}

impl TerminationReason {
    /// Short notice sent to the client when its side is still usable
    fn client_notice(&self) -> Option<&'static str> {
        match self {
            Self::UpstreamClosed => Some("upstream closed"),
            Self::IdleTimeout => Some("idle timeout"),
            Self::Shutdown => Some("server shutting down"),
            Self::UpstreamError(_) => Some("upstream error"),
            _ => None,
        }
    }
}

/// One admitted connection being relayed to its upstream
pub struct Bridge {
    guard: RegistryGuard,
    cancel: CancellationToken,
    dial_timeout: Duration,
    idle_timeout: Duration,
    ping_interval: Option<Duration>,
    client_filter: Option<TelnetFilter>,
    upstream_filter: Option<TelnetFilter>,
}

impl Bridge {
    /// Create a bridge for an admitted connection
    pub fn new(guard: RegistryGuard, config: &ServerConfig, cancel: CancellationToken) -> Self {
        let filtered = config.transport.filters_telnet();
        Self {
            guard,
            cancel,
            dial_timeout: config.dial_timeout,
            idle_timeout: config.idle_timeout,
            ping_interval: config
                .transport
                .is_websocket()
                .then_some(config.ping_interval),
            client_filter: filtered.then(TelnetFilter::new),
            upstream_filter: filtered.then(TelnetFilter::new),
        }
    }

    /// Dial the upstream and relay until termination
    ///
    /// Consumes the bridge; the registry slot is released when this
    /// returns, on every path.
    pub async fn run<C: ByteChannel>(mut self, mut client: C) -> TerminationReason {
        let stats = Arc::clone(self.guard.stats());
        let target = stats.target.clone();

        tracing::debug!(id = %stats.id, %target, "dialing upstream");
        let dial = TcpStream::connect((target.host.as_str(), target.port));
        let mut upstream = match tokio::time::timeout(self.dial_timeout, dial).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                return self
                    .reject_upstream(&mut client, &target, err.to_string())
                    .await;
            }
            Err(_) => {
                return self
                    .reject_upstream(&mut client, &target, "dial timed out".to_string())
                    .await;
            }
        };

        stats.set_state(ConnectionState::Bridging);
        stats.touch();
        tracing::info!(
            id = %stats.id,
            transport = %stats.transport,
            peer = %stats.peer,
            %target,
            "bridge established"
        );

        let reason = self.relay(&mut client, &mut upstream, &stats).await;

        stats.set_state(ConnectionState::Closing);
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, client.close(reason.client_notice())).await;
        let _ = upstream.shutdown().await;
        tracing::info!(
            id = %stats.id,
            %target,
            %reason,
            bytes_to_upstream = stats.bytes_to_upstream(),
            bytes_to_client = stats.bytes_to_client(),
            "bridge finished"
        );
        reason
    }

    async fn reject_upstream<C: ByteChannel>(
        &mut self,
        client: &mut C,
        target: &crate::types::Target,
        reason: String,
    ) -> TerminationReason {
        let err = BridgeError::UpstreamUnreachable {
            target: target.to_string(),
            reason,
        };
        tracing::warn!(id = %self.guard.id(), "{err}");
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, client.close(Some(&err.close_reason()))).await;
        TerminationReason::UpstreamError(err)
    }

    async fn relay<C: ByteChannel>(
        &mut self,
        client: &mut C,
        upstream: &mut TcpStream,
        stats: &Arc<ConnectionStats>,
    ) -> TerminationReason {
        let cancel = self.cancel.clone();
        let mut upstream_buffer = BytesMut::with_capacity(UPSTREAM_READ_SIZE);
        let mut ping = self.ping_interval.map(|interval| {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.reset_after(interval);
            ticker
        });
        let ping_enabled = ping.is_some();
        let mut last_activity = Instant::now();

        loop {
            let idle_deadline = last_activity + self.idle_timeout;
            tokio::select! {
                () = cancel.cancelled() => break TerminationReason::Shutdown,

                result = client.recv() => match result {
                    Ok(Some(data)) => {
                        last_activity = Instant::now();
                        stats.touch();
                        if let Err(reason) = self.client_to_upstream(data, client, upstream, stats).await {
                            break reason;
                        }
                    }
                    Ok(None) => break TerminationReason::ClientClosed,
                    Err(err) => break TerminationReason::ClientError(err),
                },

                result = read_upstream(upstream, &mut upstream_buffer) => match result {
                    Ok(Some(data)) => {
                        last_activity = Instant::now();
                        stats.touch();
                        if let Err(reason) = self.upstream_to_client(data, client, upstream, stats).await {
                            break reason;
                        }
                    }
                    Ok(None) => break TerminationReason::UpstreamClosed,
                    Err(err) => break TerminationReason::UpstreamError(err.into()),
                },

                () = tokio::time::sleep_until(idle_deadline.into()) => {
                    break TerminationReason::IdleTimeout;
                }

                () = maybe_tick(ping.as_mut()), if ping_enabled => {
                    match client.keepalive().await {
                        Ok(()) => {}
                        Err(BridgeError::HeartbeatTimeout) => break TerminationReason::HeartbeatTimeout,
                        Err(err) => break TerminationReason::ClientError(err),
                    }
                }
            }
        }
    }

    /// Relay one chunk from the client toward the upstream
    async fn client_to_upstream<C: ByteChannel>(
        &mut self,
        data: Bytes,
        client: &mut C,
        upstream: &mut TcpStream,
        stats: &Arc<ConnectionStats>,
    ) -> std::result::Result<(), TerminationReason> {
        let (payload, responses, filtered) = match self.client_filter.as_mut() {
            Some(filter) => {
                let output = filter.feed(&data);
                (output.payload, output.responses, true)
            }
            None => (data, Bytes::new(), false),
        };
        if !responses.is_empty() {
            self.send_client(client, responses).await?;
        }
        if !payload.is_empty() {
            stats.add_bytes_to_upstream(payload.len());
            let wire = if filtered {
                TelnetFilter::escape(&payload)
            } else {
                payload
            };
            self.write_upstream(upstream, &wire).await?;
        }
        Ok(())
    }

    /// Relay one chunk from the upstream toward the client
    async fn upstream_to_client<C: ByteChannel>(
        &mut self,
        data: Bytes,
        client: &mut C,
        upstream: &mut TcpStream,
        stats: &Arc<ConnectionStats>,
    ) -> std::result::Result<(), TerminationReason> {
        let (payload, responses, filtered) = match self.upstream_filter.as_mut() {
            Some(filter) => {
                let output = filter.feed(&data);
                (output.payload, output.responses, true)
            }
            None => (data, Bytes::new(), false),
        };
        if !responses.is_empty() {
            self.write_upstream(upstream, &responses).await?;
        }
        if !payload.is_empty() {
            stats.add_bytes_to_client(payload.len());
            let wire = if filtered {
                TelnetFilter::escape(&payload)
            } else {
                payload
            };
            self.send_client(client, wire).await?;
        }
        Ok(())
    }

    /// Write to the upstream, bounded by the idle timeout
    ///
    /// A peer that accepts no bytes for a full idle window counts as idle;
    /// the bridge is never parked on a write the select loop cannot observe.
    async fn write_upstream(
        &self,
        upstream: &mut TcpStream,
        data: &[u8],
    ) -> std::result::Result<(), TerminationReason> {
        match tokio::time::timeout(self.idle_timeout, upstream.write_all(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TerminationReason::UpstreamError(err.into())),
            Err(_) => Err(TerminationReason::IdleTimeout),
        }
    }

    /// Send to the client, bounded by the idle timeout
    async fn send_client<C: ByteChannel>(
        &self,
        client: &mut C,
        data: Bytes,
    ) -> std::result::Result<(), TerminationReason> {
        match tokio::time::timeout(self.idle_timeout, client.send(data)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(TerminationReason::ClientError(err)),
            Err(_) => Err(TerminationReason::IdleTimeout),
        }
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("id", &self.guard.id())
            .field("target", &self.guard.stats().target)
            .finish()
    }
}

/// Read the next chunk from the upstream socket, `None` on EOF
async fn read_upstream(
    upstream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> std::io::Result<Option<Bytes>> {
    buffer.reserve(UPSTREAM_READ_SIZE);
    let count = upstream.read_buf(buffer).await?;
    if count == 0 {
        return Ok(None);
    }
    Ok(Some(buffer.split().freeze()))
}

/// Await the next tick when a ticker is present; guarded by `if` in select
async fn maybe_tick(ticker: Option<&mut tokio::time::Interval>) {
    if let Some(ticker) = ticker {
        ticker.tick().await;
    }
}
