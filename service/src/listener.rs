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

//! Per-listener accept loop and connection intake
//!
//! Raw transports go straight to resolution and admission. WebSocket
//! transports first terminate TLS (when configured), answer monitor
//! requests as plain HTTP before any upgrade, then run the upgrade
//! handshake with a header callback that enforces the Origin policy.

use crate::bridge::Bridge;
use crate::config::{ServerConfig, Transport};
use crate::error::{BridgeError, Result};
use crate::monitor::MonitorSnapshot;
use crate::registry::ConnectionRegistry;
use crate::resolver;
use crate::stream::{ByteChannel, ClientStream, RawChannel, Rewind, WsChannel};
use bytes::Bytes;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::AbortHandle;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{StatusCode, header};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Connection intake for one configured listener
pub(crate) struct Listener {
    config: Arc<ServerConfig>,
    registry: Arc<ConnectionRegistry>,
    tls: Option<TlsAcceptor>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    handles: Mutex<Vec<AbortHandle>>,
}

impl Listener {
    /// Create the intake, loading TLS material when configured
    pub fn new(
        config: Arc<ServerConfig>,
        registry: Arc<ConnectionRegistry>,
        cancel: CancellationToken,
        tracker: TaskTracker,
    ) -> Result<Self> {
        let tls = match (config.use_tls, &config.tls_cert, &config.tls_key) {
            (true, Some(cert), Some(key)) => Some(build_tls_acceptor(cert, key)?),
            (true, _, _) => {
                return Err(BridgeError::InvalidConfig(
                    "use_tls set but certificate or key missing".to_string(),
                ));
            }
            (false, _, _) => None,
        };
        Ok(Self {
            config,
            registry,
            tls,
            cancel,
            tracker,
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Abort connection tasks still running after the drain timeout
    ///
    /// Aborting drops each bridge future, so the registry guards release
    /// their slots on the way out.
    pub fn abort_connections(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }
    }

    /// Accept connections until shutdown is requested
    pub async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        running: Arc<AtomicBool>,
        shutdown: Arc<Notify>,
    ) {
        loop {
            if !running.load(Ordering::SeqCst) {
                break;
            }

            let accepted = tokio::select! {
                result = listener.accept() => result,
                _ = shutdown.notified() => break,
            };

            match accepted {
                Ok((socket, peer_addr)) => {
                    tracing::debug!(%peer_addr, "accepted connection");
                    let intake = Arc::clone(&self);
                    let handle = self.tracker.spawn(async move {
                        intake.handle_connection(socket, peer_addr).await;
                    });
                    if let Ok(mut handles) = self.handles.lock() {
                        handles.retain(|handle| !handle.is_finished());
                        handles.push(handle.abort_handle());
                    }
                }
                Err(err) => {
                    tracing::error!("failed to accept connection: {err}");
                    // back off to avoid a tight loop on persistent errors
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }

        tracing::info!(transport = %self.config.transport, "accept loop terminated");
    }

    async fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        match self.config.transport {
            Transport::TelnetRaw | Transport::TcpRaw => self.handle_raw(socket, peer_addr).await,
            Transport::Websocket | Transport::WsTelnet => {
                self.handle_websocket(socket, peer_addr).await;
            }
        }
    }

    /// Intake for raw TCP transports; only the default target applies
    async fn handle_raw(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let mut channel = RawChannel::new(socket);

        let target = match resolver::resolve_default(&self.config) {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(%peer_addr, "connection rejected: {err}");
                let _ = channel.close(Some(&err.close_reason())).await;
                return;
            }
        };
        let guard = match self
            .registry
            .admit(self.config.transport, peer_addr.to_string(), target)
        {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(%peer_addr, "connection rejected: {err}");
                let _ = channel.close(Some(&err.close_reason())).await;
                return;
            }
        };

        Bridge::new(guard, &self.config, self.cancel.clone())
            .run(channel)
            .await;
    }

    /// Intake for WebSocket transports: TLS, monitor sniff, upgrade
    async fn handle_websocket(&self, socket: TcpStream, peer_addr: SocketAddr) {
        let mut stream = match &self.tls {
            Some(acceptor) => match acceptor.accept(socket).await {
                Ok(tls) => ClientStream::Tls(Box::new(tls)),
                Err(err) => {
                    tracing::warn!(%peer_addr, "TLS handshake failed: {err}");
                    return;
                }
            },
            None => ClientStream::Plain(socket),
        };

        // The monitor path is served as plain HTTP, before any upgrade,
        // so it never consumes a connection slot. The sniffed bytes are
        // replayed into the handshake for everything else.
        if self.config.enable_monitor {
            let mut head = [0u8; 2048];
            let count = match stream.read(&mut head).await {
                Ok(0) | Err(_) => return,
                Ok(count) => count,
            };
            let prefix = Bytes::copy_from_slice(&head[..count]);
            if is_monitor_request(&prefix, &self.config.monitor_path) {
                self.serve_monitor(stream).await;
                return;
            }
            self.upgrade_and_bridge(Rewind::new(prefix, stream), peer_addr)
                .await;
        } else {
            self.upgrade_and_bridge(stream, peer_addr).await;
        }
    }

    /// Answer a monitor request with the registry snapshot and close
    async fn serve_monitor(&self, mut stream: ClientStream) {
        let body = MonitorSnapshot::capture(&self.registry).to_json();
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    /// Run the upgrade handshake, then resolve, admit, and bridge
    async fn upgrade_and_bridge<S>(&self, stream: S, peer_addr: SocketAddr)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send,
    {
        let captured: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
        let callback = {
            let captured = Arc::clone(&captured);
            let config = Arc::clone(&self.config);
            move |request: &Request, response: Response| {
                handshake_callback(request, response, &config, &captured)
            }
        };

        let ws = match tokio_tungstenite::accept_hdr_async(stream, callback).await {
            Ok(ws) => ws,
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                // Origin rejections arrive here with the response already sent
                tracing::debug!(%peer_addr, status = %response.status(), "request answered without upgrade");
                return;
            }
            Err(err) => {
                tracing::warn!(%peer_addr, "WebSocket handshake failed: {err}");
                return;
            }
        };

        let request_path = captured
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .unwrap_or_else(|| "/".to_string());
        let mut channel = WsChannel::new(
            ws,
            self.config.max_message_size,
            self.config.ping_timeout,
        );

        let target = match resolver::resolve_request(&request_path, &self.config) {
            Ok(target) => target,
            Err(err) => {
                tracing::warn!(%peer_addr, path = %request_path, "connection rejected: {err}");
                let _ = channel.close(Some(&err.close_reason())).await;
                return;
            }
        };
        let guard = match self
            .registry
            .admit(self.config.transport, peer_addr.to_string(), target)
        {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(%peer_addr, "connection rejected: {err}");
                let _ = channel.close(Some(&err.close_reason())).await;
                return;
            }
        };

        Bridge::new(guard, &self.config, self.cancel.clone())
            .run(channel)
            .await;
    }
}

/// Header callback run during the WebSocket handshake
fn handshake_callback(
    request: &Request,
    response: Response,
    config: &ServerConfig,
    captured: &Mutex<Option<String>>,
) -> std::result::Result<Response, ErrorResponse> {
    if let Some(origin) = request
        .headers()
        .get(header::ORIGIN)
        .and_then(|value| value.to_str().ok())
    {
        if !origin_allowed(&config.allow_origins, origin) {
            tracing::warn!(origin, "origin rejected");
            return Err(plain_response(StatusCode::FORBIDDEN, "origin not allowed"));
        }
    }

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    if let Ok(mut slot) = captured.lock() {
        *slot = Some(path_and_query);
    }

    Ok(response)
}

/// Match an Origin header against the configured patterns
///
/// `*` permits everything; `*.suffix` matches any subdomain of `suffix`;
/// anything else must match exactly. Requests without an Origin header
/// (non-browser clients) are always permitted.
fn origin_allowed(patterns: &[String], origin: &str) -> bool {
    patterns.iter().any(|pattern| {
        if pattern == "*" {
            return true;
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            // "*.example.com" keeps the dot, anchoring the label boundary
            return origin.ends_with(suffix);
        }
        pattern == origin
    })
}

fn plain_response(status: StatusCode, message: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(message.to_string()));
    *response.status_mut() = status;
    response
}

/// Check whether a sniffed request head is a plain GET for the monitor path
fn is_monitor_request(head: &[u8], monitor_path: &str) -> bool {
    let Some(line_end) = head.windows(2).position(|window| window == b"\r\n") else {
        return false;
    };
    let Ok(request_line) = std::str::from_utf8(&head[..line_end]) else {
        return false;
    };
    let mut parts = request_line.split_ascii_whitespace();
    let (Some(method), Some(uri)) = (parts.next(), parts.next()) else {
        return false;
    };
    let path = uri.split('?').next().unwrap_or(uri);
    method == "GET" && path == monitor_path
}

/// Build a TLS acceptor from PEM certificate and key files
fn build_tls_acceptor(cert: &Path, key: &Path) -> Result<TlsAcceptor> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(File::open(cert)?))
        .collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(BridgeError::InvalidConfig(format!(
            "no certificates found in {}",
            cert.display()
        )));
    }
    let key = rustls_pemfile::private_key(&mut BufReader::new(File::open(key)?))?.ok_or_else(
        || BridgeError::InvalidConfig(format!("no private key found in {}", key.display())),
    )?;
    let tls_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|err| BridgeError::InvalidConfig(format!("invalid certificate: {err}")))?;
    Ok(TlsAcceptor::from(Arc::new(tls_config)))
}
