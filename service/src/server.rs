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

//! Bridge server implementation
//!
//! The BridgeServer is the main entry point. It owns the TCP listener for
//! one configured transport, the connection registry, and the shutdown
//! machinery shared by all connections it admits.

use crate::error::{BridgeError, Result};
use crate::listener::Listener;
use crate::registry::ConnectionRegistry;
use crate::types::ServerSnapshot;
use crate::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// A bridge server for one configured listener
///
/// # Example
///
/// ```no_run
/// use telbridge_service::{BridgeServer, ServerConfig, Target, Transport};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = ServerConfig::new(Transport::Websocket)
///         .with_bind("0.0.0.0", 8123)
///         .with_default_target(Target::new("mud.example.com", 4000));
///     let server = BridgeServer::new(config).await?;
///
///     server.start().await?;
///
///     // Server is now running, wait for a shutdown signal
///     // tokio::signal::ctrl_c().await?;
///     server.shutdown().await?;
///
///     Ok(())
/// }
/// ```
pub struct BridgeServer {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Connection registry shared with the intake and monitor
    registry: Arc<ConnectionRegistry>,
    /// Connection intake (accept loop body)
    intake: Arc<Listener>,
    /// Bound TCP listener, taken by `start`
    listener: Arc<tokio::sync::Mutex<Option<TcpListener>>>,
    /// Actual bind address
    bind_address: SocketAddr,
    /// Server start time
    started_at: Instant,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Shutdown notification for the accept loop
    shutdown_notify: Arc<Notify>,
    /// Cancellation observed by every bridge
    cancel: CancellationToken,
    /// Tracker for spawned connection tasks
    tracker: TaskTracker,
    /// Accept loop task handle
    accept_handle: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl BridgeServer {
    /// Create a new server with the given configuration
    ///
    /// This validates the configuration, loads TLS material when configured,
    /// and binds the listening socket, but does not start accepting.
    pub async fn new(config: ServerConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let listener = TcpListener::bind(config.bind_address()).await?;
        let bind_address = listener.local_addr()?;

        let registry = Arc::new(ConnectionRegistry::new(config.max_connections));
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let intake = Arc::new(Listener::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            cancel.clone(),
            tracker.clone(),
        )?);

        tracing::info!(
            transport = %config.transport,
            %bind_address,
            "bridge server bound"
        );

        Ok(Self {
            config,
            registry,
            intake,
            listener: Arc::new(tokio::sync::Mutex::new(Some(listener))),
            bind_address,
            started_at: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_notify: Arc::new(Notify::new()),
            cancel,
            tracker,
            accept_handle: Arc::new(tokio::sync::Mutex::new(None)),
        })
    }

    /// Start accepting connections
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(BridgeError::AlreadyRunning);
        }

        let listener = self.listener.lock().await.take().ok_or_else(|| {
            self.running.store(false, Ordering::SeqCst);
            BridgeError::Other("server cannot be restarted".to_string())
        })?;

        tracing::info!(
            transport = %self.config.transport,
            bind_address = %self.bind_address,
            "starting bridge server"
        );

        let intake = Arc::clone(&self.intake);
        let running = Arc::clone(&self.running);
        let shutdown_notify = Arc::clone(&self.shutdown_notify);
        let handle =
            tokio::spawn(async move { intake.accept_loop(listener, running, shutdown_notify).await });
        *self.accept_handle.lock().await = Some(handle);

        Ok(())
    }

    /// Shutdown the server gracefully
    ///
    /// Stops accepting, cancels every bridge, then waits up to the
    /// configured shutdown timeout for connections to drain. Stragglers
    /// still running when the timeout elapses are aborted.
    pub async fn shutdown(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::ServerNotRunning);
        }

        tracing::info!(bind_address = %self.bind_address, "shutting down bridge server");

        // Stop accepting
        self.shutdown_notify.notify_waiters();
        if let Some(handle) = self.accept_handle.lock().await.take() {
            let _ = tokio::time::timeout(std::time::Duration::from_secs(5), handle).await;
        }

        // Cancel every in-flight bridge and wait for the drain
        self.cancel.cancel();
        self.tracker.close();
        if tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                remaining = self.registry.connection_count(),
                "shutdown timeout reached, aborting remaining connections"
            );
            self.intake.abort_connections();
            self.tracker.wait().await;
        }

        tracing::info!("bridge server shutdown complete");

        Ok(())
    }

    /// Check if the server is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the server's bind address
    pub fn bind_address(&self) -> SocketAddr {
        self.bind_address
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    /// Get the connection registry
    pub fn registry(&self) -> Arc<ConnectionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Get the server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get a snapshot of the server state
    pub fn snapshot(&self) -> ServerSnapshot {
        ServerSnapshot {
            active_connections: self.registry.connection_count(),
            total_connections: self.registry.total_connections(),
            bind_address: self.bind_address,
            uptime: self.started_at.elapsed(),
            started_at: self.started_at,
        }
    }
}

impl std::fmt::Debug for BridgeServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeServer")
            .field("transport", &self.config.transport)
            .field("bind_address", &self.bind_address)
            .field("running", &self.is_running())
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

// Implement Drop to ensure cleanup
impl Drop for BridgeServer {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            tracing::warn!("BridgeServer dropped while still running");
            self.running.store(false, Ordering::SeqCst);
            self.shutdown_notify.notify_waiters();
            self.cancel.cancel();
        }
    }
}
