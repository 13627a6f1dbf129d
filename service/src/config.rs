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

//! Server configuration types and builders
//!
//! A [`ServerConfig`] describes one listener: which transport it speaks,
//! where it binds, how targets are resolved, and the limits applied to the
//! connections it admits. A process may run any number of listeners, each
//! with its own configuration.
//!
//! # Example
//!
//! ```
//! use telbridge_service::{ServerConfig, Transport, Target};
//! use std::time::Duration;
//!
//! let config = ServerConfig::new(Transport::Websocket)
//!     .with_bind("0.0.0.0", 8123)
//!     .with_default_target(Target::new("mud.example.com", 4000))
//!     .with_max_connections(500)
//!     .with_idle_timeout(Duration::from_secs(600));
//! assert!(config.validate().is_ok());
//! ```

use crate::error::{BridgeError, Result};
use crate::types::Target;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Client-facing transport spoken by a listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    /// TCP carrying Telnet; negotiation is filtered out of the relay
    TelnetRaw,
    /// Opaque TCP byte stream, relayed untouched
    TcpRaw,
    /// WebSocket frames carrying opaque payload
    Websocket,
    /// WebSocket frames carrying Telnet; negotiation is filtered
    WsTelnet,
}

impl Transport {
    /// Check if this transport uses a WebSocket handshake
    pub fn is_websocket(self) -> bool {
        matches!(self, Self::Websocket | Self::WsTelnet)
    }

    /// Check if this transport carries Telnet semantics
    pub fn filters_telnet(self) -> bool {
        matches!(self, Self::TelnetRaw | Self::WsTelnet)
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TelnetRaw => write!(f, "telnet_raw"),
            Self::TcpRaw => write!(f, "tcp_raw"),
            Self::Websocket => write!(f, "websocket"),
            Self::WsTelnet => write!(f, "ws_telnet"),
        }
    }
}

/// Configuration for a single bridge listener
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Transport spoken to connecting clients
    pub transport: Transport,

    /// Bind host
    pub host: String,

    /// Bind port (0 picks an ephemeral port)
    pub port: u16,

    /// Base request path for WebSocket upgrades
    pub ws_path: String,

    /// Terminate TLS before the WebSocket handshake
    pub use_tls: bool,

    /// PEM certificate chain path (required when `use_tls`)
    pub tls_cert: Option<PathBuf>,

    /// PEM private key path (required when `use_tls`)
    pub tls_key: Option<PathBuf>,

    /// Origin patterns permitted to upgrade (`*` permits all)
    pub allow_origins: Vec<String>,

    /// Exact request-path to target mappings (highest resolution priority)
    pub path_mappings: BTreeMap<String, Target>,

    /// Fallback target when the request names none
    pub default_target: Option<Target>,

    /// Maximum concurrent connections admitted by this listener
    pub max_connections: usize,

    /// Close connections with no relayed data for this long
    pub idle_timeout: Duration,

    /// Upstream dial timeout
    pub dial_timeout: Duration,

    /// WebSocket ping cadence
    pub ping_interval: Duration,

    /// Close WebSocket connections with no pong for this long
    pub ping_timeout: Duration,

    /// Truncate client payloads larger than this (bytes)
    pub max_message_size: usize,

    /// Serve the JSON monitor snapshot on `monitor_path`
    pub enable_monitor: bool,

    /// Request path for the monitor snapshot
    pub monitor_path: String,

    /// How long to wait for connections to drain on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: Transport::Websocket,
            host: "0.0.0.0".to_string(),
            port: 8123,
            ws_path: "/ws".to_string(),
            use_tls: false,
            tls_cert: None,
            tls_key: None,
            allow_origins: vec!["*".to_string()],
            path_mappings: BTreeMap::new(),
            default_target: None,
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            dial_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(20),
            ping_timeout: Duration::from_secs(30),
            max_message_size: 4096,
            enable_monitor: false,
            monitor_path: "/monitor".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Create a configuration for the given transport with default settings
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    /// Set the bind host and port
    pub fn with_bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    /// Set the WebSocket upgrade path
    pub fn with_ws_path(mut self, path: impl Into<String>) -> Self {
        self.ws_path = path.into();
        self
    }

    /// Enable TLS with the given certificate and key files
    pub fn with_tls(mut self, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        self.use_tls = true;
        self.tls_cert = Some(cert.into());
        self.tls_key = Some(key.into());
        self
    }

    /// Set the permitted Origin patterns
    pub fn with_allow_origins(mut self, origins: Vec<String>) -> Self {
        self.allow_origins = origins;
        self
    }

    /// Add an exact path-to-target mapping
    pub fn with_path_mapping(mut self, path: impl Into<String>, target: Target) -> Self {
        self.path_mappings.insert(path.into(), target);
        self
    }

    /// Set the fallback target
    pub fn with_default_target(mut self, target: Target) -> Self {
        self.default_target = Some(target);
        self
    }

    /// Set the connection limit (0 admits nothing)
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the idle timeout
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the upstream dial timeout
    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Set the WebSocket heartbeat cadence and deadline
    pub fn with_heartbeat(mut self, interval: Duration, timeout: Duration) -> Self {
        self.ping_interval = interval;
        self.ping_timeout = timeout;
        self
    }

    /// Set the maximum client payload size
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Enable the monitor endpoint on the given path
    pub fn with_monitor(mut self, path: impl Into<String>) -> Self {
        self.enable_monitor = true;
        self.monitor_path = path.into();
        self
    }

    /// Set the shutdown drain timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Get the bind address as a `host:port` string
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(BridgeError::InvalidConfig("bind host is empty".to_string()));
        }
        if !self.ws_path.starts_with('/') {
            return Err(BridgeError::InvalidConfig(format!(
                "ws_path must start with '/': {}",
                self.ws_path
            )));
        }
        if !self.monitor_path.starts_with('/') {
            return Err(BridgeError::InvalidConfig(format!(
                "monitor_path must start with '/': {}",
                self.monitor_path
            )));
        }
        for path in self.path_mappings.keys() {
            if !path.starts_with('/') {
                return Err(BridgeError::InvalidConfig(format!(
                    "path mapping must start with '/': {path}"
                )));
            }
        }
        if self.use_tls {
            if self.tls_cert.is_none() {
                return Err(BridgeError::InvalidConfig(
                    "use_tls set but tls_cert missing".to_string(),
                ));
            }
            if self.tls_key.is_none() {
                return Err(BridgeError::InvalidConfig(
                    "use_tls set but tls_key missing".to_string(),
                ));
            }
        }
        if self.transport.is_websocket() {
            if self.ping_interval.is_zero() || self.ping_timeout.is_zero() {
                return Err(BridgeError::InvalidConfig(
                    "ping_interval and ping_timeout must be non-zero".to_string(),
                ));
            }
        } else if self.use_tls {
            return Err(BridgeError::InvalidConfig(
                "TLS is only supported on WebSocket transports".to_string(),
            ));
        }
        if self.idle_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "idle_timeout must be non-zero".to_string(),
            ));
        }
        if self.dial_timeout.is_zero() {
            return Err(BridgeError::InvalidConfig(
                "dial_timeout must be non-zero".to_string(),
            ));
        }
        if self.max_message_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "max_message_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder_chain() {
        let config = ServerConfig::new(Transport::TelnetRaw)
            .with_bind("127.0.0.1", 2323)
            .with_default_target(Target::new("localhost", 4000))
            .with_max_connections(10);
        assert_eq!(config.transport, Transport::TelnetRaw);
        assert_eq!(config.bind_address(), "127.0.0.1:2323");
        assert_eq!(config.max_connections, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        let config = ServerConfig::default().with_ws_path("ws");
        assert!(config.validate().is_err());

        let config = ServerConfig::default().with_path_mapping("game", Target::new("h", 1));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tls_without_files() {
        let mut config = ServerConfig::default();
        config.use_tls = true;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_tls_on_raw_transport() {
        let config =
            ServerConfig::new(Transport::TcpRaw).with_tls("cert.pem", "key.pem");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_permits_zero_max_connections() {
        let config = ServerConfig::default().with_max_connections(0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_transport_properties() {
        assert!(Transport::Websocket.is_websocket());
        assert!(Transport::WsTelnet.is_websocket());
        assert!(!Transport::TcpRaw.is_websocket());
        assert!(Transport::TelnetRaw.filters_telnet());
        assert!(Transport::WsTelnet.filters_telnet());
        assert!(!Transport::Websocket.filters_telnet());
        assert_eq!(Transport::WsTelnet.to_string(), "ws_telnet");
    }
}
