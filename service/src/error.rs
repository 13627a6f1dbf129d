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

//! Error types for the bridge service

use thiserror::Error;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Bridge service error types
#[derive(Debug, Error)]
pub enum BridgeError {
    /// I/O error from an underlying TCP stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// No target could be resolved for the connection
    #[error("No target specified")]
    NoTargetSpecified,

    /// A resolved target candidate was syntactically invalid
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// Maximum number of concurrent connections reached
    #[error("Connection limit ({0}) reached")]
    LimitExceeded(usize),

    /// Upstream dial failed or timed out
    #[error("Upstream {target} unreachable: {reason}")]
    UpstreamUnreachable {
        /// The target that could not be reached
        target: String,
        /// Why the dial failed
        reason: String,
    },

    /// Connection exceeded the idle timeout
    #[error("Idle timeout")]
    IdleTimeout,

    /// WebSocket peer stopped answering pings
    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    /// TLS or WebSocket handshake failed
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Server is not running
    #[error("Server not running")]
    ServerNotRunning,

    /// Server is already running
    #[error("Server already running")]
    AlreadyRunning,

    /// Generic error with a message
    #[error("{0}")]
    Other(String),
}

impl BridgeError {
    /// Check if the error is a pre-bridge rejection
    ///
    /// Rejections occur before any upstream dial and are reported to the
    /// client rather than logged as failures.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            BridgeError::NoTargetSpecified
                | BridgeError::InvalidTarget(_)
                | BridgeError::LimitExceeded(_)
        )
    }

    /// Short human-readable text for close frames and error lines
    pub fn close_reason(&self) -> String {
        match self {
            BridgeError::NoTargetSpecified => "no target specified".to_string(),
            BridgeError::InvalidTarget(target) => format!("invalid target: {target}"),
            BridgeError::LimitExceeded(_) => "connection limit reached".to_string(),
            BridgeError::UpstreamUnreachable { target, .. } => {
                format!("upstream {target} unreachable")
            }
            BridgeError::IdleTimeout => "idle timeout".to_string(),
            BridgeError::HeartbeatTimeout => "heartbeat timeout".to_string(),
            other => other.to_string(),
        }
    }
}
