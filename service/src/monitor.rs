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

//! Monitoring snapshot rendered as JSON
//!
//! Served on the WebSocket listener's monitor path as a plain HTTP
//! response, before any upgrade occurs, so monitoring never consumes a
//! connection slot.

use crate::registry::ConnectionRegistry;
use crate::types::ConnectionInfo;
use serde::Serialize;

/// Point-in-time view of the registry
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    /// Active connections
    pub connections: Vec<ConnectionReport>,
    /// Per-target active counts
    pub targets: Vec<TargetReport>,
}

/// One active connection as reported by the monitor
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    /// Connection ID
    pub id: String,
    /// Listener transport
    pub transport: String,
    /// Client endpoint descriptor
    pub peer: String,
    /// Resolved upstream target
    pub target: String,
    /// Connection state
    pub state: String,
    /// Connection age in seconds
    pub duration_s: u64,
    /// Seconds since the last relayed byte
    pub idle_secs: u64,
    /// Payload bytes relayed client-to-upstream
    pub bytes_in: u64,
    /// Payload bytes relayed upstream-to-client
    pub bytes_out: u64,
}

impl From<ConnectionInfo> for ConnectionReport {
    fn from(info: ConnectionInfo) -> Self {
        Self {
            id: info.id.to_string(),
            transport: info.transport.to_string(),
            peer: info.peer,
            target: info.target.to_string(),
            state: info.state.to_string(),
            duration_s: info.duration.as_secs(),
            idle_secs: info.idle.as_secs(),
            bytes_in: info.bytes_to_upstream,
            bytes_out: info.bytes_to_client,
        }
    }
}

/// One target with active connections
#[derive(Debug, Clone, Serialize)]
pub struct TargetReport {
    /// Target hostname or IP
    pub host: String,
    /// Target TCP port
    pub port: u16,
    /// Active connections bridged to it
    pub active_count: usize,
}

impl MonitorSnapshot {
    /// Capture the current registry state
    pub fn capture(registry: &ConnectionRegistry) -> Self {
        let mut connections: Vec<ConnectionReport> = registry
            .connections()
            .into_iter()
            .map(ConnectionReport::from)
            .collect();
        connections.sort_by(|a, b| a.id.cmp(&b.id));
        let mut targets: Vec<TargetReport> = registry
            .targets()
            .into_iter()
            .map(|(target, active_count)| TargetReport {
                host: target.host,
                port: target.port,
                active_count,
            })
            .collect();
        targets.sort_by(|a, b| a.host.cmp(&b.host).then(a.port.cmp(&b.port)));
        Self {
            connections,
            targets,
        }
    }

    /// Render the snapshot as a JSON document
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}
