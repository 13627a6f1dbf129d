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

//! Connection registry with capacity admission
//!
//! The registry is the single authority on how many connections exist and
//! where they are bridged to. Admission hands back a [`RegistryGuard`];
//! dropping the guard releases the slot, so a connection is released exactly
//! once on every termination path.

use crate::config::Transport;
use crate::error::{BridgeError, Result};
use crate::types::{ConnectionId, ConnectionInfo, ConnectionState, Target};
use dashmap::DashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

/// Live per-connection counters, shared between the bridge and the registry
#[derive(Debug)]
pub struct ConnectionStats {
    /// Connection ID
    pub id: ConnectionId,
    /// Listener transport the client arrived on
    pub transport: Transport,
    /// Client endpoint descriptor
    pub peer: String,
    /// Resolved upstream target
    pub target: Target,
    created_at: Instant,
    state: AtomicU8,
    last_activity_ms: AtomicU64,
    bytes_to_upstream: AtomicU64,
    bytes_to_client: AtomicU64,
}

impl ConnectionStats {
    fn new(id: ConnectionId, transport: Transport, peer: String, target: Target) -> Self {
        Self {
            id,
            transport,
            peer,
            target,
            created_at: Instant::now(),
            state: AtomicU8::new(ConnectionState::Connecting.as_u8()),
            last_activity_ms: AtomicU64::new(0),
            bytes_to_upstream: AtomicU64::new(0),
            bytes_to_client: AtomicU64::new(0),
        }
    }

    /// Get the current connection state
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Set the connection state
    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Record relay activity for idle accounting
    pub fn touch(&self) {
        let elapsed = u64::try_from(self.created_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_activity_ms.store(elapsed, Ordering::Relaxed);
    }

    /// Record payload bytes relayed toward the upstream
    pub fn add_bytes_to_upstream(&self, count: usize) {
        self.bytes_to_upstream
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record payload bytes relayed toward the client
    pub fn add_bytes_to_client(&self, count: usize) {
        self.bytes_to_client
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Total payload bytes relayed toward the upstream
    pub fn bytes_to_upstream(&self) -> u64 {
        self.bytes_to_upstream.load(Ordering::Relaxed)
    }

    /// Total payload bytes relayed toward the client
    pub fn bytes_to_client(&self) -> u64 {
        self.bytes_to_client.load(Ordering::Relaxed)
    }

    /// Take a point-in-time snapshot
    pub fn info(&self) -> ConnectionInfo {
        let duration = self.created_at.elapsed();
        let last_activity_ms = self.last_activity_ms.load(Ordering::Relaxed);
        let idle = duration.saturating_sub(std::time::Duration::from_millis(last_activity_ms));
        ConnectionInfo {
            id: self.id,
            transport: self.transport,
            peer: self.peer.clone(),
            target: self.target.clone(),
            state: self.state(),
            duration,
            idle,
            bytes_to_upstream: self.bytes_to_upstream(),
            bytes_to_client: self.bytes_to_client(),
        }
    }
}

/// Registry of active bridged connections
#[derive(Debug)]
pub struct ConnectionRegistry {
    max_connections: usize,
    active: AtomicUsize,
    total: AtomicU64,
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Arc<ConnectionStats>>,
    targets: DashMap<Target, usize>,
}

impl ConnectionRegistry {
    /// Create a registry with the given connection limit
    pub fn new(max_connections: usize) -> Self {
        Self {
            max_connections,
            active: AtomicUsize::new(0),
            total: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
            connections: DashMap::new(),
            targets: DashMap::new(),
        }
    }

    /// Admit a connection, reserving a slot
    ///
    /// Fails with [`BridgeError::LimitExceeded`] when `max_connections`
    /// connections are already active. On success the returned guard owns
    /// the slot until dropped.
    pub fn admit(
        self: &Arc<Self>,
        transport: Transport,
        peer: String,
        target: Target,
    ) -> Result<RegistryGuard> {
        self.active
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |active| {
                (active < self.max_connections).then_some(active + 1)
            })
            .map_err(|_| BridgeError::LimitExceeded(self.max_connections))?;

        self.total.fetch_add(1, Ordering::SeqCst);
        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let stats = Arc::new(ConnectionStats::new(id, transport, peer, target.clone()));
        self.connections.insert(id, Arc::clone(&stats));
        let attached = {
            let mut entry = self.targets.entry(target.clone()).or_insert(0);
            *entry += 1;
            *entry
        };
        tracing::info!(%id, target = %target, active = attached, "target attached");

        Ok(RegistryGuard {
            registry: Arc::clone(self),
            stats,
        })
    }

    fn release(&self, stats: &ConnectionStats) {
        stats.set_state(ConnectionState::Closed);
        self.connections.remove(&stats.id);
        let mut remaining = 0;
        if let Some(mut entry) = self.targets.get_mut(&stats.target) {
            *entry = entry.saturating_sub(1);
            remaining = *entry;
        }
        if remaining == 0 {
            self.targets.remove_if(&stats.target, |_, count| *count == 0);
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        tracing::info!(id = %stats.id, target = %stats.target, active = remaining, "target detached");
    }

    /// Get the number of active connections
    pub fn connection_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Get the total number of connections admitted since creation
    pub fn total_connections(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    /// Get the number of active connections bridged to a target
    pub fn target_count(&self, target: &Target) -> usize {
        self.targets.get(target).map(|entry| *entry).unwrap_or(0)
    }

    /// Snapshot all active connections
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.connections
            .iter()
            .map(|entry| entry.value().info())
            .collect()
    }

    /// Snapshot per-target active counts
    pub fn targets(&self) -> Vec<(Target, usize)> {
        self.targets
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }
}

/// RAII slot reservation returned by [`ConnectionRegistry::admit`]
///
/// Dropping the guard releases the slot and the per-target count.
#[derive(Debug)]
pub struct RegistryGuard {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ConnectionStats>,
}

impl RegistryGuard {
    /// Get the live stats for this connection
    pub fn stats(&self) -> &Arc<ConnectionStats> {
        &self.stats
    }

    /// Get the connection ID
    pub fn id(&self) -> ConnectionId {
        self.stats.id
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.registry.release(&self.stats);
    }
}
