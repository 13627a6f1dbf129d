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

//! Stateful Telnet scanner separating payload from protocol machinery.

use crate::consts;
use crate::policy::FilterPolicy;
use bytes::{BufMut, Bytes, BytesMut};

/// Parser state, advanced one byte at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FilterState {
    /// Normal data flow.
    Data,
    /// IAC seen, awaiting the command byte.
    Command,
    /// IAC + negotiation verb seen, awaiting the option byte.
    Negotiate(u8),
    /// Inside an `IAC SB ... IAC SE` block, discarding bytes.
    Subnegotiate,
    /// IAC seen inside a subnegotiation block.
    SubnegotiateCommand,
}

/// Result of feeding bytes through a [`TelnetFilter`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterOutput {
    /// Clean application payload with `IAC IAC` unescaped.
    pub payload: Bytes,
    /// Refusal sequences to write back to the peer the input came from.
    pub responses: Bytes,
}

impl FilterOutput {
    /// True when the input produced neither payload nor responses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty() && self.responses.is_empty()
    }
}

/// Stateful Telnet negotiation filter.
///
/// Input may be split at arbitrary byte boundaries; a trailing partial
/// sequence is held until the next [`feed`](Self::feed) call. The output
/// for a given byte stream is identical regardless of how it was chunked.
#[derive(Clone, Debug)]
pub struct TelnetFilter {
    state: FilterState,
    policy: FilterPolicy,
    protocol_errors: u64,
}

impl TelnetFilter {
    /// Create a filter with the default (refuse-everything) policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(FilterPolicy::default())
    }

    /// Create a filter with an explicit negotiation policy.
    #[must_use]
    pub fn with_policy(policy: FilterPolicy) -> Self {
        Self {
            state: FilterState::Data,
            policy,
            protocol_errors: 0,
        }
    }

    /// Scan a chunk of inbound bytes.
    ///
    /// Returns the application payload contained in the chunk and any
    /// negotiation refusals owed to the sender. Either part may be empty.
    pub fn feed(&mut self, input: &[u8]) -> FilterOutput {
        let mut payload = BytesMut::with_capacity(input.len());
        let mut responses = BytesMut::new();
        for &byte in input {
            self.state = match self.state {
                FilterState::Data => match byte {
                    consts::IAC => FilterState::Command,
                    _ => {
                        payload.put_u8(byte);
                        FilterState::Data
                    }
                },
                FilterState::Command => match byte {
                    // IAC IAC is an escaped literal 0xFF data byte
                    consts::IAC => {
                        payload.put_u8(consts::IAC);
                        FilterState::Data
                    }
                    consts::WILL | consts::WONT | consts::DO | consts::DONT => {
                        FilterState::Negotiate(byte)
                    }
                    consts::SB => FilterState::Subnegotiate,
                    consts::SE => {
                        self.protocol_errors += 1;
                        tracing::warn!("subnegotiation end without matching start");
                        FilterState::Data
                    }
                    consts::EOR | consts::NOP..=consts::GA => FilterState::Data,
                    command => {
                        self.protocol_errors += 1;
                        tracing::warn!(command, "unknown telnet command, dropped");
                        FilterState::Data
                    }
                },
                FilterState::Negotiate(verb) => {
                    if !self.policy.is_allowed(byte) {
                        let refusal = match verb {
                            consts::WILL | consts::WONT => consts::DONT,
                            _ => consts::WONT,
                        };
                        responses.put_u8(consts::IAC);
                        responses.put_u8(refusal);
                        responses.put_u8(byte);
                    }
                    FilterState::Data
                }
                FilterState::Subnegotiate => match byte {
                    consts::IAC => FilterState::SubnegotiateCommand,
                    _ => FilterState::Subnegotiate,
                },
                FilterState::SubnegotiateCommand => match byte {
                    consts::SE => FilterState::Data,
                    // IAC IAC escapes a data byte inside the block
                    consts::IAC => FilterState::Subnegotiate,
                    command => {
                        self.protocol_errors += 1;
                        tracing::warn!(command, "malformed subnegotiation, fragment dropped");
                        FilterState::Data
                    }
                },
            };
        }
        FilterOutput {
            payload: payload.freeze(),
            responses: responses.freeze(),
        }
    }

    /// True when no partial protocol sequence is pending.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == FilterState::Data
    }

    /// Number of malformed sequences seen and dropped so far.
    #[must_use]
    pub fn protocol_errors(&self) -> u64 {
        self.protocol_errors
    }

    /// Escape payload for transmission to a Telnet peer by doubling IAC.
    #[must_use]
    pub fn escape(data: &[u8]) -> Bytes {
        let iac_count = data.iter().filter(|&&b| b == consts::IAC).count();
        if iac_count == 0 {
            return Bytes::copy_from_slice(data);
        }
        let mut escaped = BytesMut::with_capacity(data.len() + iac_count);
        for &byte in data {
            if byte == consts::IAC {
                escaped.put_u8(consts::IAC);
            }
            escaped.put_u8(byte);
        }
        escaped.freeze()
    }
}

impl Default for TelnetFilter {
    fn default() -> Self {
        Self::new()
    }
}
