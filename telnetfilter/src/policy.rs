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

//! Negotiation policy for the Telnet filter.

/// The set of Telnet option codes the filter accepts without refusing.
///
/// Negotiation triples naming an allowed option are consumed silently
/// (no response, never forwarded). Everything else is answered with the
/// matching refusal. The default policy allows nothing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FilterPolicy {
    allowed: [u64; 4],
}

impl FilterPolicy {
    /// Create a policy that refuses every option.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option code to the allowed set.
    #[must_use]
    pub fn allow(mut self, option: u8) -> Self {
        self.allowed[usize::from(option >> 6)] |= 1 << (option & 0x3F);
        self
    }

    /// Check whether an option code is in the allowed set.
    #[must_use]
    pub fn is_allowed(&self, option: u8) -> bool {
        self.allowed[usize::from(option >> 6)] & (1 << (option & 0x3F)) != 0
    }
}
