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

//! # Telbridge Telnet Negotiation Filter
//!
//! A stateful, byte-oriented scanner for the Telnet protocol (RFC 854) that
//! separates application payload from in-band protocol machinery. Unlike a
//! full codec it never surfaces negotiation to the caller: commands are
//! consumed, negotiation requests are answered with deterministic refusals,
//! and subnegotiation blocks are discarded.
//!
//! ## Core Components
//!
//! ### [`TelnetFilter`]
//!
//! The filter itself. Feed it raw bytes in arbitrary chunks; it returns a
//! [`FilterOutput`] holding the clean payload plus any refusal sequences
//! that must be written back to the peer the input came from. Parser state
//! survives across calls, so protocol sequences split over read boundaries
//! are handled correctly.
//!
//! ### [`FilterPolicy`]
//!
//! The set of options the filter tolerates without refusing. The default
//! policy is empty: every `WILL`/`DO`/`WONT`/`DONT` triple is answered with
//! the matching refusal.
//!
//! ## Usage Example
//!
//! ```rust
//! use telbridge_telnetfilter::TelnetFilter;
//!
//! let mut filter = TelnetFilter::new();
//! // "Hi" followed by IAC DO ECHO
//! let output = filter.feed(&[b'H', b'i', 0xFF, 0xFD, 0x01]);
//! assert_eq!(&output.payload[..], b"Hi");
//! assert_eq!(&output.responses[..], &[0xFF, 0xFC, 0x01]); // IAC WONT ECHO
//! ```
//!
//! ## IAC Escaping
//!
//! A literal 0xFF data byte arrives on the wire as `IAC IAC` and is
//! unescaped to a single byte in the payload. Use [`TelnetFilter::escape`]
//! for the outbound direction.

#![warn(
    clippy::cargo,
    missing_docs,
    clippy::pedantic,
    future_incompatible,
    rust_2018_idioms
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod consts;
mod filter;
mod policy;

pub use self::filter::{FilterOutput, TelnetFilter};
pub use self::policy::FilterPolicy;
