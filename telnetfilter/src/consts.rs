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

//! Telnet protocol byte values (RFC 854).

/// End of Record (used with the EOR option)
pub const EOR: u8 = 239;
/// End of subnegotiation parameters
pub const SE: u8 = 240;
/// No operation
pub const NOP: u8 = 241;
/// Data Mark (the data stream portion of a Synch)
pub const DM: u8 = 242;
/// Break
pub const BRK: u8 = 243;
/// Interrupt Process
pub const IP: u8 = 244;
/// Abort Output
pub const AO: u8 = 245;
/// Are You There
pub const AYT: u8 = 246;
/// Erase Character
pub const EC: u8 = 247;
/// Erase Line
pub const EL: u8 = 248;
/// Go Ahead
pub const GA: u8 = 249;
/// Begin subnegotiation of the indicated option
pub const SB: u8 = 250;
/// Sender wants to enable an option on its side
pub const WILL: u8 = 251;
/// Sender refuses (or disables) an option on its side
pub const WONT: u8 = 252;
/// Sender wants the receiver to enable an option
pub const DO: u8 = 253;
/// Sender wants the receiver to disable an option
pub const DONT: u8 = 254;
/// Interpret As Command
pub const IAC: u8 = 255;
