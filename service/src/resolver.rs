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

//! Upstream target resolution
//!
//! For WebSocket requests a target is resolved in priority order:
//!
//! 1. exact `path_mappings` match on the request path,
//! 2. subpath form `{ws_path}/{host}/{port}`,
//! 3. `target=host:port` query parameter,
//! 4. the configured default target.
//!
//! Raw TCP listeners carry no request, so only the default target applies.
//! Validation is syntactic only; hostnames are not resolved here.

use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};
use crate::types::Target;

/// Resolve a target for a WebSocket request path (with optional query string)
pub fn resolve_request(path_and_query: &str, config: &ServerConfig) -> Result<Target> {
    let (path, query) = match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    };

    if let Some(target) = config.path_mappings.get(path) {
        return Ok(target.clone());
    }

    if let Some(target) = resolve_subpath(path, &config.ws_path) {
        return Ok(target);
    }

    if let Some(query) = query {
        if let Some(value) = query_param(query, "target") {
            // Explicitly named targets fail hard when malformed
            return value.parse();
        }
    }

    resolve_default(config)
}

/// Resolve the target for a raw listener (default target only)
pub fn resolve_default(config: &ServerConfig) -> Result<Target> {
    config
        .default_target
        .clone()
        .ok_or(BridgeError::NoTargetSpecified)
}

/// Parse the `{ws_path}/{host}/{port}` subpath form; best effort only
fn resolve_subpath(path: &str, ws_path: &str) -> Option<Target> {
    let rest = path.strip_prefix(ws_path)?.strip_prefix('/')?;
    let (host, port) = rest.split_once('/')?;
    if host.is_empty() || port.contains('/') {
        return None;
    }
    let port: u16 = port.parse().ok().filter(|&p| p != 0)?;
    Some(Target::new(percent_decode(host), port))
}

/// Find a query parameter value, percent-decoded
fn query_param(query: &str, name: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| percent_decode(value))
    })
}

/// Minimal percent-decoding; invalid escapes pass through untouched
fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
