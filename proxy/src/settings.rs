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

//! Command line arguments and YAML configuration
//!
//! Without a configuration file the daemon runs a single WebSocket
//! listener described by the `--ws-host`, `--ws-port` and
//! `--default-target` flags. A configuration file may declare any number
//! of listeners, one per transport and port.

use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use telbridge_service::{BridgeError, Result, ServerConfig, Target, Transport};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Arguments {
    #[arg(short = 'c', long = "config", help = "Path to YAML configuration file")]
    pub config_file: Option<String>,

    #[arg(
        long = "ws-host",
        help = "WebSocket server host",
        default_value = "0.0.0.0"
    )]
    pub ws_host: String,

    #[arg(long = "ws-port", help = "WebSocket server port", default_value_t = 8123)]
    pub ws_port: u16,

    #[arg(
        long = "default-target",
        help = "Default target in the format host:port"
    )]
    pub default_target: Option<Target>,
}

impl Arguments {
    /// Resolve the listener configurations these arguments describe
    pub fn listener_configs(&self) -> Result<Vec<ServerConfig>> {
        if let Some(ref path) = self.config_file {
            let configuration = Configuration::load(path)?;
            if configuration.servers.is_empty() {
                return Err(BridgeError::InvalidConfig(format!(
                    "{path} declares no servers"
                )));
            }
            return Ok(configuration
                .servers
                .into_iter()
                .map(ListenerSettings::into_config)
                .collect());
        }

        let mut config =
            ServerConfig::new(Transport::Websocket).with_bind(self.ws_host.clone(), self.ws_port);
        if let Some(ref target) = self.default_target {
            config = config.with_default_target(target.clone());
        }
        Ok(vec![config])
    }
}

/// Root of the YAML configuration file
#[derive(Debug, Deserialize)]
pub struct Configuration {
    /// Listeners to run, one per entry
    #[serde(default)]
    pub servers: Vec<ListenerSettings>,
}

impl Configuration {
    /// Load a configuration file
    pub fn load(path: &str) -> Result<Self> {
        tracing::debug!("loading configuration from {path}");
        let file = std::fs::File::open(path)
            .map_err(|err| BridgeError::InvalidConfig(format!("failed to open {path}: {err}")))?;
        serde_yaml::from_reader(file)
            .map_err(|err| BridgeError::InvalidConfig(format!("failed to parse {path}: {err}")))
    }
}

/// One listener as declared in the configuration file
#[derive(Debug, Deserialize)]
pub struct ListenerSettings {
    pub transport: Transport,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    #[serde(default)]
    pub tls: Option<TlsSettings>,
    #[serde(default = "default_origins")]
    pub allow_origins: Vec<String>,
    #[serde(default)]
    pub path_mappings: BTreeMap<String, Target>,
    #[serde(default)]
    pub default_target: Option<Target>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout_secs: u64,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub monitor_path: Option<String>,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// TLS certificate and key paths
#[derive(Debug, Deserialize)]
pub struct TlsSettings {
    pub cert: PathBuf,
    pub key: PathBuf,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_origins() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_max_connections() -> usize {
    1000
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_dial_timeout() -> u64 {
    10
}

fn default_ping_interval() -> u64 {
    20
}

fn default_ping_timeout() -> u64 {
    30
}

fn default_max_message_size() -> usize {
    4096
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl ListenerSettings {
    /// Convert to a listener configuration
    pub fn into_config(self) -> ServerConfig {
        let mut config = ServerConfig::new(self.transport)
            .with_bind(self.host, self.port)
            .with_ws_path(self.ws_path)
            .with_allow_origins(self.allow_origins)
            .with_max_connections(self.max_connections)
            .with_idle_timeout(Duration::from_secs(self.idle_timeout_secs))
            .with_dial_timeout(Duration::from_secs(self.dial_timeout_secs))
            .with_heartbeat(
                Duration::from_secs(self.ping_interval_secs),
                Duration::from_secs(self.ping_timeout_secs),
            )
            .with_max_message_size(self.max_message_size)
            .with_shutdown_timeout(Duration::from_secs(self.shutdown_timeout_secs));
        if let Some(tls) = self.tls {
            config = config.with_tls(tls.cert, tls.key);
        }
        for (path, target) in self.path_mappings {
            config = config.with_path_mapping(path, target);
        }
        if let Some(target) = self.default_target {
            config = config.with_default_target(target);
        }
        if let Some(path) = self.monitor_path {
            config = config.with_monitor(path);
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_arguments_without_config_file() {
        let arguments = Arguments::try_parse_from([
            "telbridge",
            "--ws-host",
            "127.0.0.1",
            "--ws-port",
            "9000",
            "--default-target",
            "mud.example.com:4000",
        ])
        .unwrap();
        let configs = arguments.listener_configs().unwrap();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].transport, Transport::Websocket);
        assert_eq!(configs[0].bind_address(), "127.0.0.1:9000");
        assert_eq!(
            configs[0].default_target,
            Some(Target::new("mud.example.com", 4000))
        );
    }

    #[test]
    fn test_arguments_reject_malformed_target() {
        let result =
            Arguments::try_parse_from(["telbridge", "--default-target", "no-port-here"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_configuration_from_file() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            r#"
servers:
  - transport: ws_telnet
    host: 127.0.0.1
    port: 8123
    default_target: "mud.example.com:4000"
    path_mappings:
      /legacy: "legacy.example.com:2323"
    monitor_path: /monitor
    idle_timeout_secs: 600
  - transport: telnet_raw
    port: 2323
    default_target: "mud.example.com:4000"
"#
        )
        .unwrap();

        let configuration = Configuration::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(configuration.servers.len(), 2);

        let first = configuration.servers.into_iter().next().unwrap().into_config();
        assert_eq!(first.transport, Transport::WsTelnet);
        assert_eq!(first.bind_address(), "127.0.0.1:8123");
        assert_eq!(
            first.path_mappings.get("/legacy"),
            Some(&Target::new("legacy.example.com", 2323))
        );
        assert!(first.enable_monitor);
        assert_eq!(first.idle_timeout, Duration::from_secs(600));
        assert!(first.validate().is_ok());
    }

    #[test]
    fn test_configuration_defaults_fill_in() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(
            file,
            r#"
servers:
  - transport: websocket
"#
        )
        .unwrap();

        let configuration = Configuration::load(file.path().to_str().unwrap()).unwrap();
        let config = configuration.servers.into_iter().next().unwrap().into_config();
        assert_eq!(config.bind_address(), "0.0.0.0:8123");
        assert_eq!(config.ws_path, "/ws");
        assert_eq!(config.max_connections, 1000);
        assert!(!config.enable_monitor);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_server_list_rejected() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        writeln!(file, "servers: []").unwrap();

        let arguments = Arguments::try_parse_from([
            "telbridge",
            "--config",
            file.path().to_str().unwrap(),
        ])
        .unwrap();
        assert!(arguments.listener_configs().is_err());
    }
}
