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

mod banner;
mod settings;

use crate::settings::Arguments;
use clap::Parser;
use telbridge_service::BridgeServer;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load arguments from the command line
    let arguments: Arguments = Parser::parse();

    // Initialize tracing/logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .with_ansi(true)
        .init();

    // Resolve the listener configurations from flags or the config file
    let configs = arguments
        .listener_configs()
        .inspect_err(|err| eprintln!("Configuration error: {err}"))
        .expect("Unable to load configuration");

    if let Some(ref target) = arguments.default_target {
        info!("Using default target: {target}");
    }

    banner::display();

    // Bind and start every listener before waiting for signals
    let mut servers = Vec::with_capacity(configs.len());
    for config in configs {
        debug!("Listener configuration: {:?}", config);
        let server = BridgeServer::new(config)
            .await
            .inspect_err(|err| eprintln!("Listener startup error: {err}"))
            .expect("Unable to bind listener");
        info!(
            "{} listener on {}",
            server.config().transport,
            server.bind_address()
        );
        server
            .start()
            .await
            .expect("Unable to start accept loop");
        servers.push(server);
    }

    wait_for_signal().await;
    info!("Telbridge is shutting down gracefully...");

    for server in &servers {
        if let Err(err) = server.shutdown().await {
            error!("Shutdown error on {}: {err}", server.bind_address());
        }
    }
}

/// Wait for SIGINT or SIGTERM
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
