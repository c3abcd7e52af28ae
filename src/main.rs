// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use clap::Parser;
use pong_bot::config::{generate_config_template_and_write_to_file, Config, PongBotConfig};
use pong_bot::metrics::{start_metrics_server, PongMetrics};
use pong_bot::node::run_pong_node;
use prometheus::Registry;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Delay before retrying the whole initialization sequence after a
/// startup failure
const BOOT_RETRY_DELAY: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[clap(rename_all = "kebab-case")]
#[clap(name = env!("CARGO_BIN_NAME"))]
#[clap(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[clap(long)]
    pub config_path: PathBuf,

    /// Write a config template to --config-path and exit
    #[clap(long)]
    pub generate_config_template: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Init logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if args.generate_config_template {
        generate_config_template_and_write_to_file(&args.config_path)?;
        info!("config template written to {:?}", args.config_path);
        return Ok(());
    }

    let config = PongBotConfig::load(&args.config_path)
        .map_err(|e| anyhow::anyhow!("failed to load config from {:?}: {e}", args.config_path))?;

    let registry = Registry::new();
    let metrics = Arc::new(PongMetrics::new(&registry));
    let _metrics_server = config.metrics_port.map(|port| {
        info!("Metrics server started at port {}", port);
        start_metrics_server(port, registry.clone())
    });

    info!("pong-bot v{} starting", env!("CARGO_PKG_VERSION"));

    // Startup failures (endpoint unreachable, seed query failed, ...) are
    // retried from scratch, including a fresh checkpoint reload.
    loop {
        match run_pong_node(config.clone(), metrics.clone()).await {
            Ok((handles, _cancel)) => {
                futures::future::join_all(handles).await;
                info!("all tasks finished, shutting down");
                return Ok(());
            }
            Err(err) => {
                error!(
                    error = ?err,
                    "startup failed, retrying in {}s",
                    BOOT_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(BOOT_RETRY_DELAY).await;
            }
        }
    }
}
