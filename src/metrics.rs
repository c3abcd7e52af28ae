// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use axum::{routing::get, Router};
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry, TextEncoder,
};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Clone, Debug)]
pub struct PongMetrics {
    pub(crate) pings_received: IntCounter,
    pub(crate) pings_deduplicated: IntCounter,
    pub(crate) pongs_confirmed: IntCounter,
    pub(crate) pong_failures: IntCounter,
    pub(crate) nonce_resets: IntCounter,
    pub(crate) reconciliation_passes: IntCounter,
    pub(crate) rpc_errors: IntCounterVec,
    pub(crate) last_processed_block: IntGauge,
    pub(crate) chain_head_block: IntGauge,
}

impl PongMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            pings_received: register_int_counter_with_registry!(
                "pong_bot_pings_received",
                "Total Ping events received from either ingestion path",
                registry,
            )
            .unwrap(),
            pings_deduplicated: register_int_counter_with_registry!(
                "pong_bot_pings_deduplicated",
                "Ping events skipped because they were already answered or in flight",
                registry,
            )
            .unwrap(),
            pongs_confirmed: register_int_counter_with_registry!(
                "pong_bot_pongs_confirmed",
                "Pong transactions confirmed on chain",
                registry,
            )
            .unwrap(),
            pong_failures: register_int_counter_with_registry!(
                "pong_bot_pong_failures",
                "Pong attempts that failed before confirmation",
                registry,
            )
            .unwrap(),
            nonce_resets: register_int_counter_with_registry!(
                "pong_bot_nonce_resets",
                "Times the nonce cursor was invalidated after a failed submission",
                registry,
            )
            .unwrap(),
            reconciliation_passes: register_int_counter_with_registry!(
                "pong_bot_reconciliation_passes",
                "Timer-driven reconciliation passes started",
                registry,
            )
            .unwrap(),
            rpc_errors: register_int_counter_vec_with_registry!(
                "pong_bot_rpc_errors",
                "Chain gateway call failures by method and error type",
                &["method", "error_type"],
                registry,
            )
            .unwrap(),
            last_processed_block: register_int_gauge_with_registry!(
                "pong_bot_last_processed_block",
                "Persisted checkpoint block height",
                registry,
            )
            .unwrap(),
            chain_head_block: register_int_gauge_with_registry!(
                "pong_bot_chain_head_block",
                "Chain head observed by the last reconciliation pass",
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Self {
        Self::new(&Registry::new())
    }
}

/// Serve the registry as prometheus text on `0.0.0.0:port/metrics`.
pub fn start_metrics_server(port: u16, registry: Registry) -> JoinHandle<()> {
    tokio::spawn(async move {
        let app = Router::new().route(
            "/metrics",
            get(move || {
                let registry = registry.clone();
                async move {
                    let mut buf = String::new();
                    let encoder = TextEncoder::new();
                    if let Err(err) = encoder.encode_utf8(&registry.gather(), &mut buf) {
                        error!(?err, "failed to encode metrics");
                    }
                    buf
                }
            }),
        );
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(err) => {
                error!(?err, %addr, "failed to bind metrics listener");
                return;
            }
        };
        info!(%addr, "metrics server listening");
        if let Err(err) = axum::serve(listener, app).await {
            error!(?err, "metrics server exited");
        }
    })
}
