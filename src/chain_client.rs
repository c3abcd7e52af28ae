// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Chain gateway boundary: the narrow interface the responder pipeline
//! talks through, plus the metered wrapper shared by every call site.

use crate::error::PongResult;
use crate::metrics::PongMetrics;
use async_trait::async_trait;
use ethers::types::{TxHash, U256};
use std::sync::Arc;
use tap::TapFallible;
use tokio::sync::mpsc;

/// Buffer size of the live ping subscription channel
pub const PING_CHANNEL_SIZE: usize = 256;

/// Proportional markup applied to the gateway's fee suggestion (x1.2)
pub const FEE_MARKUP_NUMERATOR: u64 = 12;
pub const FEE_MARKUP_DENOMINATOR: u64 = 10;

/// A single observed Ping occurrence. The transaction hash is the event's
/// identity: unique per triggering transaction and stable across re-scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PingEvent {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub log_index: u64,
}

impl PingEvent {
    /// Processing order key: ascending block, ties broken by emission order
    pub fn ordinal(&self) -> (u64, u64) {
        (self.block_number, self.log_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeEstimate {
    pub max_fee_per_gas: U256,
    pub max_priority_fee_per_gas: U256,
}

impl FeeEstimate {
    /// Apply the fixed x1.2 markup to both fee components
    pub fn with_markup(&self) -> Self {
        Self {
            max_fee_per_gas: self.max_fee_per_gas * FEE_MARKUP_NUMERATOR / FEE_MARKUP_DENOMINATOR,
            max_priority_fee_per_gas: self.max_priority_fee_per_gas * FEE_MARKUP_NUMERATOR
                / FEE_MARKUP_DENOMINATOR,
        }
    }
}

/// The chain gateway. Implemented by the Ethereum client for production and
/// by a scriptable mock in tests.
#[async_trait]
pub trait ChainClientInner: Send + Sync + 'static {
    /// Current chain head block number
    async fn get_latest_block_number(&self) -> PongResult<u64>;

    /// All Ping events emitted by the watched contract in `[from_block, to_block]`
    /// inclusive. Order is not guaranteed; callers sort by (block, log index).
    async fn get_ping_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> PongResult<Vec<PingEvent>>;

    /// Install a live subscription for new Ping events. The receiver closes
    /// when the underlying watcher dies; reconciliation covers the gap.
    async fn subscribe_pings(&self) -> PongResult<mpsc::Receiver<PingEvent>>;

    /// Current base/priority fee suggestion, without markup
    async fn get_fee_estimate(&self) -> PongResult<FeeEstimate>;

    /// Authoritative next nonce for the signing identity
    async fn get_next_nonce(&self) -> PongResult<u64>;

    /// Sign and submit the pong transaction answering `ping_tx_hash`.
    /// Returns the submitted transaction's hash without waiting for inclusion.
    async fn submit_pong(
        &self,
        ping_tx_hash: TxHash,
        nonce: u64,
        fees: FeeEstimate,
    ) -> PongResult<TxHash>;

    /// Block until `tx_hash` is included, returning its block number.
    /// Errors if the transaction is dropped or reverts.
    async fn await_confirmation(&self, tx_hash: TxHash) -> PongResult<u64>;
}

/// Wrapper over a [`ChainClientInner`] that counts per-method RPC errors.
pub struct PongChainClient<C> {
    inner: C,
    metrics: Arc<PongMetrics>,
}

impl<C: ChainClientInner> PongChainClient<C> {
    pub fn new(inner: C, metrics: Arc<PongMetrics>) -> Self {
        Self { inner, metrics }
    }

    pub async fn get_latest_block_number(&self) -> PongResult<u64> {
        self.inner
            .get_latest_block_number()
            .await
            .tap_err(|e| self.record_rpc_error("get_latest_block_number", e))
    }

    pub async fn get_ping_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> PongResult<Vec<PingEvent>> {
        self.inner
            .get_ping_events_in_range(from_block, to_block)
            .await
            .tap_err(|e| self.record_rpc_error("get_ping_events_in_range", e))
    }

    pub async fn subscribe_pings(&self) -> PongResult<mpsc::Receiver<PingEvent>> {
        self.inner
            .subscribe_pings()
            .await
            .tap_err(|e| self.record_rpc_error("subscribe_pings", e))
    }

    pub async fn get_fee_estimate(&self) -> PongResult<FeeEstimate> {
        self.inner
            .get_fee_estimate()
            .await
            .tap_err(|e| self.record_rpc_error("get_fee_estimate", e))
    }

    pub async fn get_next_nonce(&self) -> PongResult<u64> {
        self.inner
            .get_next_nonce()
            .await
            .tap_err(|e| self.record_rpc_error("get_next_nonce", e))
    }

    pub async fn submit_pong(
        &self,
        ping_tx_hash: TxHash,
        nonce: u64,
        fees: FeeEstimate,
    ) -> PongResult<TxHash> {
        self.inner
            .submit_pong(ping_tx_hash, nonce, fees)
            .await
            .tap_err(|e| self.record_rpc_error("submit_pong", e))
    }

    pub async fn await_confirmation(&self, tx_hash: TxHash) -> PongResult<u64> {
        self.inner
            .await_confirmation(tx_hash)
            .await
            .tap_err(|e| self.record_rpc_error("await_confirmation", e))
    }

    fn record_rpc_error(&self, method: &str, err: &crate::error::PongError) {
        tracing::debug!(method, error = ?err, "chain gateway call failed");
        self.metrics
            .rpc_errors
            .with_label_values(&[method, err.error_type()])
            .inc();
    }
}
