// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! The per-event response routine and the session state it runs against.
//!
//! Both ingestion paths (live listener and reconciliation) funnel into
//! [`BotSession::handle_ping`]. The dedup ledger's check-and-mark happens
//! under one synchronous lock acquisition, so an event observed by both
//! paths concurrently is answered exactly once.

use crate::chain_client::{ChainClientInner, PingEvent, PongChainClient};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::error::PongResult;
use crate::metrics::PongMetrics;
use ethers::types::TxHash;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Outcome of feeding one Ping through the response routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PongOutcome {
    /// A pong was submitted and confirmed on chain
    Answered {
        pong_tx_hash: TxHash,
        confirmed_block: u64,
    },
    /// The event was already answered or is in flight; nothing was sent
    AlreadyHandled,
}

/// Session context owning every piece of mutable responder state: the dedup
/// ledger, the nonce cursor, and the checkpoint cache plus its store.
pub struct BotSession<C> {
    client: Arc<PongChainClient<C>>,
    // Answered or in-flight event ids. Plain mutex: the check-and-mark step
    // must not yield between check and mark.
    ledger: Mutex<HashSet<TxHash>>,
    // Next nonce to assign, or None when the gateway must be re-queried.
    // Held across the query so concurrent first calls cannot both fetch.
    nonce_cursor: tokio::sync::Mutex<Option<u64>>,
    checkpoint: tokio::sync::Mutex<Checkpoint>,
    store: CheckpointStore,
    metrics: Arc<PongMetrics>,
}

impl<C: ChainClientInner> BotSession<C> {
    /// Build a session around a loaded (or freshly seeded) checkpoint. The
    /// ledger starts out containing every answered id the checkpoint
    /// recorded, so re-scans after a restart are absorbed silently.
    pub fn new(
        client: Arc<PongChainClient<C>>,
        store: CheckpointStore,
        checkpoint: Checkpoint,
        metrics: Arc<PongMetrics>,
    ) -> Self {
        let ledger = checkpoint.answered_ids();
        Self {
            client,
            ledger: Mutex::new(ledger),
            nonce_cursor: tokio::sync::Mutex::new(None),
            checkpoint: tokio::sync::Mutex::new(checkpoint),
            store,
            metrics,
        }
    }

    pub fn client(&self) -> &PongChainClient<C> {
        &self.client
    }

    pub fn metrics(&self) -> &PongMetrics {
        &self.metrics
    }

    pub async fn last_processed_block(&self) -> u64 {
        self.checkpoint.lock().await.last_processed_block
    }

    /// Process one Ping event: dedup, assign a nonce, bid fees, submit the
    /// pong, wait for inclusion, then durably record the answer.
    ///
    /// On any failure the event id is released back to the ledger and the
    /// nonce cursor is invalidated, so a later reconciliation pass retries
    /// with a fresh nonce.
    pub async fn handle_ping(&self, event: &PingEvent) -> PongResult<PongOutcome> {
        self.metrics.pings_received.inc();
        {
            let mut ledger = self.ledger.lock().expect("ledger mutex poisoned");
            if !ledger.insert(event.tx_hash) {
                self.metrics.pings_deduplicated.inc();
                debug!(
                    ping = ?event.tx_hash,
                    block = event.block_number,
                    "ping already answered or in flight, skipping"
                );
                return Ok(PongOutcome::AlreadyHandled);
            }
        }

        debug!(
            ping = ?event.tx_hash,
            block = event.block_number,
            log_index = event.log_index,
            "answering ping"
        );

        match self.submit_response(event).await {
            Ok((pong_tx_hash, confirmed_block)) => {
                {
                    let mut checkpoint = self.checkpoint.lock().await;
                    checkpoint.record_answer(event.tx_hash, event.block_number);
                    self.store.save(&checkpoint)?;
                    self.metrics
                        .last_processed_block
                        .set(checkpoint.last_processed_block as i64);
                }
                self.metrics.pongs_confirmed.inc();
                info!(
                    ping = ?event.tx_hash,
                    pong = ?pong_tx_hash,
                    confirmed_block,
                    "pong confirmed"
                );
                Ok(PongOutcome::Answered {
                    pong_tx_hash,
                    confirmed_block,
                })
            }
            Err(err) => {
                self.ledger
                    .lock()
                    .expect("ledger mutex poisoned")
                    .remove(&event.tx_hash);
                self.nonce_cursor.lock().await.take();
                self.metrics.nonce_resets.inc();
                self.metrics.pong_failures.inc();
                warn!(
                    ping = ?event.tx_hash,
                    block = event.block_number,
                    error = ?err,
                    "pong attempt failed, event released for retry"
                );
                Err(err)
            }
        }
    }

    async fn submit_response(&self, event: &PingEvent) -> PongResult<(TxHash, u64)> {
        let nonce = self.next_nonce().await?;
        let fees = self.client.get_fee_estimate().await?.with_markup();
        let pong_tx_hash = self.client.submit_pong(event.tx_hash, nonce, fees).await?;
        debug!(
            ping = ?event.tx_hash,
            pong = ?pong_tx_hash,
            nonce,
            "pong submitted, waiting for inclusion"
        );
        let confirmed_block = self.client.await_confirmation(pong_tx_hash).await?;
        Ok((pong_tx_hash, confirmed_block))
    }

    /// Hand out the next transaction ordinal. The first call after startup
    /// or after a reset queries the gateway; subsequent calls increment the
    /// local cursor without a round trip.
    async fn next_nonce(&self) -> PongResult<u64> {
        let mut cursor = self.nonce_cursor.lock().await;
        let next = match *cursor {
            Some(value) => value,
            None => {
                let fetched = self.client.get_next_nonce().await?;
                debug!(nonce = fetched, "nonce cursor refreshed from chain");
                fetched
            }
        };
        *cursor = Some(next + 1);
        Ok(next)
    }

    /// Persist a new watermark after a re-scan found nothing left to do
    /// past `new_mark`. No-op when the watermark would move backwards.
    pub async fn advance_watermark(&self, new_mark: u64) -> PongResult<bool> {
        let mut checkpoint = self.checkpoint.lock().await;
        if !checkpoint.advance_head(new_mark) {
            return Ok(false);
        }
        self.store.save(&checkpoint)?;
        self.metrics
            .last_processed_block
            .set(checkpoint.last_processed_block as i64);
        debug!(new_mark, "watermark advanced");
        Ok(true)
    }

    #[cfg(test)]
    pub fn ledger_contains(&self, tx_hash: &TxHash) -> bool {
        self.ledger
            .lock()
            .expect("ledger mutex poisoned")
            .contains(tx_hash)
    }
}
