// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! A scriptable mock chain gateway used in test environments.

use crate::chain_client::{ChainClientInner, FeeEstimate, PingEvent, PING_CHANNEL_SIZE};
use crate::error::{PongError, PongResult};
use async_trait::async_trait;
use ethers::types::{TxHash, U256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One recorded pong submission
#[derive(Debug, Clone)]
pub struct SubmittedPong {
    pub ping_tx_hash: TxHash,
    pub ping_ordinal: (u64, u64),
    pub nonce: u64,
    pub fees: FeeEstimate,
    pub pong_tx_hash: TxHash,
}

/// Deterministic ping fixture, unique per (block, log index)
pub fn make_ping(block_number: u64, log_index: u64) -> PingEvent {
    PingEvent {
        tx_hash: TxHash::from_low_u64_be((block_number << 16) | log_index),
        block_number,
        log_index,
    }
}

// Mock client used in test environments.
#[derive(Clone)]
pub struct MockChainClient {
    latest_block: Arc<AtomicU64>,
    events: Arc<Mutex<Vec<PingEvent>>>,
    fee_estimate: Arc<Mutex<FeeEstimate>>,
    onchain_next_nonce: Arc<AtomicU64>,
    nonce_queries: Arc<AtomicU64>,
    // Scripted submission outcomes; an empty queue means success
    submit_responses: Arc<Mutex<VecDeque<PongResult<TxHash>>>>,
    submissions: Arc<Mutex<Vec<SubmittedPong>>>,
    confirmation_errors: Arc<Mutex<HashMap<TxHash, PongError>>>,
    fail_next_confirmation: Arc<Mutex<Option<PongError>>>,
    ping_tx: Arc<Mutex<Option<mpsc::Sender<PingEvent>>>>,
}

impl MockChainClient {
    pub fn new(latest_block: u64) -> Self {
        Self {
            latest_block: Arc::new(AtomicU64::new(latest_block)),
            events: Default::default(),
            fee_estimate: Arc::new(Mutex::new(FeeEstimate {
                max_fee_per_gas: U256::from(1_000_000_000u64),
                max_priority_fee_per_gas: U256::from(100_000_000u64),
            })),
            onchain_next_nonce: Arc::new(AtomicU64::new(0)),
            nonce_queries: Arc::new(AtomicU64::new(0)),
            submit_responses: Default::default(),
            submissions: Default::default(),
            confirmation_errors: Default::default(),
            fail_next_confirmation: Default::default(),
            ping_tx: Default::default(),
        }
    }

    pub fn set_latest_block(&self, block: u64) {
        self.latest_block.store(block, Ordering::SeqCst);
    }

    pub fn add_ping_event(&self, event: PingEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn set_fee_estimate(&self, estimate: FeeEstimate) {
        *self.fee_estimate.lock().unwrap() = estimate;
    }

    pub fn set_onchain_next_nonce(&self, nonce: u64) {
        self.onchain_next_nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn nonce_query_count(&self) -> u64 {
        self.nonce_queries.load(Ordering::SeqCst)
    }

    pub fn queue_submit_error(&self, error: PongError) {
        self.submit_responses.lock().unwrap().push_back(Err(error));
    }

    pub fn fail_confirmation_of_next_submission(&self, error: PongError) {
        *self.fail_next_confirmation.lock().unwrap() = Some(error);
    }

    pub fn submissions(&self) -> Vec<SubmittedPong> {
        self.submissions.lock().unwrap().clone()
    }

    /// Push an event through the live subscription. Panics if nothing has
    /// subscribed yet.
    pub async fn deliver_live(&self, event: PingEvent) {
        let sender = self
            .ping_tx
            .lock()
            .unwrap()
            .clone()
            .expect("deliver_live called before subscribe_pings");
        sender.send(event).await.expect("subscription receiver gone");
    }

    /// Drop the subscription sender, closing the receiver side
    pub fn close_subscription(&self) {
        self.ping_tx.lock().unwrap().take();
    }

    fn ordinal_of(&self, ping_tx_hash: TxHash) -> (u64, u64) {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.tx_hash == ping_tx_hash)
            .map(|e| e.ordinal())
            .unwrap_or((0, 0))
    }
}

#[async_trait]
impl ChainClientInner for MockChainClient {
    async fn get_latest_block_number(&self) -> PongResult<u64> {
        Ok(self.latest_block.load(Ordering::SeqCst))
    }

    async fn get_ping_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> PongResult<Vec<PingEvent>> {
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.block_number >= from_block && e.block_number <= to_block)
            .copied()
            .collect())
    }

    async fn subscribe_pings(&self) -> PongResult<mpsc::Receiver<PingEvent>> {
        let (tx, rx) = mpsc::channel(PING_CHANNEL_SIZE);
        *self.ping_tx.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn get_fee_estimate(&self) -> PongResult<FeeEstimate> {
        Ok(*self.fee_estimate.lock().unwrap())
    }

    async fn get_next_nonce(&self) -> PongResult<u64> {
        self.nonce_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.onchain_next_nonce.load(Ordering::SeqCst))
    }

    async fn submit_pong(
        &self,
        ping_tx_hash: TxHash,
        nonce: u64,
        fees: FeeEstimate,
    ) -> PongResult<TxHash> {
        if let Some(response) = self.submit_responses.lock().unwrap().pop_front() {
            // scripted outcome: a failed send does not reach the chain,
            // so the on-chain nonce is left untouched
            return response;
        }
        let pong_tx_hash = TxHash::from_low_u64_be(0xB0B0_0000 + nonce);
        self.submissions.lock().unwrap().push(SubmittedPong {
            ping_tx_hash,
            ping_ordinal: self.ordinal_of(ping_tx_hash),
            nonce,
            fees,
            pong_tx_hash,
        });
        self.onchain_next_nonce
            .fetch_max(nonce + 1, Ordering::SeqCst);
        if let Some(error) = self.fail_next_confirmation.lock().unwrap().take() {
            self.confirmation_errors
                .lock()
                .unwrap()
                .insert(pong_tx_hash, error);
        }
        Ok(pong_tx_hash)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> PongResult<u64> {
        if let Some(error) = self.confirmation_errors.lock().unwrap().remove(&tx_hash) {
            return Err(error);
        }
        Ok(self.latest_block.load(Ordering::SeqCst))
    }
}
