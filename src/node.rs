// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Startup orchestration: build the gateway, restore or seed the
//! checkpoint, catch up synchronously, then attach the live listener and
//! arm the reconciliation timer.

use crate::chain_client::{ChainClientInner, PongChainClient};
use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::config::PongBotConfig;
use crate::error::PongResult;
use crate::eth_client::EthPongClient;
use crate::metrics::PongMetrics;
use crate::responder::BotSession;
use crate::syncer::{run_reconciliation, spawn_live_listener, spawn_reconciliation_loop};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Restore the session from the checkpoint file, or seed a fresh one at
/// the current chain head when no usable checkpoint exists.
pub async fn bootstrap_session<C: ChainClientInner>(
    client: Arc<PongChainClient<C>>,
    store: CheckpointStore,
    metrics: Arc<PongMetrics>,
) -> PongResult<Arc<BotSession<C>>> {
    let checkpoint = match store.load() {
        Some(checkpoint) => {
            info!(
                last_processed_block = checkpoint.last_processed_block,
                answered = checkpoint.processed_tx_hashes.len(),
                "resuming from checkpoint"
            );
            checkpoint
        }
        None => {
            let head = client.get_latest_block_number().await?;
            info!(head, "no usable checkpoint, seeding from current chain head");
            let checkpoint = Checkpoint::seeded_at(head);
            store.save(&checkpoint)?;
            checkpoint
        }
    };
    metrics
        .last_processed_block
        .set(checkpoint.last_processed_block as i64);
    Ok(Arc::new(BotSession::new(client, store, checkpoint, metrics)))
}

/// Bring up the full pipeline. Any error here is a startup failure the
/// caller retries from scratch, checkpoint reload included.
pub async fn run_pong_node(
    config: PongBotConfig,
    metrics: Arc<PongMetrics>,
) -> anyhow::Result<(Vec<JoinHandle<()>>, CancellationToken)> {
    let eth_client = EthPongClient::from_config(&config).await?;
    let client = Arc::new(PongChainClient::new(eth_client, metrics.clone()));
    let store = CheckpointStore::new(&config.checkpoint_path);
    let session = bootstrap_session(client, store, metrics).await?;

    // one synchronous catch-up pass before going live
    let from = session.last_processed_block().await;
    let caught_up_to = run_reconciliation(&session)
        .await
        .map_err(|e| anyhow::anyhow!("initial catch-up failed: {e}"))?;
    info!(from, caught_up_to, "initial catch-up complete");

    let pings = session.client().subscribe_pings().await?;

    let cancel = CancellationToken::new();
    let handles = vec![
        spawn_live_listener(session.clone(), pings, cancel.clone()),
        spawn_reconciliation_loop(session, config.poll_interval(), cancel.clone()),
    ];
    Ok((handles, cancel))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock_chain_client::{make_ping, MockChainClient};

    async fn bootstrap_over(
        mock: MockChainClient,
        dir: &tempfile::TempDir,
    ) -> Arc<BotSession<MockChainClient>> {
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        let metrics = Arc::new(PongMetrics::new_for_testing());
        let client = Arc::new(PongChainClient::new(mock, metrics.clone()));
        bootstrap_session(client, store, metrics).await.unwrap()
    }

    #[tokio::test]
    async fn test_absent_checkpoint_seeds_from_head_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockChainClient::new(1000);
        let session = bootstrap_over(mock, &dir).await;
        assert_eq!(session.last_processed_block().await, 1000);

        let persisted = CheckpointStore::new(dir.path().join("checkpoint.json"))
            .load()
            .unwrap();
        assert_eq!(persisted, Checkpoint::seeded_at(1000));
    }

    #[tokio::test]
    async fn test_existing_checkpoint_wins_over_head() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("checkpoint.json"));
        store.save(&Checkpoint::seeded_at(500)).unwrap();

        let mock = MockChainClient::new(9000);
        let session = bootstrap_over(mock, &dir).await;
        assert_eq!(session.last_processed_block().await, 500);
    }

    /// End-to-end scenario: seed from head 1000, answer pings at blocks
    /// 1002 and 1003, and end up with both hashes durably recorded under
    /// watermark 1003.
    #[tokio::test]
    async fn test_seed_then_answer_two_pings() {
        let dir = tempfile::tempdir().unwrap();
        let mock = MockChainClient::new(1000);
        let session = bootstrap_over(mock.clone(), &dir).await;

        let ping_a = make_ping(1002, 0);
        let ping_b = make_ping(1003, 0);
        mock.add_ping_event(ping_a);
        mock.add_ping_event(ping_b);
        mock.set_latest_block(1003);

        let mark = run_reconciliation(&session).await.unwrap();
        assert_eq!(mark, 1003);

        let persisted = CheckpointStore::new(dir.path().join("checkpoint.json"))
            .load()
            .unwrap();
        assert_eq!(persisted.last_processed_block, 1003);
        assert_eq!(persisted.processed_tx_hashes.len(), 2);
        assert!(persisted
            .processed_tx_hashes
            .contains(&format!("{:?}", ping_a.tx_hash)));
        assert!(persisted
            .processed_tx_hashes
            .contains(&format!("{:?}", ping_b.tx_hash)));
    }
}
