// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Event ingestion: the periodic reconciliation pass over historical
//! blocks and the live listener draining the gateway's subscription.
//! Both feed [`BotSession::handle_ping`]; duplicates between them are
//! absorbed by the session's dedup ledger.

use crate::chain_client::{ChainClientInner, PingEvent};
use crate::error::{PongError, PongResult};
use crate::responder::BotSession;
use crate::retry_with_max_elapsed_time;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How long a single head/log query is retried before the pass gives up
pub const MAX_RPC_RETRY_DURATION: Duration = Duration::from_secs(30);

/// One reconciliation pass: re-scan `[checkpoint, head]`, answer anything
/// unanswered in ascending (block, log index) order, then advance the
/// watermark. Returns the new watermark.
///
/// A per-event failure does not abort the rest of the batch, but it pins
/// the watermark just below the failed event's block so the next pass
/// re-scans it.
pub async fn run_reconciliation<C: ChainClientInner>(
    session: &BotSession<C>,
) -> PongResult<u64> {
    let from_block = session.last_processed_block().await;

    let head = match retry_with_max_elapsed_time!(
        session.client().get_latest_block_number(),
        MAX_RPC_RETRY_DURATION
    ) {
        Ok(Ok(head)) => head,
        _ => {
            return Err(PongError::Rpc(
                "failed to get chain head after retries".to_string(),
            ))
        }
    };
    session.metrics().chain_head_block.set(head as i64);

    if head < from_block {
        debug!(head, from_block, "chain head behind checkpoint, nothing to scan");
        return Ok(from_block);
    }

    let mut events = match retry_with_max_elapsed_time!(
        session.client().get_ping_events_in_range(from_block, head),
        MAX_RPC_RETRY_DURATION
    ) {
        Ok(Ok(events)) => events,
        _ => {
            return Err(PongError::Rpc(format!(
                "failed to fetch ping events in blocks {from_block}-{head} after retries"
            )))
        }
    };
    events.sort_unstable_by_key(|e| e.ordinal());

    let total = events.len();
    let mut lowest_failed_block: Option<u64> = None;
    for event in &events {
        if let Err(err) = session.handle_ping(event).await {
            warn!(
                ping = ?event.tx_hash,
                block = event.block_number,
                error = ?err,
                "failed to answer ping during reconciliation, will retry on a later pass"
            );
            lowest_failed_block = Some(
                lowest_failed_block.map_or(event.block_number, |b| b.min(event.block_number)),
            );
        }
    }

    // A failed event keeps the watermark just below its block so the next
    // pass picks it up again; a clean pass advances to the head.
    let new_mark = match lowest_failed_block {
        None => head,
        Some(block) => block.saturating_sub(1).max(from_block),
    };
    session.advance_watermark(new_mark).await?;

    if total == 0 {
        debug!(from_block, head, "reconciliation pass found no events");
    } else {
        info!(
            from_block,
            head,
            events = total,
            new_mark,
            "reconciliation pass complete"
        );
    }
    Ok(new_mark)
}

/// Re-run reconciliation on a fixed timer. Each pass is awaited to
/// completion before the next tick is waited out, so passes never overlap.
pub fn spawn_reconciliation_loop<C: ChainClientInner>(
    session: Arc<BotSession<C>>,
    poll_interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = poll_interval.as_millis() as u64, "starting reconciliation loop");
        let mut interval = time::interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately; the initial catch-up
        // already ran, so consume it before entering the loop
        interval.tick().await;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("reconciliation loop cancelled");
                    break;
                }
                _ = interval.tick() => {
                    session.metrics().reconciliation_passes.inc();
                    if let Err(err) = run_reconciliation(&session).await {
                        warn!(error = ?err, "reconciliation pass failed");
                    }
                }
            }
        }
    })
}

/// Drain live-delivered pings into the per-event routine. Failures are
/// logged and left to the next reconciliation pass; a closed subscription
/// ends the task and leaves coverage to reconciliation alone.
pub fn spawn_live_listener<C: ChainClientInner>(
    session: Arc<BotSession<C>>,
    mut pings: mpsc::Receiver<PingEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("live ping listener attached");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("live listener cancelled");
                    break;
                }
                maybe_event = pings.recv() => match maybe_event {
                    Some(event) => {
                        if let Err(err) = session.handle_ping(&event).await {
                            warn!(
                                ping = ?event.tx_hash,
                                block = event.block_number,
                                error = ?err,
                                "failed to answer live ping, reconciliation will retry"
                            );
                        }
                    }
                    None => {
                        warn!("ping subscription closed, relying on reconciliation until restart");
                        break;
                    }
                }
            }
        }
    })
}
