// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Durable progress tracking. The checkpoint records the last fully
//! processed block and every answered ping's transaction hash; it is
//! rewritten wholesale on every mutation so a crash leaves either the old
//! or the new state on disk, never a torn one.

use crate::error::{PongError, PongResult};
use ethers::types::TxHash;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_processed_block: u64,
    #[serde(default)]
    pub processed_tx_hashes: Vec<String>,
}

impl Checkpoint {
    /// Fresh checkpoint at `block` with no answered events, used when no
    /// usable checkpoint exists on disk.
    pub fn seeded_at(block: u64) -> Self {
        Self {
            last_processed_block: block,
            processed_tx_hashes: Vec::new(),
        }
    }

    /// Parse the persisted answered-event ids. Malformed entries are logged
    /// and skipped rather than poisoning the whole checkpoint.
    pub fn answered_ids(&self) -> HashSet<TxHash> {
        self.processed_tx_hashes
            .iter()
            .filter_map(|raw| match TxHash::from_str(raw) {
                Ok(hash) => Some(hash),
                Err(err) => {
                    warn!(raw = %raw, ?err, "ignoring malformed tx hash in checkpoint");
                    None
                }
            })
            .collect()
    }

    /// Record a confirmed answer: remember the ping's tx hash and advance
    /// the watermark to the ping's block. Never moves the watermark back.
    pub fn record_answer(&mut self, ping_tx_hash: TxHash, block_number: u64) {
        let key = format!("{ping_tx_hash:?}");
        if !self.processed_tx_hashes.iter().any(|h| *h == key) {
            self.processed_tx_hashes.push(key);
        }
        if block_number > self.last_processed_block {
            self.last_processed_block = block_number;
        }
    }

    /// Advance the watermark after a re-scan. Returns false (and leaves the
    /// checkpoint untouched) if `head` would move it backwards.
    pub fn advance_head(&mut self, head: u64) -> bool {
        if head > self.last_processed_block {
            self.last_processed_block = head;
            true
        } else {
            false
        }
    }
}

pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the checkpoint. A missing, unreadable or corrupt file reports
    /// absence; the caller falls back to seeding from the chain head.
    pub fn load(&self) -> Option<Checkpoint> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %self.path.display(), "no checkpoint file found");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "failed to read checkpoint file, treating as absent");
                return None;
            }
        };
        match serde_json::from_str::<Checkpoint>(&content) {
            Ok(checkpoint) => {
                debug!(
                    last_processed_block = checkpoint.last_processed_block,
                    answered = checkpoint.processed_tx_hashes.len(),
                    "loaded checkpoint"
                );
                Some(checkpoint)
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "corrupt checkpoint file, treating as absent");
                None
            }
        }
    }

    /// Persist the full checkpoint state. Writes a temp file, fsyncs it and
    /// renames over the target so a crash mid-write cannot tear the file.
    pub fn save(&self, checkpoint: &Checkpoint) -> PongResult<()> {
        let content = serde_json::to_string_pretty(checkpoint)
            .map_err(|e| PongError::Storage(e.to_string()))?;
        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &self.path)?;
        debug!(
            last_processed_block = checkpoint.last_processed_block,
            answered = checkpoint.processed_tx_hashes.len(),
            "checkpoint saved"
        );
        Ok(())
    }
}
