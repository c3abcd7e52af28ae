// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use ethers::types::TxHash;

/// Error type for the pong responder pipeline
#[derive(Debug, Clone, thiserror::Error)]
pub enum PongError {
    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("transaction {0:?} was dropped before inclusion")]
    TxDropped(TxHash),

    #[error("transaction {tx_hash:?} reverted in block {block_number}")]
    TxReverted { tx_hash: TxHash, block_number: u64 },

    #[error("checkpoint storage error: {0}")]
    Storage(String),

    #[error("ping subscription closed")]
    SubscriptionClosed,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl PongError {
    /// Returns a short string identifying the error type for metrics labels
    pub fn error_type(&self) -> &'static str {
        match self {
            PongError::Rpc(_) => "rpc_error",
            PongError::TxDropped(_) => "tx_dropped",
            PongError::TxReverted { .. } => "tx_reverted",
            PongError::Storage(_) => "storage_error",
            PongError::SubscriptionClosed => "subscription_closed",
            PongError::Config(_) => "config_error",
            PongError::Other(_) => "generic",
        }
    }

    /// Whether this error is recoverable (a later attempt may succeed)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PongError::Rpc(_) | PongError::TxDropped(_) | PongError::SubscriptionClosed
        )
    }
}

impl From<ethers::providers::ProviderError> for PongError {
    fn from(err: ethers::providers::ProviderError) -> Self {
        PongError::Rpc(err.to_string())
    }
}

impl From<std::io::Error> for PongError {
    fn from(err: std::io::Error) -> Self {
        PongError::Storage(err.to_string())
    }
}

pub type PongResult<T> = Result<T, PongError>;
