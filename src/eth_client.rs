// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Ethereum implementation of the chain gateway.

use crate::chain_client::{ChainClientInner, FeeEstimate, PingEvent, PING_CHANNEL_SIZE};
use crate::config::PongBotConfig;
use crate::error::{PongError, PongResult};
use anyhow::anyhow;
use async_trait::async_trait;
use ethers::contract::{abigen, EthEvent};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, PendingTransaction, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{
    Address as EthAddress, BlockNumber, Eip1559TransactionRequest, Filter, Log, TxHash, U64,
};
use futures::StreamExt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tap::TapFallible;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

abigen!(
    PingPong,
    r#"[
        event Ping()
        event Pong(bytes32 txHash)
        function pong(bytes32 txHash)
    ]"#
);

pub type EthSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

pub struct EthPongClient {
    provider: Provider<Http>,
    signer: Arc<EthSigner>,
    contract: PingPong<EthSigner>,
    contract_address: EthAddress,
    signer_address: EthAddress,
}

impl EthPongClient {
    pub async fn from_config(config: &PongBotConfig) -> anyhow::Result<Self> {
        let contract_address = EthAddress::from_str(&config.contract_address)
            .map_err(|e| anyhow!("invalid contract address {}: {e}", config.contract_address))?;
        let key_hex = std::fs::read_to_string(&config.ping_signer_key_path).map_err(|e| {
            anyhow!(
                "failed to read signing key from {:?}: {e}",
                config.ping_signer_key_path
            )
        })?;
        Self::new(
            &config.eth_rpc_url,
            contract_address,
            key_hex.trim(),
            config.expected_chain_id,
        )
        .await
    }

    pub async fn new(
        rpc_url: &str,
        contract_address: EthAddress,
        private_key_hex: &str,
        expected_chain_id: Option<u64>,
    ) -> anyhow::Result<Self> {
        let provider =
            Provider::<Http>::try_from(rpc_url)?.interval(Duration::from_millis(2000));
        let chain_id = provider.get_chainid().await?.as_u64();
        if let Some(expected) = expected_chain_id {
            if chain_id != expected {
                return Err(anyhow!(
                    "Chain ID mismatch: expected {}, got {}. This could indicate connecting to the wrong network!",
                    expected,
                    chain_id
                ));
            }
        }
        let wallet = LocalWallet::from_str(private_key_hex)
            .map_err(|e| anyhow!("invalid signing key: {e}"))?
            .with_chain_id(chain_id);
        let signer_address = wallet.address();
        let signer = Arc::new(SignerMiddleware::new(provider.clone(), wallet));
        let contract = PingPong::new(contract_address, signer.clone());
        let client = Self {
            provider,
            signer,
            contract,
            contract_address,
            signer_address,
        };
        client.describe(chain_id, expected_chain_id.is_some()).await?;
        Ok(client)
    }

    // Log connection info at startup
    async fn describe(&self, chain_id: u64, verified: bool) -> anyhow::Result<()> {
        let block_number = self.provider.get_block_number().await?;
        if verified {
            info!(
                "EthPongClient connected to chain {} (verified), current block: {}, watching {:?}, signing as {:?}",
                chain_id, block_number, self.contract_address, self.signer_address
            );
        } else {
            warn!(
                "EthPongClient connected to chain {} (NOT VERIFIED - no expected chain ID set), current block: {}, watching {:?}, signing as {:?}",
                chain_id, block_number, self.contract_address, self.signer_address
            );
        }
        Ok(())
    }

    fn ping_filter(&self) -> Filter {
        Filter::new()
            .address(self.contract_address)
            .topic0(PingFilter::signature())
    }
}

fn ping_event_from_log(log: Log) -> PongResult<PingEvent> {
    let block_number = log
        .block_number
        .ok_or_else(|| PongError::Rpc("provider returned a log without block number".to_string()))?
        .as_u64();
    let tx_hash = log.transaction_hash.ok_or_else(|| {
        PongError::Rpc("provider returned a log without transaction hash".to_string())
    })?;
    let log_index = log
        .log_index
        .ok_or_else(|| PongError::Rpc("provider returned a log without log index".to_string()))?
        .as_u64();
    Ok(PingEvent {
        tx_hash,
        block_number,
        log_index,
    })
}

#[async_trait]
impl ChainClientInner for EthPongClient {
    async fn get_latest_block_number(&self) -> PongResult<u64> {
        Ok(self.provider.get_block_number().await?.as_u64())
    }

    // Note: query may fail if the range is too big. Callsite is responsible
    // for keeping ranges bounded (the checkpoint keeps them short in practice).
    async fn get_ping_events_in_range(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> PongResult<Vec<PingEvent>> {
        let filter = self.ping_filter().from_block(from_block).to_block(to_block);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(PongError::from)
            .tap_err(|e| {
                error!(
                    "get_ping_events_in_range failed. Filter: {:?}. Error {:?}",
                    filter, e
                )
            })?;

        // Safeguard check that all events are emitted from the watched contract
        if logs.iter().any(|log| log.address != self.contract_address) {
            return Err(PongError::Rpc(format!(
                "provider returned logs from a different contract address (expected: {:?})",
                self.contract_address
            )));
        }
        logs.into_iter().map(ping_event_from_log).collect()
    }

    async fn subscribe_pings(&self) -> PongResult<mpsc::Receiver<PingEvent>> {
        let (tx, rx) = mpsc::channel(PING_CHANNEL_SIZE);
        let provider = self.provider.clone();
        let filter = self.ping_filter();
        tokio::spawn(async move {
            let mut stream = match provider.watch(&filter).await {
                Ok(stream) => stream,
                Err(err) => {
                    error!(?err, "failed to install ping log watcher");
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                match ping_event_from_log(log) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(?err, "skipping malformed ping log"),
                }
            }
            warn!("ping log watcher terminated");
        });
        Ok(rx)
    }

    async fn get_fee_estimate(&self) -> PongResult<FeeEstimate> {
        let (max_fee_per_gas, max_priority_fee_per_gas) =
            self.provider.estimate_eip1559_fees(None).await?;
        Ok(FeeEstimate {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        })
    }

    async fn get_next_nonce(&self) -> PongResult<u64> {
        Ok(self
            .provider
            .get_transaction_count(self.signer_address, Some(BlockNumber::Pending.into()))
            .await?
            .as_u64())
    }

    async fn submit_pong(
        &self,
        ping_tx_hash: TxHash,
        nonce: u64,
        fees: FeeEstimate,
    ) -> PongResult<TxHash> {
        let calldata = self
            .contract
            .pong(ping_tx_hash.to_fixed_bytes())
            .calldata()
            .ok_or_else(|| PongError::Other("failed to encode pong calldata".to_string()))?;
        let tx = Eip1559TransactionRequest::new()
            .to(self.contract_address)
            .data(calldata)
            .nonce(nonce)
            .max_fee_per_gas(fees.max_fee_per_gas)
            .max_priority_fee_per_gas(fees.max_priority_fee_per_gas);
        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| PongError::Rpc(e.to_string()))?;
        Ok(*pending)
    }

    async fn await_confirmation(&self, tx_hash: TxHash) -> PongResult<u64> {
        let receipt = PendingTransaction::new(tx_hash, &self.provider)
            .await?
            .ok_or(PongError::TxDropped(tx_hash))?;
        let block_number = receipt
            .block_number
            .ok_or_else(|| PongError::Rpc("receipt without block number".to_string()))?
            .as_u64();
        if receipt.status == Some(U64::zero()) {
            return Err(PongError::TxReverted {
                tx_hash,
                block_number,
            });
        }
        Ok(block_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::AbiEncode;
    use ethers::types::{H256, U256};
    use ethers::utils::keccak256;

    #[test]
    fn test_ping_event_signature() {
        assert_eq!(PingFilter::signature(), H256(keccak256(b"Ping()")));
    }

    #[test]
    fn test_pong_calldata_encoding() {
        let ping_hash = [0x11u8; 32];
        let calldata = PongCall {
            tx_hash: ping_hash,
        }
        .encode();
        assert_eq!(calldata.len(), 36);
        assert_eq!(&calldata[0..4], &keccak256(b"pong(bytes32)")[0..4]);
        assert_eq!(&calldata[4..36], &ping_hash);
    }

    #[test]
    fn test_ping_event_from_log() {
        let log = Log {
            block_number: Some(U64::from(1002u64)),
            transaction_hash: Some(TxHash::from_low_u64_be(42)),
            log_index: Some(U256::from(3u64)),
            ..Default::default()
        };
        let event = ping_event_from_log(log).unwrap();
        assert_eq!(event.block_number, 1002);
        assert_eq!(event.tx_hash, TxHash::from_low_u64_be(42));
        assert_eq!(event.log_index, 3);
    }

    #[test]
    fn test_ping_event_from_pending_log_is_rejected() {
        // a pending log has no block number yet
        let log = Log {
            block_number: None,
            transaction_hash: Some(TxHash::from_low_u64_be(42)),
            log_index: Some(U256::zero()),
            ..Default::default()
        };
        assert!(ping_event_from_log(log).is_err());
    }
}
