//! Chain reads for on-chain verification.
//!
//! [`ChainReader`] turns `(chain_id, tx_hash)` into a [`TxObservation`].
//! Observations are never cached; the orchestrator re-reads on every
//! verification attempt.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::primitives::B256;
use alloy::providers::{Provider, RootProvider};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;

use crate::config::OnchainConfig;
use crate::constants::Network;
use crate::error::PaymentError;

/// Upper bound on a single RPC round trip.
const RPC_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "address")]
pub enum Asset {
    Native,
    Token(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TxObservation {
    pub tx_hash: String,
    pub chain_id: u64,
    pub from: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Smallest unit, decimal string.
    pub value: String,
    pub currency: String,
    pub asset: Asset,
    pub block_number: u64,
    pub head_block: u64,
    pub confirmations: u64,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
    /// Receipt status. A reverted transfer moved no value.
    pub succeeded: bool,
}

/// `head - block + 1`, zero if the node is behind the block it just served.
pub fn confirmations(head_block: u64, block_number: u64) -> u64 {
    if head_block < block_number {
        0
    } else {
        head_block - block_number + 1
    }
}

/// Normalize and validate a 32-byte transaction hash.
pub fn parse_tx_hash(tx_hash: &str) -> Result<B256, PaymentError> {
    let trimmed = tx_hash.trim();
    if !trimmed.starts_with("0x") || trimmed.len() != 66 {
        return Err(PaymentError::Validation(format!(
            "tx_hash must be 0x-prefixed 32-byte hex: {tx_hash}"
        )));
    }
    B256::from_str(trimmed)
        .map_err(|_| PaymentError::Validation(format!("invalid tx_hash: {tx_hash}")))
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    /// Fails with `NOT_FOUND` while the transaction is unknown or unmined.
    async fn read(&self, chain_id: u64, tx_hash: &str) -> Result<TxObservation, PaymentError>;
}

/// JSON-RPC reader with one HTTP client per configured network.
pub struct RpcChainReader {
    providers: HashMap<u64, RootProvider>,
}

impl RpcChainReader {
    pub fn new(config: &OnchainConfig) -> Result<Self, PaymentError> {
        let mut providers = HashMap::new();
        for network in Network::ALL {
            let url = config.rpc_url(network);
            let url = url.parse().map_err(|_| {
                PaymentError::Internal(format!("invalid RPC URL for {}: {url}", network.key()))
            })?;
            providers.insert(network.chain_id(), RootProvider::new_http(url));
        }
        Ok(Self { providers })
    }

    fn provider(&self, chain_id: u64) -> Result<&RootProvider, PaymentError> {
        self.providers
            .get(&chain_id)
            .ok_or(PaymentError::UnsupportedChain(chain_id))
    }
}

async fn with_timeout<T, E, F>(what: &str, fut: F) -> Result<T, PaymentError>
where
    F: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(RPC_TIMEOUT, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(PaymentError::ProviderUnavailable(format!("{what}: {e}"))),
        Err(_) => Err(PaymentError::ProviderUnavailable(format!("{what}: timed out"))),
    }
}

#[async_trait]
impl ChainReader for RpcChainReader {
    async fn read(&self, chain_id: u64, tx_hash: &str) -> Result<TxObservation, PaymentError> {
        let network =
            Network::from_chain_id(chain_id).ok_or(PaymentError::UnsupportedChain(chain_id))?;
        let provider = self.provider(chain_id)?;
        let hash = parse_tx_hash(tx_hash)?;

        let tx = with_timeout("get_transaction_by_hash", provider.get_transaction_by_hash(hash))
            .await?
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {tx_hash}")))?;
        let block_number = tx
            .block_number
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {tx_hash} is pending")))?;

        let receipt = with_timeout(
            "get_transaction_receipt",
            provider.get_transaction_receipt(hash),
        )
        .await?;
        let head_block = with_timeout("get_block_number", provider.get_block_number()).await?;

        let asset = if tx.input().is_empty() {
            Asset::Native
        } else {
            // Calldata means a contract call; only plain transfers settle orders.
            Asset::Token(tx.to().map(|a| a.to_checksum(None)).unwrap_or_default())
        };

        let observation = TxObservation {
            tx_hash: format!("{hash:#x}"),
            chain_id: tx.chain_id().unwrap_or(chain_id),
            from: tx.inner.signer().to_checksum(None),
            to: tx.to().map(|a| a.to_checksum(None)),
            value: tx.value().to_string(),
            currency: network.symbol().to_string(),
            asset,
            block_number,
            head_block,
            confirmations: confirmations(head_block, block_number),
            gas_used: receipt.as_ref().map(|r| r.gas_used.to_string()),
            gas_price: receipt.as_ref().map(|r| r.effective_gas_price.to_string()),
            succeeded: receipt.as_ref().map(|r| r.status()).unwrap_or(false),
        };

        tracing::debug!(
            chain_id,
            tx_hash = %observation.tx_hash,
            block_number,
            head_block,
            confirmations = observation.confirmations,
            "Chain observation"
        );
        Ok(observation)
    }
}

/// Reader over a fixed set of observations, keyed by chain and lower-case hash.
#[derive(Default)]
pub struct InMemoryChainReader {
    txs: DashMap<(u64, String), TxObservation>,
}

impl InMemoryChainReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, observation: TxObservation) {
        self.txs.insert(
            (observation.chain_id, observation.tx_hash.to_lowercase()),
            observation,
        );
    }

    /// Move the head so the transaction has exactly `n` confirmations.
    pub fn set_confirmations(&self, chain_id: u64, tx_hash: &str, n: u64) {
        if let Some(mut obs) = self.txs.get_mut(&(chain_id, tx_hash.to_lowercase())) {
            obs.head_block = obs.block_number + n.saturating_sub(1);
            obs.confirmations = n;
        }
    }
}

#[async_trait]
impl ChainReader for InMemoryChainReader {
    async fn read(&self, chain_id: u64, tx_hash: &str) -> Result<TxObservation, PaymentError> {
        self.txs
            .get(&(chain_id, tx_hash.trim().to_lowercase()))
            .map(|obs| obs.clone())
            .ok_or_else(|| PaymentError::NotFound(format!("transaction {tx_hash}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0x88df016429689c079f3b2f6ad39fa052532c56795b733da78a91ebe6a713944b";

    fn observation() -> TxObservation {
        TxObservation {
            tx_hash: HASH.into(),
            chain_id: 11_155_111,
            from: "0x1111111111111111111111111111111111111111".into(),
            to: Some("0x2222222222222222222222222222222222222222".into()),
            value: "5000000000000000".into(),
            currency: "ETH".into(),
            asset: Asset::Native,
            block_number: 100,
            head_block: 100,
            confirmations: 1,
            gas_used: Some("21000".into()),
            gas_price: Some("1000000000".into()),
            succeeded: true,
        }
    }

    #[test]
    fn confirmation_count_includes_inclusion_block() {
        assert_eq!(confirmations(100, 100), 1);
        assert_eq!(confirmations(102, 100), 3);
        assert_eq!(confirmations(99, 100), 0);
    }

    #[test]
    fn tx_hash_format_is_checked() {
        assert!(parse_tx_hash(HASH).is_ok());
        assert!(parse_tx_hash("0x1234").is_err());
        assert!(parse_tx_hash(&HASH[2..]).is_err());
    }

    #[tokio::test]
    async fn in_memory_reader_tracks_head() {
        let reader = InMemoryChainReader::new();
        reader.insert(observation());
        reader.set_confirmations(11_155_111, &HASH.to_uppercase().replace("0X", "0x"), 3);
        let obs = reader.read(11_155_111, HASH).await.unwrap();
        assert_eq!(obs.confirmations, 3);
        assert_eq!(obs.head_block, 102);
    }

    #[tokio::test]
    async fn unknown_tx_is_not_found() {
        let reader = InMemoryChainReader::new();
        let err = reader.read(1, HASH).await.unwrap_err();
        assert!(matches!(err, PaymentError::NotFound(_)));
    }
}
