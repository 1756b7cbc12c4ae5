//! Direct native-token transfers on whitelisted EVM chains.
//!
//! Creating a payment is local: pick the chain's recipient and quote the
//! token amount. Settlement is driven by the buyer submitting a tx hash to
//! the orchestrator's verification path, never by webhooks.

use std::sync::Arc;

use async_trait::async_trait;

use super::{InboundRequest, IntentRequest, PaymentProvider};
use crate::config::OnchainConfig;
use crate::error::PaymentError;
use crate::model::{
    ArtifactKind, OnchainQuote, Payment, PaymentMethod, ProviderArtifact, SettlementEvent,
};
use crate::price::PriceOracle;

pub struct OnchainAdapter {
    config: OnchainConfig,
    oracle: Arc<dyn PriceOracle>,
}

impl OnchainAdapter {
    pub fn new(config: OnchainConfig, oracle: Arc<dyn PriceOracle>) -> Self {
        Self { config, oracle }
    }

    pub fn config(&self) -> &OnchainConfig {
        &self.config
    }
}

#[async_trait]
impl PaymentProvider for OnchainAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Onchain
    }

    async fn create_payment_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError> {
        let chain_id = request
            .chain_id
            .ok_or_else(|| PaymentError::Validation("chain_id is required for on-chain payments".into()))?;
        let (network, recipient) = self.config.recipient(chain_id)?;

        let quote = self
            .oracle
            .quote(&request.order.currency, network.symbol(), network.decimals(), request.order.amount)
            .await?;

        tracing::info!(
            chain_id,
            order_number = %request.order.order_number,
            token_amount = %quote.token_amount,
            currency = network.symbol(),
            price_ttl = quote.price_ttl,
            "On-chain quote issued"
        );

        let mut artifact = ProviderArtifact::new(ArtifactKind::OnchainTransfer);
        artifact.expires_at = Some(quote.price_ttl);
        artifact.onchain = Some(OnchainQuote {
            chain_id,
            recipient_address: recipient.to_checksum(None),
            token_amount: quote.token_amount,
            currency: network.symbol().to_string(),
            price_ttl: quote.price_ttl,
            exchange_rate: quote.exchange_rate,
            gas_estimate: quote.gas_estimate,
        });
        Ok(artifact)
    }

    fn normalize_inbound(
        &self,
        _request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        Err(PaymentError::Validation(
            "on-chain payments settle through transaction verification".into(),
        ))
    }

    async fn query_remote_status(
        &self,
        _payment: &Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        Ok(None)
    }
}
