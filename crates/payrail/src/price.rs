//! Fiat → native token quotes for on-chain payments.

use std::sync::Arc;

use alloy::primitives::U256;
use async_trait::async_trait;
use serde::Serialize;

use crate::clock::Clock;
use crate::config::PriceConfig;
use crate::error::PaymentError;

/// Gas limit of a plain native transfer.
pub const NATIVE_TRANSFER_GAS: u64 = 21_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    /// Smallest token unit (wei), decimal string.
    pub token_amount: String,
    /// Fiat minor units per whole token.
    pub exchange_rate: String,
    pub gas_estimate: u64,
    /// Unix seconds after which the quote is void.
    pub price_ttl: i64,
}

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price `fiat_amount_minor` of `fiat_currency` in `token`.
    async fn quote(
        &self,
        fiat_currency: &str,
        token: &str,
        decimals: u32,
        fiat_amount_minor: i64,
    ) -> Result<Quote, PaymentError>;
}

/// Oracle backed by configured fixed rates.
pub struct StaticPriceOracle {
    config: PriceConfig,
    clock: Arc<dyn Clock>,
}

impl StaticPriceOracle {
    pub fn new(config: PriceConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

/// `fiat_minor * 10^decimals / rate`, truncated to whole units.
pub fn token_amount(fiat_minor: u128, rate_minor_per_token: u128, decimals: u32) -> Option<U256> {
    if rate_minor_per_token == 0 {
        return None;
    }
    let scale = U256::from(10u64).checked_pow(U256::from(decimals))?;
    let numerator = U256::from(fiat_minor).checked_mul(scale)?;
    Some(numerator / U256::from(rate_minor_per_token))
}

#[async_trait]
impl PriceOracle for StaticPriceOracle {
    async fn quote(
        &self,
        fiat_currency: &str,
        token: &str,
        decimals: u32,
        fiat_amount_minor: i64,
    ) -> Result<Quote, PaymentError> {
        if !fiat_currency.eq_ignore_ascii_case(&self.config.fiat_currency) {
            return Err(PaymentError::Validation(format!(
                "rates are in {}, cannot quote {fiat_currency}",
                self.config.fiat_currency
            )));
        }
        if fiat_amount_minor <= 0 {
            return Err(PaymentError::Validation(format!(
                "cannot quote non-positive amount {fiat_amount_minor}"
            )));
        }
        let rate = self
            .config
            .rates
            .get(&token.to_uppercase())
            .copied()
            .ok_or_else(|| PaymentError::ProviderUnavailable(format!("no rate for {token}")))?;
        let amount = token_amount(fiat_amount_minor as u128, rate, decimals)
            .filter(|a| !a.is_zero())
            .ok_or_else(|| PaymentError::Validation(format!("amount too small to quote in {token}")))?;

        Ok(Quote {
            token_amount: amount.to_string(),
            exchange_rate: rate.to_string(),
            gas_estimate: NATIVE_TRANSFER_GAS,
            price_ttl: self.clock.now() + self.config.quote_ttl_secs,
        })
    }
}
