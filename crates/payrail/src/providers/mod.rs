//! Provider adapters.
//!
//! Each adapter translates the uniform create / inbound / query contract to
//! one provider's API. Provider vocabulary stops here: everything returned is
//! a [`ProviderArtifact`] or a [`SettlementEvent`].

pub mod card;
pub mod crypto_exchange;
pub mod onchain;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::PaymentError;
use crate::model::{Order, Payment, PaymentMethod, ProviderArtifact, SettlementEvent};

pub use card::CardAdapter;
pub use crypto_exchange::CryptoExchangeAdapter;
pub use onchain::OnchainAdapter;

/// Everything an adapter may put on the outbound create call.
#[derive(Debug, Clone)]
pub struct IntentRequest<'a> {
    pub order: &'a Order,
    pub payment: &'a Payment,
    pub plan_description: &'a str,
    pub return_url: Option<&'a str>,
    pub cancel_url: Option<&'a str>,
    pub chain_id: Option<u64>,
}

/// Raw inbound notification. `body` is exactly what arrived on the wire.
#[derive(Debug, Clone, Copy)]
pub struct InboundRequest<'a> {
    pub body: &'a [u8],
    /// Header names lower-cased.
    pub headers: &'a HashMap<String, String>,
    /// Unix seconds at receipt.
    pub received_at: i64,
}

impl InboundRequest<'_> {
    /// First present header among `names`.
    pub fn header(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .find_map(|name| self.headers.get(&name.to_ascii_lowercase()))
            .map(|v| v.trim())
    }
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Create the provider-side payment. Called before anything is persisted.
    async fn create_payment_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError>;

    /// Verify and normalize a webhook. `Ok(None)` for events that carry no
    /// settlement meaning; `SignatureInvalid` when verification fails.
    fn normalize_inbound(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError>;

    /// Ask the provider where the payment stands. `Ok(None)` while undecided.
    async fn query_remote_status(
        &self,
        payment: &Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError>;
}

/// Adapters keyed by method. Methods without an adapter are unavailable.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<PaymentMethod, Arc<dyn PaymentProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers.insert(provider.method(), provider);
        self
    }

    pub fn get(&self, method: PaymentMethod) -> Result<&Arc<dyn PaymentProvider>, PaymentError> {
        self.providers
            .get(&method)
            .ok_or_else(|| PaymentError::ProviderUnavailable(format!("{method} is not configured")))
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        let mut methods: Vec<_> = self.providers.keys().copied().collect();
        methods.sort_by_key(|m| m.as_str());
        methods
    }
}

/// Shared outbound HTTP client for provider APIs.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(15))
        .connect_timeout(std::time::Duration::from_secs(5))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Map a transport failure to `PROVIDER_UNAVAILABLE`.
pub(crate) fn unavailable(provider: &str, err: impl std::fmt::Display) -> PaymentError {
    PaymentError::ProviderUnavailable(format!("{provider}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_lookup_takes_first_present_name() {
        let headers = HashMap::from([("signature".to_string(), " abc ".to_string())]);
        let req = InboundRequest {
            body: b"{}",
            headers: &headers,
            received_at: 0,
        };
        assert_eq!(
            req.header(&["BinancePay-Signature", "Signature"]),
            Some("abc")
        );
        assert_eq!(req.header(&["Nonce"]), None);
    }

    #[test]
    fn missing_method_is_unavailable() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get(PaymentMethod::Card),
            Err(PaymentError::ProviderUnavailable(_))
        ));
    }
}
