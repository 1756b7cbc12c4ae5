//! Provider and chain configuration.
//!
//! Built once at startup and handed to each adapter; nothing here is mutated
//! afterwards. Keys follow `section.name` and are read from environment
//! variables with dots replaced by underscores and upper-cased
//! (`card.secret_key` → `CARD_SECRET_KEY`).

use std::collections::HashMap;

use alloy::primitives::Address;
use url::Url;

use crate::constants::{
    Network, DEFAULT_CARD_API_URL, DEFAULT_CARD_WEBHOOK_TOLERANCE_SECS, DEFAULT_EXCHANGE_API_URL,
    DEFAULT_QUOTE_TTL_SECS, DEFAULT_REQUIRED_CONFIRMATIONS,
};
use crate::error::PaymentError;

#[derive(Clone)]
pub struct CardConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_url: String,
    pub webhook_tolerance_secs: i64,
}

impl std::fmt::Debug for CardConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CardConfig")
            .field("secret_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .field("webhook_tolerance_secs", &self.webhook_tolerance_secs)
            .finish()
    }
}

#[derive(Clone)]
pub struct ExchangeConfig {
    /// Sent as the certificate serial number header.
    pub api_key: String,
    pub api_secret: String,
    pub api_url: String,
}

impl std::fmt::Debug for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeConfig")
            .field("api_key", &self.api_key)
            .field("api_secret", &"[REDACTED]")
            .field("api_url", &self.api_url)
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct OnchainConfig {
    pub recipients: HashMap<u64, Address>,
    pub rpc_urls: HashMap<u64, String>,
    pub required_confirmations: HashMap<u64, u64>,
}

impl OnchainConfig {
    /// Recipient for a whitelisted chain. Unknown or unconfigured chains are
    /// `UNSUPPORTED_CHAIN`.
    pub fn recipient(&self, chain_id: u64) -> Result<(Network, Address), PaymentError> {
        let network =
            Network::from_chain_id(chain_id).ok_or(PaymentError::UnsupportedChain(chain_id))?;
        let address = self
            .recipients
            .get(&chain_id)
            .copied()
            .ok_or(PaymentError::UnsupportedChain(chain_id))?;
        Ok((network, address))
    }

    pub fn required_confirmations(&self, chain_id: u64) -> u64 {
        self.required_confirmations
            .get(&chain_id)
            .copied()
            .unwrap_or(DEFAULT_REQUIRED_CONFIRMATIONS)
    }

    pub fn rpc_url(&self, network: Network) -> &str {
        self.rpc_urls
            .get(&network.chain_id())
            .map(String::as_str)
            .unwrap_or_else(|| network.default_rpc_url())
    }
}

#[derive(Debug, Clone)]
pub struct PriceConfig {
    pub quote_ttl_secs: i64,
    /// Fiat currency the rates are expressed in. Plans priced in any other
    /// currency cannot be quoted on-chain.
    pub fiat_currency: String,
    /// Fiat minor units per whole token, keyed by token symbol.
    pub rates: HashMap<String, u128>,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: DEFAULT_QUOTE_TTL_SECS,
            fiat_currency: "USD".to_string(),
            rates: default_rates(),
        }
    }
}

fn default_rates() -> HashMap<String, u128> {
    HashMap::from([
        ("ETH".to_string(), 200_000),
        ("BNB".to_string(), 60_000),
        ("MATIC".to_string(), 50),
    ])
}

#[derive(Debug, Clone, Default)]
pub struct PaymentConfig {
    /// `None` disables the card provider.
    pub card: Option<CardConfig>,
    /// `None` disables the crypto-exchange provider.
    pub exchange: Option<ExchangeConfig>,
    pub onchain: OnchainConfig,
    pub price: PriceConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} is set but {1} is missing")]
    Incomplete(&'static str, &'static str),

    #[error("invalid address for {key}: {value}")]
    InvalidAddress { key: String, value: String },

    #[error("invalid URL for {key}: {value}")]
    InvalidUrl { key: String, value: String },

    #[error("invalid number for {key}: {value}")]
    InvalidNumber { key: String, value: String },
}

fn env_name(key: &str) -> String {
    key.replace('.', "_").to_uppercase()
}

impl PaymentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(|key| std::env::var(env_name(key)).ok())
    }

    /// Build from an arbitrary key lookup. Keys are the dotted names, e.g.
    /// `onchain.recipient.sepolia`. Empty values count as unset.
    pub fn from_source<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let card = match (get("card.secret_key"), get("card.webhook_secret")) {
            (Some(secret_key), Some(webhook_secret)) => {
                let api_url = get("card.api_url").unwrap_or_else(|| DEFAULT_CARD_API_URL.into());
                check_url("card.api_url", &api_url)?;
                let webhook_tolerance_secs = parse_num(
                    "card.webhook_tolerance_seconds",
                    get("card.webhook_tolerance_seconds"),
                )?
                .unwrap_or(DEFAULT_CARD_WEBHOOK_TOLERANCE_SECS);
                Some(CardConfig {
                    secret_key,
                    webhook_secret,
                    api_url,
                    webhook_tolerance_secs,
                })
            }
            (Some(_), None) => {
                return Err(ConfigError::Incomplete(
                    "card.secret_key",
                    "card.webhook_secret",
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete(
                    "card.webhook_secret",
                    "card.secret_key",
                ))
            }
            (None, None) => None,
        };

        let exchange = match (
            get("crypto_exchange.api_key"),
            get("crypto_exchange.api_secret"),
        ) {
            (Some(api_key), Some(api_secret)) => {
                let api_url = get("crypto_exchange.api_url")
                    .unwrap_or_else(|| DEFAULT_EXCHANGE_API_URL.into());
                check_url("crypto_exchange.api_url", &api_url)?;
                Some(ExchangeConfig {
                    api_key,
                    api_secret,
                    api_url,
                })
            }
            (Some(_), None) => {
                return Err(ConfigError::Incomplete(
                    "crypto_exchange.api_key",
                    "crypto_exchange.api_secret",
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Incomplete(
                    "crypto_exchange.api_secret",
                    "crypto_exchange.api_key",
                ))
            }
            (None, None) => None,
        };

        let mut onchain = OnchainConfig::default();
        for network in Network::ALL {
            let chain_id = network.chain_id();

            let key = format!("onchain.recipient.{}", network.key());
            if let Some(value) = get(&key) {
                let address: Address = value
                    .parse()
                    .map_err(|_| ConfigError::InvalidAddress { key, value })?;
                onchain.recipients.insert(chain_id, address);
            }

            let key = format!("onchain.rpc.{}", network.key());
            if let Some(value) = get(&key) {
                check_url(&key, &value)?;
                onchain.rpc_urls.insert(chain_id, value);
            }

            let key = format!("onchain.required_confirmations.{chain_id}");
            if let Some(n) = parse_num::<u64>(&key, get(&key))? {
                onchain.required_confirmations.insert(chain_id, n.max(1));
            }
        }

        let mut price = PriceConfig::default();
        if let Some(ttl) = parse_num("price.quote_ttl_seconds", get("price.quote_ttl_seconds"))? {
            price.quote_ttl_secs = ttl;
        }
        if let Some(fiat) = get("price.fiat_currency") {
            price.fiat_currency = fiat.to_uppercase();
        }
        for symbol in ["ETH", "BNB", "MATIC"] {
            let key = format!("price.rate.{}", symbol.to_lowercase());
            if let Some(rate) = parse_num::<u128>(&key, get(&key))? {
                price.rates.insert(symbol.to_string(), rate);
            }
        }

        Ok(Self {
            card,
            exchange,
            onchain,
            price,
        })
    }
}

fn check_url(key: &str, value: &str) -> Result<(), ConfigError> {
    Url::parse(value).map(|_| ()).map_err(|_| ConfigError::InvalidUrl {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_num<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.parse().map_err(|_| ConfigError::InvalidNumber {
                key: key.to_string(),
                value: v,
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k: &str| map.get(k).cloned()
    }

    #[test]
    fn empty_source_yields_defaults() {
        let config = PaymentConfig::from_source(source(&[])).unwrap();
        assert!(config.card.is_none());
        assert!(config.exchange.is_none());
        assert_eq!(config.price.quote_ttl_secs, 900);
        assert_eq!(config.price.fiat_currency, "USD");
        assert_eq!(config.onchain.required_confirmations(1), 3);
        assert!(matches!(
            config.onchain.recipient(11_155_111),
            Err(PaymentError::UnsupportedChain(11_155_111))
        ));
    }

    #[test]
    fn reads_provider_and_chain_keys() {
        let config = PaymentConfig::from_source(source(&[
            ("card.secret_key", "sk_test"),
            ("card.webhook_secret", "whsec"),
            ("crypto_exchange.api_key", "cert-sn"),
            ("crypto_exchange.api_secret", "secret"),
            (
                "onchain.recipient.sepolia",
                "0x742d35Cc6634C0532925a3b8D4C9db96C4b4d8b6",
            ),
            ("onchain.required_confirmations.11155111", "5"),
            ("price.quote_ttl_seconds", "600"),
            ("price.fiat_currency", "eur"),
        ]))
        .unwrap();

        assert_eq!(config.card.unwrap().api_url, "https://api.stripe.com");
        assert_eq!(
            config.exchange.unwrap().api_url,
            "https://bpay.binanceapi.com"
        );
        let (network, _) = config.onchain.recipient(11_155_111).unwrap();
        assert_eq!(network, Network::Sepolia);
        assert_eq!(config.onchain.required_confirmations(11_155_111), 5);
        assert_eq!(config.price.quote_ttl_secs, 600);
        assert_eq!(config.price.fiat_currency, "EUR");
    }

    #[test]
    fn half_configured_provider_is_an_error() {
        let err = PaymentConfig::from_source(source(&[("card.secret_key", "sk")])).unwrap_err();
        assert!(matches!(err, ConfigError::Incomplete(..)));
    }

    #[test]
    fn bad_recipient_is_rejected() {
        let err = PaymentConfig::from_source(source(&[("onchain.recipient.bsc", "nope")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress { .. }));
    }

    #[test]
    fn env_names_are_upper_snake() {
        assert_eq!(env_name("onchain.recipient.polygon_amoy"), "ONCHAIN_RECIPIENT_POLYGON_AMOY");
        assert_eq!(
            env_name("onchain.required_confirmations.137"),
            "ONCHAIN_REQUIRED_CONFIRMATIONS_137"
        );
    }
}
