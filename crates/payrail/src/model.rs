//! Domain records and the normalized settlement vocabulary shared by every
//! provider adapter.

use serde::{Deserialize, Serialize};

use crate::constants::{CARD_PAYMENT_TTL_SECS, EXCHANGE_PAYMENT_TTL_SECS, ONCHAIN_PAYMENT_TTL_SECS};
use crate::error::PaymentError;

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = PaymentError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(PaymentError::Validation(format!(
                        "unknown {}: {other}",
                        stringify!($name)
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Card,
    CryptoExchange,
    Onchain,
}

string_enum!(PaymentMethod {
    Card => "CARD",
    CryptoExchange => "CRYPTO_EXCHANGE",
    Onchain => "ONCHAIN",
});

impl PaymentMethod {
    /// Upper bound on how long a payment attempt stays open.
    pub fn payment_ttl_secs(&self) -> i64 {
        match self {
            PaymentMethod::Card => CARD_PAYMENT_TTL_SECS,
            PaymentMethod::CryptoExchange => EXCHANGE_PAYMENT_TTL_SECS,
            PaymentMethod::Onchain => ONCHAIN_PAYMENT_TTL_SECS,
        }
    }

    /// Namespace for provider event ids in the processed-event ledger.
    pub fn provider_key(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::CryptoExchange => "crypto_exchange",
            PaymentMethod::Onchain => "onchain",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Canceled,
    Expired,
    Refunded,
}

string_enum!(OrderStatus {
    Pending => "PENDING",
    Paid => "PAID",
    Canceled => "CANCELED",
    Expired => "EXPIRED",
    Refunded => "REFUNDED",
});

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending | OrderStatus::Paid)
    }

    /// Edges of the order DAG: PENDING → {PAID → REFUNDED | EXPIRED | CANCELED}.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Paid)
                | (OrderStatus::Pending, OrderStatus::Expired)
                | (OrderStatus::Pending, OrderStatus::Canceled)
                | (OrderStatus::Paid, OrderStatus::Refunded)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Expired,
    Refunded,
}

string_enum!(PaymentStatus {
    Pending => "PENDING",
    Paid => "PAID",
    Failed => "FAILED",
    Expired => "EXPIRED",
    Refunded => "REFUNDED",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
}

string_enum!(TransactionStatus {
    Pending => "PENDING",
    Confirmed => "CONFIRMED",
});

/// Catalog entry. Never mutated once an order references it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub plan_id: i64,
    pub name: String,
    pub description: String,
    /// Price in fiat minor units (cents).
    pub fiat_price: i64,
    pub currency: String,
    pub points_amount: i64,
    pub plan_type: String,
    /// Benefit kinds granted on payment, e.g. `premium_access`.
    pub benefits: Vec<String>,
}

/// Quote attached to an on-chain order at creation time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnchainQuote {
    pub chain_id: u64,
    /// Checksummed recipient address.
    pub recipient_address: String,
    /// Token amount in the smallest unit (wei), as a decimal string.
    pub token_amount: String,
    /// Token symbol, e.g. `ETH`.
    pub currency: String,
    /// Unix seconds after which the quote is no longer honored.
    pub price_ttl: i64,
    /// Fiat minor units per whole token at quote time.
    pub exchange_rate: String,
    pub gas_estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub order_number: String,
    pub user_id: String,
    pub plan_id: i64,
    pub plan_name: String,
    pub plan_type: String,
    /// Fiat minor units, snapshotted from the plan.
    pub amount: i64,
    pub currency: String,
    pub points: i64,
    pub benefits: Vec<String>,
    pub status: OrderStatus,
    pub method: PaymentMethod,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
    pub expires_at: i64,
    pub onchain: Option<OnchainQuote>,
}

/// Provider-specific correlation ids. Each adapter fills the ones it owns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIds {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prepay_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl ExternalIds {
    /// Fill unset fields from `other`. Ids already recorded are never replaced.
    pub fn merge(&mut self, other: &ExternalIds) {
        fn keep(slot: &mut Option<String>, incoming: &Option<String>) {
            if slot.is_none() {
                slot.clone_from(incoming);
            }
        }
        keep(&mut self.session_id, &other.session_id);
        keep(&mut self.intent_id, &other.intent_id);
        keep(&mut self.customer_id, &other.customer_id);
        keep(&mut self.prepay_id, &other.prepay_id);
        keep(&mut self.transaction_id, &other.transaction_id);
        keep(&mut self.tx_hash, &other.tx_hash);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub payment_id: String,
    /// Merchant trade number shared with the provider.
    pub payment_number: String,
    pub order_id: String,
    pub user_id: String,
    pub method: PaymentMethod,
    pub amount: i64,
    pub currency: String,
    pub status: PaymentStatus,
    pub created_at: i64,
    pub expires_at: i64,
    pub paid_at: Option<i64>,
    pub external: ExternalIds,
}

/// Observed chain transaction relevant to an on-chain payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction {
    pub tx_hash: String,
    pub order_id: String,
    pub chain_id: u64,
    pub from_address: String,
    pub to_address: String,
    pub amount: String,
    pub currency: String,
    pub block_number: u64,
    pub confirmations: u64,
    pub status: TransactionStatus,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub entitlement_id: String,
    pub user_id: String,
    pub order_id: String,
    pub kind: String,
    pub value: String,
    pub active: bool,
    pub created_at: i64,
    pub expires_at: Option<i64>,
}

/// Normalized meaning of a provider notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementKind {
    Success,
    /// Provider closed or expired the payment.
    Expired,
    Failed,
    RefundSuccess,
    /// Recorded for audit, never moves state.
    Informational,
}

string_enum!(SettlementKind {
    Success => "SUCCESS",
    Expired => "EXPIRED",
    Failed => "FAILED",
    RefundSuccess => "REFUND_SUCCESS",
    Informational => "INFORMATIONAL",
});

/// How a settlement event identifies its payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentRef {
    Number(String),
    SessionId(String),
    IntentId(String),
    PaymentId(String),
}

impl std::fmt::Display for PaymentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentRef::Number(n) => write!(f, "payment_number={n}"),
            PaymentRef::SessionId(s) => write!(f, "session_id={s}"),
            PaymentRef::IntentId(i) => write!(f, "intent_id={i}"),
            PaymentRef::PaymentId(p) => write!(f, "payment_id={p}"),
        }
    }
}

/// Provider-agnostic notification that a payment should advance.
#[derive(Debug, Clone, PartialEq)]
pub struct SettlementEvent {
    pub method: PaymentMethod,
    pub target: PaymentRef,
    pub kind: SettlementKind,
    /// Raw provider vocabulary, kept for logs only.
    pub provider_event_kind: String,
    /// Deduplication key. `None` when the provider gives no stable id.
    pub provider_event_id: Option<String>,
    pub external: ExternalIds,
}

/// What happened when a settlement event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementOutcome {
    Applied {
        from: OrderStatus,
        to: OrderStatus,
    },
    /// The same event id was processed before.
    Duplicate,
    /// Event is superseded or informational; state left unchanged.
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    CheckoutUrl,
    QrCode,
    OnchainTransfer,
}

/// What the buyer needs to complete payment with the chosen provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderArtifact {
    pub kind: ArtifactKind,
    #[serde(default)]
    pub external: ExternalIds,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qrcode_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qr_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deeplink: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub universal_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub onchain: Option<OnchainQuote>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl ProviderArtifact {
    pub fn new(kind: ArtifactKind) -> Self {
        Self {
            kind,
            external: ExternalIds::default(),
            checkout_url: None,
            qrcode_link: None,
            qr_content: None,
            deeplink: None,
            universal_url: None,
            onchain: None,
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub order_number: String,
    pub payment_id: String,
    pub payment_number: String,
    pub artifact: ProviderArtifact,
}

/// Consistent read of an order and its payment.
#[derive(Debug, Clone, Serialize)]
pub struct OrderSnapshot {
    pub order: Order,
    pub payment: Payment,
}

/// Response to an on-chain verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub success: bool,
    pub confirmed: bool,
    pub confirmations: u64,
    pub required_confirmations: u64,
    pub block_number: Option<u64>,
    pub gas_used: Option<String>,
    pub gas_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Format fiat minor units as a two-decimal major amount, e.g. `1999` → `19.99`.
pub fn fiat_major(amount_minor: i64) -> String {
    let sign = if amount_minor < 0 { "-" } else { "" };
    let abs = amount_minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_their_own_text() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Canceled,
            OrderStatus::Expired,
            OrderStatus::Refunded,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("SETTLED".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn order_dag_edges() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Expired.can_transition_to(OrderStatus::Paid));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn fiat_major_keeps_two_decimals() {
        assert_eq!(fiat_major(1999), "19.99");
        assert_eq!(fiat_major(1000), "10.00");
        assert_eq!(fiat_major(5), "0.05");
    }

    #[test]
    fn merge_never_overwrites() {
        let mut ids = ExternalIds {
            session_id: Some("cs_1".into()),
            ..Default::default()
        };
        ids.merge(&ExternalIds {
            session_id: Some("cs_2".into()),
            intent_id: Some("pi_1".into()),
            ..Default::default()
        });
        assert_eq!(ids.session_id.as_deref(), Some("cs_1"));
        assert_eq!(ids.intent_id.as_deref(), Some("pi_1"));
    }

    #[test]
    fn method_ttls() {
        assert_eq!(PaymentMethod::Card.payment_ttl_secs(), 86_400);
        assert_eq!(PaymentMethod::CryptoExchange.payment_ttl_secs(), 3_600);
        assert_eq!(PaymentMethod::Onchain.payment_ttl_secs(), 900);
    }
}
