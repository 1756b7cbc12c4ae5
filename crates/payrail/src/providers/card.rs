//! Hosted-checkout card provider.
//!
//! Outbound calls are form-encoded against the checkout sessions API.
//! Webhooks carry a `t=<unix>,v1=<hex>` signature header over
//! `"<t>.<raw body>"`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{unavailable, InboundRequest, IntentRequest, PaymentProvider};
use crate::config::CardConfig;
use crate::error::PaymentError;
use crate::model::{
    ArtifactKind, ExternalIds, Payment, PaymentMethod, PaymentRef, ProviderArtifact,
    SettlementEvent, SettlementKind,
};
use crate::signer;

pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_EXPIRED: &str = "checkout.session.expired";
pub const INTENT_SUCCEEDED: &str = "payment_intent.succeeded";
pub const INTENT_FAILED: &str = "payment_intent.payment_failed";
pub const CHARGE_REFUNDED: &str = "charge.refunded";

pub struct CardAdapter {
    config: CardConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    id: String,
    url: Option<String>,
    status: Option<String>,
    payment_status: Option<String>,
    payment_intent: Option<String>,
    customer: Option<String>,
    expires_at: Option<i64>,
    #[serde(default)]
    metadata: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WebhookEvent {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: WebhookData,
}

#[derive(Debug, Deserialize)]
struct WebhookData {
    object: Value,
}

impl CardAdapter {
    pub fn new(config: CardConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn verify_signature(&self, request: &InboundRequest<'_>) -> Result<(), PaymentError> {
        let header = request
            .header(&["Stripe-Signature", "Signature"])
            .ok_or_else(|| PaymentError::SignatureInvalid("missing signature header".into()))?;

        let mut timestamp: Option<i64> = None;
        let mut candidates = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", t)) => timestamp = t.parse().ok(),
                Some(("v1", sig)) => candidates.push(sig),
                _ => {}
            }
        }
        let timestamp =
            timestamp.ok_or_else(|| PaymentError::SignatureInvalid("missing timestamp".into()))?;

        let secret = self.config.webhook_secret.as_bytes();
        let matched = candidates
            .iter()
            .any(|sig| signer::verify_card_signature(secret, timestamp, request.body, sig));
        if !matched {
            return Err(PaymentError::SignatureInvalid("no matching v1 signature".into()));
        }

        if (request.received_at - timestamp).abs() > self.config.webhook_tolerance_secs {
            return Err(PaymentError::SignatureInvalid(format!(
                "timestamp {timestamp} outside tolerance"
            )));
        }
        Ok(())
    }

    fn form_for(request: &IntentRequest<'_>, success_url: &str) -> Vec<(String, String)> {
        let order = request.order;
        let payment = request.payment;
        let mut form: Vec<(String, String)> = vec![
            ("mode".into(), "payment".into()),
            ("success_url".into(), success_url.into()),
            ("client_reference_id".into(), order.order_number.clone()),
            (
                "line_items[0][price_data][currency]".into(),
                order.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][unit_amount]".into(),
                order.amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".into(),
                order.plan_name.clone(),
            ),
            ("line_items[0][quantity]".into(), "1".into()),
        ];
        if !request.plan_description.is_empty() {
            form.push((
                "line_items[0][price_data][product_data][description]".into(),
                request.plan_description.into(),
            ));
        }
        if let Some(cancel_url) = request.cancel_url {
            form.push(("cancel_url".into(), cancel_url.into()));
        }

        let correlation = [
            ("order_id", order.order_id.clone()),
            ("order_number", order.order_number.clone()),
            ("payment_id", payment.payment_id.clone()),
            ("payment_number", payment.payment_number.clone()),
            ("user_id", order.user_id.clone()),
            ("plan_id", order.plan_id.to_string()),
        ];
        for (key, value) in correlation {
            form.push((format!("metadata[{key}]"), value.clone()));
            form.push((format!("payment_intent_data[metadata][{key}]"), value));
        }
        form
    }
}

fn str_field<'a>(object: &'a Value, key: &str) -> Option<&'a str> {
    object.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

/// A charge counts as fully refunded unless the provider says otherwise,
/// either through `refunded: false` or a refunded amount below the charge.
fn is_full_refund(object: &Value) -> bool {
    if let Some(flag) = object.get("refunded").and_then(Value::as_bool) {
        return flag;
    }
    match (
        object.get("amount_refunded").and_then(Value::as_i64),
        object.get("amount").and_then(Value::as_i64),
    ) {
        (Some(refunded), Some(amount)) => refunded >= amount,
        _ => true,
    }
}

fn metadata_number(object: &Value) -> Option<String> {
    object
        .get("metadata")
        .and_then(|m| str_field(m, "payment_number"))
        .map(String::from)
}

/// Translate a verified webhook payload into a settlement event.
pub fn normalize_event(body: &[u8]) -> Result<Option<SettlementEvent>, PaymentError> {
    let event: WebhookEvent = serde_json::from_slice(body)?;
    let object = &event.data.object;
    let object_id = str_field(object, "id").map(String::from);

    let (kind, target, external) = match event.kind.as_str() {
        CHECKOUT_COMPLETED | CHECKOUT_EXPIRED => {
            let session_id = object_id
                .clone()
                .ok_or_else(|| PaymentError::Validation("checkout session without id".into()))?;
            let kind = if event.kind == CHECKOUT_EXPIRED {
                SettlementKind::Expired
            } else if str_field(object, "payment_status") == Some("unpaid") {
                // Delayed payment methods complete checkout before funds arrive.
                SettlementKind::Informational
            } else {
                SettlementKind::Success
            };
            let target = metadata_number(object)
                .map(PaymentRef::Number)
                .unwrap_or_else(|| PaymentRef::SessionId(session_id.clone()));
            let external = ExternalIds {
                session_id: Some(session_id),
                intent_id: str_field(object, "payment_intent").map(String::from),
                customer_id: str_field(object, "customer").map(String::from),
                ..Default::default()
            };
            (kind, target, external)
        }
        INTENT_SUCCEEDED | INTENT_FAILED => {
            let intent_id = object_id
                .clone()
                .ok_or_else(|| PaymentError::Validation("payment intent without id".into()))?;
            let kind = if event.kind == INTENT_FAILED {
                SettlementKind::Failed
            } else {
                // Success is driven by checkout completion.
                SettlementKind::Informational
            };
            let target = metadata_number(object)
                .map(PaymentRef::Number)
                .unwrap_or_else(|| PaymentRef::IntentId(intent_id.clone()));
            let external = ExternalIds {
                intent_id: Some(intent_id),
                customer_id: str_field(object, "customer").map(String::from),
                ..Default::default()
            };
            (kind, target, external)
        }
        CHARGE_REFUNDED => {
            let intent_id = str_field(object, "payment_intent").map(String::from);
            let target = match (&intent_id, metadata_number(object)) {
                (_, Some(number)) => PaymentRef::Number(number),
                (Some(intent), None) => PaymentRef::IntentId(intent.clone()),
                (None, None) => {
                    return Err(PaymentError::Validation(
                        "refunded charge without payment reference".into(),
                    ))
                }
            };
            let kind = if is_full_refund(object) {
                SettlementKind::RefundSuccess
            } else {
                SettlementKind::Informational
            };
            let external = ExternalIds {
                intent_id,
                transaction_id: object_id,
                ..Default::default()
            };
            (kind, target, external)
        }
        other => {
            tracing::debug!(event_type = other, event_id = %event.id, "Ignoring card event");
            return Ok(None);
        }
    };

    Ok(Some(SettlementEvent {
        method: PaymentMethod::Card,
        target,
        kind,
        provider_event_kind: event.kind,
        provider_event_id: Some(event.id),
        external,
    }))
}

#[async_trait]
impl PaymentProvider for CardAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    async fn create_payment_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError> {
        let success_url = request.return_url.ok_or_else(|| {
            PaymentError::Validation("return_url is required for card checkout".into())
        })?;
        let form = Self::form_for(request, success_url);
        let url = format!("{}/v1/checkout/sessions", self.config.api_url.trim_end_matches('/'));

        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .form(&form)
            .send()
            .await
            .map_err(|e| unavailable("card", e))?;

        let status = resp.status();
        if !status.is_success() {
            let body: Value = resp.json().await.unwrap_or(Value::Null);
            let message = body
                .pointer("/error/message")
                .and_then(Value::as_str)
                .unwrap_or("no error message");
            return Err(unavailable("card", format!("HTTP {status}: {message}")));
        }

        let session: SessionResponse = resp.json().await.map_err(|e| unavailable("card", e))?;
        let checkout_url = session
            .url
            .ok_or_else(|| unavailable("card", "checkout session has no url"))?;

        tracing::info!(
            session_id = %session.id,
            order_number = %request.order.order_number,
            payment_number = %request.payment.payment_number,
            "Card checkout session created"
        );

        let mut artifact = ProviderArtifact::new(ArtifactKind::CheckoutUrl);
        artifact.checkout_url = Some(checkout_url);
        artifact.expires_at = session.expires_at;
        artifact.external = ExternalIds {
            session_id: Some(session.id),
            intent_id: session.payment_intent,
            customer_id: session.customer,
            ..Default::default()
        };
        Ok(artifact)
    }

    fn normalize_inbound(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        self.verify_signature(request)?;
        normalize_event(request.body)
    }

    async fn query_remote_status(
        &self,
        payment: &Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        let Some(session_id) = payment.external.session_id.as_deref() else {
            return Ok(None);
        };
        let url = format!(
            "{}/v1/checkout/sessions/{session_id}",
            self.config.api_url.trim_end_matches('/')
        );
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| unavailable("card", e))?;
        if !resp.status().is_success() {
            return Err(unavailable("card", format!("HTTP {}", resp.status())));
        }
        let session: SessionResponse = resp.json().await.map_err(|e| unavailable("card", e))?;

        let kind = match (session.status.as_deref(), session.payment_status.as_deref()) {
            (Some("complete"), Some("paid" | "no_payment_required")) => SettlementKind::Success,
            (Some("expired"), _) => SettlementKind::Expired,
            _ => return Ok(None),
        };
        let target = session
            .metadata
            .get("payment_number")
            .and_then(Value::as_str)
            .map(|n| PaymentRef::Number(n.to_string()))
            .unwrap_or_else(|| PaymentRef::PaymentId(payment.payment_id.clone()));

        Ok(Some(SettlementEvent {
            method: PaymentMethod::Card,
            target,
            kind,
            provider_event_kind: format!("session.{}", session.status.unwrap_or_default()),
            provider_event_id: None,
            external: ExternalIds {
                session_id: Some(session.id),
                intent_id: session.payment_intent,
                customer_id: session.customer,
                ..Default::default()
            },
        }))
    }
}
