//! Centralized crypto-exchange checkout (QR code / hosted URL).
//!
//! Every request and notification is signed with [`signer::sign`] over the
//! exact JSON bytes sent or received.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{unavailable, InboundRequest, IntentRequest, PaymentProvider};
use crate::config::ExchangeConfig;
use crate::error::PaymentError;
use crate::model::{
    fiat_major, ArtifactKind, ExternalIds, Payment, PaymentMethod, PaymentRef, ProviderArtifact,
    SettlementEvent, SettlementKind,
};
use crate::signer;

const CREATE_ORDER_PATH: &str = "/binancepay/openapi/v2/order";
const QUERY_ORDER_PATH: &str = "/binancepay/openapi/v2/order/query";

/// Virtual goods.
const GOODS_TYPE_VIRTUAL: &str = "02";
/// Digital content.
const GOODS_CATEGORY_DIGITAL: &str = "D000";

const TIMESTAMP_HEADERS: &[&str] = &["BinancePay-Timestamp", "Timestamp"];
const NONCE_HEADERS: &[&str] = &["BinancePay-Nonce", "Nonce"];
const SIGNATURE_HEADERS: &[&str] = &["BinancePay-Signature", "Signature"];
const CERTIFICATE_HEADERS: &[&str] = &["BinancePay-Certificate-SN", "Certificate-SN"];

pub struct CryptoExchangeAdapter {
    config: ExchangeConfig,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiEnvelope {
    status: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedOrder {
    prepay_id: String,
    qrcode_link: Option<String>,
    qr_content: Option<String>,
    checkout_url: Option<String>,
    deeplink: Option<String>,
    universal_url: Option<String>,
    /// Milliseconds.
    expire_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Notification {
    biz_type: String,
    biz_status: String,
    #[serde(default)]
    biz_id: Option<Value>,
    #[serde(default)]
    biz_id_str: Option<String>,
    /// A JSON-encoded string in production, an object in some sandboxes.
    data: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NotificationData {
    merchant_trade_no: Option<String>,
    prepay_id: Option<Value>,
    transaction_id: Option<String>,
}

impl CryptoExchangeAdapter {
    pub fn new(config: ExchangeConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    /// Build the create-order body. Amount is in major units with two decimals.
    pub fn order_body(request: &IntentRequest<'_>) -> Value {
        let order = request.order;
        let mut body = json!({
            "env": { "terminalType": "WEB" },
            "merchantTradeNo": request.payment.payment_number,
            "tradeType": "WEB",
            "orderAmount": fiat_major(order.amount),
            "currency": "USD",
            "goods": {
                "goodsType": GOODS_TYPE_VIRTUAL,
                "goodsCategory": GOODS_CATEGORY_DIGITAL,
                "referenceGoodsId": order.plan_id.to_string(),
                "goodsName": order.plan_name,
            },
        });
        if let Some(url) = request.return_url {
            body["returnUrl"] = json!(url);
        }
        if let Some(url) = request.cancel_url {
            body["cancelUrl"] = json!(url);
        }
        body
    }

    async fn call(&self, path: &str, body: &Value) -> Result<Value, PaymentError> {
        let payload = serde_json::to_vec(body)?;
        let timestamp = chrono::Utc::now().timestamp_millis().to_string();
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        let signature = signer::sign(
            self.config.api_secret.as_bytes(),
            &timestamp,
            &nonce,
            &payload,
        );

        let url = format!("{}{path}", self.config.api_url.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .header("BinancePay-Timestamp", &timestamp)
            .header("BinancePay-Nonce", &nonce)
            .header("BinancePay-Certificate-SN", &self.config.api_key)
            .header("BinancePay-Signature", &signature)
            .body(payload)
            .send()
            .await
            .map_err(|e| unavailable("crypto_exchange", e))?;

        let http_status = resp.status();
        let envelope: ApiEnvelope = resp
            .json()
            .await
            .map_err(|e| unavailable("crypto_exchange", format!("HTTP {http_status}: {e}")))?;
        if envelope.status != "SUCCESS" {
            return Err(unavailable(
                "crypto_exchange",
                format!(
                    "{} ({})",
                    envelope.error_message.unwrap_or_else(|| "request failed".into()),
                    envelope.code.unwrap_or_default()
                ),
            ));
        }
        Ok(envelope.data)
    }

    fn verify_signature(&self, request: &InboundRequest<'_>) -> Result<(), PaymentError> {
        let missing = |what: &str| PaymentError::SignatureInvalid(format!("missing {what} header"));
        let timestamp = request.header(TIMESTAMP_HEADERS).ok_or_else(|| missing("timestamp"))?;
        let nonce = request.header(NONCE_HEADERS).ok_or_else(|| missing("nonce"))?;
        let signature = request.header(SIGNATURE_HEADERS).ok_or_else(|| missing("signature"))?;

        if !signer::verify(
            self.config.api_secret.as_bytes(),
            timestamp,
            nonce,
            request.body,
            signature,
        ) {
            return Err(PaymentError::SignatureInvalid(
                "crypto exchange signature mismatch".into(),
            ));
        }
        if let Some(cert) = request.header(CERTIFICATE_HEADERS) {
            tracing::debug!(certificate_sn = cert, "Exchange notification verified");
        }
        Ok(())
    }
}

fn value_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Translate a verified notification into a settlement event.
pub fn normalize_notification(body: &[u8]) -> Result<Option<SettlementEvent>, PaymentError> {
    let note: Notification = serde_json::from_slice(body)?;
    let data: NotificationData = match &note.data {
        Value::String(s) => serde_json::from_str(s)?,
        Value::Object(_) => serde_json::from_value(note.data.clone())?,
        _ => NotificationData::default(),
    };

    let kind = match (note.biz_type.as_str(), note.biz_status.as_str()) {
        ("PAY", "PAY_SUCCESS") => SettlementKind::Success,
        ("PAY", "PAY_CLOSED") => SettlementKind::Expired,
        ("REFUND" | "PAY_REFUND", "REFUND_SUCCESS") => SettlementKind::RefundSuccess,
        (biz_type, biz_status) => {
            tracing::info!(biz_type, biz_status, "Unhandled crypto exchange notification");
            return Ok(None);
        }
    };

    let merchant_trade_no = data.merchant_trade_no.ok_or_else(|| {
        PaymentError::Validation("notification without merchantTradeNo".into())
    })?;
    let biz_id = note
        .biz_id_str
        .filter(|s| !s.is_empty())
        .or_else(|| note.biz_id.as_ref().and_then(value_to_string));

    Ok(Some(SettlementEvent {
        method: PaymentMethod::CryptoExchange,
        target: PaymentRef::Number(merchant_trade_no),
        kind,
        provider_event_kind: format!("{}/{}", note.biz_type, note.biz_status),
        // One bizId spans several statuses of the same order.
        provider_event_id: biz_id.map(|id| format!("{id}:{}", note.biz_status)),
        external: ExternalIds {
            prepay_id: data.prepay_id.as_ref().and_then(value_to_string),
            transaction_id: data.transaction_id,
            ..Default::default()
        },
    }))
}

#[async_trait]
impl PaymentProvider for CryptoExchangeAdapter {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::CryptoExchange
    }

    async fn create_payment_intent(
        &self,
        request: &IntentRequest<'_>,
    ) -> Result<ProviderArtifact, PaymentError> {
        let body = Self::order_body(request);
        let data = self.call(CREATE_ORDER_PATH, &body).await?;
        let created: CreatedOrder =
            serde_json::from_value(data).map_err(|e| unavailable("crypto_exchange", e))?;

        tracing::info!(
            prepay_id = %created.prepay_id,
            order_number = %request.order.order_number,
            payment_number = %request.payment.payment_number,
            "Crypto exchange order created"
        );

        let mut artifact = ProviderArtifact::new(ArtifactKind::QrCode);
        artifact.external.prepay_id = Some(created.prepay_id);
        artifact.qrcode_link = created.qrcode_link;
        artifact.qr_content = created.qr_content;
        artifact.checkout_url = created.checkout_url;
        artifact.deeplink = created.deeplink;
        artifact.universal_url = created.universal_url;
        artifact.expires_at = created.expire_time.map(|ms| ms / 1000);
        Ok(artifact)
    }

    fn normalize_inbound(
        &self,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        self.verify_signature(request)?;
        normalize_notification(request.body)
    }

    async fn query_remote_status(
        &self,
        payment: &Payment,
    ) -> Result<Option<SettlementEvent>, PaymentError> {
        let body = match payment.external.prepay_id.as_deref() {
            Some(prepay_id) => json!({ "prepayId": prepay_id }),
            None => json!({ "merchantTradeNo": payment.payment_number }),
        };
        let data = self.call(QUERY_ORDER_PATH, &body).await?;
        let status = data.get("status").and_then(Value::as_str).unwrap_or("");

        let kind = match status {
            "PAID" => SettlementKind::Success,
            "CANCELED" | "EXPIRED" => SettlementKind::Expired,
            "REFUNDED" | "FULL_REFUNDED" => SettlementKind::RefundSuccess,
            _ => return Ok(None),
        };

        Ok(Some(SettlementEvent {
            method: PaymentMethod::CryptoExchange,
            target: PaymentRef::Number(payment.payment_number.clone()),
            kind,
            provider_event_kind: format!("query/{status}"),
            provider_event_id: None,
            external: ExternalIds {
                prepay_id: data.get("prepayId").and_then(value_to_string),
                transaction_id: data.get("transactionId").and_then(value_to_string),
                ..Default::default()
            },
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Order, OrderStatus, PaymentStatus};
    use std::collections::HashMap;

    const SECRET: &str = "exchange-secret";

    fn adapter() -> CryptoExchangeAdapter {
        CryptoExchangeAdapter::new(
            ExchangeConfig {
                api_key: "cert-sn".into(),
                api_secret: SECRET.into(),
                api_url: "http://127.0.0.1:1".into(),
            },
            reqwest::Client::new(),
        )
    }

    fn success_body() -> Vec<u8> {
        let data = json!({ "merchantTradeNo": "PAY-1", "transactionId": "T-9", "prepayId": 42 });
        serde_json::to_vec(&json!({
            "bizType": "PAY",
            "bizIdStr": "29383937493038367292",
            "bizStatus": "PAY_SUCCESS",
            "data": data.to_string(),
        }))
        .unwrap()
    }

    fn headers(body: &[u8], ts: &str, nonce: &str) -> HashMap<String, String> {
        HashMap::from([
            ("binancepay-timestamp".to_string(), ts.to_string()),
            ("binancepay-nonce".to_string(), nonce.to_string()),
            (
                "binancepay-signature".to_string(),
                signer::sign(SECRET.as_bytes(), ts, nonce, body),
            ),
            ("binancepay-certificate-sn".to_string(), "cert".to_string()),
        ])
    }

    #[test]
    fn signed_success_notification_is_accepted() {
        let body = success_body();
        let headers = headers(&body, "1700000000000", "nonce1");
        let event = adapter()
            .normalize_inbound(&InboundRequest {
                body: &body,
                headers: &headers,
                received_at: 0,
            })
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, SettlementKind::Success);
        assert_eq!(event.target, PaymentRef::Number("PAY-1".into()));
        assert_eq!(event.external.prepay_id.as_deref(), Some("42"));
        assert_eq!(
            event.provider_event_id.as_deref(),
            Some("29383937493038367292:PAY_SUCCESS")
        );
    }

    #[test]
    fn altered_byte_is_rejected() {
        let body = success_body();
        let headers = headers(&body, "1700000000000", "nonce1");
        let mut tampered = body.clone();
        let last = tampered.len() - 2;
        tampered[last] ^= 0x01;
        let err = adapter()
            .normalize_inbound(&InboundRequest {
                body: &tampered,
                headers: &headers,
                received_at: 0,
            })
            .unwrap_err();
        assert!(matches!(err, PaymentError::SignatureInvalid(_)));
    }

    #[test]
    fn bare_header_names_are_accepted() {
        let body = success_body();
        let sig = signer::sign(SECRET.as_bytes(), "1", "n", &body);
        let headers = HashMap::from([
            ("timestamp".to_string(), "1".to_string()),
            ("nonce".to_string(), "n".to_string()),
            ("signature".to_string(), sig),
        ]);
        assert!(adapter()
            .normalize_inbound(&InboundRequest {
                body: &body,
                headers: &headers,
                received_at: 0,
            })
            .is_ok());
    }

    #[test]
    fn closed_and_refund_map_to_settlement_kinds() {
        let closed = serde_json::to_vec(&json!({
            "bizType": "PAY", "bizId": 7, "bizStatus": "PAY_CLOSED",
            "data": { "merchantTradeNo": "PAY-1" }
        }))
        .unwrap();
        let event = normalize_notification(&closed).unwrap().unwrap();
        assert_eq!(event.kind, SettlementKind::Expired);
        assert_eq!(event.provider_event_id.as_deref(), Some("7:PAY_CLOSED"));

        let refund = serde_json::to_vec(&json!({
            "bizType": "REFUND", "bizStatus": "REFUND_SUCCESS",
            "data": "{\"merchantTradeNo\":\"PAY-1\"}"
        }))
        .unwrap();
        let event = normalize_notification(&refund).unwrap().unwrap();
        assert_eq!(event.kind, SettlementKind::RefundSuccess);
        assert_eq!(event.provider_event_id, None);
    }

    #[test]
    fn order_body_uses_major_units_and_digital_goods() {
        let order = Order {
            order_id: "o1".into(),
            order_number: "ORD-1".into(),
            user_id: "u1".into(),
            plan_id: 3,
            plan_name: "Pro".into(),
            plan_type: "subscription".into(),
            amount: 1999,
            currency: "USD".into(),
            points: 500,
            benefits: vec![],
            status: OrderStatus::Pending,
            method: PaymentMethod::CryptoExchange,
            created_at: 0,
            updated_at: 0,
            paid_at: None,
            expires_at: 3600,
            onchain: None,
        };
        let payment = Payment {
            payment_id: "p1".into(),
            payment_number: "PAY-1".into(),
            order_id: "o1".into(),
            user_id: "u1".into(),
            method: PaymentMethod::CryptoExchange,
            amount: 1999,
            currency: "USD".into(),
            status: PaymentStatus::Pending,
            created_at: 0,
            expires_at: 3600,
            paid_at: None,
            external: ExternalIds::default(),
        };
        let body = CryptoExchangeAdapter::order_body(&IntentRequest {
            order: &order,
            payment: &payment,
            plan_description: "",
            return_url: Some("https://shop.example/ok"),
            cancel_url: None,
            chain_id: None,
        });
        assert_eq!(body["orderAmount"], "19.99");
        assert_eq!(body["merchantTradeNo"], "PAY-1");
        assert_eq!(body["env"]["terminalType"], "WEB");
        assert_eq!(body["goods"]["goodsType"], "02");
        assert_eq!(body["goods"]["goodsCategory"], "D000");
        assert_eq!(body["goods"]["referenceGoodsId"], "3");
        assert_eq!(body["returnUrl"], "https://shop.example/ok");
        assert!(body.get("cancelUrl").is_none());
    }
}
