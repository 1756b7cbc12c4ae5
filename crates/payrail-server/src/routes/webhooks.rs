//! Provider webhooks.
//!
//! Bodies are taken raw so signatures are checked over the exact bytes
//! received. Only failures a retry could fix get a 5xx; everything else is
//! acknowledged so the provider stops redelivering.

use std::collections::HashMap;

use actix_web::{web, HttpRequest, HttpResponse};
use payrail::{InboundRequest, PaymentError, PaymentMethod, SettlementOutcome};

use crate::metrics;
use crate::state::AppState;

enum Ack {
    Accepted,
    BadSignature,
    Retry,
}

fn lowercase_headers(req: &HttpRequest) -> HashMap<String, String> {
    req.headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
        })
        .collect()
}

fn process(state: &AppState, method: PaymentMethod, req: &HttpRequest, body: &[u8]) -> Ack {
    let provider = method.provider_key();
    let headers = lowercase_headers(req);
    let inbound = InboundRequest {
        body,
        headers: &headers,
        received_at: state.orchestrator.now(),
    };

    match state.orchestrator.handle_inbound(method, &inbound) {
        Ok(Some(outcome)) => {
            metrics::SETTLEMENTS
                .with_label_values(&[provider, metrics::outcome_label(&outcome)])
                .inc();
            if outcome == SettlementOutcome::Duplicate {
                tracing::info!(provider, "Duplicate webhook acknowledged");
            }
            Ack::Accepted
        }
        Ok(None) => Ack::Accepted,
        Err(PaymentError::SignatureInvalid(reason)) => {
            metrics::WEBHOOK_SIGNATURE_FAILURES
                .with_label_values(&[provider])
                .inc();
            tracing::warn!(provider, reason = %reason, "Webhook signature rejected");
            Ack::BadSignature
        }
        Err(e) if e.is_retryable() => {
            metrics::SETTLEMENTS
                .with_label_values(&[provider, "retry"])
                .inc();
            tracing::error!(provider, error = %e, "Webhook processing failed, asking for retry");
            Ack::Retry
        }
        Err(e) => {
            metrics::SETTLEMENTS
                .with_label_values(&[provider, e.kind().code()])
                .inc();
            tracing::warn!(provider, error = %e, "Webhook acknowledged without state change");
            Ack::Accepted
        }
    }
}

/// POST /webhooks/card
pub async fn card_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    match process(&state, PaymentMethod::Card, &req, &body) {
        Ack::Accepted => HttpResponse::Ok().content_type("text/plain").body("ok"),
        Ack::BadSignature => HttpResponse::BadRequest()
            .content_type("text/plain")
            .body("invalid signature"),
        Ack::Retry => HttpResponse::InternalServerError()
            .content_type("text/plain")
            .body("retry"),
    }
}

/// POST /webhooks/crypto-exchange
pub async fn crypto_exchange_webhook(
    req: HttpRequest,
    body: web::Bytes,
    state: web::Data<AppState>,
) -> HttpResponse {
    match process(&state, PaymentMethod::CryptoExchange, &req, &body) {
        Ack::Accepted => HttpResponse::Ok().json(serde_json::json!({
            "returnCode": "SUCCESS",
            "returnMessage": null,
        })),
        Ack::BadSignature => HttpResponse::Unauthorized().json(serde_json::json!({
            "returnCode": "FAIL",
            "returnMessage": "invalid signature",
        })),
        Ack::Retry => HttpResponse::InternalServerError().json(serde_json::json!({
            "returnCode": "FAIL",
            "returnMessage": "temporarily unavailable",
        })),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/webhooks/card", web::post().to(card_webhook))
        .route(
            "/webhooks/crypto-exchange",
            web::post().to(crypto_exchange_webhook),
        );
}
