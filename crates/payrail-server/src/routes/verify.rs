use actix_web::{web, HttpResponse};
use serde::Deserialize;

use payrail::{ErrorKind, PaymentError, VerificationResult, VerifyRequest};

use crate::auth::AuthenticatedUser;
use crate::error::{status_for, ApiError};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VerifyBody {
    pub order_id: String,
    pub tx_hash: String,
    pub from_address: String,
}

/// POST /payments/verify - Check a submitted on-chain transfer
pub async fn verify(
    user: AuthenticatedUser,
    body: web::Json<VerifyBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let order_id = body.order_id.clone();
    let start = std::time::Instant::now();
    let result = state
        .orchestrator
        .verify_onchain(
            &user.user_id,
            VerifyRequest {
                order_id: body.order_id,
                tx_hash: body.tx_hash,
                from_address: body.from_address,
            },
        )
        .await;
    metrics::PROVIDER_LATENCY
        .with_label_values(&["ONCHAIN"])
        .observe(start.elapsed().as_secs_f64());

    match result {
        Ok(verification) => {
            let label = if verification.confirmed { "confirmed" } else { "pending" };
            metrics::ONCHAIN_VERIFICATIONS.with_label_values(&[label]).inc();
            Ok(HttpResponse::Ok().json(verification))
        }
        Err(e) => {
            metrics::ONCHAIN_VERIFICATIONS
                .with_label_values(&[e.kind().code()])
                .inc();
            match rejected_verification(&state, &user.user_id, &order_id, &e) {
                Some(response) => Ok(response),
                None => Err(e.into()),
            }
        }
    }
}

/// A transfer that was checked and refused still answers in the verification
/// shape, so clients read `confirmed` and `required_confirmations` from every
/// outcome. Other failures use the plain error body.
fn rejected_verification(
    state: &AppState,
    user_id: &str,
    order_id: &str,
    err: &PaymentError,
) -> Option<HttpResponse> {
    let kind = err.kind();
    if !matches!(kind, ErrorKind::PriceExpired | ErrorKind::InvalidTransaction) {
        return None;
    }
    let quote = state
        .orchestrator
        .query_status(user_id, order_id)
        .ok()?
        .order
        .onchain?;
    let result = VerificationResult {
        success: false,
        confirmed: false,
        confirmations: 0,
        required_confirmations: state.orchestrator.required_confirmations(quote.chain_id),
        block_number: None,
        gas_used: None,
        gas_price: None,
        error: Some(kind.code().to_string()),
    };
    let mut body = serde_json::to_value(result).ok()?;
    body["message"] = serde_json::json!(err.to_string());
    if let PaymentError::PriceExpired { price_ttl } = err {
        body["price_ttl"] = serde_json::json!(price_ttl);
    }
    Some(HttpResponse::build(status_for(kind)).json(body))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments/verify", web::post().to(verify));
}
