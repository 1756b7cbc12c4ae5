use actix_web::{web, HttpResponse};
use serde::Deserialize;

use crate::auth::AuthenticatedUser;
use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PriceBody {
    pub plan_id: i64,
    pub chain_id: u64,
}

/// GET /payments/networks - Supported chains and whether each can take payments
pub async fn networks(state: web::Data<AppState>) -> HttpResponse {
    let networks = state.orchestrator.networks();
    HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "count": networks.len(),
        "networks": networks,
    }))
}

/// POST /payments/price - Quote a plan on a chain without creating an order
pub async fn price(
    _user: AuthenticatedUser,
    body: web::Json<PriceBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let quote = state.orchestrator.quote(body.plan_id, body.chain_id).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "quote": quote,
    })))
}

/// GET /payments/benefits - The caller's points and entitlements
pub async fn benefits(
    user: AuthenticatedUser,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let benefits = state.orchestrator.benefits(&user.user_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "points": benefits.points,
        "entitlements": benefits.entitlements,
    })))
}

/// GET /payments/transactions/{tx_hash} - A recorded on-chain transfer
pub async fn transaction(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let record = state
        .orchestrator
        .transaction(&user.user_id, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "transaction": record,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/payments/networks", web::get().to(networks))
        .route("/payments/price", web::post().to(price))
        .route("/payments/benefits", web::get().to(benefits))
        .route("/payments/transactions/{tx_hash}", web::get().to(transaction));
}
