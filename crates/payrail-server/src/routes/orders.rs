use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;

use payrail::orchestrator::CreateOrderRequest;
use payrail::{OrderFilter, OrderStatus, PaymentMethod};

use crate::auth::{require_admin, AuthenticatedUser};
use crate::error::ApiError;
use crate::metrics;
use crate::state::AppState;

const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Deserialize)]
pub struct CreateOrderBody {
    pub plan_id: i64,
    pub method: String,
    pub chain_id: Option<u64>,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundBody {
    /// Operator reference, e.g. a support ticket. Makes the refund idempotent.
    pub reference: Option<String>,
}

/// POST /payments/orders - Create an order and start payment
pub async fn create_order(
    user: AuthenticatedUser,
    body: web::Json<CreateOrderBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    let method: PaymentMethod = body.method.to_uppercase().parse()?;

    let start = std::time::Instant::now();
    let result = state
        .orchestrator
        .create_order(CreateOrderRequest {
            plan_id: body.plan_id,
            user_id: user.user_id,
            method,
            return_url: body.return_url,
            cancel_url: body.cancel_url,
            chain_id: body.chain_id,
        })
        .await;
    metrics::PROVIDER_LATENCY
        .with_label_values(&[method.as_str()])
        .observe(start.elapsed().as_secs_f64());

    let created = match result {
        Ok(created) => {
            metrics::ORDERS_CREATED
                .with_label_values(&[method.as_str(), "created"])
                .inc();
            created
        }
        Err(e) => {
            metrics::ORDERS_CREATED
                .with_label_values(&[method.as_str(), e.kind().code()])
                .inc();
            return Err(e.into());
        }
    };

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "order_id": created.order_id,
        "order_number": created.order_number,
        "payment_id": created.payment_id,
        "payment_number": created.payment_number,
        "artifact": created.artifact,
    })))
}

/// GET /payments/orders/{id} - Order snapshot (order or payment id)
pub async fn get_order(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let snapshot = state
        .orchestrator
        .query_status(&user.user_id, &path.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "order": snapshot.order,
        "payment": snapshot.payment,
    })))
}

/// GET /payments/orders - The caller's orders, newest first
pub async fn list_orders(
    user: AuthenticatedUser,
    query: web::Query<ListQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let query = query.into_inner();
    let status = query
        .status
        .map(|s| s.to_uppercase().parse::<OrderStatus>())
        .transpose()?;
    let page = state.orchestrator.list_orders(
        &user.user_id,
        &OrderFilter {
            status,
            limit: query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: query.offset.unwrap_or(0),
        },
    )?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "orders": page.orders,
        "total": page.total,
        "limit": page.limit,
        "offset": page.offset,
    })))
}

/// POST /payments/orders/{id}/reconcile - Ask the provider for the latest status
pub async fn reconcile_order(
    user: AuthenticatedUser,
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let snapshot = state
        .orchestrator
        .query_status(&user.user_id, &path.into_inner())?;
    let outcome = state
        .orchestrator
        .reconcile(&snapshot.payment.payment_id)
        .await?;
    if let Some(outcome) = &outcome {
        metrics::SETTLEMENTS
            .with_label_values(&[snapshot.payment.method.provider_key(), metrics::outcome_label(outcome)])
            .inc();
    }
    let current = state
        .orchestrator
        .query_status(&user.user_id, &snapshot.order.order_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "outcome": outcome,
        "order": current.order,
        "payment": current.payment,
    })))
}

/// POST /payments/orders/{id}/refund - Record a full refund (admin only)
pub async fn refund_order(
    req: HttpRequest,
    path: web::Path<String>,
    body: Option<web::Json<RefundBody>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let order_id = path.into_inner();
    let reference = body.and_then(|b| b.into_inner().reference);

    let outcome = state.orchestrator.refund(&order_id, reference.as_deref())?;
    metrics::SETTLEMENTS
        .with_label_values(&["manual", metrics::outcome_label(&outcome)])
        .inc();
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "order_id": order_id,
        "outcome": outcome,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/payments/orders")
            .route(web::post().to(create_order))
            .route(web::get().to(list_orders)),
    )
    .service(web::resource("/payments/orders/{id}").route(web::get().to(get_order)))
    .service(web::resource("/payments/orders/{id}/reconcile").route(web::post().to(reconcile_order)))
    .service(web::resource("/payments/orders/{id}/refund").route(web::post().to(refund_order)));
}
