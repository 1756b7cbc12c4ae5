use actix_web::{web, HttpRequest, HttpResponse};

use crate::auth::metrics_authorized;
use crate::metrics;
use crate::state::AppState;

/// GET /health - Health check endpoint
pub async fn health(state: web::Data<AppState>) -> HttpResponse {
    let methods: Vec<&str> = state
        .orchestrator
        .methods()
        .iter()
        .map(|m| m.as_str())
        .collect();

    match state.orchestrator.store().ping() {
        Ok(()) => HttpResponse::Ok().json(serde_json::json!({
            "status": "ok",
            "service": "payrail",
            "version": env!("CARGO_PKG_VERSION"),
            "methods": methods,
        })),
        Err(e) => {
            tracing::error!(error = %e, "Health check: database unreachable");
            HttpResponse::ServiceUnavailable().json(serde_json::json!({
                "status": "degraded",
                "service": "payrail",
                "error": "database unreachable",
            }))
        }
    }
}

/// GET /metrics - Prometheus metrics endpoint
pub async fn metrics_endpoint(req: HttpRequest, state: web::Data<AppState>) -> HttpResponse {
    match metrics_authorized(&req, &state) {
        Ok(()) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(metrics::metrics_output()),
        Err(401) => HttpResponse::Unauthorized().json(serde_json::json!({
            "error": "unauthorized",
            "message": "Valid Bearer token required for /metrics"
        })),
        Err(_) => HttpResponse::Forbidden().json(serde_json::json!({
            "error": "forbidden",
            "message": "Set METRICS_TOKEN or PAYRAIL_PUBLIC_METRICS=true to access /metrics"
        })),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/metrics", web::get().to(metrics_endpoint));
}
