use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::{LazyLock, Once};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static ORDERS_CREATED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("payrail_orders_created_total", "Order creation attempts"),
        &["method", "result"],
    )
    .unwrap()
});

pub static SETTLEMENTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("payrail_settlements_total", "Settlement events by outcome"),
        &["provider", "outcome"],
    )
    .unwrap()
});

pub static WEBHOOK_SIGNATURE_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "payrail_webhook_signature_failures_total",
            "Webhooks rejected for a bad signature",
        ),
        &["provider"],
    )
    .unwrap()
});

pub static ONCHAIN_VERIFICATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("payrail_onchain_verifications_total", "On-chain verify results"),
        &["result"],
    )
    .unwrap()
});

pub static PROVIDER_LATENCY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "payrail_provider_call_duration_seconds",
            "Latency of outbound provider and chain calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
        &["method"],
    )
    .unwrap()
});

static REGISTER: Once = Once::new();

/// Register all metrics with the registry. Safe to call more than once.
pub fn register_metrics() {
    REGISTER.call_once(|| {
        REGISTRY.register(Box::new(ORDERS_CREATED.clone())).unwrap();
        REGISTRY.register(Box::new(SETTLEMENTS.clone())).unwrap();
        REGISTRY
            .register(Box::new(WEBHOOK_SIGNATURE_FAILURES.clone()))
            .unwrap();
        REGISTRY
            .register(Box::new(ONCHAIN_VERIFICATIONS.clone()))
            .unwrap();
        REGISTRY.register(Box::new(PROVIDER_LATENCY.clone())).unwrap();
    });
}

pub fn metrics_output() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Label for a settlement result.
pub fn outcome_label(outcome: &payrail::SettlementOutcome) -> &'static str {
    match outcome {
        payrail::SettlementOutcome::Applied { .. } => "applied",
        payrail::SettlementOutcome::Duplicate => "duplicate",
        payrail::SettlementOutcome::Unchanged => "unchanged",
    }
}
