use actix_governor::{Governor, GovernorConfigBuilder};
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use payrail::{ChainReader, Orchestrator, RpcChainReader, Store, SystemClock};
use payrail_server::{
    cors::build_cors, metrics::register_metrics, plans, routes, state::AppState,
    sweeper::start_expiry_sweeper, ServerConfig,
};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "Configuration loaded");

    let store = match Store::open(&config.db_path) {
        Ok(store) => {
            tracing::info!("Database: SQLite at {}", config.db_path);
            store
        }
        Err(e) => {
            tracing::error!("Failed to open database at {}: {e}", config.db_path);
            std::process::exit(1);
        }
    };

    if let Some(path) = &config.plans_path {
        match plans::load_plans(path).and_then(|p| plans::seed(&store, &p)) {
            Ok(n) => tracing::info!("Seeded {n} plans from {path}"),
            Err(e) => {
                tracing::error!("Failed to seed plans from {path}: {e}");
                std::process::exit(1);
            }
        }
    } else {
        tracing::warn!("PLANS_PATH not set, using plans already in the database");
    }

    let chain: Arc<dyn ChainReader> = match RpcChainReader::new(&config.payment.onchain) {
        Ok(reader) => Arc::new(reader),
        Err(e) => {
            tracing::error!("Failed to build chain reader: {e}");
            std::process::exit(1);
        }
    };

    let orchestrator = Arc::new(Orchestrator::from_config(
        &config.payment,
        store,
        chain,
        Arc::new(SystemClock),
    ));

    if config.payment.card.is_none() {
        tracing::warn!("Card provider disabled (CARD_SECRET_KEY / CARD_WEBHOOK_SECRET not set)");
    }
    if config.payment.exchange.is_none() {
        tracing::warn!("Crypto exchange provider disabled (CRYPTO_EXCHANGE_API_KEY not set)");
    }
    let configured_chains = orchestrator.networks().iter().filter(|n| n.configured).count();
    if configured_chains == 0 {
        tracing::warn!("No ONCHAIN_RECIPIENT_* set, on-chain payments unavailable");
    }
    if config.metrics_token.is_none() && !config.public_metrics {
        tracing::warn!("METRICS_TOKEN not set, /metrics is disabled");
    }
    if config.admin_token.is_none() {
        tracing::warn!("ADMIN_TOKEN not set, admin refunds are disabled");
    }

    register_metrics();
    start_expiry_sweeper(
        Arc::clone(&orchestrator),
        Duration::from_secs(config.sweep_interval_secs),
    );

    let state = web::Data::new(
        AppState::new(orchestrator, config.auth_secret.clone())
            .with_admin_token(config.admin_token.clone())
            .with_metrics(config.metrics_token.clone(), config.public_metrics),
    );

    let port = config.port;
    let allowed_origins = config.allowed_origins.clone();
    let governor_conf = GovernorConfigBuilder::default()
        .requests_per_minute(config.rate_limit_rpm)
        .finish()
        .expect("failed to build rate limiter config");

    tracing::info!("payrail listening on port {port}");
    tracing::info!("Rate limit: {} req/min per IP", config.rate_limit_rpm);
    tracing::info!("  POST http://localhost:{port}/payments/orders");
    tracing::info!("  POST http://localhost:{port}/payments/verify");
    tracing::info!("  POST http://localhost:{port}/webhooks/card");
    tracing::info!("  POST http://localhost:{port}/webhooks/crypto-exchange");

    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .wrap(build_cors(&allowed_origins))
            .wrap(Governor::new(&governor_conf))
            .app_data(state.clone())
            .app_data(web::JsonConfig::default().limit(65_536))
            .configure(routes::configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
