//! payrail HTTP service.
//!
//! Thin actix-web layer over [`payrail::Orchestrator`]: authentication,
//! request parsing, webhook acknowledgement semantics and metrics. All
//! payment logic lives in the core crate.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (orders, verify, webhooks, catalog, health)
//! - [`auth`]: bearer-token user extractor and admin guard
//! - [`state`]: shared [`AppState`](state::AppState)
//! - [`sweeper`]: background expiry of stale orders
//! - [`metrics`]: Prometheus counters for orders, settlements and webhooks

pub mod auth;
pub mod config;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod plans;
pub mod routes;
pub mod state;
pub mod sweeper;

pub use config::ServerConfig;
pub use error::ApiError;
pub use state::AppState;
