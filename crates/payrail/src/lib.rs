//! Multi-provider payment orchestration.
//!
//! Sells plans through three payment rails and keeps one order/payment
//! state machine in front of all of them:
//!
//! - **Card** ([`CardAdapter`]): hosted checkout sessions, signed webhooks
//! - **Crypto exchange** ([`CryptoExchangeAdapter`]): exchange-hosted QR /
//!   checkout orders, signed notifications
//! - **On-chain** ([`OnchainAdapter`]): direct native transfers on EVM
//!   chains, verified against a time-limited price quote
//!
//! Settlement from any rail funnels through
//! [`Orchestrator::apply_settlement`], which is idempotent per provider
//! event and grants or revokes entitlements in the same store transaction
//! as the status change.
//!
//! # Quick example
//!
//! ```no_run
//! use std::sync::Arc;
//! use payrail::{InMemoryChainReader, Orchestrator, PaymentConfig, Store, SystemClock};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PaymentConfig::from_env()?;
//! let store = Store::open("payments.db")?;
//! let orchestrator = Orchestrator::from_config(
//!     &config,
//!     store,
//!     Arc::new(InMemoryChainReader::new()),
//!     Arc::new(SystemClock),
//! );
//! orchestrator.expire_stale()?;
//! # Ok(())
//! # }
//! ```

// Domain
pub mod constants;
pub mod error;
pub mod model;
pub mod state_machine;

// Persistence and effects
pub mod entitlements;
pub mod store;

// Verification primitives
pub mod security;
pub mod signer;

// External systems
pub mod chain;
pub mod clock;
pub mod price;
pub mod providers;

pub mod config;
pub mod orchestrator;

// Re-exports
pub use chain::{Asset, ChainReader, InMemoryChainReader, RpcChainReader, TxObservation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, PaymentConfig};
pub use constants::Network;
pub use error::{ErrorKind, PaymentError};
pub use model::*;
pub use orchestrator::{CreateOrderRequest, Orchestrator, VerifyRequest};
pub use price::{PriceOracle, StaticPriceOracle};
pub use providers::{
    CardAdapter, CryptoExchangeAdapter, InboundRequest, OnchainAdapter, PaymentProvider,
    ProviderRegistry,
};
pub use store::{OrderFilter, Store};
