//! Order/payment lifecycle.
//!
//! The orchestrator is the only writer of orders and payments. Network I/O
//! (provider calls, chain reads) always happens outside a store transaction;
//! each transaction re-reads the rows it is about to change.

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use serde::Serialize;

use crate::chain::{parse_tx_hash, Asset, ChainReader, TxObservation};
use crate::clock::{Clock, SystemClock};
use crate::config::{OnchainConfig, PaymentConfig};
use crate::constants::Network;
use crate::entitlements;
use crate::error::PaymentError;
use crate::model::{
    ChainTransaction, Entitlement, ExternalIds, Order, OrderCreated, OrderSnapshot, OrderStatus,
    Payment, PaymentMethod, PaymentRef, PaymentStatus, SettlementEvent, SettlementKind,
    SettlementOutcome, TransactionStatus, VerificationResult,
};
use crate::price::{PriceOracle, StaticPriceOracle};
use crate::providers::{
    http_client, CardAdapter, CryptoExchangeAdapter, InboundRequest, IntentRequest,
    OnchainAdapter, PaymentProvider, ProviderRegistry,
};
use crate::state_machine::{plan_transition, Effect, Transition};
use crate::store::{OrderFilter, Store, StoreTx};

/// Orders swept per expiry pass.
const SWEEP_BATCH: u32 = 500;

#[derive(Debug, Clone)]
pub struct CreateOrderRequest {
    pub plan_id: i64,
    pub user_id: String,
    pub method: PaymentMethod,
    pub return_url: Option<String>,
    pub cancel_url: Option<String>,
    pub chain_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct VerifyRequest {
    pub order_id: String,
    pub tx_hash: String,
    pub from_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderPage {
    pub orders: Vec<Order>,
    pub total: u64,
    pub limit: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Benefits {
    pub user_id: String,
    pub points: i64,
    pub entitlements: Vec<Entitlement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInfo {
    pub chain_id: u64,
    pub key: &'static str,
    pub name: &'static str,
    pub symbol: &'static str,
    pub decimals: u32,
    pub testnet: bool,
    pub configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_address: Option<String>,
    pub required_confirmations: u64,
    pub explorer: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotePreview {
    pub plan_id: i64,
    pub chain_id: u64,
    pub fiat_amount: i64,
    pub fiat_currency: String,
    pub currency: String,
    pub recipient_address: String,
    pub token_amount: String,
    pub exchange_rate: String,
    pub gas_estimate: u64,
    pub price_ttl: i64,
}

pub struct Orchestrator {
    store: Store,
    providers: ProviderRegistry,
    chain: Arc<dyn ChainReader>,
    oracle: Arc<dyn PriceOracle>,
    onchain: OnchainConfig,
    clock: Arc<dyn Clock>,
}

fn new_number(prefix: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}-{}", id[..16].to_uppercase())
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn check_url(field: &str, value: Option<&str>) -> Result<(), PaymentError> {
    if let Some(v) = value {
        let parsed = url::Url::parse(v)
            .map_err(|_| PaymentError::Validation(format!("{field} is not a valid URL")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(PaymentError::Validation(format!("{field} must be http(s)")));
        }
    }
    Ok(())
}

impl Orchestrator {
    pub fn new(
        store: Store,
        onchain: OnchainConfig,
        chain: Arc<dyn ChainReader>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            store,
            providers: ProviderRegistry::new(),
            chain,
            oracle,
            onchain,
            clock: Arc::new(SystemClock),
        }
    }

    /// Wire every adapter the configuration enables.
    pub fn from_config(
        config: &PaymentConfig,
        store: Store,
        chain: Arc<dyn ChainReader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let oracle: Arc<dyn PriceOracle> =
            Arc::new(StaticPriceOracle::new(config.price.clone(), clock.clone()));
        let http = http_client();

        let mut orchestrator = Self::new(store, config.onchain.clone(), chain, oracle.clone())
            .with_clock(clock)
            .with_provider(Arc::new(OnchainAdapter::new(config.onchain.clone(), oracle)));
        if let Some(card) = &config.card {
            orchestrator =
                orchestrator.with_provider(Arc::new(CardAdapter::new(card.clone(), http.clone())));
        }
        if let Some(exchange) = &config.exchange {
            orchestrator = orchestrator
                .with_provider(Arc::new(CryptoExchangeAdapter::new(exchange.clone(), http)));
        }
        orchestrator
    }

    pub fn with_provider(mut self, provider: Arc<dyn PaymentProvider>) -> Self {
        self.providers = self.providers.with(provider);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn methods(&self) -> Vec<PaymentMethod> {
        self.providers.methods()
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    // ---------------------------------------------------------------------
    // Create
    // ---------------------------------------------------------------------

    /// Create an order and its payment with the chosen provider.
    ///
    /// The provider call happens first; rows are inserted only once it
    /// succeeds, so a failed or abandoned request leaves nothing behind.
    pub async fn create_order(&self, req: CreateOrderRequest) -> Result<OrderCreated, PaymentError> {
        if req.user_id.trim().is_empty() {
            return Err(PaymentError::Unauthenticated("missing user".into()));
        }
        check_url("return_url", req.return_url.as_deref())?;
        check_url("cancel_url", req.cancel_url.as_deref())?;

        let plan = self
            .store
            .read(|tx| tx.plan(req.plan_id))?
            .ok_or_else(|| PaymentError::NotFound(format!("plan {}", req.plan_id)))?;
        let provider = self.providers.get(req.method)?;
        if req.method == PaymentMethod::Onchain {
            let chain_id = req.chain_id.ok_or_else(|| {
                PaymentError::Validation("chain_id is required for on-chain payments".into())
            })?;
            self.onchain.recipient(chain_id)?;
        }

        let now = self.clock.now();
        let deadline = now + req.method.payment_ttl_secs();
        let mut order = Order {
            order_id: new_id(),
            order_number: new_number("ORD"),
            user_id: req.user_id.clone(),
            plan_id: plan.plan_id,
            plan_name: plan.name.clone(),
            plan_type: plan.plan_type.clone(),
            amount: plan.fiat_price,
            currency: plan.currency.clone(),
            points: plan.points_amount,
            benefits: plan.benefits.clone(),
            status: OrderStatus::Pending,
            method: req.method,
            created_at: now,
            updated_at: now,
            paid_at: None,
            expires_at: deadline,
            onchain: None,
        };
        let mut payment = Payment {
            payment_id: new_id(),
            payment_number: new_number("PAY"),
            order_id: order.order_id.clone(),
            user_id: req.user_id.clone(),
            method: req.method,
            amount: plan.fiat_price,
            currency: plan.currency.clone(),
            status: PaymentStatus::Pending,
            created_at: now,
            expires_at: deadline,
            paid_at: None,
            external: ExternalIds::default(),
        };

        let artifact = provider
            .create_payment_intent(&IntentRequest {
                order: &order,
                payment: &payment,
                plan_description: &plan.description,
                return_url: req.return_url.as_deref(),
                cancel_url: req.cancel_url.as_deref(),
                chain_id: req.chain_id,
            })
            .await
            .map_err(|e| {
                tracing::warn!(
                    method = %req.method,
                    plan_id = req.plan_id,
                    error = %e,
                    "Provider rejected payment creation"
                );
                e
            })?;

        if let Some(provider_deadline) = artifact.expires_at.filter(|t| *t > now) {
            payment.expires_at = payment.expires_at.min(provider_deadline);
            order.expires_at = payment.expires_at;
        }
        order.onchain = artifact.onchain.clone();
        payment.external.merge(&artifact.external);

        self.store.with_tx(|tx| {
            tx.ensure_user(&order.user_id, now)?;
            tx.insert_order(&order)?;
            tx.insert_payment(&payment)
        })?;

        tracing::info!(
            order_id = %order.order_id,
            order_number = %order.order_number,
            payment_number = %payment.payment_number,
            method = %order.method,
            amount = order.amount,
            "Order created"
        );

        Ok(OrderCreated {
            order_id: order.order_id,
            order_number: order.order_number,
            payment_id: payment.payment_id,
            payment_number: payment.payment_number,
            artifact,
        })
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Snapshot by order id or payment id. Orders owned by someone else are
    /// reported as missing.
    pub fn query_status(&self, user_id: &str, id: &str) -> Result<OrderSnapshot, PaymentError> {
        self.store.read(|tx| {
            let order = match tx.order(id)? {
                Some(order) => Some(order),
                None => match tx.payment(&PaymentRef::PaymentId(id.to_string()))? {
                    Some(p) => tx.order(&p.order_id)?,
                    None => None,
                },
            };
            let order = order
                .filter(|o| o.user_id == user_id)
                .ok_or_else(|| PaymentError::NotFound(format!("order {id}")))?;
            let payment = tx
                .payment_for_order(&order.order_id)?
                .ok_or_else(|| PaymentError::Internal(format!("order {} has no payment", order.order_id)))?;
            Ok(OrderSnapshot { order, payment })
        })
    }

    pub fn list_orders(&self, user_id: &str, filter: &OrderFilter) -> Result<OrderPage, PaymentError> {
        let filter = OrderFilter {
            status: filter.status,
            limit: filter.limit.clamp(1, 100),
            offset: filter.offset,
        };
        self.store.read(|tx| {
            Ok(OrderPage {
                orders: tx.list_orders(user_id, &filter)?,
                total: tx.count_orders(user_id, filter.status)?,
                limit: filter.limit,
                offset: filter.offset,
            })
        })
    }

    pub fn transaction(&self, user_id: &str, tx_hash: &str) -> Result<ChainTransaction, PaymentError> {
        let hash = format!("{:#x}", parse_tx_hash(tx_hash)?);
        self.store.read(|tx| {
            let record = tx
                .transaction(&hash)?
                .ok_or_else(|| PaymentError::NotFound(format!("transaction {hash}")))?;
            match tx.order(&record.order_id)? {
                Some(order) if order.user_id == user_id => Ok(record),
                _ => Err(PaymentError::NotFound(format!("transaction {hash}"))),
            }
        })
    }

    pub fn benefits(&self, user_id: &str) -> Result<Benefits, PaymentError> {
        self.store.read(|tx| {
            Ok(Benefits {
                user_id: user_id.to_string(),
                points: tx.user_points(user_id)?,
                entitlements: tx.entitlements_for_user(user_id)?,
            })
        })
    }

    pub fn required_confirmations(&self, chain_id: u64) -> u64 {
        self.onchain.required_confirmations(chain_id)
    }

    pub fn networks(&self) -> Vec<NetworkInfo> {
        Network::ALL
            .into_iter()
            .map(|network| {
                let chain_id = network.chain_id();
                let recipient = self.onchain.recipients.get(&chain_id);
                NetworkInfo {
                    chain_id,
                    key: network.key(),
                    name: network.display_name(),
                    symbol: network.symbol(),
                    decimals: network.decimals(),
                    testnet: network.is_testnet(),
                    configured: recipient.is_some(),
                    recipient_address: recipient.map(|a| a.to_checksum(None)),
                    required_confirmations: self.onchain.required_confirmations(chain_id),
                    explorer: network.explorer_base(),
                }
            })
            .collect()
    }

    /// Price a plan on a chain without creating an order.
    pub async fn quote(&self, plan_id: i64, chain_id: u64) -> Result<QuotePreview, PaymentError> {
        let plan = self
            .store
            .read(|tx| tx.plan(plan_id))?
            .ok_or_else(|| PaymentError::NotFound(format!("plan {plan_id}")))?;
        let (network, recipient) = self.onchain.recipient(chain_id)?;
        let quote = self
            .oracle
            .quote(&plan.currency, network.symbol(), network.decimals(), plan.fiat_price)
            .await?;
        Ok(QuotePreview {
            plan_id,
            chain_id,
            fiat_amount: plan.fiat_price,
            fiat_currency: plan.currency,
            currency: network.symbol().to_string(),
            recipient_address: recipient.to_checksum(None),
            token_amount: quote.token_amount,
            exchange_rate: quote.exchange_rate,
            gas_estimate: quote.gas_estimate,
            price_ttl: quote.price_ttl,
        })
    }

    // ---------------------------------------------------------------------
    // Settlement
    // ---------------------------------------------------------------------

    /// Apply a normalized settlement event. Idempotent per provider event id,
    /// and superseded events leave state unchanged.
    pub fn apply_settlement(&self, event: &SettlementEvent) -> Result<SettlementOutcome, PaymentError> {
        let now = self.clock.now();
        let outcome = self.store.with_tx(|tx| {
            let payment = tx
                .payment(&event.target)?
                .ok_or_else(|| PaymentError::NotFound(format!("payment {}", event.target)))?;
            if payment.method != event.method {
                return Err(PaymentError::Validation(format!(
                    "{} event for {} payment {}",
                    event.method, payment.method, payment.payment_number
                )));
            }
            settle_in_tx(
                tx,
                &payment,
                event.kind,
                event.provider_event_id.as_deref(),
                &event.external,
                now,
            )
        });

        match &outcome {
            Ok(result) => tracing::info!(
                target_ref = %event.target,
                method = %event.method,
                provider_event = %event.provider_event_kind,
                kind = %event.kind,
                outcome = ?result,
                "Settlement applied"
            ),
            Err(e) => tracing::warn!(
                target_ref = %event.target,
                method = %event.method,
                provider_event = %event.provider_event_kind,
                kind = %event.kind,
                error = %e,
                "Settlement rejected"
            ),
        }
        outcome
    }

    /// Verify and apply a raw provider notification. `Ok(None)` when the
    /// notification carries nothing to settle.
    pub fn handle_inbound(
        &self,
        method: PaymentMethod,
        request: &InboundRequest<'_>,
    ) -> Result<Option<SettlementOutcome>, PaymentError> {
        let provider = self.providers.get(method)?;
        match provider.normalize_inbound(request)? {
            Some(event) => self.apply_settlement(&event).map(Some),
            None => Ok(None),
        }
    }

    /// Ask the provider for the payment's status and apply what it reports.
    pub async fn reconcile(&self, payment_id: &str) -> Result<Option<SettlementOutcome>, PaymentError> {
        let payment = self
            .store
            .read(|tx| tx.payment(&PaymentRef::PaymentId(payment_id.to_string())))?
            .ok_or_else(|| PaymentError::NotFound(format!("payment {payment_id}")))?;
        let provider = self.providers.get(payment.method)?;
        match provider.query_remote_status(&payment).await? {
            Some(event) => self.apply_settlement(&event).map(Some),
            None => {
                tracing::debug!(payment_id, "Provider reports payment still open");
                Ok(None)
            }
        }
    }

    /// Record a full refund executed outside the provider webhook flow.
    pub fn refund(&self, order_id: &str, reference: Option<&str>) -> Result<SettlementOutcome, PaymentError> {
        let now = self.clock.now();
        let event_id = reference.map(|r| format!("manual:{r}"));
        let outcome = self.store.with_tx(|tx| {
            let order = tx
                .order(order_id)?
                .ok_or_else(|| PaymentError::NotFound(format!("order {order_id}")))?;
            if order.status != OrderStatus::Paid {
                return Err(PaymentError::StateConflict(format!(
                    "cannot refund {} order",
                    order.status
                )));
            }
            let payment = tx
                .payment_for_order(order_id)?
                .ok_or_else(|| PaymentError::Internal(format!("order {order_id} has no payment")))?;
            settle_in_tx(
                tx,
                &payment,
                SettlementKind::RefundSuccess,
                event_id.as_deref(),
                &ExternalIds::default(),
                now,
            )
        })?;
        tracing::info!(order_id, reference, outcome = ?outcome, "Manual refund recorded");
        Ok(outcome)
    }

    /// Expire pending orders whose deadline has passed. Returns how many
    /// were expired.
    pub fn expire_stale(&self) -> Result<usize, PaymentError> {
        let now = self.clock.now();
        let stale = self.store.read(|tx| tx.stale_pending_orders(now, SWEEP_BATCH))?;
        let mut expired = 0;
        for order_id in stale {
            match self.expire_order(&order_id, now) {
                Ok(SettlementOutcome::Applied { .. }) => expired += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(order_id = %order_id, error = %e, "Failed to expire order"),
            }
        }
        if expired > 0 {
            tracing::info!(expired, "Expired stale orders");
        }
        Ok(expired)
    }

    fn expire_order(&self, order_id: &str, now: i64) -> Result<SettlementOutcome, PaymentError> {
        self.store.with_tx(|tx| {
            let payment = tx
                .payment_for_order(order_id)?
                .ok_or_else(|| PaymentError::NotFound(format!("payment for order {order_id}")))?;
            settle_in_tx(
                tx,
                &payment,
                SettlementKind::Expired,
                None,
                &ExternalIds::default(),
                now,
            )
        })
    }

    // ---------------------------------------------------------------------
    // On-chain verification
    // ---------------------------------------------------------------------

    /// Check a buyer-submitted transaction against the order's quote.
    ///
    /// Under-confirmed transfers are recorded and reported as partial
    /// success; the order is paid once the chain's confirmation threshold is
    /// reached.
    pub async fn verify_onchain(
        &self,
        user_id: &str,
        req: VerifyRequest,
    ) -> Result<VerificationResult, PaymentError> {
        let tx_hash = format!("{:#x}", parse_tx_hash(&req.tx_hash)?);
        let from: Address = req
            .from_address
            .trim()
            .parse()
            .map_err(|_| PaymentError::Validation(format!("invalid from_address: {}", req.from_address)))?;

        let (order, payment, known) = self.store.read(|tx| {
            let order = tx
                .order(&req.order_id)?
                .filter(|o| o.user_id == user_id)
                .ok_or_else(|| PaymentError::NotFound(format!("order {}", req.order_id)))?;
            let payment = tx
                .payment_for_order(&order.order_id)?
                .ok_or_else(|| PaymentError::Internal(format!("order {} has no payment", order.order_id)))?;
            let known = tx.transaction(&tx_hash)?;
            Ok((order, payment, known))
        })?;

        if order.method != PaymentMethod::Onchain {
            return Err(PaymentError::Validation(format!(
                "order {} is a {} order",
                order.order_id, order.method
            )));
        }
        let quote = order
            .onchain
            .clone()
            .ok_or_else(|| PaymentError::Internal(format!("order {} has no quote", order.order_id)))?;
        let required = self.onchain.required_confirmations(quote.chain_id);

        if let Some(known) = &known {
            if known.order_id != order.order_id {
                return Err(PaymentError::InvalidTransaction(
                    "transaction already used for another order".into(),
                ));
            }
        }

        let now = self.clock.now();
        match order.status {
            OrderStatus::Paid if payment.external.tx_hash.as_deref() == Some(tx_hash.as_str()) => {
                let record = known.as_ref();
                return Ok(VerificationResult {
                    success: true,
                    confirmed: true,
                    confirmations: record.map(|r| r.confirmations).unwrap_or(required),
                    required_confirmations: required,
                    block_number: record.map(|r| r.block_number),
                    gas_used: record.and_then(|r| r.gas_used.clone()),
                    gas_price: record.and_then(|r| r.gas_price.clone()),
                    error: None,
                });
            }
            OrderStatus::Pending | OrderStatus::Expired if now > quote.price_ttl => {
                if order.status == OrderStatus::Pending {
                    self.expire_order(&order.order_id, now)?;
                    tracing::info!(
                        order_id = %order.order_id,
                        price_ttl = quote.price_ttl,
                        "Quote expired before verification"
                    );
                }
                return Err(PaymentError::PriceExpired {
                    price_ttl: quote.price_ttl,
                });
            }
            OrderStatus::Pending => {}
            other => {
                return Err(PaymentError::StateConflict(format!("order is {other}")));
            }
        }

        let observation = self.chain.read(quote.chain_id, &tx_hash).await?;
        check_predicate(&observation, &quote, from)?;

        let confirmed = observation.confirmations >= required;
        let record = ChainTransaction {
            tx_hash: tx_hash.clone(),
            order_id: order.order_id.clone(),
            chain_id: observation.chain_id,
            from_address: observation.from.clone(),
            to_address: observation.to.clone().unwrap_or_default(),
            amount: observation.value.clone(),
            currency: observation.currency.clone(),
            block_number: observation.block_number,
            confirmations: observation.confirmations,
            status: if confirmed {
                TransactionStatus::Confirmed
            } else {
                TransactionStatus::Pending
            },
            gas_used: observation.gas_used.clone(),
            gas_price: observation.gas_price.clone(),
            created_at: now,
            confirmed_at: confirmed.then_some(now),
        };

        let outcome = self.store.with_tx(|tx| {
            if let Some(existing) = tx.transaction(&tx_hash)? {
                if existing.order_id != order.order_id {
                    return Err(PaymentError::InvalidTransaction(
                        "transaction already used for another order".into(),
                    ));
                }
            }
            let payment = tx
                .payment_for_order(&order.order_id)?
                .ok_or_else(|| PaymentError::Internal(format!("order {} has no payment", order.order_id)))?;
            tx.upsert_transaction(&record)?;
            if !confirmed {
                return Ok(None);
            }
            let ids = ExternalIds {
                tx_hash: Some(tx_hash.clone()),
                ..Default::default()
            };
            settle_in_tx(tx, &payment, SettlementKind::Success, Some(&tx_hash), &ids, now).map(Some)
        })?;

        tracing::info!(
            order_id = %order.order_id,
            tx_hash = %tx_hash,
            chain_id = quote.chain_id,
            confirmations = observation.confirmations,
            required,
            outcome = ?outcome,
            "On-chain payment verified"
        );

        Ok(VerificationResult {
            success: true,
            confirmed,
            confirmations: observation.confirmations,
            required_confirmations: required,
            block_number: Some(observation.block_number),
            gas_used: observation.gas_used,
            gas_price: observation.gas_price,
            error: (!confirmed).then(|| {
                PaymentError::InsufficientConfirmations {
                    current: observation.confirmations,
                    required,
                }
                .to_string()
            }),
        })
    }
}

/// A transfer settles an order only if every field matches the quote.
fn check_predicate(
    obs: &TxObservation,
    quote: &crate::model::OnchainQuote,
    from: Address,
) -> Result<(), PaymentError> {
    let invalid = |reason: String| Err(PaymentError::InvalidTransaction(reason));

    if !obs.succeeded {
        return invalid("transaction reverted".into());
    }
    if obs.asset != Asset::Native {
        return invalid("only native transfers are accepted".into());
    }
    if obs.chain_id != quote.chain_id {
        return invalid(format!("chain {} does not match {}", obs.chain_id, quote.chain_id));
    }
    let to_matches = obs
        .to
        .as_deref()
        .is_some_and(|to| to.eq_ignore_ascii_case(&quote.recipient_address));
    if !to_matches {
        return invalid("recipient does not match".into());
    }
    let sender: Option<Address> = obs.from.parse().ok();
    if sender != Some(from) {
        return invalid("sender does not match from_address".into());
    }
    let paid = U256::from_str_radix(&obs.value, 10).ok();
    let expected = U256::from_str_radix(&quote.token_amount, 10).ok();
    if paid.is_none() || paid != expected {
        return invalid(format!(
            "amount {} does not equal quoted {}",
            obs.value, quote.token_amount
        ));
    }
    if !obs.currency.eq_ignore_ascii_case(&quote.currency) {
        return invalid(format!("currency {} does not match {}", obs.currency, quote.currency));
    }
    Ok(())
}

/// Apply `kind` to the payment's order inside an open transaction.
fn settle_in_tx(
    tx: &StoreTx<'_>,
    payment: &Payment,
    kind: SettlementKind,
    event_id: Option<&str>,
    external: &ExternalIds,
    now: i64,
) -> Result<SettlementOutcome, PaymentError> {
    let provider = payment.method.provider_key();
    if let Some(id) = event_id {
        if tx.event_processed(provider, id)? {
            return Ok(SettlementOutcome::Duplicate);
        }
    }

    let order = tx
        .order(&payment.order_id)?
        .ok_or_else(|| PaymentError::Internal(format!("payment {} has no order", payment.payment_id)))?;

    let outcome = match plan_transition(order.status, kind)? {
        Transition::Apply {
            order: next,
            payment: payment_status,
            effect,
        } => {
            let paid_at = (next == OrderStatus::Paid).then_some(now);
            tx.set_order_status(&order.order_id, next, paid_at, now)?;
            tx.set_payment_status(&payment.payment_id, payment_status, paid_at, now)?;
            match effect {
                Effect::Grant => {
                    entitlements::grant(tx, &order, now)?;
                }
                Effect::Revoke => {
                    entitlements::revoke(tx, &order, now)?;
                }
                Effect::None => {}
            }
            SettlementOutcome::Applied {
                from: order.status,
                to: next,
            }
        }
        Transition::NoOp(reason) => {
            tracing::debug!(
                order_id = %order.order_id,
                status = %order.status,
                kind = %kind,
                reason,
                "Settlement left state unchanged"
            );
            SettlementOutcome::Unchanged
        }
    };

    tx.merge_external_ids(&payment.payment_id, external, now)?;
    if let Some(id) = event_id {
        tx.record_event(provider, id, &payment.payment_id, kind, now)?;
    }
    Ok(outcome)
}
