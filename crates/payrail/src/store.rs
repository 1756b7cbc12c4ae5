//! SQLite persistence for plans, orders, payments, chain transactions,
//! entitlements and balances.
//!
//! A single connection sits behind a mutex. Every mutation goes through
//! [`Store::with_tx`], which holds that mutex for the whole of a
//! `BEGIN IMMEDIATE` transaction, so settlement transitions on one payment
//! are linearizable. Reads go through [`Store::read`] and see committed state
//! only.

use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use crate::error::PaymentError;
use crate::model::{
    ChainTransaction, Entitlement, ExternalIds, OnchainQuote, Order, OrderStatus, Payment,
    PaymentMethod, PaymentRef, PaymentStatus, Plan, SettlementKind,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS plans (
    plan_id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    fiat_price INTEGER NOT NULL CHECK (fiat_price >= 0),
    currency TEXT NOT NULL,
    points_amount INTEGER NOT NULL DEFAULT 0 CHECK (points_amount >= 0),
    plan_type TEXT NOT NULL,
    benefits TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS users (
    user_id TEXT PRIMARY KEY,
    points INTEGER NOT NULL DEFAULT 0 CHECK (points >= 0),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS orders (
    order_id TEXT PRIMARY KEY,
    order_number TEXT UNIQUE NOT NULL,
    user_id TEXT NOT NULL,
    plan_id INTEGER NOT NULL REFERENCES plans(plan_id),
    plan_name TEXT NOT NULL,
    plan_type TEXT NOT NULL,
    amount INTEGER NOT NULL,
    currency TEXT NOT NULL,
    points INTEGER NOT NULL,
    benefits TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL,
    method TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    paid_at INTEGER,
    expires_at INTEGER NOT NULL,
    chain_id INTEGER,
    recipient_address TEXT,
    token_amount TEXT,
    token_currency TEXT,
    price_ttl INTEGER,
    exchange_rate TEXT,
    gas_estimate INTEGER
);
CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status, expires_at);

CREATE TABLE IF NOT EXISTS payments (
    payment_id TEXT PRIMARY KEY,
    payment_number TEXT UNIQUE NOT NULL,
    order_id TEXT UNIQUE NOT NULL REFERENCES orders(order_id),
    user_id TEXT NOT NULL,
    method TEXT NOT NULL,
    amount INTEGER NOT NULL,
    currency TEXT NOT NULL,
    status TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    paid_at INTEGER,
    session_id TEXT,
    intent_id TEXT,
    customer_id TEXT,
    prepay_id TEXT,
    transaction_id TEXT,
    tx_hash TEXT
);
CREATE INDEX IF NOT EXISTS idx_payments_session ON payments(session_id);
CREATE INDEX IF NOT EXISTS idx_payments_intent ON payments(intent_id);

CREATE TABLE IF NOT EXISTS transactions (
    tx_hash TEXT PRIMARY KEY,
    order_id TEXT NOT NULL REFERENCES orders(order_id),
    chain_id INTEGER NOT NULL,
    from_address TEXT NOT NULL,
    to_address TEXT NOT NULL,
    amount TEXT NOT NULL,
    currency TEXT NOT NULL,
    block_number INTEGER NOT NULL,
    confirmations INTEGER NOT NULL,
    status TEXT NOT NULL,
    gas_used TEXT,
    gas_price TEXT,
    created_at INTEGER NOT NULL,
    confirmed_at INTEGER
);

CREATE TABLE IF NOT EXISTS entitlements (
    entitlement_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    order_id TEXT NOT NULL REFERENCES orders(order_id),
    kind TEXT NOT NULL,
    value TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER NOT NULL,
    expires_at INTEGER,
    revoked_at INTEGER
);
CREATE INDEX IF NOT EXISTS idx_entitlements_order ON entitlements(order_id);
CREATE INDEX IF NOT EXISTS idx_entitlements_user ON entitlements(user_id);

CREATE TABLE IF NOT EXISTS points_ledger (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id TEXT NOT NULL,
    order_id TEXT NOT NULL,
    delta INTEGER NOT NULL,
    reason TEXT NOT NULL,
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_points_ledger_order ON points_ledger(order_id);

CREATE TABLE IF NOT EXISTS processed_events (
    provider TEXT NOT NULL,
    event_id TEXT NOT NULL,
    payment_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    processed_at INTEGER NOT NULL,
    PRIMARY KEY (provider, event_id)
);
"#;

const ORDER_COLUMNS: &str = "order_id, order_number, user_id, plan_id, plan_name, plan_type, \
     amount, currency, points, benefits, status, method, created_at, updated_at, paid_at, \
     expires_at, chain_id, recipient_address, token_amount, token_currency, price_ttl, \
     exchange_rate, gas_estimate";

const PAYMENT_COLUMNS: &str = "payment_id, payment_number, order_id, user_id, method, amount, \
     currency, status, created_at, expires_at, paid_at, session_id, intent_id, customer_id, \
     prepay_id, transaction_id, tx_hash";

const TRANSACTION_COLUMNS: &str = "tx_hash, order_id, chain_id, from_address, to_address, \
     amount, currency, block_number, confirmations, status, gas_used, gas_price, created_at, \
     confirmed_at";

/// SQLite database wrapper
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &str) -> Result<Self, PaymentError> {
        let conn = Connection::open(path)?;
        // WAL mode for concurrent readers while the writer holds the lock
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, PaymentError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PaymentError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PaymentError> {
        self.conn
            .lock()
            .map_err(|_| PaymentError::Internal("database lock poisoned".to_string()))
    }

    /// Run `f` inside one immediate transaction. Any error rolls back every
    /// write made through the handle.
    pub fn with_tx<T, F>(&self, f: F) -> Result<T, PaymentError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, PaymentError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&StoreTx { conn: &tx })?;
        tx.commit()?;
        Ok(value)
    }

    /// Read committed state. Writes made through the handle are not wrapped
    /// in a transaction, so callers must only read.
    pub fn read<T, F>(&self, f: F) -> Result<T, PaymentError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, PaymentError>,
    {
        let conn = self.lock()?;
        f(&StoreTx { conn: &conn })
    }

    /// Cheap liveness probe for health checks.
    pub fn ping(&self) -> Result<(), PaymentError> {
        let conn = self.lock()?;
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Handle to the connection while a [`Store`] lock is held.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

/// Filter for [`StoreTx::list_orders`].
#[derive(Debug, Clone, Default)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub limit: u32,
    pub offset: u32,
}

impl StoreTx<'_> {
    // -- plans --

    pub fn upsert_plan(&self, plan: &Plan) -> Result<(), PaymentError> {
        self.conn.execute(
            r#"
            INSERT INTO plans (plan_id, name, description, fiat_price, currency, points_amount, plan_type, benefits)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(plan_id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                fiat_price = excluded.fiat_price,
                currency = excluded.currency,
                points_amount = excluded.points_amount,
                plan_type = excluded.plan_type,
                benefits = excluded.benefits
            "#,
            params![
                plan.plan_id,
                plan.name,
                plan.description,
                plan.fiat_price,
                plan.currency,
                plan.points_amount,
                plan.plan_type,
                serde_json::to_string(&plan.benefits)?,
            ],
        )?;
        Ok(())
    }

    pub fn plan(&self, plan_id: i64) -> Result<Option<Plan>, PaymentError> {
        let plan = self
            .conn
            .query_row(
                "SELECT plan_id, name, description, fiat_price, currency, points_amount, plan_type, benefits \
                 FROM plans WHERE plan_id = ?1",
                params![plan_id],
                |row| {
                    Ok(Plan {
                        plan_id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        fiat_price: row.get(3)?,
                        currency: row.get(4)?,
                        points_amount: row.get(5)?,
                        plan_type: row.get(6)?,
                        benefits: json_col(row, 7)?,
                    })
                },
            )
            .optional()?;
        Ok(plan)
    }

    // -- orders and payments --

    pub fn insert_order(&self, order: &Order) -> Result<(), PaymentError> {
        let quote = order.onchain.as_ref();
        self.conn.execute(
            &format!(
                "INSERT INTO orders ({ORDER_COLUMNS}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)"
            ),
            params![
                order.order_id,
                order.order_number,
                order.user_id,
                order.plan_id,
                order.plan_name,
                order.plan_type,
                order.amount,
                order.currency,
                order.points,
                serde_json::to_string(&order.benefits)?,
                order.status.as_str(),
                order.method.as_str(),
                order.created_at,
                order.updated_at,
                order.paid_at,
                order.expires_at,
                quote.map(|q| q.chain_id as i64),
                quote.map(|q| q.recipient_address.as_str()),
                quote.map(|q| q.token_amount.as_str()),
                quote.map(|q| q.currency.as_str()),
                quote.map(|q| q.price_ttl),
                quote.map(|q| q.exchange_rate.as_str()),
                quote.map(|q| q.gas_estimate as i64),
            ],
        )?;
        Ok(())
    }

    pub fn insert_payment(&self, payment: &Payment) -> Result<(), PaymentError> {
        let ids = &payment.external;
        self.conn.execute(
            r#"
            INSERT INTO payments (payment_id, payment_number, order_id, user_id, method, amount,
                currency, status, created_at, updated_at, expires_at, paid_at, session_id,
                intent_id, customer_id, prepay_id, transaction_id, tx_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
            params![
                payment.payment_id,
                payment.payment_number,
                payment.order_id,
                payment.user_id,
                payment.method.as_str(),
                payment.amount,
                payment.currency,
                payment.status.as_str(),
                payment.created_at,
                payment.expires_at,
                payment.paid_at,
                ids.session_id,
                ids.intent_id,
                ids.customer_id,
                ids.prepay_id,
                ids.transaction_id,
                ids.tx_hash,
            ],
        )?;
        Ok(())
    }

    pub fn order(&self, order_id: &str) -> Result<Option<Order>, PaymentError> {
        let order = self
            .conn
            .query_row(
                &format!("SELECT {ORDER_COLUMNS} FROM orders WHERE order_id = ?1"),
                params![order_id],
                order_from_row,
            )
            .optional()?;
        Ok(order)
    }

    pub fn list_orders(
        &self,
        user_id: &str,
        filter: &OrderFilter,
    ) -> Result<Vec<Order>, PaymentError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2) \
             ORDER BY created_at DESC, order_number DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let rows = stmt.query_map(
            params![
                user_id,
                filter.status.map(|s| s.as_str()),
                filter.limit,
                filter.offset
            ],
            order_from_row,
        )?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_orders(
        &self,
        user_id: &str,
        status: Option<OrderStatus>,
    ) -> Result<u64, PaymentError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM orders WHERE user_id = ?1 AND (?2 IS NULL OR status = ?2)",
            params![user_id, status.map(|s| s.as_str())],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn payment_for_order(&self, order_id: &str) -> Result<Option<Payment>, PaymentError> {
        self.payment_where("order_id", order_id)
    }

    pub fn payment(&self, target: &PaymentRef) -> Result<Option<Payment>, PaymentError> {
        match target {
            PaymentRef::Number(n) => self.payment_where("payment_number", n),
            PaymentRef::SessionId(s) => self.payment_where("session_id", s),
            PaymentRef::IntentId(i) => self.payment_where("intent_id", i),
            PaymentRef::PaymentId(p) => self.payment_where("payment_id", p),
        }
    }

    fn payment_where(&self, column: &str, value: &str) -> Result<Option<Payment>, PaymentError> {
        let payment = self
            .conn
            .query_row(
                &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE {column} = ?1 LIMIT 1"),
                params![value],
                payment_from_row,
            )
            .optional()?;
        Ok(payment)
    }

    pub fn set_order_status(
        &self,
        order_id: &str,
        status: OrderStatus,
        paid_at: Option<i64>,
        now: i64,
    ) -> Result<(), PaymentError> {
        let changed = self.conn.execute(
            "UPDATE orders SET status = ?2, paid_at = COALESCE(?3, paid_at), updated_at = ?4 \
             WHERE order_id = ?1",
            params![order_id, status.as_str(), paid_at, now],
        )?;
        if changed == 0 {
            return Err(PaymentError::NotFound(format!("order {order_id}")));
        }
        Ok(())
    }

    pub fn set_payment_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        paid_at: Option<i64>,
        now: i64,
    ) -> Result<(), PaymentError> {
        let changed = self.conn.execute(
            "UPDATE payments SET status = ?2, paid_at = COALESCE(?3, paid_at), updated_at = ?4 \
             WHERE payment_id = ?1",
            params![payment_id, status.as_str(), paid_at, now],
        )?;
        if changed == 0 {
            return Err(PaymentError::NotFound(format!("payment {payment_id}")));
        }
        Ok(())
    }

    /// Record provider ids the payment does not have yet.
    pub fn merge_external_ids(
        &self,
        payment_id: &str,
        ids: &ExternalIds,
        now: i64,
    ) -> Result<(), PaymentError> {
        self.conn.execute(
            r#"
            UPDATE payments SET
                session_id = COALESCE(session_id, ?2),
                intent_id = COALESCE(intent_id, ?3),
                customer_id = COALESCE(customer_id, ?4),
                prepay_id = COALESCE(prepay_id, ?5),
                transaction_id = COALESCE(transaction_id, ?6),
                tx_hash = COALESCE(tx_hash, ?7),
                updated_at = ?8
            WHERE payment_id = ?1
            "#,
            params![
                payment_id,
                ids.session_id,
                ids.intent_id,
                ids.customer_id,
                ids.prepay_id,
                ids.transaction_id,
                ids.tx_hash,
                now,
            ],
        )?;
        Ok(())
    }

    /// Pending orders whose deadline has passed, oldest first. A recorded but
    /// under-confirmed transfer does not hold an order open.
    pub fn stale_pending_orders(&self, now: i64, limit: u32) -> Result<Vec<String>, PaymentError> {
        let mut stmt = self.conn.prepare(
            "SELECT order_id FROM orders WHERE status = 'PENDING' AND expires_at < ?1 \
             ORDER BY expires_at LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![now, limit], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    // -- processed events --

    pub fn event_processed(&self, provider: &str, event_id: &str) -> Result<bool, PaymentError> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM processed_events WHERE provider = ?1 AND event_id = ?2",
                params![provider, event_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn record_event(
        &self,
        provider: &str,
        event_id: &str,
        payment_id: &str,
        kind: SettlementKind,
        now: i64,
    ) -> Result<(), PaymentError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO processed_events (provider, event_id, payment_id, kind, processed_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![provider, event_id, payment_id, kind.as_str(), now],
        )?;
        Ok(())
    }

    // -- chain transactions --

    /// Insert or refresh an observation. The owning order never changes.
    pub fn upsert_transaction(&self, tx: &ChainTransaction) -> Result<(), PaymentError> {
        self.conn.execute(
            &format!(
                "INSERT INTO transactions ({TRANSACTION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                 ON CONFLICT(tx_hash) DO UPDATE SET \
                     block_number = excluded.block_number, \
                     confirmations = excluded.confirmations, \
                     status = excluded.status, \
                     gas_used = excluded.gas_used, \
                     gas_price = excluded.gas_price, \
                     confirmed_at = COALESCE(transactions.confirmed_at, excluded.confirmed_at)"
            ),
            params![
                tx.tx_hash,
                tx.order_id,
                tx.chain_id as i64,
                tx.from_address,
                tx.to_address,
                tx.amount,
                tx.currency,
                tx.block_number as i64,
                tx.confirmations as i64,
                tx.status.as_str(),
                tx.gas_used,
                tx.gas_price,
                tx.created_at,
                tx.confirmed_at,
            ],
        )?;
        Ok(())
    }

    pub fn transaction(&self, tx_hash: &str) -> Result<Option<ChainTransaction>, PaymentError> {
        let tx = self
            .conn
            .query_row(
                &format!("SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE tx_hash = ?1"),
                params![tx_hash],
                |row| {
                    Ok(ChainTransaction {
                        tx_hash: row.get(0)?,
                        order_id: row.get(1)?,
                        chain_id: row.get::<_, i64>(2)? as u64,
                        from_address: row.get(3)?,
                        to_address: row.get(4)?,
                        amount: row.get(5)?,
                        currency: row.get(6)?,
                        block_number: row.get::<_, i64>(7)? as u64,
                        confirmations: row.get::<_, i64>(8)? as u64,
                        status: parse_col(row, 9)?,
                        gas_used: row.get(10)?,
                        gas_price: row.get(11)?,
                        created_at: row.get(12)?,
                        confirmed_at: row.get(13)?,
                    })
                },
            )
            .optional()?;
        Ok(tx)
    }

    // -- users, balances, entitlements --

    pub fn ensure_user(&self, user_id: &str, now: i64) -> Result<(), PaymentError> {
        self.conn.execute(
            "INSERT OR IGNORE INTO users (user_id, points, created_at, updated_at) VALUES (?1, 0, ?2, ?2)",
            params![user_id, now],
        )?;
        Ok(())
    }

    pub fn user_points(&self, user_id: &str) -> Result<i64, PaymentError> {
        let points = self
            .conn
            .query_row(
                "SELECT points FROM users WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(points.unwrap_or(0))
    }

    pub fn set_user_points(&self, user_id: &str, points: i64, now: i64) -> Result<(), PaymentError> {
        self.conn.execute(
            "UPDATE users SET points = ?2, updated_at = ?3 WHERE user_id = ?1",
            params![user_id, points, now],
        )?;
        Ok(())
    }

    pub fn append_points_ledger(
        &self,
        user_id: &str,
        order_id: &str,
        delta: i64,
        reason: &str,
        now: i64,
    ) -> Result<(), PaymentError> {
        self.conn.execute(
            "INSERT INTO points_ledger (user_id, order_id, delta, reason, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, order_id, delta, reason, now],
        )?;
        Ok(())
    }

    /// Net points granted minus revoked for one order.
    pub fn points_net_for_order(&self, order_id: &str) -> Result<i64, PaymentError> {
        let net: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(delta), 0) FROM points_ledger WHERE order_id = ?1",
            params![order_id],
            |row| row.get(0),
        )?;
        Ok(net)
    }

    pub fn insert_entitlement(&self, e: &Entitlement) -> Result<(), PaymentError> {
        self.conn.execute(
            "INSERT INTO entitlements (entitlement_id, user_id, order_id, kind, value, active, created_at, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                e.entitlement_id,
                e.user_id,
                e.order_id,
                e.kind,
                e.value,
                e.active,
                e.created_at,
                e.expires_at,
            ],
        )?;
        Ok(())
    }

    /// Deactivate every active entitlement sourced from `order_id`.
    pub fn deactivate_entitlements(&self, order_id: &str, now: i64) -> Result<usize, PaymentError> {
        let n = self.conn.execute(
            "UPDATE entitlements SET active = 0, revoked_at = ?2 WHERE order_id = ?1 AND active = 1",
            params![order_id, now],
        )?;
        Ok(n)
    }

    pub fn entitlements_for_order(&self, order_id: &str) -> Result<Vec<Entitlement>, PaymentError> {
        self.entitlements_where("order_id", order_id)
    }

    pub fn entitlements_for_user(&self, user_id: &str) -> Result<Vec<Entitlement>, PaymentError> {
        self.entitlements_where("user_id", user_id)
    }

    fn entitlements_where(&self, column: &str, value: &str) -> Result<Vec<Entitlement>, PaymentError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT entitlement_id, user_id, order_id, kind, value, active, created_at, expires_at \
             FROM entitlements WHERE {column} = ?1 ORDER BY created_at, entitlement_id"
        ))?;
        let rows = stmt.query_map(params![value], |row| {
            Ok(Entitlement {
                entitlement_id: row.get(0)?,
                user_id: row.get(1)?,
                order_id: row.get(2)?,
                kind: row.get(3)?,
                value: row.get(4)?,
                active: row.get(5)?,
                created_at: row.get(6)?,
                expires_at: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parse_col<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = PaymentError>,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn json_col<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_error(idx, e))
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<Order> {
    let method: PaymentMethod = parse_col(row, 11)?;
    let chain_id: Option<i64> = row.get(16)?;
    let onchain = match chain_id {
        Some(chain_id) => Some(OnchainQuote {
            chain_id: chain_id as u64,
            recipient_address: row.get::<_, Option<String>>(17)?.unwrap_or_default(),
            token_amount: row.get::<_, Option<String>>(18)?.unwrap_or_default(),
            currency: row.get::<_, Option<String>>(19)?.unwrap_or_default(),
            price_ttl: row.get::<_, Option<i64>>(20)?.unwrap_or_default(),
            exchange_rate: row.get::<_, Option<String>>(21)?.unwrap_or_default(),
            gas_estimate: row.get::<_, Option<i64>>(22)?.unwrap_or_default() as u64,
        }),
        None => None,
    };
    Ok(Order {
        order_id: row.get(0)?,
        order_number: row.get(1)?,
        user_id: row.get(2)?,
        plan_id: row.get(3)?,
        plan_name: row.get(4)?,
        plan_type: row.get(5)?,
        amount: row.get(6)?,
        currency: row.get(7)?,
        points: row.get(8)?,
        benefits: json_col(row, 9)?,
        status: parse_col(row, 10)?,
        method,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
        paid_at: row.get(14)?,
        expires_at: row.get(15)?,
        onchain,
    })
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        payment_id: row.get(0)?,
        payment_number: row.get(1)?,
        order_id: row.get(2)?,
        user_id: row.get(3)?,
        method: parse_col(row, 4)?,
        amount: row.get(5)?,
        currency: row.get(6)?,
        status: parse_col(row, 7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
        paid_at: row.get(10)?,
        external: ExternalIds {
            session_id: row.get(11)?,
            intent_id: row.get(12)?,
            customer_id: row.get(13)?,
            prepay_id: row.get(14)?,
            transaction_id: row.get(15)?,
            tx_hash: row.get(16)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> Plan {
        Plan {
            plan_id: 1,
            name: "Pro".into(),
            description: "Pro monthly".into(),
            fiat_price: 1999,
            currency: "USD".into(),
            points_amount: 500,
            plan_type: "subscription".into(),
            benefits: vec!["points".into(), "premium_access".into()],
        }
    }

    fn order(order_id: &str, number: &str) -> Order {
        Order {
            order_id: order_id.into(),
            order_number: number.into(),
            user_id: "u1".into(),
            plan_id: 1,
            plan_name: "Pro".into(),
            plan_type: "subscription".into(),
            amount: 1999,
            currency: "USD".into(),
            points: 500,
            benefits: vec!["points".into()],
            status: OrderStatus::Pending,
            method: PaymentMethod::Onchain,
            created_at: 100,
            updated_at: 100,
            paid_at: None,
            expires_at: 1000,
            onchain: Some(OnchainQuote {
                chain_id: 11_155_111,
                recipient_address: "0xabc".into(),
                token_amount: "5000000000000000".into(),
                currency: "ETH".into(),
                price_ttl: 1000,
                exchange_rate: "200000".into(),
                gas_estimate: 21_000,
            }),
        }
    }

    fn payment(order_id: &str, number: &str) -> Payment {
        Payment {
            payment_id: format!("p-{order_id}"),
            payment_number: number.into(),
            order_id: order_id.into(),
            user_id: "u1".into(),
            method: PaymentMethod::Onchain,
            amount: 1999,
            currency: "USD".into(),
            status: PaymentStatus::Pending,
            created_at: 100,
            expires_at: 1000,
            paid_at: None,
            external: ExternalIds::default(),
        }
    }

    fn seeded() -> Store {
        let store = Store::open_in_memory().unwrap();
        store
            .with_tx(|tx| {
                tx.upsert_plan(&plan())?;
                tx.insert_order(&order("o1", "ORD-1"))?;
                tx.insert_payment(&payment("o1", "PAY-1"))
            })
            .unwrap();
        store
    }

    #[test]
    fn order_round_trips_with_quote() {
        let store = seeded();
        let loaded = store.read(|tx| tx.order("o1")).unwrap().unwrap();
        assert_eq!(loaded, order("o1", "ORD-1"));
        let by_number = store
            .read(|tx| tx.payment(&PaymentRef::Number("PAY-1".into())))
            .unwrap()
            .unwrap();
        assert_eq!(by_number.order_id, "o1");
    }

    #[test]
    fn failed_closure_rolls_back() {
        let store = seeded();
        let err = store
            .with_tx(|tx| {
                tx.insert_order(&order("o2", "ORD-2"))?;
                Err::<(), _>(PaymentError::ProviderUnavailable("down".into()))
            })
            .unwrap_err();
        assert!(matches!(err, PaymentError::ProviderUnavailable(_)));
        assert!(store.read(|tx| tx.order("o2")).unwrap().is_none());
    }

    #[test]
    fn duplicate_order_number_is_rejected() {
        let store = seeded();
        let err = store
            .with_tx(|tx| tx.insert_order(&order("o3", "ORD-1")))
            .unwrap_err();
        assert!(matches!(err, PaymentError::Database(_)));
    }

    #[test]
    fn external_ids_are_filled_not_replaced() {
        let store = seeded();
        store
            .with_tx(|tx| {
                tx.merge_external_ids(
                    "p-o1",
                    &ExternalIds {
                        session_id: Some("cs_1".into()),
                        ..Default::default()
                    },
                    200,
                )?;
                tx.merge_external_ids(
                    "p-o1",
                    &ExternalIds {
                        session_id: Some("cs_2".into()),
                        ..Default::default()
                    },
                    201,
                )
            })
            .unwrap();
        let p = store
            .read(|tx| tx.payment(&PaymentRef::SessionId("cs_1".into())))
            .unwrap()
            .unwrap();
        assert_eq!(p.external.session_id.as_deref(), Some("cs_1"));
    }

    #[test]
    fn balance_cannot_go_negative() {
        let store = seeded();
        let err = store
            .with_tx(|tx| {
                tx.ensure_user("u1", 1)?;
                tx.set_user_points("u1", -1, 1)
            })
            .unwrap_err();
        assert!(matches!(err, PaymentError::Database(_)));
    }

    #[test]
    fn stale_pending_orders_respects_deadline() {
        let store = seeded();
        assert!(store.read(|tx| tx.stale_pending_orders(999, 10)).unwrap().is_empty());
        assert_eq!(
            store.read(|tx| tx.stale_pending_orders(1001, 10)).unwrap(),
            vec!["o1".to_string()]
        );
    }

    #[test]
    fn processed_events_are_remembered() {
        let store = seeded();
        store
            .with_tx(|tx| tx.record_event("card", "evt_1", "p-o1", SettlementKind::Success, 5))
            .unwrap();
        assert!(store.read(|tx| tx.event_processed("card", "evt_1")).unwrap());
        assert!(!store.read(|tx| tx.event_processed("crypto_exchange", "evt_1")).unwrap());
    }

    #[test]
    fn file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payrail.db");
        let path = path.to_str().unwrap();
        {
            let store = Store::open(path).unwrap();
            store.with_tx(|tx| tx.upsert_plan(&plan())).unwrap();
        }
        let store = Store::open(path).unwrap();
        assert_eq!(store.read(|tx| tx.plan(1)).unwrap().unwrap().points_amount, 500);
    }
}
