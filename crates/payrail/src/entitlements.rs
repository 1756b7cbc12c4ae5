//! Benefit grants and point balances. Only this module writes to `users`,
//! `entitlements` or `points_ledger`, and only through a caller's transaction.

use crate::constants::PREMIUM_ACCESS_SECS;
use crate::error::PaymentError;
use crate::model::{Entitlement, Order};
use crate::store::StoreTx;

pub const PREMIUM_ACCESS: &str = "premium_access";
pub const POINTS: &str = "points";

/// Result of revoking an order's benefits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Revocation {
    pub deactivated: usize,
    /// Debit actually applied; smaller than requested when the balance was short.
    pub debited: i64,
    pub requested: i64,
}

/// Grant every benefit the order carries and credit its points.
pub fn grant(tx: &StoreTx<'_>, order: &Order, now: i64) -> Result<Vec<Entitlement>, PaymentError> {
    tx.ensure_user(&order.user_id, now)?;

    let mut granted = Vec::with_capacity(order.benefits.len());
    for kind in &order.benefits {
        let (value, expires_at) = match kind.as_str() {
            PREMIUM_ACCESS => ("true".to_string(), Some(now + PREMIUM_ACCESS_SECS)),
            POINTS => (order.points.to_string(), None),
            _ => (order.plan_type.clone(), None),
        };
        let entitlement = Entitlement {
            entitlement_id: uuid::Uuid::new_v4().simple().to_string(),
            user_id: order.user_id.clone(),
            order_id: order.order_id.clone(),
            kind: kind.clone(),
            value,
            active: true,
            created_at: now,
            expires_at,
        };
        tx.insert_entitlement(&entitlement)?;
        granted.push(entitlement);
    }

    if order.points > 0 {
        let balance = tx.user_points(&order.user_id)?;
        tx.set_user_points(&order.user_id, balance + order.points, now)?;
        tx.append_points_ledger(&order.user_id, &order.order_id, order.points, "grant", now)?;
    }

    tracing::info!(
        order_id = %order.order_id,
        user_id = %order.user_id,
        points = order.points,
        benefits = granted.len(),
        "Entitlements granted"
    );
    Ok(granted)
}

/// Deactivate the order's entitlements and debit its points, clamped at zero.
pub fn revoke(tx: &StoreTx<'_>, order: &Order, now: i64) -> Result<Revocation, PaymentError> {
    tx.ensure_user(&order.user_id, now)?;
    let deactivated = tx.deactivate_entitlements(&order.order_id, now)?;

    let requested = order.points.max(0);
    let balance = tx.user_points(&order.user_id)?;
    let debited = requested.min(balance);
    if debited < requested {
        tracing::warn!(
            order_id = %order.order_id,
            user_id = %order.user_id,
            requested,
            applied = debited,
            "Refund debit clamped at zero balance"
        );
    }
    if debited > 0 {
        tx.set_user_points(&order.user_id, balance - debited, now)?;
    }
    if requested > 0 {
        // Journal the full reversal so grants and revocations net to zero.
        tx.append_points_ledger(&order.user_id, &order.order_id, -requested, "revoke", now)?;
    }

    tracing::info!(
        order_id = %order.order_id,
        user_id = %order.user_id,
        deactivated,
        debited,
        "Entitlements revoked"
    );
    Ok(Revocation {
        deactivated,
        debited,
        requested,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{OrderStatus, PaymentMethod, Plan};
    use crate::store::Store;

    fn setup() -> (Store, Order) {
        let store = Store::open_in_memory().unwrap();
        let order = Order {
            order_id: "o1".into(),
            order_number: "ORD-1".into(),
            user_id: "u1".into(),
            plan_id: 1,
            plan_name: "Pro".into(),
            plan_type: "subscription".into(),
            amount: 1999,
            currency: "USD".into(),
            points: 500,
            benefits: vec![POINTS.into(), PREMIUM_ACCESS.into()],
            status: OrderStatus::Pending,
            method: PaymentMethod::Card,
            created_at: 0,
            updated_at: 0,
            paid_at: None,
            expires_at: 100,
            onchain: None,
        };
        store
            .with_tx(|tx| {
                tx.upsert_plan(&Plan {
                    plan_id: 1,
                    name: "Pro".into(),
                    description: String::new(),
                    fiat_price: 1999,
                    currency: "USD".into(),
                    points_amount: 500,
                    plan_type: "subscription".into(),
                    benefits: order.benefits.clone(),
                })?;
                tx.insert_order(&order)
            })
            .unwrap();
        (store, order)
    }

    #[test]
    fn grant_credits_points_and_premium_window() {
        let (store, order) = setup();
        let granted = store.with_tx(|tx| grant(tx, &order, 1_000)).unwrap();
        assert_eq!(granted.len(), 2);
        let premium = granted.iter().find(|e| e.kind == PREMIUM_ACCESS).unwrap();
        assert_eq!(premium.expires_at, Some(1_000 + 30 * 86_400));
        assert_eq!(store.read(|tx| tx.user_points("u1")).unwrap(), 500);
        assert_eq!(store.read(|tx| tx.points_net_for_order("o1")).unwrap(), 500);
    }

    #[test]
    fn revoke_clamps_at_zero_and_nets_ledger() {
        let (store, order) = setup();
        store.with_tx(|tx| grant(tx, &order, 1_000)).unwrap();
        // Points spent elsewhere before the refund lands.
        store.with_tx(|tx| tx.set_user_points("u1", 200, 1_001)).unwrap();

        let revocation = store.with_tx(|tx| revoke(tx, &order, 1_002)).unwrap();
        assert_eq!(revocation.debited, 200);
        assert_eq!(revocation.requested, 500);
        assert_eq!(revocation.deactivated, 2);
        assert_eq!(store.read(|tx| tx.user_points("u1")).unwrap(), 0);
        assert_eq!(store.read(|tx| tx.points_net_for_order("o1")).unwrap(), 0);
        assert!(store
            .read(|tx| tx.entitlements_for_order("o1"))
            .unwrap()
            .iter()
            .all(|e| !e.active));
    }
}
