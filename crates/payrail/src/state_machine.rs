//! Order/payment transition table.
//!
//! Pure: given the current order status and a normalized settlement kind,
//! decide what (if anything) changes. The orchestrator applies the result
//! inside the same transaction that re-read the status.

use crate::error::PaymentError;
use crate::model::{OrderStatus, PaymentStatus, SettlementKind};

/// Side effect bundled with a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    None,
    Grant,
    Revoke,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply {
        order: OrderStatus,
        payment: PaymentStatus,
        effect: Effect,
    },
    /// State stays as is; the reason is for logs.
    NoOp(&'static str),
}

pub fn plan_transition(
    current: OrderStatus,
    kind: SettlementKind,
) -> Result<Transition, PaymentError> {
    use OrderStatus as O;
    use SettlementKind as K;

    let transition = match (current, kind) {
        (_, K::Informational) => Transition::NoOp("informational event"),

        (O::Pending, K::Success) => Transition::Apply {
            order: O::Paid,
            payment: PaymentStatus::Paid,
            effect: Effect::Grant,
        },
        (O::Pending, K::Expired) => Transition::Apply {
            order: O::Expired,
            payment: PaymentStatus::Expired,
            effect: Effect::None,
        },
        (O::Pending, K::Failed) => Transition::Apply {
            order: O::Canceled,
            payment: PaymentStatus::Failed,
            effect: Effect::None,
        },
        (O::Pending, K::RefundSuccess) => {
            return Err(PaymentError::StateConflict(
                "refund for an order that was never paid".into(),
            ))
        }

        (O::Paid, K::Success) => Transition::NoOp("already paid"),
        (O::Paid, K::RefundSuccess) => Transition::Apply {
            order: O::Refunded,
            payment: PaymentStatus::Refunded,
            effect: Effect::Revoke,
        },
        (O::Paid, K::Expired | K::Failed) => Transition::NoOp("superseded by payment"),

        (O::Refunded, K::RefundSuccess) => Transition::NoOp("already refunded"),
        (O::Refunded | O::Expired | O::Canceled, K::Success) => {
            return Err(PaymentError::StateConflict(format!(
                "payment success for {current} order"
            )))
        }
        (O::Expired | O::Canceled, K::RefundSuccess) => {
            return Err(PaymentError::StateConflict(format!(
                "refund for {current} order"
            )))
        }
        (O::Refunded | O::Expired | O::Canceled, K::Expired | K::Failed) => {
            Transition::NoOp("order already closed")
        }
    };

    if let Transition::Apply { order, .. } = transition {
        debug_assert!(current.can_transition_to(order));
    }
    Ok(transition)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Canceled,
        OrderStatus::Expired,
        OrderStatus::Refunded,
    ];

    const ALL_KINDS: [SettlementKind; 5] = [
        SettlementKind::Success,
        SettlementKind::Expired,
        SettlementKind::Failed,
        SettlementKind::RefundSuccess,
        SettlementKind::Informational,
    ];

    #[test]
    fn pending_success_grants() {
        assert_eq!(
            plan_transition(OrderStatus::Pending, SettlementKind::Success).unwrap(),
            Transition::Apply {
                order: OrderStatus::Paid,
                payment: PaymentStatus::Paid,
                effect: Effect::Grant,
            }
        );
    }

    #[test]
    fn failure_cancels_order_and_fails_payment() {
        assert_eq!(
            plan_transition(OrderStatus::Pending, SettlementKind::Failed).unwrap(),
            Transition::Apply {
                order: OrderStatus::Canceled,
                payment: PaymentStatus::Failed,
                effect: Effect::None,
            }
        );
    }

    #[test]
    fn late_success_after_expiry_conflicts() {
        let err = plan_transition(OrderStatus::Expired, SettlementKind::Success).unwrap_err();
        assert!(matches!(err, PaymentError::StateConflict(_)));
    }

    #[test]
    fn success_never_resurrects_refunded_order() {
        assert!(plan_transition(OrderStatus::Refunded, SettlementKind::Success).is_err());
    }

    #[test]
    fn refund_requires_paid() {
        assert!(plan_transition(OrderStatus::Pending, SettlementKind::RefundSuccess).is_err());
        assert!(matches!(
            plan_transition(OrderStatus::Paid, SettlementKind::RefundSuccess).unwrap(),
            Transition::Apply {
                effect: Effect::Revoke,
                ..
            }
        ));
    }

    #[test]
    fn superseded_events_are_noops() {
        for kind in [SettlementKind::Expired, SettlementKind::Failed, SettlementKind::Success] {
            assert!(matches!(
                plan_transition(OrderStatus::Paid, kind).unwrap(),
                Transition::NoOp(_)
            ));
        }
    }

    #[test]
    fn every_applied_transition_follows_the_dag() {
        for status in ALL_STATUSES {
            for kind in ALL_KINDS {
                if let Ok(Transition::Apply { order, .. }) = plan_transition(status, kind) {
                    assert!(status.can_transition_to(order), "{status} -> {order}");
                }
            }
        }
    }
}
