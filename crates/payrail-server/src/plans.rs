//! Plan catalogue seeding from a JSON file.

use payrail::{PaymentError, Plan, Store};

/// Read a JSON array of plans.
pub fn load_plans(path: &str) -> Result<Vec<Plan>, PaymentError> {
    let raw = std::fs::read(path)
        .map_err(|e| PaymentError::Internal(format!("cannot read plans file {path}: {e}")))?;
    let plans: Vec<Plan> = serde_json::from_slice(&raw)?;
    for plan in &plans {
        if plan.fiat_price <= 0 {
            return Err(PaymentError::Validation(format!(
                "plan {} has non-positive price",
                plan.plan_id
            )));
        }
        if plan.points_amount < 0 {
            return Err(PaymentError::Validation(format!(
                "plan {} has negative points",
                plan.plan_id
            )));
        }
    }
    Ok(plans)
}

/// Upsert every plan in one transaction.
pub fn seed(store: &Store, plans: &[Plan]) -> Result<usize, PaymentError> {
    store.with_tx(|tx| {
        for plan in plans {
            tx.upsert_plan(plan)?;
        }
        Ok(plans.len())
    })
}
