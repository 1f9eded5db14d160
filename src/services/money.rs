//! Fixed-point money rules shared by the order and payment services.
//!
//! Every amount is a [`Decimal`] carrying at most two fractional digits, so the
//! installment checks compare exactly instead of against a tolerance.

use crate::errors::ServiceError;
use rust_decimal::{Decimal, RoundingStrategy};
use validator::ValidationError;

/// Fractional digits kept on every monetary value.
pub const MONEY_SCALE: u32 = 2;

/// Rounds half away from zero to two places and pins the scale so values
/// always render as `333.00`, never `333` or `333.0`.
pub fn round_money(amount: Decimal) -> Decimal {
    let mut rounded = amount.round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// True when `amount` has no significant digit beyond the cent.
pub fn has_money_precision(amount: &Decimal) -> bool {
    amount.normalize().scale() <= MONEY_SCALE
}

/// Checks a caller-supplied amount: strictly positive, at most two decimals.
pub fn ensure_positive_amount(field: &str, amount: Decimal) -> Result<Decimal, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(format!(
            "{} must be greater than 0, got {}",
            field, amount
        )));
    }
    if !has_money_precision(&amount) {
        return Err(ServiceError::ValidationError(format!(
            "{} must have at most {} decimal places, got {}",
            field, MONEY_SCALE, amount
        )));
    }
    Ok(round_money(amount))
}

/// quantity × unit price, at cent scale.
pub fn line_total(quantity: i32, unit_price: Decimal) -> Decimal {
    round_money(unit_price * Decimal::from(quantity))
}

/// Even share of `remaining` over the installments still allowed.
///
/// `installments_left` of zero yields the whole remainder.
pub fn installment_share(remaining: Decimal, installments_left: u32) -> Decimal {
    if installments_left <= 1 {
        return round_money(remaining);
    }
    round_money(remaining / Decimal::from(installments_left))
}

/// `max(total - paid, 0)` at cent scale.
pub fn outstanding(total: Decimal, paid: Decimal) -> Decimal {
    round_money((total - paid).max(Decimal::ZERO))
}

pub(crate) fn validate_money(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        let mut err = ValidationError::new("positive_amount");
        err.message = Some("must be greater than 0".into());
        return Err(err);
    }
    if !has_money_precision(amount) {
        let mut err = ValidationError::new("money_precision");
        err.message = Some("must have at most 2 decimal places".into());
        return Err(err);
    }
    Ok(())
}
