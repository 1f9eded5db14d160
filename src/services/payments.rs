use crate::{
    db::{transaction, DbPool},
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        payment::{self, Entity as PaymentEntity},
        supplier::Entity as SupplierEntity,
    },
    errors::{RuleDetail, ServiceError},
    services::{
        day_bounds,
        money::{self, validate_money},
        orders::{hydrate_orders, lock_order, write_order_state, OrderResponse},
    },
};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

/// Installments allowed per order.
pub const MAX_INSTALLMENTS: usize = 3;
/// Whole days required between two installments of the same order.
pub const MIN_DAYS_BETWEEN_PAYMENTS: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct RecordPaymentRequest {
    #[validate(range(min = 1, message = "order_id must be a positive integer"))]
    pub order_id: i32,
    #[validate(custom = "validate_money")]
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct PaymentFilter {
    /// First day included (`YYYY-MM-DD`)
    pub date_from: Option<NaiveDate>,
    /// Last day included (`YYYY-MM-DD`)
    pub date_to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: i32,
    pub order_id: i32,
    #[schema(value_type = String, example = "1000.00")]
    pub amount: Decimal,
    pub paid_at: DateTime<Utc>,
}

impl From<payment::Model> for PaymentResponse {
    fn from(model: payment::Model) -> Self {
        Self {
            id: model.id,
            order_id: model.order_id,
            amount: money::round_money(model.amount),
            paid_at: model.paid_at,
        }
    }
}

/// An order still awaiting money, with what has been paid so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderBalance {
    pub order: OrderResponse,
    pub payments: Vec<PaymentResponse>,
    #[schema(value_type = String, example = "1000.00")]
    pub amount_paid: Decimal,
    #[schema(value_type = String, example = "2000.00")]
    pub remaining_amount: Decimal,
    pub installments_paid: usize,
}

/// What an accepted installment does to its order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallmentDecision {
    pub installment_number: usize,
    pub paid_after: Decimal,
    pub settles_order: bool,
}

/// Applies the installment rules to a prospective payment of `amount` at `now`.
///
/// `history` holds the order's existing payments. Rules, in order: the order
/// must be delivered, at most [`MAX_INSTALLMENTS`] payments, at least
/// [`MIN_DAYS_BETWEEN_PAYMENTS`] days after the latest one, something must be
/// left to pay, every installment but the last equals the even split of the
/// remainder, and nothing beyond the remainder is accepted.
pub fn evaluate_installment(
    order: &order::Model,
    history: &[payment::Model],
    amount: Decimal,
    now: DateTime<Utc>,
) -> Result<InstallmentDecision, ServiceError> {
    if !order.status.accepts_payments() {
        return Err(ServiceError::rule_violation(
            format!(
                "Order {} must be delivered before payment (current status: {})",
                order.order_number, order.status
            ),
            RuleDetail::InvalidState {
                order_id: order.id,
                current: order.status,
                required: OrderStatus::Delivered,
            },
        ));
    }

    if history.len() >= MAX_INSTALLMENTS {
        return Err(ServiceError::rule_violation(
            format!(
                "Order {} already has the maximum of {} installments",
                order.order_number, MAX_INSTALLMENTS
            ),
            RuleDetail::InstallmentLimit {
                max: MAX_INSTALLMENTS as u32,
            },
        ));
    }

    if let Some(last) = history.iter().map(|p| p.paid_at).max() {
        let elapsed = now - last;
        if elapsed < Duration::days(MIN_DAYS_BETWEEN_PAYMENTS) {
            let days_elapsed = elapsed.num_days().max(0);
            return Err(ServiceError::rule_violation(
                format!(
                    "Installments must be at least {} days apart; {} day(s) since the last payment",
                    MIN_DAYS_BETWEEN_PAYMENTS, days_elapsed
                ),
                RuleDetail::PaymentSpacing {
                    days_elapsed,
                    minimum_days: MIN_DAYS_BETWEEN_PAYMENTS,
                },
            ));
        }
    }

    let paid_before: Decimal = history.iter().map(|p| p.amount).sum();
    let remaining_before = money::round_money(order.total_amount - paid_before);
    if remaining_before <= Decimal::ZERO {
        return Err(ServiceError::rule_violation(
            format!("Order {} is already fully paid", order.order_number),
            RuleDetail::AlreadySettled { order_id: order.id },
        ));
    }

    let installments_left = (MAX_INSTALLMENTS - history.len()) as u32;
    let expected = money::installment_share(remaining_before, installments_left);

    if installments_left > 1 && amount != expected {
        return Err(ServiceError::rule_violation(
            format!(
                "Payment amount must equal {} ({} remaining over {} installments), got {}",
                expected, remaining_before, installments_left, amount
            ),
            RuleDetail::InstallmentAmount {
                expected,
                given: amount,
            },
        ));
    }

    if amount > remaining_before {
        return Err(ServiceError::rule_violation(
            format!(
                "Payment of {} exceeds the remaining amount of {}",
                amount, remaining_before
            ),
            RuleDetail::Overpayment {
                remaining: remaining_before,
                given: amount,
            },
        ));
    }

    let paid_after = money::round_money(paid_before + amount);
    Ok(InstallmentDecision {
        installment_number: history.len() + 1,
        paid_after,
        settles_order: paid_after == money::round_money(order.total_amount),
    })
}

/// Validates and records installments, promoting orders to `PAID` once settled.
#[derive(Clone)]
pub struct PaymentService {
    db_pool: Arc<DbPool>,
}

impl PaymentService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    #[instrument(skip(self, request), fields(order_id = request.order_id, amount = %request.amount))]
    pub async fn record_payment(
        &self,
        request: RecordPaymentRequest,
    ) -> Result<PaymentResponse, ServiceError> {
        request.validate()?;
        let amount = money::ensure_positive_amount("amount", request.amount)?;

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for payment");
            ServiceError::DatabaseError(e)
        })?;
        let outcome = Self::record_in(&txn, request.order_id, amount).await;
        let (payment, decision) = transaction::finish(txn, outcome).await.map_err(|e| {
            counter!("hardware_store.payments.rejected", 1);
            e
        })?;

        counter!("hardware_store.payments.recorded", 1);
        if decision.settles_order {
            counter!("hardware_store.orders.paid", 1);
        }
        info!(
            payment_id = payment.id,
            installment = decision.installment_number,
            paid_after = %decision.paid_after,
            settled = decision.settles_order,
            "Payment recorded"
        );
        Ok(payment.into())
    }

    async fn record_in(
        txn: &DatabaseTransaction,
        order_id: i32,
        amount: Decimal,
    ) -> Result<(payment::Model, InstallmentDecision), ServiceError> {
        let order = lock_order(txn, order_id).await?;
        let history = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order.id))
            .order_by_asc(payment::Column::PaidAt)
            .order_by_asc(payment::Column::Id)
            .all(txn)
            .await?;

        let now = Utc::now();
        let decision = evaluate_installment(&order, &history, amount, now).map_err(|e| {
            warn!(order_id, error = %e, "Payment refused");
            e
        })?;

        let payment = payment::ActiveModel {
            order_id: Set(order.id),
            amount: Set(amount),
            paid_at: Set(now),
            ..Default::default()
        }
        .insert(txn)
        .await?;

        // Version bump even without a status change, so a concurrent
        // recorder working from the same snapshot fails.
        let next = if decision.settles_order {
            OrderStatus::Paid
        } else {
            order.status
        };
        write_order_state(txn, &order, next, now).await?;

        Ok((payment, decision))
    }

    /// Payments of one order, oldest first.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn payments_by_order(
        &self,
        order_id: i32,
    ) -> Result<Vec<PaymentResponse>, ServiceError> {
        let db = &*self.db_pool;
        OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let payments = PaymentEntity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::PaidAt)
            .order_by_asc(payment::Column::Id)
            .all(db)
            .await?;
        Ok(payments.into_iter().map(Into::into).collect())
    }

    /// All payments in the optional inclusive day range, newest first.
    #[instrument(skip(self))]
    pub async fn list_payments(
        &self,
        filter: PaymentFilter,
    ) -> Result<Vec<PaymentResponse>, ServiceError> {
        let db = &*self.db_pool;
        let (start, end) = day_bounds(filter.date_from, filter.date_to);

        let mut query = PaymentEntity::find();
        if let Some(start) = start {
            query = query.filter(payment::Column::PaidAt.gte(start));
        }
        if let Some(end) = end {
            query = query.filter(payment::Column::PaidAt.lt(end));
        }

        let payments = query
            .order_by_desc(payment::Column::PaidAt)
            .order_by_desc(payment::Column::Id)
            .all(db)
            .await?;
        Ok(payments.into_iter().map(Into::into).collect())
    }

    /// Delivered orders, plus paid orders whose payments fall short of the
    /// total. Oldest order first.
    #[instrument(skip(self))]
    pub async fn pending_payment_orders(&self) -> Result<Vec<OrderBalance>, ServiceError> {
        let db = &*self.db_pool;
        let candidates = OrderEntity::find()
            .filter(order::Column::Status.is_in([OrderStatus::Delivered, OrderStatus::Paid]))
            .order_by_asc(order::Column::OrderDate)
            .order_by_asc(order::Column::Id)
            .all(db)
            .await?;

        let order_ids: Vec<i32> = candidates.iter().map(|o| o.id).collect();
        let mut payments_by_order = self.payments_grouped(order_ids).await?;

        let pending: Vec<order::Model> = candidates
            .into_iter()
            .filter(|o| {
                let paid = sum_amounts(payments_by_order.get(&o.id));
                match o.status {
                    OrderStatus::Delivered => true,
                    OrderStatus::Paid => {
                        let short = paid < o.total_amount;
                        if short {
                            warn!(order_id = o.id, paid = %paid, total = %o.total_amount, "Paid order is not fully settled");
                        }
                        short
                    }
                    OrderStatus::InProgress => false,
                }
            })
            .collect();

        let hydrated = hydrate_orders(db, pending).await?;
        Ok(hydrated
            .into_iter()
            .map(|order| {
                let payments = payments_by_order.remove(&order.id).unwrap_or_default();
                let amount_paid = money::round_money(sum_amounts(Some(&payments)));
                OrderBalance {
                    remaining_amount: money::outstanding(order.total_amount, amount_paid),
                    installments_paid: payments.len(),
                    payments: payments.into_iter().map(Into::into).collect(),
                    amount_paid,
                    order,
                }
            })
            .collect())
    }

    /// `max(total - paid, 0)` for one order.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn remaining_amount(&self, order_id: i32) -> Result<Decimal, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let payments = self.payments_grouped(vec![order.id]).await?;
        let paid = sum_amounts(payments.get(&order.id));
        Ok(money::outstanding(order.total_amount, paid))
    }

    /// Sum of what is still owed on every order placed with the supplier.
    #[instrument(skip(self), fields(supplier_id = supplier_id))]
    pub async fn supplier_debt(&self, supplier_id: i32) -> Result<Decimal, ServiceError> {
        let db = &*self.db_pool;
        SupplierEntity::find_by_id(supplier_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Supplier {} not found", supplier_id)))?;

        let orders = OrderEntity::find()
            .filter(order::Column::SupplierId.eq(supplier_id))
            .all(db)
            .await?;
        let payments = self
            .payments_grouped(orders.iter().map(|o| o.id).collect())
            .await?;

        let debt = orders
            .iter()
            .map(|o| money::outstanding(o.total_amount, sum_amounts(payments.get(&o.id))))
            .sum::<Decimal>();
        Ok(money::round_money(debt))
    }

    async fn payments_grouped(
        &self,
        order_ids: Vec<i32>,
    ) -> Result<HashMap<i32, Vec<payment::Model>>, ServiceError> {
        let mut grouped: HashMap<i32, Vec<payment::Model>> = HashMap::new();
        if order_ids.is_empty() {
            return Ok(grouped);
        }

        let payments = PaymentEntity::find()
            .filter(payment::Column::OrderId.is_in(order_ids))
            .order_by_asc(payment::Column::PaidAt)
            .order_by_asc(payment::Column::Id)
            .all(&*self.db_pool)
            .await?;
        for p in payments {
            grouped.entry(p.order_id).or_default().push(p);
        }
        Ok(grouped)
    }
}

fn sum_amounts(payments: Option<&Vec<payment::Model>>) -> Decimal {
    payments
        .map(|ps| ps.iter().map(|p| p.amount).sum())
        .unwrap_or(Decimal::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 12, 0, 0).unwrap()
    }

    fn delivered(total: Decimal) -> order::Model {
        order::Model {
            id: 1,
            order_number: "C20250301-TEST".into(),
            supplier_id: 1,
            order_date: at(1),
            total_amount: total,
            status: OrderStatus::Delivered,
            version: 2,
            created_at: at(1),
            updated_at: None,
        }
    }

    fn paid(id: i32, amount: Decimal, when: DateTime<Utc>) -> payment::Model {
        payment::Model {
            id,
            order_id: 1,
            amount,
            paid_at: when,
        }
    }

    #[test]
    fn first_installment_must_be_the_even_split() {
        let order = delivered(dec!(999));
        let err = evaluate_installment(&order, &[], dec!(400), at(2)).unwrap_err();

        assert!(err.to_string().contains("333.00"));
        assert_matches!(
            err.detail(),
            Some(RuleDetail::InstallmentAmount { expected, given })
                if *expected == dec!(333.00) && *given == dec!(400)
        );

        let ok = evaluate_installment(&order, &[], dec!(333.00), at(2)).unwrap();
        assert_eq!(ok.installment_number, 1);
        assert!(!ok.settles_order);
    }

    #[test]
    fn third_installment_settles_the_order() {
        let order = delivered(dec!(3000));
        let history = [paid(1, dec!(1000), at(1)), paid(2, dec!(1000), at(6))];

        let decision = evaluate_installment(&order, &history, dec!(1000), at(11)).unwrap();
        assert_eq!(decision.installment_number, 3);
        assert_eq!(decision.paid_after, dec!(3000.00));
        assert!(decision.settles_order);
    }

    #[test]
    fn spacing_is_enforced_against_the_latest_payment() {
        let order = delivered(dec!(3000));
        let history = [paid(1, dec!(1000), at(1)), paid(2, dec!(1000), at(6))];

        let err = evaluate_installment(&order, &history, dec!(1000), at(9)).unwrap_err();
        assert_matches!(
            err.detail(),
            Some(RuleDetail::PaymentSpacing {
                days_elapsed: 3,
                minimum_days: 5
            })
        );
    }

    #[test]
    fn a_fourth_installment_is_refused() {
        let order = delivered(dec!(4000));
        let history = [
            paid(1, dec!(1000), at(1)),
            paid(2, dec!(1000), at(6)),
            paid(3, dec!(1000), at(11)),
        ];

        let err = evaluate_installment(&order, &history, dec!(1000), at(20)).unwrap_err();
        assert_matches!(err.detail(), Some(RuleDetail::InstallmentLimit { max: 3 }));
    }

    #[test]
    fn final_installment_cannot_overpay() {
        let order = delivered(dec!(1500));
        let history = [paid(1, dec!(500), at(1)), paid(2, dec!(500), at(6))];

        let err = evaluate_installment(&order, &history, dec!(500.02), at(12)).unwrap_err();
        assert_matches!(
            err.detail(),
            Some(RuleDetail::Overpayment { remaining, given })
                if *remaining == dec!(500.00) && *given == dec!(500.02)
        );

        let ok = evaluate_installment(&order, &history, dec!(500.00), at(12)).unwrap();
        assert!(ok.settles_order);
    }

    #[test]
    fn final_installment_may_be_short() {
        let order = delivered(dec!(1500));
        let history = [paid(1, dec!(500), at(1)), paid(2, dec!(500), at(6))];

        let decision = evaluate_installment(&order, &history, dec!(200), at(12)).unwrap();
        assert!(!decision.settles_order);
        assert_eq!(decision.paid_after, dec!(1200.00));
    }

    #[test]
    fn only_delivered_orders_accept_payments() {
        let mut order = delivered(dec!(100));
        order.status = OrderStatus::InProgress;

        let err = evaluate_installment(&order, &[], dec!(33.33), at(2)).unwrap_err();
        assert!(err.to_string().contains("must be delivered before payment"));
        assert_matches!(
            err.detail(),
            Some(RuleDetail::InvalidState {
                current: OrderStatus::InProgress,
                required: OrderStatus::Delivered,
                ..
            })
        );
    }

    #[test]
    fn settled_delivered_order_is_refused() {
        let order = delivered(dec!(100));
        let history = [paid(1, dec!(100), at(1))];

        let err = evaluate_installment(&order, &history, dec!(1), at(10)).unwrap_err();
        assert_matches!(err.detail(), Some(RuleDetail::AlreadySettled { order_id: 1 }));
    }
}
