use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{entity::prelude::*, ActiveValue};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle of a purchase order.
///
/// `IN_PROGRESS -> DELIVERED -> PAID`. Cancelling deletes the row and is only
/// possible while the order is still in progress.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[sea_orm(string_value = "IN_PROGRESS")]
    InProgress,
    #[sea_orm(string_value = "DELIVERED")]
    Delivered,
    #[sea_orm(string_value = "PAID")]
    Paid,
}

impl OrderStatus {
    /// States reachable from `self` through a stored transition.
    pub fn next_states(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::InProgress => &[OrderStatus::Delivered],
            OrderStatus::Delivered => &[OrderStatus::Paid],
            OrderStatus::Paid => &[],
        }
    }

    pub fn can_transition_to(self, target: OrderStatus) -> bool {
        self.next_states().contains(&target)
    }

    pub fn is_cancellable(self) -> bool {
        self == OrderStatus::InProgress
    }

    pub fn accepts_payments(self) -> bool {
        self == OrderStatus::Delivered
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub order_number: String,

    pub supplier_id: i32,
    pub order_date: DateTime<Utc>,

    /// Fixed at creation: sum of line quantity times unit price.
    #[sea_orm(column_type = "Decimal(Some((14, 2)))")]
    pub total_amount: Decimal,

    pub status: OrderStatus,

    /// Bumped on every state change and every recorded payment.
    pub version: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::supplier::Entity",
        from = "Column::SupplierId",
        to = "super::supplier::Column::Id",
        on_update = "Cascade",
        on_delete = "Restrict"
    )]
    Supplier,
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLines,
    #[sea_orm(has_many = "super::payment::Entity")]
    Payments,
}

impl Related<super::supplier::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Supplier.def()
    }
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLines.def()
    }
}

impl Related<super::payment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Payments.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = Utc::now();
        if insert {
            if matches!(self.created_at, ActiveValue::NotSet) {
                self.created_at = ActiveValue::Set(now);
            }
            if matches!(self.version, ActiveValue::NotSet) {
                self.version = ActiveValue::Set(1);
            }
        } else {
            self.updated_at = ActiveValue::Set(Some(now));
        }
        Ok(self)
    }
}
