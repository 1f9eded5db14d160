use crate::{
    db::{transaction, DbPool},
    entities::{
        order::{self, Entity as OrderEntity, OrderStatus},
        order_line::{self, Entity as OrderLineEntity},
        product::{self, Entity as ProductEntity},
        supplier::{self, Entity as SupplierEntity},
    },
    errors::{RuleDetail, ServiceError},
    services::{
        day_bounds,
        money::{self, validate_money},
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateOrderRequest {
    #[validate(range(min = 1, message = "supplier_id must be a positive integer"))]
    pub supplier_id: i32,
    /// Defaults to the time of creation.
    #[serde(default)]
    pub order_date: Option<DateTime<Utc>>,
    #[validate(length(min = 1, message = "An order needs at least one line"))]
    pub lines: Vec<OrderLineRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderLineRequest {
    #[validate(range(min = 1, message = "product_id must be a positive integer"))]
    pub product_id: i32,
    #[validate(range(min = 1, message = "quantity must be at least 1"))]
    pub quantity: i32,
    #[validate(custom = "validate_money")]
    #[schema(value_type = String, example = "19.99")]
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct OrderFilter {
    /// First day included (`YYYY-MM-DD`)
    pub date_from: Option<NaiveDate>,
    /// Last day included (`YYYY-MM-DD`)
    pub date_to: Option<NaiveDate>,
    pub status: Option<OrderStatus>,
    pub supplier_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct SupplierSummary {
    pub id: i32,
    pub number: String,
    pub name: String,
    pub is_archived: bool,
}

impl From<supplier::Model> for SupplierSummary {
    fn from(model: supplier::Model) -> Self {
        Self {
            id: model.id,
            number: model.number,
            name: model.name,
            is_archived: model.is_archived,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub id: i32,
    pub product_id: i32,
    pub product_name: Option<String>,
    pub quantity: i32,
    #[schema(value_type = String, example = "19.99")]
    pub unit_price: Decimal,
    #[schema(value_type = String, example = "59.97")]
    pub line_total: Decimal,
}

impl OrderLineResponse {
    fn from_parts(line: order_line::Model, product: Option<&product::Model>) -> Self {
        Self {
            id: line.id,
            product_id: line.product_id,
            product_name: product.map(|p| p.name.clone()),
            quantity: line.quantity,
            unit_price: money::round_money(line.unit_price),
            line_total: money::line_total(line.quantity, line.unit_price),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: i32,
    pub order_number: String,
    pub supplier_id: i32,
    pub supplier: Option<SupplierSummary>,
    pub order_date: DateTime<Utc>,
    #[schema(value_type = String, example = "3000.00")]
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub version: i32,
    pub lines: Vec<OrderLineResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    fn from_parts(
        model: order::Model,
        supplier: Option<SupplierSummary>,
        lines: Vec<OrderLineResponse>,
    ) -> Self {
        Self {
            id: model.id,
            order_number: model.order_number,
            supplier_id: model.supplier_id,
            supplier,
            order_date: model.order_date,
            total_amount: money::round_money(model.total_amount),
            status: model.status,
            version: model.version,
            lines,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

/// Owns the purchase-order state machine: creation with stock validation,
/// delivery with stock decrement, cancellation by deletion.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
}

impl OrderService {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self { db_pool }
    }

    /// Creates an order in state `IN_PROGRESS` together with its lines.
    ///
    /// Stock is checked, not reserved: two orders may both pass this check
    /// against the same product. Delivery re-checks.
    #[instrument(skip(self, request), fields(supplier_id = request.supplier_id, lines = request.lines.len()))]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        request.validate()?;
        for line in &request.lines {
            line.validate()?;
        }

        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;
        let outcome = Self::create_in(&txn, request).await;
        let created = transaction::finish(txn, outcome).await?;

        counter!("hardware_store.orders.created", 1);
        info!(
            order_id = created.id,
            order_number = %created.order_number,
            total = %created.total_amount,
            "Order created"
        );
        Ok(created)
    }

    async fn create_in(
        txn: &DatabaseTransaction,
        request: CreateOrderRequest,
    ) -> Result<OrderResponse, ServiceError> {
        let supplier = SupplierEntity::find_by_id(request.supplier_id)
            .one(txn)
            .await?
            .ok_or_else(|| {
                warn!(supplier_id = request.supplier_id, "Supplier not found");
                ServiceError::rule_violation(
                    format!("Supplier {} does not exist", request.supplier_id),
                    RuleDetail::UnknownReference {
                        entity: "supplier".to_string(),
                        id: request.supplier_id,
                    },
                )
            })?;

        if supplier.is_archived {
            return Err(ServiceError::rule_violation(
                format!(
                    "Supplier {} is archived and cannot receive new orders",
                    supplier.name
                ),
                RuleDetail::ArchivedReference {
                    entity: "supplier".to_string(),
                    id: supplier.id,
                },
            ));
        }

        let requested = requested_quantities(
            request.lines.iter().map(|l| (l.product_id, l.quantity)),
        )?;
        let products = lock_available_products(txn, &requested).await?;

        let now = Utc::now();
        let total = request
            .lines
            .iter()
            .map(|l| money::line_total(l.quantity, l.unit_price))
            .sum::<Decimal>();

        let order = order::ActiveModel {
            order_number: Set(generate_order_number(now)),
            supplier_id: Set(supplier.id),
            order_date: Set(request.order_date.unwrap_or(now)),
            total_amount: Set(money::round_money(total)),
            status: Set(OrderStatus::InProgress),
            version: Set(1),
            created_at: Set(now),
            updated_at: Set(None),
            ..Default::default()
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert order");
            ServiceError::from(e)
        })?;

        let mut lines = Vec::with_capacity(request.lines.len());
        for line in request.lines {
            let saved = order_line::ActiveModel {
                order_id: Set(order.id),
                product_id: Set(line.product_id),
                quantity: Set(line.quantity),
                unit_price: Set(money::round_money(line.unit_price)),
                ..Default::default()
            }
            .insert(txn)
            .await?;
            lines.push(OrderLineResponse::from_parts(
                saved,
                products.get(&line.product_id),
            ));
        }

        Ok(OrderResponse::from_parts(
            order,
            Some(supplier.into()),
            lines,
        ))
    }

    /// Marks an `IN_PROGRESS` order delivered and takes its quantities out of stock.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn deliver_order(&self, order_id: i32) -> Result<OrderResponse, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start transaction for delivery");
            ServiceError::DatabaseError(e)
        })?;
        let outcome = Self::deliver_in(&txn, order_id).await;
        let delivered = transaction::finish(txn, outcome).await?;

        counter!("hardware_store.orders.delivered", 1);
        info!(order_id, "Order delivered");
        Ok(delivered)
    }

    async fn deliver_in(
        txn: &DatabaseTransaction,
        order_id: i32,
    ) -> Result<OrderResponse, ServiceError> {
        let order = lock_order(txn, order_id).await?;

        if !order.status.can_transition_to(OrderStatus::Delivered) {
            warn!(order_id, status = %order.status, "Delivery refused");
            return Err(ServiceError::rule_violation(
                format!(
                    "Order {} is {} and can only be delivered while {}",
                    order.order_number,
                    order.status,
                    OrderStatus::InProgress
                ),
                RuleDetail::InvalidState {
                    order_id: order.id,
                    current: order.status,
                    required: OrderStatus::InProgress,
                },
            ));
        }

        let lines = OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order.id))
            .order_by_asc(order_line::Column::Id)
            .all(txn)
            .await?;

        let requested = requested_quantities(lines.iter().map(|l| (l.product_id, l.quantity)))?;
        let products = lock_available_products(txn, &requested).await?;

        let now = Utc::now();
        for (&product_id, &quantity) in &requested {
            let result = ProductEntity::update_many()
                .col_expr(
                    product::Column::Stock,
                    Expr::col(product::Column::Stock).sub(quantity),
                )
                .col_expr(product::Column::UpdatedAt, Expr::value(now))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::Stock.gte(quantity))
                .filter(product::Column::IsArchived.eq(false))
                .exec(txn)
                .await?;

            if result.rows_affected == 0 {
                let (name, available) = products
                    .get(&product_id)
                    .map(|p| (p.name.clone(), p.stock))
                    .unwrap_or_else(|| (format!("#{}", product_id), 0));
                return Err(insufficient_stock(product_id, name, available, quantity));
            }
        }

        let version = write_order_state(txn, &order, OrderStatus::Delivered, now).await?;

        let supplier = SupplierEntity::find_by_id(order.supplier_id).one(txn).await?;
        let line_responses = lines
            .into_iter()
            .map(|line| {
                let product = products.get(&line.product_id);
                OrderLineResponse::from_parts(line, product)
            })
            .collect();

        let mut response =
            OrderResponse::from_parts(order, supplier.map(Into::into), line_responses);
        response.status = OrderStatus::Delivered;
        response.version = version;
        response.updated_at = Some(now);
        Ok(response)
    }

    /// Deletes an `IN_PROGRESS` order and its lines. Stock is untouched.
    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn cancel_order(&self, order_id: i32) -> Result<bool, ServiceError> {
        let txn = self.db_pool.begin().await.map_err(|e| {
            error!(error = %e, order_id, "Failed to start transaction for cancellation");
            ServiceError::DatabaseError(e)
        })?;
        let outcome = Self::cancel_in(&txn, order_id).await;
        transaction::finish(txn, outcome).await?;

        counter!("hardware_store.orders.cancelled", 1);
        info!(order_id, "Order cancelled");
        Ok(true)
    }

    async fn cancel_in(txn: &DatabaseTransaction, order_id: i32) -> Result<(), ServiceError> {
        let order = lock_order(txn, order_id).await?;

        if !order.status.is_cancellable() {
            warn!(order_id, status = %order.status, "Cancellation refused");
            return Err(ServiceError::rule_violation(
                format!(
                    "Order {} is {}; only {} orders can be cancelled",
                    order.order_number,
                    order.status,
                    OrderStatus::InProgress
                ),
                RuleDetail::InvalidState {
                    order_id: order.id,
                    current: order.status,
                    required: OrderStatus::InProgress,
                },
            ));
        }

        OrderLineEntity::delete_many()
            .filter(order_line::Column::OrderId.eq(order.id))
            .exec(txn)
            .await?;

        let deleted = OrderEntity::delete_many()
            .filter(order::Column::Id.eq(order.id))
            .filter(order::Column::Version.eq(order.version))
            .exec(txn)
            .await?;

        if deleted.rows_affected == 0 {
            return Err(ServiceError::Conflict(format!(
                "Order {} was modified concurrently",
                order.order_number
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(order_id = order_id))]
    pub async fn get_order(&self, order_id: i32) -> Result<OrderResponse, ServiceError> {
        let db = &*self.db_pool;
        let order = OrderEntity::find_by_id(order_id)
            .one(db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", order_id)))?;

        let mut hydrated = hydrate_orders(db, vec![order]).await?;
        hydrated
            .pop()
            .ok_or_else(|| ServiceError::InternalError("Order vanished while loading".into()))
    }

    /// Orders matching the filter, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<OrderResponse>, ServiceError> {
        let db = &*self.db_pool;
        let (start, end) = day_bounds(filter.date_from, filter.date_to);

        let mut query = OrderEntity::find();
        if let Some(start) = start {
            query = query.filter(order::Column::OrderDate.gte(start));
        }
        if let Some(end) = end {
            query = query.filter(order::Column::OrderDate.lt(end));
        }
        if let Some(status) = filter.status {
            query = query.filter(order::Column::Status.eq(status));
        }
        if let Some(supplier_id) = filter.supplier_id {
            query = query.filter(order::Column::SupplierId.eq(supplier_id));
        }

        let orders = query
            .order_by_desc(order::Column::OrderDate)
            .order_by_desc(order::Column::Id)
            .all(db)
            .await?;

        let responses = hydrate_orders(db, orders).await?;
        info!(count = responses.len(), "Orders listed");
        Ok(responses)
    }
}

/// Loads suppliers and lines (with product names) for a batch of orders,
/// keeping the input order.
pub(crate) async fn hydrate_orders<C: ConnectionTrait>(
    conn: &C,
    orders: Vec<order::Model>,
) -> Result<Vec<OrderResponse>, ServiceError> {
    if orders.is_empty() {
        return Ok(Vec::new());
    }

    let order_ids: Vec<i32> = orders.iter().map(|o| o.id).collect();
    let mut supplier_ids: Vec<i32> = orders.iter().map(|o| o.supplier_id).collect();
    supplier_ids.sort_unstable();
    supplier_ids.dedup();

    let suppliers: HashMap<i32, supplier::Model> = SupplierEntity::find()
        .filter(supplier::Column::Id.is_in(supplier_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let mut lines_by_order: HashMap<i32, Vec<OrderLineResponse>> = HashMap::new();
    let rows = OrderLineEntity::find()
        .find_also_related(ProductEntity)
        .filter(order_line::Column::OrderId.is_in(order_ids))
        .order_by_asc(order_line::Column::Id)
        .all(conn)
        .await?;
    for (line, product) in rows {
        lines_by_order
            .entry(line.order_id)
            .or_default()
            .push(OrderLineResponse::from_parts(line, product.as_ref()));
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let supplier = suppliers.get(&order.supplier_id).cloned().map(Into::into);
            let lines = lines_by_order.remove(&order.id).unwrap_or_default();
            OrderResponse::from_parts(order, supplier, lines)
        })
        .collect())
}

/// Reads the order row `FOR UPDATE`.
pub(crate) async fn lock_order<C: ConnectionTrait>(
    conn: &C,
    order_id: i32,
) -> Result<order::Model, ServiceError> {
    OrderEntity::find_by_id(order_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| {
            warn!(order_id, "Order not found");
            ServiceError::NotFound(format!("Order {} not found", order_id))
        })
}

/// Moves the order to `status` and bumps its version, provided nobody else
/// changed it since it was read. Returns the new version.
pub(crate) async fn write_order_state<C: ConnectionTrait>(
    conn: &C,
    order: &order::Model,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<i32, ServiceError> {
    let result = OrderEntity::update_many()
        .col_expr(order::Column::Status, Expr::value(status))
        .col_expr(
            order::Column::Version,
            Expr::col(order::Column::Version).add(1),
        )
        .col_expr(order::Column::UpdatedAt, Expr::value(now))
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Version.eq(order.version))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        warn!(order_id = order.id, version = order.version, "Stale order version");
        return Err(ServiceError::Conflict(format!(
            "Order {} was modified concurrently",
            order.order_number
        )));
    }
    Ok(order.version + 1)
}

/// Sums line quantities per product. Sorted by product id so rows are
/// always locked in the same order.
fn requested_quantities(
    lines: impl Iterator<Item = (i32, i32)>,
) -> Result<BTreeMap<i32, i32>, ServiceError> {
    let mut requested = BTreeMap::new();
    for (product_id, quantity) in lines {
        let entry = requested.entry(product_id).or_insert(0i32);
        *entry = entry.checked_add(quantity).ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "Total quantity for product {} is too large",
                product_id
            ))
        })?;
    }
    Ok(requested)
}

/// Locks every requested product and checks it exists, is active and has
/// enough stock for the summed quantity.
async fn lock_available_products<C: ConnectionTrait>(
    conn: &C,
    requested: &BTreeMap<i32, i32>,
) -> Result<HashMap<i32, product::Model>, ServiceError> {
    let mut products = HashMap::with_capacity(requested.len());
    for (&product_id, &quantity) in requested {
        let product = ProductEntity::find_by_id(product_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| {
                warn!(product_id, "Product not found");
                ServiceError::rule_violation(
                    format!("Product {} does not exist", product_id),
                    RuleDetail::UnknownReference {
                        entity: "product".to_string(),
                        id: product_id,
                    },
                )
            })?;

        if product.is_archived {
            return Err(ServiceError::rule_violation(
                format!("Product {} is archived", product.name),
                RuleDetail::ArchivedReference {
                    entity: "product".to_string(),
                    id: product.id,
                },
            ));
        }

        if product.stock < quantity {
            warn!(
                product_id,
                available = product.stock,
                requested = quantity,
                "Insufficient stock"
            );
            return Err(insufficient_stock(
                product.id,
                product.name.clone(),
                product.stock,
                quantity,
            ));
        }

        products.insert(product_id, product);
    }
    Ok(products)
}

fn insufficient_stock(
    product_id: i32,
    product_name: String,
    available: i32,
    requested: i32,
) -> ServiceError {
    ServiceError::rule_violation(
        format!(
            "Insufficient stock for product {}. Stock: {}, requested: {}",
            product_name, available, requested
        ),
        RuleDetail::InsufficientStock {
            product_id,
            product_name,
            available,
            requested,
        },
    )
}

/// `C{YYYYMMDD}-{uuid}`: date-prefixed for humans, unique through the v4 UUID.
fn generate_order_number(now: DateTime<Utc>) -> String {
    format!(
        "C{}-{}",
        now.format("%Y%m%d"),
        Uuid::new_v4().simple().to_string().to_uppercase()
    )
}
