use super::common::{created_response, success_response};
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::payments::{
    OrderBalance, PaymentFilter, PaymentResponse, RecordPaymentRequest,
};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    routing::get,
    Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RemainingAmountResponse {
    pub order_id: i32,
    #[schema(value_type = String, example = "2000.00")]
    pub remaining_amount: Decimal,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SupplierDebtResponse {
    pub supplier_id: i32,
    #[schema(value_type = String, example = "2200.00")]
    pub total_debt: Decimal,
}

#[utoipa::path(
    post,
    path = "/api/v1/payments",
    summary = "Record installment",
    description = "Pay one installment of a delivered order. At most three installments, five days apart, each the even split of what remains",
    request_body = RecordPaymentRequest,
    responses(
        (status = 201, description = "Payment recorded", body = ApiResponse<PaymentResponse>),
        (status = 400, description = "Installment rule violated", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 409, description = "Concurrent modification", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn record_payment(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<PaymentResponse>>), ServiceError> {
    let payment = state.services.payments.record_payment(request).await?;
    info!(payment_id = payment.id, order_id = payment.order_id, user_id = %auth_user.user_id, "Installment recorded");
    Ok(created_response(payment, "Payment recorded"))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments",
    summary = "List payments",
    params(PaymentFilter),
    responses(
        (status = 200, description = "Payments in range", body = ApiResponse<Vec<PaymentResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn list_payments(
    State(state): State<AppState>,
    Query(filter): Query<PaymentFilter>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, ServiceError> {
    let payments = state.services.payments.list_payments(filter).await?;
    Ok(success_response(payments))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/pending",
    summary = "Orders awaiting payment",
    responses(
        (status = 200, description = "Delivered orders not fully paid", body = ApiResponse<Vec<OrderBalance>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn pending_orders(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<OrderBalance>>>, ServiceError> {
    let pending = state.services.payments.pending_payment_orders().await?;
    Ok(success_response(pending))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{order_id}",
    summary = "Payments of an order",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Payments, oldest first", body = ApiResponse<Vec<PaymentResponse>>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn get_order_payments(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<Vec<PaymentResponse>>>, ServiceError> {
    let payments = state.services.payments.payments_by_order(order_id).await?;
    Ok(success_response(payments))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/order/{order_id}/remaining",
    summary = "Remaining amount of an order",
    params(("order_id" = i32, Path, description = "Order id")),
    responses(
        (status = 200, description = "Amount still owed", body = ApiResponse<RemainingAmountResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn get_remaining_amount(
    State(state): State<AppState>,
    Path(order_id): Path<i32>,
) -> Result<Json<ApiResponse<RemainingAmountResponse>>, ServiceError> {
    let remaining_amount = state.services.payments.remaining_amount(order_id).await?;
    Ok(success_response(RemainingAmountResponse {
        order_id,
        remaining_amount,
    }))
}

#[utoipa::path(
    get,
    path = "/api/v1/payments/supplier/{supplier_id}/debt",
    summary = "Total owed to a supplier",
    params(("supplier_id" = i32, Path, description = "Supplier id")),
    responses(
        (status = 200, description = "Outstanding balance over the supplier's orders", body = ApiResponse<SupplierDebtResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "payments"
)]
pub async fn get_supplier_debt(
    State(state): State<AppState>,
    Path(supplier_id): Path<i32>,
) -> Result<Json<ApiResponse<SupplierDebtResponse>>, ServiceError> {
    let total_debt = state.services.payments.supplier_debt(supplier_id).await?;
    Ok(success_response(SupplierDebtResponse {
        supplier_id,
        total_debt,
    }))
}

/// Payment routes
pub fn payment_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_payments).post(record_payment))
        .route("/pending", get(pending_orders))
        .route("/order/:order_id", get(get_order_payments))
        .route("/order/:order_id/remaining", get(get_remaining_amount))
        .route("/supplier/:supplier_id/debt", get(get_supplier_debt))
}
