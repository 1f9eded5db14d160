//! Supplier and product administration.

use super::common::{created_response, success_response};
use crate::auth::AuthUser;
use crate::errors::ServiceError;
use crate::handlers::AppState;
use crate::services::catalog::{
    CreateProductRequest, CreateSupplierRequest, ProductResponse, SupplierResponse,
};
use crate::ApiResponse;
use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tracing::info;

#[utoipa::path(
    post,
    path = "/api/v1/suppliers",
    summary = "Register supplier",
    request_body = CreateSupplierRequest,
    responses(
        (status = 201, description = "Supplier created", body = ApiResponse<SupplierResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Number or name already taken", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_supplier(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateSupplierRequest>,
) -> Result<(StatusCode, Json<ApiResponse<SupplierResponse>>), ServiceError> {
    let supplier = state.services.catalog.create_supplier(request).await?;
    info!(supplier_id = supplier.id, user_id = %auth_user.user_id, "Supplier registered");
    Ok(created_response(supplier, "Supplier created"))
}

#[utoipa::path(
    get,
    path = "/api/v1/suppliers/{id}",
    summary = "Get supplier",
    params(("id" = i32, Path, description = "Supplier id")),
    responses(
        (status = 200, description = "Supplier found", body = ApiResponse<SupplierResponse>),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn get_supplier(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<SupplierResponse>>, ServiceError> {
    let supplier = state.services.catalog.get_supplier(id).await?;
    Ok(success_response(supplier))
}

#[utoipa::path(
    post,
    path = "/api/v1/suppliers/{id}/archive",
    summary = "Archive supplier",
    params(("id" = i32, Path, description = "Supplier id")),
    responses(
        (status = 200, description = "Supplier archived", body = ApiResponse<SupplierResponse>),
        (status = 404, description = "Supplier not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn archive_supplier(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<SupplierResponse>>, ServiceError> {
    let supplier = state.services.catalog.archive_supplier(id).await?;
    Ok(Json(ApiResponse::with_message(supplier, "Supplier archived")))
}

#[utoipa::path(
    post,
    path = "/api/v1/products",
    summary = "Add product",
    request_body = CreateProductRequest,
    responses(
        (status = 201, description = "Product created", body = ApiResponse<ProductResponse>),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
        (status = 403, description = "Forbidden", body = crate::errors::ErrorResponse),
        (status = 409, description = "Duplicate active product in sub-category", body = crate::errors::ErrorResponse),
        (status = 422, description = "Validation error", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn create_product(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(request): Json<CreateProductRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ProductResponse>>), ServiceError> {
    let product = state.services.catalog.create_product(request).await?;
    info!(product_id = product.id, user_id = %auth_user.user_id, "Product added");
    Ok(created_response(product, "Product created"))
}

#[utoipa::path(
    get,
    path = "/api/v1/products/{id}",
    summary = "Get product",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product found", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.catalog.get_product(id).await?;
    Ok(success_response(product))
}

#[utoipa::path(
    post,
    path = "/api/v1/products/{id}/archive",
    summary = "Archive product",
    params(("id" = i32, Path, description = "Product id")),
    responses(
        (status = 200, description = "Product archived", body = ApiResponse<ProductResponse>),
        (status = 404, description = "Product not found", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "catalog"
)]
pub async fn archive_product(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<ApiResponse<ProductResponse>>, ServiceError> {
    let product = state.services.catalog.archive_product(id).await?;
    Ok(Json(ApiResponse::with_message(product, "Product archived")))
}

/// Supplier routes
pub fn supplier_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_supplier))
        .route("/:id", get(get_supplier))
        .route("/:id/archive", post(archive_supplier))
}

/// Product routes
pub fn product_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(create_product))
        .route("/:id", get(get_product))
        .route("/:id/archive", post(archive_product))
}
