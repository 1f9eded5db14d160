//! Hardware Store API Library
//!
//! Inventory and purchase-order backend: supplier orders, stock decrement on
//! delivery and installment payments, served over axum with sea-orm storage.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, middleware, response::Json, routing::get, Extension, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::ToSchema;

use crate::auth::{roles, AuthRouterExt, AuthService};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(db: Arc<DatabaseConnection>, config: config::AppConfig) -> Self {
        let services = handlers::AppServices::new(db.clone());
        Self {
            db,
            config,
            services,
        }
    }
}

/// Success envelope shared by every endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub data: Option<T>,
    pub timestamp: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::success(data)
        }
    }
}

/// Header carrying the per-request id, generated when the caller sends none.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// `/api/v1` routes, each group behind its role gate
pub fn api_v1_routes() -> Router<AppState> {
    let orders = handlers::orders::order_routes().with_role(roles::PURCHASING_MANAGER);
    let payments = handlers::payments::payment_routes().with_role(roles::PAYMENT_MANAGER);
    let suppliers = handlers::catalog::supplier_routes().with_role(roles::ADMIN);
    let products = handlers::catalog::product_routes().with_role(roles::ADMIN);

    Router::new()
        .nest("/orders", orders)
        .nest("/payments", payments)
        .nest("/suppliers", suppliers)
        .nest("/products", products)
}

/// Full application router: health, OpenAPI document and the versioned API.
pub fn build_router(state: AppState, auth: Arc<AuthService>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(openapi::swagger_ui())
        .nest("/api/v1", api_v1_routes())
        .layer(Extension(auth))
        .layer(middleware::from_fn(request_logging_middleware))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}

async fn health_check(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    let db_status = match db::check_connection(&state.db).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    Json(ApiResponse::success(json!({
        "status": db_status,
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment,
        "checks": { "database": db_status },
    })))
}

// Request logging middleware
async fn request_logging_middleware(
    request: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> axum::response::Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
        .to_string();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    if status.is_server_error() {
        tracing::error!(request_id = %request_id, method = %method, uri = %uri, status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, "Request failed");
    } else {
        tracing::info!(request_id = %request_id, method = %method, uri = %uri, status = status.as_u16(), elapsed_ms = start.elapsed().as_millis() as u64, "Request completed");
    }

    response
}
