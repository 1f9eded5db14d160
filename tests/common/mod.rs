#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    response::Response,
    Router,
};
use chrono::Duration;
use hardware_store_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::payment,
    services::{
        catalog::{CreateProductRequest, CreateSupplierRequest, ProductResponse, SupplierResponse},
        orders::{CreateOrderRequest, OrderLineRequest, OrderResponse},
    },
    AppState,
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};
use serde_json::Value;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";

/// Application state backed by a private in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    auth_service: Arc<AuthService>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            TEST_JWT_SECRET.to_string(),
            "test".to_string(),
        );
        // A second connection would open a second, empty in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let auth_service = Arc::new(AuthService::new(AuthConfig::from(&cfg)));
        let state = AppState::new(Arc::new(pool), cfg);
        let router = hardware_store_api::build_router(state.clone(), auth_service.clone());

        Self {
            router,
            state,
            auth_service,
        }
    }

    pub fn token_for(&self, role: &str) -> String {
        self.auth_service
            .issue_token("test-user", role)
            .expect("issue test token")
    }

    /// Send a request against the router with an optional bearer token.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);

        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        let response = self.send(request).await;

        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// Sends a prepared request and returns the raw response.
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Request as the given role.
    pub async fn request_as(
        &self,
        role: &str,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let token = self.token_for(role);
        self.request(method, uri, body, Some(&token)).await
    }

    pub async fn seed_supplier(&self, number: &str, name: &str) -> SupplierResponse {
        self.state
            .services
            .catalog
            .create_supplier(CreateSupplierRequest {
                number: number.to_string(),
                name: name.to_string(),
                address: Some("12 Rue des Outils".to_string()),
                phone: None,
                email: None,
            })
            .await
            .expect("seed supplier")
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> ProductResponse {
        self.state
            .services
            .catalog
            .create_product(CreateProductRequest {
                name: name.to_string(),
                sub_category_id: 1,
                price,
                stock,
            })
            .await
            .expect("seed product")
    }

    /// Places a single-line order.
    pub async fn place_order(
        &self,
        supplier_id: i32,
        product_id: i32,
        quantity: i32,
        unit_price: Decimal,
    ) -> OrderResponse {
        self.state
            .services
            .orders
            .create_order(CreateOrderRequest {
                supplier_id,
                order_date: None,
                lines: vec![OrderLineRequest {
                    product_id,
                    quantity,
                    unit_price,
                }],
            })
            .await
            .expect("place order")
    }

    /// Places and delivers a single-line order.
    pub async fn delivered_order(
        &self,
        supplier_id: i32,
        product_id: i32,
        quantity: i32,
        unit_price: Decimal,
    ) -> OrderResponse {
        let order = self
            .place_order(supplier_id, product_id, quantity, unit_price)
            .await;
        self.state
            .services
            .orders
            .deliver_order(order.id)
            .await
            .expect("deliver order")
    }

    /// Moves every payment of the order `days` further into the past, so the
    /// next installment clears the spacing rule without waiting.
    pub async fn backdate_payments(&self, order_id: i32, days: i64) {
        let db = &*self.state.db;
        let payments = payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .order_by_asc(payment::Column::Id)
            .all(db)
            .await
            .expect("load payments");

        for p in payments {
            let paid_at = p.paid_at - Duration::days(days);
            let mut active: payment::ActiveModel = p.into();
            active.paid_at = Set(paid_at);
            active.update(db).await.expect("backdate payment");
        }
    }
}
