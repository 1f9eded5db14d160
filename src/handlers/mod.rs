pub mod catalog;
pub mod common;
pub mod orders;
pub mod payments;

use crate::{
    db::DbPool,
    services::{catalog::CatalogService, orders::OrderService, payments::PaymentService},
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<OrderService>,
    pub payments: Arc<PaymentService>,
    pub catalog: Arc<CatalogService>,
}

impl AppServices {
    pub fn new(db_pool: Arc<DbPool>) -> Self {
        Self {
            orders: Arc::new(OrderService::new(db_pool.clone())),
            payments: Arc::new(PaymentService::new(db_pool.clone())),
            catalog: Arc::new(CatalogService::new(db_pool)),
        }
    }
}
