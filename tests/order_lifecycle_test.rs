//! Order state machine against a real (SQLite) database:
//! creation with stock checks, delivery with stock decrement, cancellation.

mod common;

use assert_matches::assert_matches;
use chrono::{NaiveDate, TimeZone, Utc};
use common::TestApp;
use hardware_store_api::{
    entities::{order::OrderStatus, order_line},
    errors::{RuleDetail, ServiceError},
    services::orders::{CreateOrderRequest, OrderFilter, OrderLineRequest},
};
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

fn line(product_id: i32, quantity: i32, unit_price: rust_decimal::Decimal) -> OrderLineRequest {
    OrderLineRequest {
        product_id,
        quantity,
        unit_price,
    }
}

async fn stock_of(app: &TestApp, product_id: i32) -> i32 {
    app.state
        .services
        .catalog
        .get_product(product_id)
        .await
        .expect("product exists")
        .stock
}

#[tokio::test]
async fn creation_checks_stock_and_persists_nothing_on_refusal() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let orders = &app.state.services.orders;

    let err = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(hammer.id, 6, dec!(20.00))],
        })
        .await
        .unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::InsufficientStock { available: 5, requested: 6, .. })
    );
    assert!(orders.list_orders(OrderFilter::default()).await.unwrap().is_empty());

    let order = app.place_order(supplier.id, hammer.id, 5, dec!(20.00)).await;
    assert_eq!(order.status, OrderStatus::InProgress);
    assert_eq!(order.total_amount, dec!(100.00));
    assert_eq!(order.version, 1);
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.lines[0].line_total, dec!(100.00));
    assert!(order.order_number.starts_with('C'));

    // Checked, not reserved.
    assert_eq!(stock_of(&app, hammer.id).await, 5);
}

#[tokio::test]
async fn repeated_product_lines_are_checked_together() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let screws = app.seed_product("Wood screws 4x40", dec!(0.05), 5).await;

    let err = app
        .state
        .services
        .orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(screws.id, 3, dec!(0.05)), line(screws.id, 3, dec!(0.05))],
        })
        .await
        .unwrap_err();

    assert_matches!(
        err.detail(),
        Some(RuleDetail::InsufficientStock { available: 5, requested: 6, .. })
    );
}

#[tokio::test]
async fn total_is_the_sum_of_rounded_line_totals() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let saw = app.seed_product("Hand saw", dec!(18.30), 10).await;
    let tape = app.seed_product("Tape measure", dec!(7.15), 10).await;

    let order = app
        .state
        .services
        .orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(saw.id, 3, dec!(18.33)), line(tape.id, 2, dec!(7.15))],
        })
        .await
        .unwrap();

    assert_eq!(order.total_amount, dec!(69.29));
    assert_eq!(order.supplier.as_ref().map(|s| s.id), Some(supplier.id));
}

#[tokio::test]
async fn invalid_requests_are_rejected_before_touching_the_database() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let orders = &app.state.services.orders;

    let empty = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![],
        })
        .await;
    assert_matches!(empty, Err(ServiceError::ValidationError(_)));

    let zero_quantity = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(hammer.id, 0, dec!(20.00))],
        })
        .await;
    assert_matches!(zero_quantity, Err(ServiceError::ValidationError(_)));

    let sub_cent = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(hammer.id, 1, dec!(20.005))],
        })
        .await;
    assert_matches!(sub_cent, Err(ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn archived_or_unknown_references_are_refused() {
    let app = TestApp::new().await;
    let catalog = &app.state.services.catalog;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let retired = app.seed_supplier("S-002", "Ancienne Forge").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let chisel = app.seed_product("Chisel", dec!(9.00), 5).await;

    catalog.archive_supplier(retired.id).await.unwrap();
    catalog.archive_product(chisel.id).await.unwrap();
    let orders = &app.state.services.orders;

    let err = orders
        .create_order(CreateOrderRequest {
            supplier_id: retired.id,
            order_date: None,
            lines: vec![line(hammer.id, 1, dec!(20.00))],
        })
        .await
        .unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::ArchivedReference { entity, id }) if entity == "supplier" && *id == retired.id
    );

    let err = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(chisel.id, 1, dec!(9.00))],
        })
        .await
        .unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::ArchivedReference { entity, .. }) if entity == "product"
    );

    let missing_supplier = orders
        .create_order(CreateOrderRequest {
            supplier_id: 999,
            order_date: None,
            lines: vec![line(hammer.id, 1, dec!(20.00))],
        })
        .await;
    assert_matches!(
        missing_supplier.unwrap_err().detail(),
        Some(RuleDetail::UnknownReference { entity, id }) if entity == "supplier" && *id == 999
    );

    let missing_product = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(999, 1, dec!(20.00))],
        })
        .await;
    assert_matches!(
        missing_product.unwrap_err().detail(),
        Some(RuleDetail::UnknownReference { entity, id }) if entity == "product" && *id == 999
    );
}

#[tokio::test]
async fn delivery_rechecks_that_products_are_still_active() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let orders = &app.state.services.orders;

    let order = app.place_order(supplier.id, hammer.id, 2, dec!(20.00)).await;
    app.state
        .services
        .catalog
        .archive_product(hammer.id)
        .await
        .unwrap();

    let err = orders.deliver_order(order.id).await.unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::ArchivedReference { entity, id }) if entity == "product" && *id == hammer.id
    );

    assert_eq!(stock_of(&app, hammer.id).await, 5);
    let reloaded = orders.get_order(order.id).await.unwrap();
    assert_eq!(reloaded.status, OrderStatus::InProgress);
    assert_eq!(reloaded.version, 1);
}

#[tokio::test]
async fn delivery_decrements_stock_exactly_once() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 8).await;
    let orders = &app.state.services.orders;

    let order = app.place_order(supplier.id, hammer.id, 5, dec!(20.00)).await;
    let delivered = orders.deliver_order(order.id).await.unwrap();
    assert_eq!(delivered.status, OrderStatus::Delivered);
    assert_eq!(delivered.version, 2);

    assert_eq!(stock_of(&app, hammer.id).await, 3);

    let err = orders.deliver_order(order.id).await.unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::InvalidState {
            current: OrderStatus::Delivered,
            required: OrderStatus::InProgress,
            ..
        })
    );
    assert_eq!(stock_of(&app, hammer.id).await, 3);

    let reloaded = orders.get_order(order.id).await.unwrap();
    assert_eq!(reloaded.status, OrderStatus::Delivered);
    assert!(delivered.updated_at.is_some());
    assert_eq!(reloaded.updated_at, delivered.updated_at);
}

#[tokio::test]
async fn delivery_rechecks_stock_consumed_by_an_earlier_delivery() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let orders = &app.state.services.orders;

    let first = app.place_order(supplier.id, hammer.id, 5, dec!(20.00)).await;
    let second = app.place_order(supplier.id, hammer.id, 5, dec!(20.00)).await;

    orders.deliver_order(first.id).await.unwrap();
    let err = orders.deliver_order(second.id).await.unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::InsufficientStock { available: 0, requested: 5, .. })
    );

    let second = orders.get_order(second.id).await.unwrap();
    assert_eq!(second.status, OrderStatus::InProgress);
    assert_eq!(second.version, 1);
    assert_eq!(stock_of(&app, hammer.id).await, 0);
}

#[tokio::test]
async fn delivering_an_unknown_order_is_not_found() {
    let app = TestApp::new().await;
    let result = app.state.services.orders.deliver_order(42).await;
    assert_matches!(result, Err(ServiceError::NotFound(_)));
}

#[tokio::test]
async fn cancellation_deletes_the_order_and_its_lines() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;
    let saw = app.seed_product("Hand saw", dec!(30.00), 4).await;
    let orders = &app.state.services.orders;

    let order = orders
        .create_order(CreateOrderRequest {
            supplier_id: supplier.id,
            order_date: None,
            lines: vec![line(hammer.id, 2, dec!(20.00)), line(saw.id, 1, dec!(30.00))],
        })
        .await
        .unwrap();
    assert_eq!(order.lines.len(), 2);
    assert!(orders.cancel_order(order.id).await.unwrap());

    assert_matches!(orders.get_order(order.id).await, Err(ServiceError::NotFound(_)));
    let remaining_lines = order_line::Entity::find()
        .filter(order_line::Column::OrderId.eq(order.id))
        .count(&*app.state.db)
        .await
        .unwrap();
    assert_eq!(remaining_lines, 0);

    assert_eq!(stock_of(&app, hammer.id).await, 5);
    assert_eq!(stock_of(&app, saw.id).await, 4);

    assert_matches!(
        orders.cancel_order(order.id).await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn delivered_orders_cannot_be_cancelled() {
    let app = TestApp::new().await;
    let supplier = app.seed_supplier("S-001", "Outillage Nord").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 5).await;

    let order = app.delivered_order(supplier.id, hammer.id, 1, dec!(20.00)).await;
    let err = app
        .state
        .services
        .orders
        .cancel_order(order.id)
        .await
        .unwrap_err();
    assert_matches!(
        err.detail(),
        Some(RuleDetail::InvalidState {
            current: OrderStatus::Delivered,
            ..
        })
    );
}

#[tokio::test]
async fn listing_filters_by_status_supplier_and_day_range() {
    let app = TestApp::new().await;
    let north = app.seed_supplier("S-001", "Outillage Nord").await;
    let south = app.seed_supplier("S-002", "Quincaillerie Sud").await;
    let hammer = app.seed_product("Claw hammer", dec!(20.00), 100).await;
    let orders = &app.state.services.orders;

    let dated = |day: u32| Some(Utc.with_ymd_and_hms(2025, 3, day, 23, 30, 0).unwrap());
    for (supplier_id, day) in [(north.id, 1), (north.id, 15), (south.id, 31)] {
        orders
            .create_order(CreateOrderRequest {
                supplier_id,
                order_date: dated(day),
                lines: vec![line(hammer.id, 1, dec!(20.00))],
            })
            .await
            .unwrap();
    }
    let all = orders.list_orders(OrderFilter::default()).await.unwrap();
    assert_eq!(all.len(), 3);
    // Newest first
    assert_eq!(all[0].supplier_id, south.id);

    orders.deliver_order(all[2].id).await.unwrap();

    let delivered = orders
        .list_orders(OrderFilter {
            status: Some(OrderStatus::Delivered),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, all[2].id);

    let from_north = orders
        .list_orders(OrderFilter {
            supplier_id: Some(north.id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(from_north.len(), 2);

    // The last day of the range is included up to midnight.
    let march_window = orders
        .list_orders(OrderFilter {
            date_from: NaiveDate::from_ymd_opt(2025, 3, 15),
            date_to: NaiveDate::from_ymd_opt(2025, 3, 31),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(march_window.len(), 2);

    let first_day = orders
        .list_orders(OrderFilter {
            date_from: NaiveDate::from_ymd_opt(2025, 3, 1),
            date_to: NaiveDate::from_ymd_opt(2025, 3, 1),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(first_day.len(), 1);
    assert_eq!(first_day[0].lines[0].product_name.as_deref(), Some("Claw hammer"));
}
