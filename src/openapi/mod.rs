use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hardware Store API",
        version = "1.0.0",
        description = r#"
# Hardware Store Purchasing API

Purchase orders placed with suppliers, stock tracking and installment payments.

## Order lifecycle

`IN_PROGRESS` → `DELIVERED` → `PAID`. An order still in progress can be cancelled, which deletes it.
Stock is checked when an order is placed and decremented when it is delivered.

## Installments

A delivered order is paid in at most three installments, at least five days apart.
Each installment but the last must equal the remaining amount divided by the installments left.

## Authentication

Every `/api/v1` endpoint requires a bearer JWT whose `role` claim is one of
`purchasing_manager`, `payment_manager` or `admin`:

```
Authorization: Bearer <your-jwt-token>
```
"#,
        contact(name = "Hardware Store Engineering"),
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "orders", description = "Purchase order lifecycle"),
        (name = "payments", description = "Installments, balances and supplier debt"),
        (name = "catalog", description = "Supplier and product administration"),
    ),
    paths(
        // Orders
        crate::handlers::orders::list_orders,
        crate::handlers::orders::create_order,
        crate::handlers::orders::get_order,
        crate::handlers::orders::deliver_order,
        crate::handlers::orders::cancel_order,

        // Payments
        crate::handlers::payments::record_payment,
        crate::handlers::payments::list_payments,
        crate::handlers::payments::pending_orders,
        crate::handlers::payments::get_order_payments,
        crate::handlers::payments::get_remaining_amount,
        crate::handlers::payments::get_supplier_debt,

        // Catalog
        crate::handlers::catalog::create_supplier,
        crate::handlers::catalog::get_supplier,
        crate::handlers::catalog::archive_supplier,
        crate::handlers::catalog::create_product,
        crate::handlers::catalog::get_product,
        crate::handlers::catalog::archive_product,
    ),
    components(
        schemas(
            // Order types
            crate::entities::order::OrderStatus,
            crate::services::orders::CreateOrderRequest,
            crate::services::orders::OrderLineRequest,
            crate::services::orders::OrderResponse,
            crate::services::orders::OrderLineResponse,
            crate::services::orders::SupplierSummary,
            crate::handlers::orders::CancelOrderResponse,

            // Payment types
            crate::services::payments::RecordPaymentRequest,
            crate::services::payments::PaymentResponse,
            crate::services::payments::OrderBalance,
            crate::handlers::payments::RemainingAmountResponse,
            crate::handlers::payments::SupplierDebtResponse,

            // Catalog types
            crate::services::catalog::CreateSupplierRequest,
            crate::services::catalog::SupplierResponse,
            crate::services::catalog::CreateProductRequest,
            crate::services::catalog::ProductResponse,

            // Error types
            crate::errors::ErrorResponse,
            crate::errors::RuleDetail,
        )
    )
)]
pub struct ApiDocV1;

/// Registers the `Bearer` scheme the paths refer to.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_generation() {
        let openapi = ApiDocV1::openapi();
        let json = serde_json::to_string_pretty(&openapi).unwrap();
        assert!(json.contains("Hardware Store API"));
        assert!(json.contains("/api/v1/orders/{id}/deliver"));
        assert!(json.contains("/api/v1/payments/supplier/{supplier_id}/debt"));
        assert!(json.contains("Bearer"));
    }

    #[test]
    fn order_status_schema_lists_wire_values() {
        let json = serde_json::to_value(ApiDocV1::openapi()).unwrap();
        let status = &json["components"]["schemas"]["OrderStatus"];
        let values: Vec<&str> = status["enum"]
            .as_array()
            .expect("OrderStatus should be a string enum")
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert_eq!(values, vec!["IN_PROGRESS", "DELIVERED", "PAID"]);
    }
}
