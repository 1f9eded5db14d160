use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use sea_orm::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::entities::order::OrderStatus;

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Bad Request",
    "message": "Business rule violation: Insufficient stock for product Hammer. Stock: 5, requested: 6",
    "details": {
        "kind": "insufficient_stock",
        "product_id": 7,
        "product_name": "Hammer",
        "available": 5,
        "requested": 6
    },
    "timestamp": "2025-03-01T10:30:00Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// Structured payload for business-rule violations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RuleDetail>,
    /// RFC 3339 timestamp when the error was produced
    pub timestamp: String,
}

/// Numbers behind a business-rule rejection, so callers can render an actionable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleDetail {
    InsufficientStock {
        product_id: i32,
        product_name: String,
        available: i32,
        requested: i32,
    },
    ArchivedReference {
        entity: String,
        id: i32,
    },
    UnknownReference {
        entity: String,
        id: i32,
    },
    InvalidState {
        order_id: i32,
        current: OrderStatus,
        required: OrderStatus,
    },
    InstallmentLimit {
        max: u32,
    },
    PaymentSpacing {
        days_elapsed: i64,
        minimum_days: i64,
    },
    InstallmentAmount {
        expected: Decimal,
        given: Decimal,
    },
    Overpayment {
        remaining: Decimal,
        given: Decimal,
    },
    AlreadySettled {
        order_id: i32,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Business rule violation: {message}")]
    BusinessRule {
        message: String,
        detail: Option<RuleDetail>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(msg)) => ServiceError::Conflict(msg),
            Some(SqlErr::ForeignKeyConstraintViolation(msg)) => ServiceError::business_rule(
                format!("Operation would break a record reference: {}", msg),
            ),
            _ => ServiceError::DatabaseError(err),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Business-rule rejection without a structured payload.
    pub fn business_rule(message: impl Into<String>) -> Self {
        ServiceError::BusinessRule {
            message: message.into(),
            detail: None,
        }
    }

    /// Business-rule rejection carrying the numbers involved.
    pub fn rule_violation(message: impl Into<String>, detail: RuleDetail) -> Self {
        ServiceError::BusinessRule {
            message: message.into(),
            detail: Some(detail),
        }
    }

    pub fn detail(&self) -> Option<&RuleDetail> {
        match self {
            ServiceError::BusinessRule { detail, .. } => detail.as_ref(),
            _ => None,
        }
    }

    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BusinessRule { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            details: self.detail().cloned(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use rust_decimal_macros::dec;

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::business_rule("x").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            ServiceError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::InternalError("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("pool exhausted".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("syntax error".into())).response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFound("Order 4 not found".into()).response_message(),
            "Not found: Order 4 not found"
        );
    }

    #[test]
    fn custom_db_errors_stay_database_errors() {
        let err: ServiceError = DbErr::Custom("boom".into()).into();
        assert!(matches!(err, ServiceError::DatabaseError(_)));
    }

    #[tokio::test]
    async fn business_rule_response_carries_detail() {
        let err = ServiceError::rule_violation(
            "Payment amount must equal 333.00",
            RuleDetail::InstallmentAmount {
                expected: dec!(333.00),
                given: dec!(400),
            },
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload["error"], "Bad Request");
        assert_eq!(payload["details"]["kind"], "installment_amount");
        assert_eq!(payload["details"]["expected"], "333.00");
    }
}
