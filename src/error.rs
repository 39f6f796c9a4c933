use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::migrate::MigrateError;
use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for the entire application
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Settlement error: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Settlement-related errors
///
/// An already-settled reference and a refund-blocked release are NOT errors;
/// they are the `AlreadySettled` / `Deferred` variants of `SettlementOutcome`.
#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("Purchase not found: {0}")]
    PurchaseNotFound(Uuid),

    #[error("Allocation not found: {0}")]
    AllocationNotFound(Uuid),

    #[error("{entity} in invalid state: {current}, expected: {expected}")]
    InvalidState {
        entity: &'static str,
        current: String,
        expected: String,
    },

    #[error("Insufficient hold on wallet {wallet_id}: requested {requested}, held {held}")]
    InsufficientHold {
        wallet_id: Uuid,
        requested: Decimal,
        held: Decimal,
    },

    #[error("Wallet {wallet_id} out of balance: total {total}, available {available}, hold {hold}")]
    UnbalancedWallet {
        wallet_id: Uuid,
        total: Decimal,
        available: Decimal,
        hold: Decimal,
    },

    #[error("Concurrency conflict after {attempts} attempts: {message}")]
    ConcurrencyConflict { attempts: u32, message: String },
}

/// API error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match self {
            AppError::Settlement(SettlementError::PurchaseNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "PURCHASE_NOT_FOUND",
                format!("Purchase not found: {}", id),
                None,
            ),
            AppError::Settlement(SettlementError::AllocationNotFound(id)) => (
                StatusCode::NOT_FOUND,
                "ALLOCATION_NOT_FOUND",
                format!("Allocation not found: {}", id),
                None,
            ),
            AppError::Settlement(SettlementError::InvalidState {
                entity,
                current,
                expected,
            }) => (
                StatusCode::CONFLICT,
                "INVALID_STATE",
                format!("{} in invalid state: {}", entity, current),
                Some(serde_json::json!({
                    "current": current,
                    "expected": expected,
                })),
            ),
            AppError::Settlement(SettlementError::InsufficientHold {
                wallet_id,
                requested,
                held,
            }) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INSUFFICIENT_HOLD",
                format!("Insufficient hold on wallet {}", wallet_id),
                Some(serde_json::json!({
                    "wallet_id": wallet_id,
                    "requested": requested.to_string(),
                    "held": held.to_string(),
                })),
            ),
            AppError::Settlement(SettlementError::ConcurrencyConflict { attempts, message }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "CONCURRENCY_CONFLICT",
                format!("Settlement conflicted after {} attempts", attempts),
                Some(serde_json::json!({"message": message})),
            ),
            AppError::Settlement(err @ SettlementError::UnbalancedWallet { .. }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "UNBALANCED_WALLET",
                err.to_string(),
                None,
            ),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message, None),
            AppError::InvalidInput(message) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_INPUT",
                message,
                None,
            ),
            AppError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "A database error occurred".to_string(),
                None,
            ),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let body = Json(ErrorResponse {
            error: message,
            error_code: error_code.to_string(),
            details,
        });

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal(format!("Error converting: {:?}", error))
    }
}

impl From<rust_decimal::Error> for AppError {
    fn from(error: rust_decimal::Error) -> Self {
        AppError::InvalidInput(format!("Decimal conversion error: {:?}", error))
    }
}

impl From<MigrateError> for AppError {
    fn from(error: MigrateError) -> Self {
        AppError::Internal(format!("Migration error: {:?}", error))
    }
}

/// Result type alias for the application
pub type AppResult<T> = Result<T, AppError>;
