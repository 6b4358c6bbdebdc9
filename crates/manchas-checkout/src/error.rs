//! # Checkout Error Types
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  ErrorKind        Variants                          HTTP               │
//! │  ─────────        ────────                          ────               │
//! │  Validation       Validation, AmountMismatch,       400                │
//! │                   InvalidSignature                                     │
//! │  NotFound         NotFound                          404                │
//! │  Conflict         InsufficientStock, Inactive…,     409 (stock and     │
//! │                   InvalidTransition, Duplicate,      inactive: 400)    │
//! │                   InUse, TicketExpired, StockUnderflow,                │
//! │                   MaterializationFailed                                │
//! │  ExternalService  Aggregator                        502 / 422          │
//! │  Internal         Database, Internal                500                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use manchas_core::{CoreError, Money, ValidationError};
use manchas_db::DbError;

use crate::aggregator::AggregatorError;

/// Result type alias for engine operations.
pub type CheckoutResult<T> = Result<T, CheckoutError>;

/// Coarse classification used by callers to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ExternalService,
    Internal,
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum CheckoutError {
    // =========================================================================
    // Input
    // =========================================================================
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// Webhook checksum did not match.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// Aggregator reported a different amount than the stored intent.
    #[error("Amount mismatch for payment {reference}: expected {expected}, received {received}")]
    AmountMismatch {
        reference: String,
        expected: Money,
        received: Money,
    },

    // =========================================================================
    // Lookup
    // =========================================================================
    /// Referenced entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    // =========================================================================
    // Conflicts
    // =========================================================================
    /// Not enough units to fulfil a line.
    #[error("Stock insuficiente para {product}: disponible {available}, solicitado {requested}")]
    InsufficientStock {
        product: String,
        available: i64,
        requested: i64,
    },

    /// Product exists but is inactive.
    #[error("El producto {product} no está activo")]
    InactiveProduct { product: String },

    /// A state machine refused the change.
    #[error("{entity} cannot move from {from} to {to}")]
    InvalidTransition {
        entity: String,
        from: String,
        to: String,
    },

    /// A UNIQUE column already holds the value.
    #[error("Duplicate value for {field}")]
    Duplicate { field: String },

    /// Row is referenced by sales or purchases and cannot be deleted.
    #[error("{entity} {id} tiene movimientos registrados; desactívelo en su lugar")]
    InUse { entity: String, id: String },

    /// Cash ticket is past its expiration.
    #[error("Cash ticket {code} has expired")]
    TicketExpired { code: String },

    /// A stock reversal would leave a product negative.
    #[error("Stock for product {product_id} cannot go below zero")]
    StockUnderflow { product_id: String },

    /// An approved payment could not be turned into a sale.
    #[error("Payment {reference} could not be applied: {reason}")]
    MaterializationFailed { reference: String, reason: String },

    // =========================================================================
    // External
    // =========================================================================
    /// Payment aggregator failed or rejected the request.
    #[error("Payment aggregator error: {0}")]
    Aggregator(#[from] AggregatorError),

    // =========================================================================
    // Internal
    // =========================================================================
    /// Unexpected database failure.
    #[error("Database error: {0}")]
    Database(DbError),

    /// Anything else.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CheckoutError {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CheckoutError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn in_use(entity: impl Into<String>, id: impl Into<String>) -> Self {
        CheckoutError::InUse {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        CheckoutError::Validation(msg.into())
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckoutError::Validation(_)
            | CheckoutError::InvalidSignature
            | CheckoutError::AmountMismatch { .. } => ErrorKind::Validation,

            CheckoutError::NotFound { .. } => ErrorKind::NotFound,

            CheckoutError::InsufficientStock { .. }
            | CheckoutError::InactiveProduct { .. }
            | CheckoutError::InvalidTransition { .. }
            | CheckoutError::Duplicate { .. }
            | CheckoutError::InUse { .. }
            | CheckoutError::TicketExpired { .. }
            | CheckoutError::StockUnderflow { .. }
            | CheckoutError::MaterializationFailed { .. } => ErrorKind::Conflict,

            CheckoutError::Aggregator(_) => ErrorKind::ExternalService,

            CheckoutError::Database(_) | CheckoutError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stock and inactive-product conflicts answer 400 on the sales contract.
    pub fn is_stock_rejection(&self) -> bool {
        matches!(
            self,
            CheckoutError::InsufficientStock { .. } | CheckoutError::InactiveProduct { .. }
        )
    }
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for CheckoutError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => CheckoutError::NotFound { entity, id },
            DbError::UniqueViolation { field, .. } => CheckoutError::Duplicate { field },
            DbError::StockUnderflow { product_id, .. } => {
                CheckoutError::StockUnderflow { product_id }
            }
            DbError::CheckViolation { message } => CheckoutError::Validation(message),
            other => CheckoutError::Database(other),
        }
    }
}

impl From<CoreError> for CheckoutError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InsufficientStock {
                product,
                available,
                requested,
            } => CheckoutError::InsufficientStock {
                product,
                available,
                requested,
            },
            CoreError::InactiveProduct { product } => CheckoutError::InactiveProduct { product },
            CoreError::InvalidTransition { entity, from, to } => CheckoutError::InvalidTransition {
                entity: entity.to_string(),
                from,
                to,
            },
            CoreError::Validation(v) => CheckoutError::Validation(v.to_string()),
            other => CheckoutError::Validation(other.to_string()),
        }
    }
}

impl From<ValidationError> for CheckoutError {
    fn from(err: ValidationError) -> Self {
        CheckoutError::Validation(err.to_string())
    }
}

impl From<serde_json::Error> for CheckoutError {
    fn from(err: serde_json::Error) -> Self {
        CheckoutError::Internal(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_errors_are_classified() {
        let err: CheckoutError = DbError::not_found("Product", "p-1").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err: CheckoutError = DbError::duplicate("purchases.reference", "FAC-1").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: CheckoutError = DbError::PoolExhausted.into();
        assert_eq!(err.kind(), ErrorKind::Internal);

        let err = CheckoutError::in_use("Proveedor", "s-1");
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!err.is_stock_rejection());
    }

    #[test]
    fn test_core_errors_are_classified() {
        let err: CheckoutError = CoreError::InsufficientStock {
            product: "Hueso Carnaza".into(),
            available: 2,
            requested: 3,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.is_stock_rejection());
        assert!(err.to_string().contains("Hueso Carnaza"));

        let err: CheckoutError = CoreError::InvalidMargin { bps: 10_000 }.into();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }
}
