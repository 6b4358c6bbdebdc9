//! Error types for the back office API.
//!
//! Every failure answers `{ "ok": false, "msg": "..." }`.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::{error, warn};

use manchas_checkout::{AggregatorError, CheckoutError, ErrorKind};

pub type ApiResult<T> = Result<T, ApiError>;

/// API errors.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error("{0}")]
    BadRequest(String),

    #[error("Usuario no autenticado")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ApiError::BadRequest(msg.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Checkout(err) if err.is_stock_rejection() => StatusCode::BAD_REQUEST,
            ApiError::Checkout(err) => match err.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::ExternalService => match err {
                    CheckoutError::Aggregator(agg) if agg.is_rejection() => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    _ => StatusCode::BAD_GATEWAY,
                },
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(format!("Datos inválidos: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(format!("Parámetros inválidos: {}", rejection.body_text()))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let body = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            error!(error = %self, "Request failed");
            json!({ "ok": false, "msg": "Error interno del servidor" })
        } else {
            match &self {
                ApiError::Checkout(CheckoutError::Aggregator(agg)) => {
                    warn!(error = %agg, "Aggregator call failed");
                    let detail = match agg {
                        AggregatorError::Rejected { detail, .. } => detail.clone(),
                        other => other.to_string(),
                    };
                    json!({
                        "ok": false,
                        "msg": "Error con la pasarela de pagos",
                        "detalle": detail,
                    })
                }
                _ => json!({ "ok": false, "msg": self.to_string() }),
            }
        };

        (status, Json(body)).into_response()
    }
}
