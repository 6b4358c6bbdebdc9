//! # Manchas y Pecas API
//!
//! REST back office for the catalog, sales, purchases and payments.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  /sales                       POST, GET                                │
//! │  /sales/{id}                  GET                                      │
//! │  /sales/{id}/mark-sent        PUT                                      │
//! │  /sales/{id}/confirm-delivery POST (multipart "image")                 │
//! │  /sales/{id}/cancel           PUT                                      │
//! │                                                                         │
//! │  /products                    POST, GET (?categoria, ?estado)          │
//! │  /products/{id}               GET, PUT, DELETE                         │
//! │  /products/{id}/state         PATCH                                    │
//! │                                                                         │
//! │  /suppliers                   POST, GET (?activos)                     │
//! │  /suppliers/{id}              GET, PUT, DELETE                         │
//! │  /suppliers/{id}/state        PATCH                                    │
//! │                                                                         │
//! │  /purchases                   POST, GET                                │
//! │  /purchases/{id}              GET, PUT                                 │
//! │                                                                         │
//! │  /payments/pse/banks          GET                                      │
//! │  /payments/pse/initiate       POST                                     │
//! │  /payments/pse/status/{ref}   GET                                      │
//! │  /payments/cash/initiate      POST                                     │
//! │  /payments/cash/confirm       POST                                     │
//! │  /payments/cash/status/{code} GET                                      │
//! │  /payments/webhook            POST (checksum-verified, no auth)        │
//! │                                                                         │
//! │  /health                      GET                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Environment variables:
//! - `MANCHAS_HOST` / `MANCHAS_PORT` - bind address (default: 0.0.0.0:3000)
//! - `MANCHAS_DATABASE_PATH` - SQLite file (default: manchas.db)
//! - `MANCHAS_UPLOADS_DIR` - delivery photos (default: uploads)
//! - `MANCHAS_CHECKOUT_CONFIG` - checkout TOML file
//! - `MANCHAS_DB_MAX_CONNECTIONS` - pool size (default: 5)
//!
//! Authentication happens upstream; the user id arrives in `x-user-id`.

pub mod config;
pub mod error;
pub mod routes;

// Re-exports
pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::HeaderMap;
use axum::Router;
use tower_http::trace::TraceLayer;

use manchas_checkout::CheckoutEngines;
use manchas_db::Database;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state.
pub struct AppState {
    pub db: Database,
    pub engines: CheckoutEngines,
    pub uploads_dir: PathBuf,
}

/// Builds the full router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(routes::health::router())
        .nest("/products", routes::products::router())
        .nest("/suppliers", routes::suppliers::router())
        .nest("/sales", routes::sales::router())
        .nest("/purchases", routes::purchases::router())
        .nest("/payments", routes::payments::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// User id set by the auth gateway, if any.
pub(crate) fn user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use axum::response::Response;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use manchas_checkout::aggregator::{AggregatorTransaction, PaymentLink, PaymentLinkRequest};
    use manchas_checkout::{AggregatorError, Bank, CheckoutConfig, PaymentAggregator};
    use manchas_core::{Money, Product, ProductCategory, ProductState};
    use manchas_db::DbConfig;

    pub const EVENTS_SECRET: &str = "test_events_secret";

    /// Accepts every link; knows no transactions.
    pub struct StubAggregator;

    #[async_trait]
    impl PaymentAggregator for StubAggregator {
        async fn create_payment_link(
            &self,
            request: &PaymentLinkRequest,
        ) -> Result<PaymentLink, AggregatorError> {
            let id = format!("link-{}", request.reference);
            Ok(PaymentLink {
                checkout_url: format!("https://checkout.test/l/{}", id),
                id,
                raw: json!({}),
            })
        }

        async fn get_transaction(&self, _id: &str) -> Result<AggregatorTransaction, AggregatorError> {
            Err(AggregatorError::Timeout)
        }

        async fn find_transaction_by_link(
            &self,
            _link_id: &str,
        ) -> Result<Option<AggregatorTransaction>, AggregatorError> {
            Ok(None)
        }

        async fn list_banks(&self) -> Result<Vec<Bank>, AggregatorError> {
            Ok(vec![
                Bank {
                    financial_institution_code: "1051".into(),
                    financial_institution_name: "DAVIVIENDA".into(),
                    kind: "persona_natural".into(),
                },
                Bank {
                    financial_institution_code: "1007".into(),
                    financial_institution_name: "BANCOLOMBIA".into(),
                    kind: "persona_natural".into(),
                },
            ])
        }
    }

    pub struct TestApp {
        pub router: Router,
        pub db: Database,
        pub uploads: tempfile::TempDir,
    }

    pub async fn test_app() -> TestApp {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = CheckoutConfig::default();
        config.aggregator.events_secret = EVENTS_SECRET.into();
        let engines = CheckoutEngines::new(db.clone(), &config, Arc::new(StubAggregator));
        let uploads = tempfile::tempdir().unwrap();

        let state = Arc::new(AppState {
            db: db.clone(),
            engines,
            uploads_dir: uploads.path().to_path_buf(),
        });

        TestApp {
            router: create_router(state),
            db,
            uploads,
        }
    }

    pub async fn seed_product(db: &Database, name: &str, price: i64, stock: i64) -> Product {
        let now = chrono::Utc::now();
        db.products()
            .insert(&Product {
                id: manchas_db::repository::product::generate_product_id(),
                name: name.into(),
                category: ProductCategory::Snacks,
                description: None,
                cost_price: Money::from_major(price / 2),
                sell_price: Money::from_major(price),
                stock,
                state: ProductState::Active,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap()
    }

    pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response: Response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .header(USER_ID_HEADER, "user-1")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(USER_ID_HEADER, "user-1")
            .body(Body::empty())
            .unwrap()
    }

    pub fn multipart_request(uri: &str, filename: &str, data: &[u8]) -> Request<Body> {
        let boundary = "manchasboundary";
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{b}\r\nContent-Disposition: form-data; name=\"image\"; filename=\"{f}\"\r\nContent-Type: image/jpeg\r\n\r\n",
                b = boundary,
                f = filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());

        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", format!("multipart/form-data; boundary={}", boundary))
            .body(Body::from(body))
            .unwrap()
    }
}
