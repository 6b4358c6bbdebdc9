//! # Sale Engine
//!
//! Turns carts into sales and drives the sale lifecycle.
//!
//! ## Sale Creation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate customer + items            (no transaction yet)             │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  BEGIN                                                                  │
//! │  lock products in request order ──► NotFound / Inactive / Stock        │
//! │  INSERT sales (completed, total = Σ qty × unit price)                  │
//! │  INSERT sale_lines                                                      │
//! │  UPDATE products SET stock = stock - qty  (conditional)                │
//! │  COMMIT                   any error ──► ROLLBACK, nothing persisted    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Lifecycle
//! ```text
//! Completed ──mark_sent──► Sent ──confirm_delivery──► Received   (PSE only)
//!     │
//!     └──cancel_sale──► Cancelled   (stock restored)
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use manchas_core::validation::{require_fields, validate_phone};
use manchas_core::{Payment, PaymentMethod, Sale, SaleLine, SaleStatus};
use manchas_db::repository::sale::generate_sale_id;
use manchas_db::{Database, DbError, SqliteConnection};

use crate::cart::{items_from_snapshot, lock_cart, validate_items, Availability, CartItem, LockedCart};
use crate::error::{CheckoutError, CheckoutResult};

/// Delivery data captured with a direct sale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaleCustomer {
    pub name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub notes: Option<String>,
}

impl SaleCustomer {
    fn validate(&self) -> CheckoutResult<()> {
        require_fields(&[
            ("nombreCompleto", &self.name),
            ("direccion", &self.address),
            ("ciudad", &self.city),
        ])?;
        validate_phone(&self.phone)?;
        Ok(())
    }
}

/// A sale with its lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaleDetail {
    #[serde(flatten)]
    pub sale: Sale,
    pub lines: Vec<SaleLine>,
}

/// Payment data stamped on a materialized sale.
struct PaidBy<'a> {
    method: PaymentMethod,
    reference: &'a str,
}

/// Sale creation and lifecycle.
#[derive(Debug, Clone)]
pub struct SaleEngine {
    db: Database,
}

impl SaleEngine {
    pub fn new(db: Database) -> Self {
        SaleEngine { db }
    }

    /// Records a sale and takes its units out of stock, atomically.
    pub async fn create_sale(
        &self,
        user_id: Option<&str>,
        customer: SaleCustomer,
        items: &[CartItem],
    ) -> CheckoutResult<Sale> {
        customer.validate()?;
        validate_items(items)?;

        let products = self.db.products();
        let mut tx = self.db.begin().await?;

        let cart = lock_cart(&products, &mut tx, items, Availability::Sellable).await?;
        let sale = self
            .insert_sale(&mut tx, user_id, &customer, &cart, None)
            .await?;
        cart.decrement(&products, &mut tx).await?;

        tx.commit().await.map_err(DbError::from)?;

        info!(
            sale_id = %sale.id,
            total = %sale.total,
            lines = cart.lines.len(),
            "Sale created"
        );
        Ok(sale)
    }

    /// Builds the sale an approved payment paid for, inside the caller's
    /// transaction. Stock is checked again: it was never reserved.
    pub(crate) async fn materialize(
        &self,
        conn: &mut SqliteConnection,
        payment: &Payment,
    ) -> CheckoutResult<Sale> {
        let products = self.db.products();
        let snapshot = &payment.snapshot;
        let items = items_from_snapshot(&snapshot.items);

        let cart = lock_cart(&products, conn, &items, Availability::InStock).await?;
        if cart.total != payment.amount {
            warn!(
                reference = %payment.reference,
                snapshot_total = %cart.total,
                amount = %payment.amount,
                "Snapshot total differs from payment amount"
            );
        }

        let customer = SaleCustomer {
            name: snapshot.customer.full_name.clone(),
            phone: snapshot.customer.phone.clone().unwrap_or_default(),
            address: snapshot.customer.address.clone(),
            city: snapshot.customer.city.clone(),
            notes: snapshot.customer.notes.clone(),
        };
        let paid_by = PaidBy {
            method: payment.method,
            reference: &payment.reference,
        };

        let sale = self
            .insert_sale(conn, Some(&payment.user_id), &customer, &cart, Some(paid_by))
            .await?;
        cart.decrement(&products, conn).await?;

        info!(
            sale_id = %sale.id,
            reference = %payment.reference,
            total = %sale.total,
            "Sale materialized from payment"
        );
        Ok(sale)
    }

    async fn insert_sale(
        &self,
        conn: &mut SqliteConnection,
        user_id: Option<&str>,
        customer: &SaleCustomer,
        cart: &LockedCart,
        paid_by: Option<PaidBy<'_>>,
    ) -> CheckoutResult<Sale> {
        let sales = self.db.sales();
        let now = Utc::now();

        let sale = Sale {
            id: generate_sale_id(),
            user_id: user_id.map(str::to_string),
            total: cart.total,
            status: SaleStatus::Completed,
            payment_method: paid_by.as_ref().map(|p| p.method),
            payment_reference: paid_by.as_ref().map(|p| p.reference.to_string()),
            customer_name: customer.name.trim().to_string(),
            customer_phone: customer.phone.trim().to_string(),
            customer_address: customer.address.trim().to_string(),
            customer_city: customer.city.trim().to_string(),
            customer_notes: customer.notes.clone().filter(|n| !n.trim().is_empty()),
            delivery_image: None,
            created_at: now,
            updated_at: now,
            sent_at: None,
            received_at: None,
            cancelled_at: None,
        };
        sales.insert(conn, &sale).await?;

        for line in &cart.lines {
            sales
                .insert_line(
                    conn,
                    &SaleLine {
                        id: generate_sale_id(),
                        sale_id: sale.id.clone(),
                        product_id: line.product_id.clone(),
                        product_name: line.product_name.clone(),
                        quantity: line.quantity,
                        unit_price: line.unit_price,
                        subtotal: line.subtotal,
                    },
                )
                .await?;
        }

        Ok(sale)
    }

    /// Completed → Sent.
    pub async fn mark_sent(&self, id: &str) -> CheckoutResult<Sale> {
        let sales = self.db.sales();
        let mut tx = self.db.begin().await?;

        let sale = sales
            .lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Venta", id))?;
        sale.status.transition(SaleStatus::Sent)?;

        let sale = sales
            .update_status(&mut tx, id, SaleStatus::Sent, Utc::now(), None)
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(sale_id = %id, "Sale marked as sent");
        Ok(sale)
    }

    /// Sent → Received for PSE-paid sales, with the delivery photo path.
    pub async fn confirm_delivery(&self, id: &str, image_path: &str) -> CheckoutResult<Sale> {
        if image_path.trim().is_empty() {
            return Err(CheckoutError::validation(
                "Se requiere una imagen de confirmación de entrega",
            ));
        }

        let sales = self.db.sales();
        let mut tx = self.db.begin().await?;

        let sale = sales
            .lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Venta", id))?;

        if sale.payment_method != Some(PaymentMethod::Pse) {
            warn!(sale_id = %id, method = ?sale.payment_method, "Delivery confirmation on non-PSE sale");
            return Err(CheckoutError::validation(
                "Solo las ventas pagadas por PSE requieren confirmación de entrega",
            ));
        }
        sale.status.transition(SaleStatus::Received)?;

        let sale = sales
            .update_status(&mut tx, id, SaleStatus::Received, Utc::now(), Some(image_path))
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(sale_id = %id, image = %image_path, "Delivery confirmed");
        Ok(sale)
    }

    /// Pending | Completed → Cancelled. A completed sale gives its units back.
    pub async fn cancel_sale(&self, id: &str) -> CheckoutResult<Sale> {
        let sales = self.db.sales();
        let products = self.db.products();
        let mut tx = self.db.begin().await?;

        let sale = sales
            .lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Venta", id))?;
        sale.status.transition(SaleStatus::Cancelled)?;

        if sale.status == SaleStatus::Completed {
            let lines = sales.lines_in(&mut tx, id).await?;
            for line in &lines {
                products
                    .adjust_stock(&mut tx, &line.product_id, line.quantity)
                    .await?;
                debug!(sale_id = %id, product_id = %line.product_id, quantity = line.quantity, "Stock restored");
            }
        }

        let cancelled = sales
            .update_status(&mut tx, id, SaleStatus::Cancelled, Utc::now(), None)
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        warn!(sale_id = %id, previous = %sale.status, "Sale cancelled");
        Ok(cancelled)
    }

    pub async fn get_sale(&self, id: &str) -> CheckoutResult<SaleDetail> {
        let sales = self.db.sales();
        let sale = sales
            .get_by_id(id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Venta", id))?;
        let lines = sales.get_lines(id).await?;
        Ok(SaleDetail { sale, lines })
    }

    /// Newest first, optionally filtered by status.
    pub async fn list_sales(&self, status: Option<SaleStatus>) -> CheckoutResult<Vec<Sale>> {
        Ok(self.db.sales().list(status).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cart::tests::{item, seed_product};
    use manchas_core::{Money, ProductState};
    use manchas_db::DbConfig;

    fn customer() -> SaleCustomer {
        SaleCustomer {
            name: "Laura Gómez".into(),
            phone: "3001234567".into(),
            address: "Calle 10 # 5-20".into(),
            city: "Medellín".into(),
            notes: None,
        }
    }

    async fn setup() -> (Database, SaleEngine) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let engine = SaleEngine::new(db.clone());
        (db, engine)
    }

    #[tokio::test]
    async fn test_sale_decrements_stock_then_rejects_oversell() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;

        let sale = engine
            .create_sale(Some("user-1"), customer(), &[item(&bone, 3)])
            .await
            .unwrap();
        assert_eq!(sale.total, Money::from_major(3000));
        assert_eq!(sale.status, SaleStatus::Completed);
        let stock = db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 2);

        let err = engine
            .create_sale(Some("user-1"), customer(), &[item(&bone, 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InsufficientStock { available: 2, requested: 3, .. }));
        let stock = db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 2);
    }

    #[tokio::test]
    async fn test_failed_second_item_persists_nothing() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let ball = seed_product(&db, "Pelota Goma", 800, 1).await;

        let err = engine
            .create_sale(None, customer(), &[item(&bone, 2), item(&ball, 2)])
            .await
            .unwrap_err();
        assert!(err.is_stock_rejection());

        assert!(engine.list_sales(None).await.unwrap().is_empty());
        let line_count = count_rows(&db, "sale_lines").await;
        assert_eq!(line_count, 0);
        let stock = db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 5);
    }

    #[tokio::test]
    async fn test_inactive_product_is_not_sold() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let ball = seed_product(&db, "Pelota Goma", 800, 4).await;
        db.products()
            .set_state(&ball.id, ProductState::Inactive)
            .await
            .unwrap()
            .unwrap();

        let err = engine
            .create_sale(None, customer(), &[item(&bone, 1), item(&ball, 1)])
            .await
            .unwrap_err();
        assert!(matches!(&err, CheckoutError::InactiveProduct { product } if product == "Pelota Goma"));
        assert!(err.is_stock_rejection());

        assert_eq!(count_rows(&db, "sales").await, 0);
        assert_eq!(db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock, 5);
        assert_eq!(db.products().get_by_id(&ball.id).await.unwrap().unwrap().stock, 4);
    }

    async fn count_rows(db: &Database, table: &str) -> i64 {
        let sql = format!("SELECT COUNT(*) FROM {}", table);
        sqlx::query_scalar(&sql).fetch_one(db.pool()).await.unwrap()
    }

    #[tokio::test]
    async fn test_total_is_sum_of_lines() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 10).await;
        let ball = seed_product(&db, "Pelota Goma", 850, 10).await;

        let sale = engine
            .create_sale(None, customer(), &[item(&bone, 2), item(&ball, 3)])
            .await
            .unwrap();
        let detail = engine.get_sale(&sale.id).await.unwrap();

        let sum: Money = detail.lines.iter().map(|l| l.subtotal).sum();
        assert_eq!(detail.sale.total, sum);
        assert_eq!(sum, Money::from_cents(455_000));
        for line in &detail.lines {
            assert_eq!(line.subtotal, line.unit_price.multiply_quantity(line.quantity));
        }
    }

    #[tokio::test]
    async fn test_invalid_customer_is_rejected() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;

        let mut bad = customer();
        bad.phone = "300-123".into();
        let err = engine.create_sale(None, bad, &[item(&bone, 1)]).await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let mut missing = customer();
        missing.city = " ".into();
        let err = engine.create_sale(None, missing, &[item(&bone, 1)]).await.unwrap_err();
        assert!(err.to_string().contains("ciudad"));
    }

    #[tokio::test]
    async fn test_cancel_restores_stock_once() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;

        let sale = engine
            .create_sale(None, customer(), &[item(&bone, 3)])
            .await
            .unwrap();
        let cancelled = engine.cancel_sale(&sale.id).await.unwrap();
        assert_eq!(cancelled.status, SaleStatus::Cancelled);
        assert!(cancelled.cancelled_at.is_some());

        let stock = db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock;
        assert_eq!(stock, 5);

        let err = engine.cancel_sale(&sale.id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_lifecycle_and_delivery_rules() {
        let (db, engine) = setup().await;
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;

        let sale = engine
            .create_sale(None, customer(), &[item(&bone, 1)])
            .await
            .unwrap();

        let sent = engine.mark_sent(&sale.id).await.unwrap();
        assert_eq!(sent.status, SaleStatus::Sent);
        assert!(sent.sent_at.is_some());

        // Direct sales carry no payment method.
        let err = engine.confirm_delivery(&sale.id, "uploads/a.jpg").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let err = engine.confirm_delivery(&sale.id, "").await.unwrap_err();
        assert!(matches!(err, CheckoutError::Validation(_)));

        let err = engine.cancel_sale(&sale.id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));

        let err = engine.mark_sent("missing").await.unwrap_err();
        assert!(matches!(err, CheckoutError::NotFound { .. }));
    }
}
