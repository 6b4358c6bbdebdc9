//! # Purchase Repository
//!
//! Purchase headers and their immutable lines.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use manchas_core::{Money, Purchase, PurchaseLine, PurchaseStatus};

const PURCHASE_COLUMNS: &str = "id, supplier_id, reference, purchase_date, total, amount_paid, \
                                status, created_at, updated_at";

const LINE_COLUMNS: &str =
    "id, purchase_id, product_id, quantity, unit_cost, margin_bps, sell_price, subtotal";

/// Repository for purchase database operations.
#[derive(Debug, Clone)]
pub struct PurchaseRepository {
    pool: SqlitePool,
}

impl PurchaseRepository {
    /// Creates a new PurchaseRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PurchaseRepository { pool }
    }

    /// Gets a purchase header by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Purchase>> {
        let sql = format!("SELECT {} FROM purchases WHERE id = ?1", PURCHASE_COLUMNS);
        let purchase = sqlx::query_as::<_, Purchase>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(purchase)
    }

    /// Lists purchases, newest first.
    pub async fn list(&self) -> DbResult<Vec<Purchase>> {
        let sql = format!(
            "SELECT {} FROM purchases ORDER BY purchase_date DESC, created_at DESC",
            PURCHASE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Purchase>(&sql).fetch_all(&self.pool).await?)
    }

    /// Gets the lines of a purchase.
    pub async fn get_lines(&self, purchase_id: &str) -> DbResult<Vec<PurchaseLine>> {
        let sql = format!(
            "SELECT {} FROM purchase_lines WHERE purchase_id = ?1 ORDER BY rowid",
            LINE_COLUMNS
        );
        Ok(sqlx::query_as::<_, PurchaseLine>(&sql)
            .bind(purchase_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Inserts a purchase header.
    pub async fn insert(&self, conn: &mut SqliteConnection, purchase: &Purchase) -> DbResult<()> {
        debug!(id = %purchase.id, total = %purchase.total, "Inserting purchase");

        sqlx::query(
            r#"
            INSERT INTO purchases (
                id, supplier_id, reference, purchase_date, total, amount_paid,
                status, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&purchase.id)
        .bind(&purchase.supplier_id)
        .bind(&purchase.reference)
        .bind(purchase.purchase_date)
        .bind(purchase.total)
        .bind(purchase.amount_paid)
        .bind(purchase.status)
        .bind(purchase.created_at)
        .bind(purchase.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a purchase line.
    pub async fn insert_line(&self, conn: &mut SqliteConnection, line: &PurchaseLine) -> DbResult<()> {
        debug!(purchase_id = %line.purchase_id, product_id = %line.product_id, "Inserting purchase line");

        sqlx::query(
            r#"
            INSERT INTO purchase_lines (
                id, purchase_id, product_id, quantity, unit_cost, margin_bps, sell_price, subtotal
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&line.id)
        .bind(&line.purchase_id)
        .bind(&line.product_id)
        .bind(line.quantity)
        .bind(line.unit_cost)
        .bind(line.margin_bps)
        .bind(line.sell_price)
        .bind(line.subtotal)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes the write lock and returns the purchase header, if any.
    pub async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Purchase>> {
        let sql = format!(
            "UPDATE purchases SET updated_at = updated_at WHERE id = ?1 RETURNING {}",
            PURCHASE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Purchase>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Lines of a purchase, read inside the caller's transaction.
    pub async fn lines_in(
        &self,
        conn: &mut SqliteConnection,
        purchase_id: &str,
    ) -> DbResult<Vec<PurchaseLine>> {
        let sql = format!(
            "SELECT {} FROM purchase_lines WHERE purchase_id = ?1 ORDER BY rowid",
            LINE_COLUMNS
        );
        Ok(sqlx::query_as::<_, PurchaseLine>(&sql)
            .bind(purchase_id)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// Margin of the product's most recent purchase line that carried one,
    /// ignoring cancelled purchases.
    pub async fn last_margin_for_product(
        &self,
        conn: &mut SqliteConnection,
        product_id: &str,
    ) -> DbResult<Option<i64>> {
        let margin: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT l.margin_bps
            FROM purchase_lines l
            JOIN purchases p ON p.id = l.purchase_id
            WHERE l.product_id = ?1
              AND l.margin_bps IS NOT NULL
              AND p.status != 'cancelled'
            ORDER BY p.created_at DESC, l.rowid DESC
            LIMIT 1
            "#,
        )
        .bind(product_id)
        .fetch_optional(&mut *conn)
        .await?;

        Ok(margin)
    }

    /// Rewrites the mutable header fields.
    pub async fn update_header(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        supplier_id: &str,
        reference: Option<&str>,
        status: PurchaseStatus,
        amount_paid: Money,
    ) -> DbResult<Purchase> {
        debug!(id = %id, status = %status, amount_paid = %amount_paid, "Updating purchase");

        let sql = format!(
            r#"
            UPDATE purchases
            SET supplier_id = ?2, reference = ?3, status = ?4, amount_paid = ?5, updated_at = ?6
            WHERE id = ?1
            RETURNING {}
            "#,
            PURCHASE_COLUMNS
        );
        sqlx::query_as::<_, Purchase>(&sql)
            .bind(id)
            .bind(supplier_id)
            .bind(reference)
            .bind(status)
            .bind(amount_paid)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Purchase", id))
    }
}

/// Helper to generate a new purchase or purchase line ID.
pub fn generate_purchase_id() -> String {
    Uuid::new_v4().to_string()
}
