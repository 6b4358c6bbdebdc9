//! # Sale Repository
//!
//! Sale headers, their lines and lifecycle timestamps.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use manchas_core::{Sale, SaleLine, SaleStatus};

const SALE_COLUMNS: &str = "id, user_id, total, status, payment_method, payment_reference, \
                            customer_name, customer_phone, customer_address, customer_city, \
                            customer_notes, delivery_image, created_at, updated_at, \
                            sent_at, received_at, cancelled_at";

const LINE_COLUMNS: &str = "id, sale_id, product_id, product_name, quantity, unit_price, subtotal";

/// Repository for sale database operations.
#[derive(Debug, Clone)]
pub struct SaleRepository {
    pool: SqlitePool,
}

impl SaleRepository {
    /// Creates a new SaleRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SaleRepository { pool }
    }

    /// Gets a sale by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Sale>> {
        let sql = format!("SELECT {} FROM sales WHERE id = ?1", SALE_COLUMNS);
        let sale = sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(sale)
    }

    /// Lists sales, newest first, optionally filtered by status.
    pub async fn list(&self, status: Option<SaleStatus>) -> DbResult<Vec<Sale>> {
        let sales = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM sales WHERE status = ?1 ORDER BY created_at DESC",
                    SALE_COLUMNS
                );
                sqlx::query_as::<_, Sale>(&sql)
                    .bind(status)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!("SELECT {} FROM sales ORDER BY created_at DESC", SALE_COLUMNS);
                sqlx::query_as::<_, Sale>(&sql).fetch_all(&self.pool).await?
            }
        };

        Ok(sales)
    }

    /// Gets the lines of a sale.
    pub async fn get_lines(&self, sale_id: &str) -> DbResult<Vec<SaleLine>> {
        let sql = format!(
            "SELECT {} FROM sale_lines WHERE sale_id = ?1 ORDER BY rowid",
            LINE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SaleLine>(&sql)
            .bind(sale_id)
            .fetch_all(&self.pool)
            .await?)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Inserts a sale header.
    pub async fn insert(&self, conn: &mut SqliteConnection, sale: &Sale) -> DbResult<()> {
        debug!(id = %sale.id, total = %sale.total, status = %sale.status, "Inserting sale");

        sqlx::query(
            r#"
            INSERT INTO sales (
                id, user_id, total, status, payment_method, payment_reference,
                customer_name, customer_phone, customer_address, customer_city,
                customer_notes, delivery_image, created_at, updated_at,
                sent_at, received_at, cancelled_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&sale.id)
        .bind(&sale.user_id)
        .bind(sale.total)
        .bind(sale.status)
        .bind(sale.payment_method)
        .bind(&sale.payment_reference)
        .bind(&sale.customer_name)
        .bind(&sale.customer_phone)
        .bind(&sale.customer_address)
        .bind(&sale.customer_city)
        .bind(&sale.customer_notes)
        .bind(&sale.delivery_image)
        .bind(sale.created_at)
        .bind(sale.updated_at)
        .bind(sale.sent_at)
        .bind(sale.received_at)
        .bind(sale.cancelled_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Inserts a sale line.
    pub async fn insert_line(&self, conn: &mut SqliteConnection, line: &SaleLine) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sale_lines (
                id, sale_id, product_id, product_name, quantity, unit_price, subtotal
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&line.id)
        .bind(&line.sale_id)
        .bind(&line.product_id)
        .bind(&line.product_name)
        .bind(line.quantity)
        .bind(line.unit_price)
        .bind(line.subtotal)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes the write lock and returns the sale, if any.
    pub async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Sale>> {
        let sql = format!(
            "UPDATE sales SET updated_at = updated_at WHERE id = ?1 RETURNING {}",
            SALE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Lines of a sale, read inside the caller's transaction.
    pub async fn lines_in(
        &self,
        conn: &mut SqliteConnection,
        sale_id: &str,
    ) -> DbResult<Vec<SaleLine>> {
        let sql = format!(
            "SELECT {} FROM sale_lines WHERE sale_id = ?1 ORDER BY rowid",
            LINE_COLUMNS
        );
        Ok(sqlx::query_as::<_, SaleLine>(&sql)
            .bind(sale_id)
            .fetch_all(&mut *conn)
            .await?)
    }

    /// Moves a sale to `status` and stamps the matching lifecycle column.
    ///
    /// `delivery_image` is only written when given; an existing path is kept
    /// otherwise.
    pub async fn update_status(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: SaleStatus,
        at: DateTime<Utc>,
        delivery_image: Option<&str>,
    ) -> DbResult<Sale> {
        debug!(id = %id, status = %status, "Updating sale status");

        let stamp_column = match status {
            SaleStatus::Sent => Some("sent_at"),
            SaleStatus::Received => Some("received_at"),
            SaleStatus::Cancelled => Some("cancelled_at"),
            SaleStatus::Pending | SaleStatus::Completed => None,
        };
        let stamp = stamp_column
            .map(|column| format!(", {} = ?3", column))
            .unwrap_or_default();

        let sql = format!(
            r#"
            UPDATE sales
            SET status = ?2, updated_at = ?3,
                delivery_image = COALESCE(?4, delivery_image){}
            WHERE id = ?1
            RETURNING {}
            "#,
            stamp, SALE_COLUMNS
        );
        sqlx::query_as::<_, Sale>(&sql)
            .bind(id)
            .bind(status)
            .bind(at)
            .bind(delivery_image)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Sale", id))
    }
}

/// Helper to generate a new sale or sale line ID.
pub fn generate_sale_id() -> String {
    Uuid::new_v4().to_string()
}
