//! # Product Repository (Catalog Store)
//!
//! Database operations for products.
//!
//! ## Row Locking on SQLite
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Lock-then-check-then-decrement                         │
//! │                                                                         │
//! │  SQLite has no SELECT ... FOR UPDATE. A write statement takes the      │
//! │  database RESERVED lock, which no other writer can take until commit.  │
//! │                                                                         │
//! │  Checkout A                         Checkout B                          │
//! │  BEGIN                              BEGIN                               │
//! │  UPDATE products SET updated_at     UPDATE products SET updated_at      │
//! │    = updated_at WHERE id = ?          ... waits (busy_timeout)          │
//! │    RETURNING *        ◄── locked                                        │
//! │  stock 5 >= 3 ✓                                                         │
//! │  UPDATE stock = stock - 3                                               │
//! │    WHERE stock - 3 >= 0                                                 │
//! │  COMMIT ───────────────────────────► RETURNING * (stock 2)              │
//! │                                     stock 2 >= 3 ✗ InsufficientStock    │
//! │                                     ROLLBACK                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutation takes the caller's connection (`&mut *tx`) so engines
//! can compose several of them into one atomic operation.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use manchas_core::{Money, Product, ProductCategory, ProductState};

const PRODUCT_COLUMNS: &str = "id, name, category, description, cost_price, sell_price, stock, \
                               state, created_at, updated_at";

/// Repository for product database operations.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Gets a product by its ID.
    ///
    /// ## Returns
    /// * `Ok(Some(Product))` - Product found
    /// * `Ok(None)` - Product not found
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Product>> {
        let sql = format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLUMNS);
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Lists all products ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Product>> {
        let sql = format!("SELECT {} FROM products ORDER BY name", PRODUCT_COLUMNS);
        let products = sqlx::query_as::<_, Product>(&sql)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Lists products matching the optional category and state, by name.
    pub async fn list_by(
        &self,
        category: Option<ProductCategory>,
        state: Option<ProductState>,
    ) -> DbResult<Vec<Product>> {
        let sql = format!(
            "SELECT {} FROM products \
             WHERE (?1 IS NULL OR category = ?1) AND (?2 IS NULL OR state = ?2) \
             ORDER BY name",
            PRODUCT_COLUMNS
        );
        let products = sqlx::query_as::<_, Product>(&sql)
            .bind(category)
            .bind(state)
            .fetch_all(&self.pool)
            .await?;

        Ok(products)
    }

    /// Inserts a new product.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - Name already exists
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        debug!(name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (
                id, name, category, description,
                cost_price, sell_price, stock, state,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(product.category)
        .bind(&product.description)
        .bind(product.cost_price)
        .bind(product.sell_price)
        .bind(product.stock)
        .bind(product.state)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(product.clone())
    }

    /// Counts products (for diagnostics).
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Activates or deactivates a product. `None` when it doesn't exist.
    pub async fn set_state(&self, id: &str, state: ProductState) -> DbResult<Option<Product>> {
        debug!(id = %id, state = ?state, "Setting product state");

        let sql = format!(
            "UPDATE products SET state = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(state)
            .bind(Utc::now())
            .fetch_optional(&self.pool)
            .await?;

        Ok(product)
    }

    /// Deletes a product nothing references.
    ///
    /// ## Returns
    /// * `Ok(false)` - No such product
    /// * `Err(DbError::ForeignKeyViolation)` - Purchase or sale lines point at it
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        debug!(id = %id, "Deleting product");

        let result = sqlx::query("DELETE FROM products WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Takes the write lock and returns the product row.
    ///
    /// Must be the first write of the transaction for the lock to serialize
    /// competing checkouts. Returns `None` when the product doesn't exist.
    pub async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Product>> {
        let sql = format!(
            "UPDATE products SET updated_at = updated_at WHERE id = ?1 RETURNING {}",
            PRODUCT_COLUMNS
        );
        let product = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(product)
    }

    /// Adds `delta` to stock (negative to take units out).
    ///
    /// ## Returns
    /// * `Ok(Product)` - The row after the change
    /// * `Err(DbError::StockUnderflow)` - Result would be below zero; nothing changed
    /// * `Err(DbError::NotFound)` - No such product
    pub async fn adjust_stock(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        delta: i64,
    ) -> DbResult<Product> {
        debug!(id = %id, delta = %delta, "Adjusting stock");

        let sql = format!(
            r#"
            UPDATE products
            SET stock = stock + ?2, updated_at = ?3
            WHERE id = ?1 AND stock + ?2 >= 0
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );
        let updated = sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(delta)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?;

        match updated {
            Some(product) => Ok(product),
            None => {
                let exists: bool =
                    sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM products WHERE id = ?1)")
                        .bind(id)
                        .fetch_one(&mut *conn)
                        .await?;
                if exists {
                    Err(DbError::StockUnderflow {
                        product_id: id.to_string(),
                        delta,
                    })
                } else {
                    Err(DbError::not_found("Product", id))
                }
            }
        }
    }

    /// Rewrites name, category and description of a locked product.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - Another product has the name
    pub async fn update_details(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        name: &str,
        category: ProductCategory,
        description: Option<&str>,
    ) -> DbResult<Product> {
        let sql = format!(
            r#"
            UPDATE products
            SET name = ?2, category = ?3, description = ?4, updated_at = ?5
            WHERE id = ?1
            RETURNING {}
            "#,
            PRODUCT_COLUMNS
        );
        sqlx::query_as::<_, Product>(&sql)
            .bind(id)
            .bind(name)
            .bind(category)
            .bind(description)
            .bind(Utc::now())
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| DbError::not_found("Product", id))
    }

    /// Writes the latest unit cost and sell price.
    pub async fn update_pricing(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        cost_price: Money,
        sell_price: Money,
    ) -> DbResult<()> {
        debug!(id = %id, cost = %cost_price, sell = %sell_price, "Updating pricing");

        let result = sqlx::query(
            r#"
            UPDATE products
            SET cost_price = ?2, sell_price = ?3, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(cost_price)
        .bind(sell_price)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Product", id));
        }

        Ok(())
    }
}

/// Helper to generate a new product ID.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Unit Tests
// =============================================================================
