//! # Supplier Repository
//!
//! Suppliers are reference data for purchases. A supplier with purchases
//! cannot be deleted (`ON DELETE RESTRICT`); deactivate it instead.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::DbResult;
use manchas_core::Supplier;

const SUPPLIER_COLUMNS: &str =
    "id, name, document_type, document_number, phone, email, is_active, created_at";

/// Repository for supplier database operations.
#[derive(Debug, Clone)]
pub struct SupplierRepository {
    pool: SqlitePool,
}

impl SupplierRepository {
    /// Creates a new SupplierRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SupplierRepository { pool }
    }

    /// Gets a supplier by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Supplier>> {
        let sql = format!("SELECT {} FROM suppliers WHERE id = ?1", SUPPLIER_COLUMNS);
        let supplier = sqlx::query_as::<_, Supplier>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(supplier)
    }

    /// Lists suppliers ordered by name.
    pub async fn list(&self) -> DbResult<Vec<Supplier>> {
        let sql = format!("SELECT {} FROM suppliers ORDER BY name", SUPPLIER_COLUMNS);
        Ok(sqlx::query_as::<_, Supplier>(&sql).fetch_all(&self.pool).await?)
    }

    /// Lists active suppliers ordered by name.
    pub async fn list_active(&self) -> DbResult<Vec<Supplier>> {
        let sql = format!(
            "SELECT {} FROM suppliers WHERE is_active = 1 ORDER BY name",
            SUPPLIER_COLUMNS
        );
        Ok(sqlx::query_as::<_, Supplier>(&sql).fetch_all(&self.pool).await?)
    }

    /// Creates a supplier.
    pub async fn create(
        &self,
        name: &str,
        document_type: &str,
        document_number: &str,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> DbResult<Supplier> {
        let supplier = Supplier {
            id: Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            document_type: document_type.to_string(),
            document_number: document_number.trim().to_string(),
            phone: phone.map(str::to_string),
            email: email.map(str::to_string),
            is_active: true,
            created_at: Utc::now(),
        };

        debug!(id = %supplier.id, name = %supplier.name, "Creating supplier");

        sqlx::query(
            r#"
            INSERT INTO suppliers (
                id, name, document_type, document_number, phone, email, is_active, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&supplier.id)
        .bind(&supplier.name)
        .bind(&supplier.document_type)
        .bind(&supplier.document_number)
        .bind(&supplier.phone)
        .bind(&supplier.email)
        .bind(supplier.is_active)
        .bind(supplier.created_at)
        .execute(&self.pool)
        .await?;

        Ok(supplier)
    }

    /// Rewrites the supplier's identity and contact data.
    ///
    /// ## Returns
    /// * `Ok(None)` - No such supplier
    /// * `Err(DbError::UniqueViolation)` - Name or document taken
    pub async fn update(
        &self,
        id: &str,
        name: &str,
        document_type: &str,
        document_number: &str,
        phone: Option<&str>,
        email: Option<&str>,
    ) -> DbResult<Option<Supplier>> {
        debug!(id = %id, name = %name, "Updating supplier");

        let sql = format!(
            r#"
            UPDATE suppliers
            SET name = ?2, document_type = ?3, document_number = ?4, phone = ?5, email = ?6
            WHERE id = ?1
            RETURNING {}
            "#,
            SUPPLIER_COLUMNS
        );
        let supplier = sqlx::query_as::<_, Supplier>(&sql)
            .bind(id)
            .bind(name.trim())
            .bind(document_type)
            .bind(document_number.trim())
            .bind(phone)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        Ok(supplier)
    }

    /// Activates or deactivates a supplier. `None` when it doesn't exist.
    pub async fn set_active(&self, id: &str, active: bool) -> DbResult<Option<Supplier>> {
        let sql = format!(
            "UPDATE suppliers SET is_active = ?2 WHERE id = ?1 RETURNING {}",
            SUPPLIER_COLUMNS
        );
        let supplier = sqlx::query_as::<_, Supplier>(&sql)
            .bind(id)
            .bind(active)
            .fetch_optional(&self.pool)
            .await?;

        Ok(supplier)
    }

    /// Deletes a supplier without purchases.
    ///
    /// ## Returns
    /// * `Ok(false)` - No such supplier
    /// * `Err(DbError::ForeignKeyViolation)` - Purchases reference it
    pub async fn delete(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM suppliers WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Takes the write lock and returns the supplier row, if any.
    pub async fn lock_for_update(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Supplier>> {
        let sql = format!(
            "UPDATE suppliers SET is_active = is_active WHERE id = ?1 RETURNING {}",
            SUPPLIER_COLUMNS
        );
        let supplier = sqlx::query_as::<_, Supplier>(&sql)
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;

        Ok(supplier)
    }
}

#[cfg(test)]
mod tests {
    use crate::{Database, DbConfig};

    #[tokio::test]
    async fn test_create_and_lock() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.suppliers();

        let supplier = repo
            .create("Distribuidora Canina", "NIT", "900123456-7", Some("6041234567"), None)
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        let locked = repo.lock_for_update(&mut tx, &supplier.id).await.unwrap();
        assert_eq!(locked.map(|s| s.name), Some("Distribuidora Canina".to_string()));
        assert!(repo.lock_for_update(&mut tx, "missing").await.unwrap().is_none());
        tx.rollback().await.unwrap();

        assert_eq!(repo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_deactivate_delete() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.suppliers();
        let supplier = repo.create("Uno", "NIT", "900123456", None, None).await.unwrap();
        repo.create("Dos", "NIT", "900654321", None, None).await.unwrap();

        let updated = repo
            .update(&supplier.id, " Uno SAS ", "NIT", "900123456", Some("6041234567"), None)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Uno SAS");
        assert_eq!(updated.phone.as_deref(), Some("6041234567"));
        assert!(repo.update("missing", "X", "NIT", "1", None, None).await.unwrap().is_none());

        let err = repo
            .update(&supplier.id, "Dos", "NIT", "900123456", None, None)
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("suppliers.name"));

        let off = repo.set_active(&supplier.id, false).await.unwrap().unwrap();
        assert!(!off.is_active);
        assert_eq!(repo.list_active().await.unwrap().len(), 1);

        assert!(repo.delete(&supplier.id).await.unwrap());
        assert!(!repo.delete(&supplier.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_document_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.suppliers();

        repo.create("Uno", "NIT", "900123456", None, None).await.unwrap();
        let err = repo.create("Dos", "NIT", "900123456", None, None).await.unwrap_err();
        assert!(err.is_unique_violation_on("suppliers.document_number"));
    }
}
