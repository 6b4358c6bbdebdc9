//! # Payment Repository
//!
//! Payment intents for both PSE and cash.
//!
//! A payment only leaves `pending` through [`PaymentRepository::update_status_if_pending`],
//! whose `WHERE status = 'pending'` guard makes replays and racing
//! confirmations collapse into a single transition.

use chrono::Utc;
use rand::Rng;
use sqlx::types::Json;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, DbResult};
use manchas_core::{Payment, PaymentStatus};

const PAYMENT_COLUMNS: &str = "id, sale_id, user_id, reference, link_id, transaction_id, method, \
                               bank_code, amount, currency, status, snapshot, redirect_url, \
                               raw_response, failure_note, created_at, updated_at";

/// Repository for payment database operations.
#[derive(Debug, Clone)]
pub struct PaymentRepository {
    pool: SqlitePool,
}

impl PaymentRepository {
    /// Creates a new PaymentRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PaymentRepository { pool }
    }

    /// Gets a payment by ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Payment>> {
        self.fetch_one_by("id", id).await
    }

    /// Gets a payment by its internal reference (`MP-...`).
    pub async fn get_by_reference(&self, reference: &str) -> DbResult<Option<Payment>> {
        self.fetch_one_by("reference", reference).await
    }

    /// Gets a payment by the aggregator's payment link id.
    pub async fn get_by_link_id(&self, link_id: &str) -> DbResult<Option<Payment>> {
        self.fetch_one_by("link_id", link_id).await
    }

    async fn fetch_one_by(&self, column: &str, value: &str) -> DbResult<Option<Payment>> {
        let sql = format!("SELECT {} FROM payments WHERE {} = ?1", PAYMENT_COLUMNS, column);
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Records why a payment could not be applied.
    ///
    /// Written outside the rolled-back transaction so staff can find
    /// payments that need manual reconciliation.
    pub async fn record_failure_note(&self, id: &str, note: &str) -> DbResult<()> {
        debug!(id = %id, note = %note, "Recording payment failure note");

        let result = sqlx::query(
            "UPDATE payments SET failure_note = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Payment", id));
        }

        Ok(())
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Inserts a payment intent.
    pub async fn insert(&self, conn: &mut SqliteConnection, payment: &Payment) -> DbResult<()> {
        debug!(
            reference = %payment.reference,
            method = %payment.method,
            amount = %payment.amount,
            "Inserting payment"
        );

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, sale_id, user_id, reference, link_id, transaction_id, method,
                bank_code, amount, currency, status, snapshot, redirect_url,
                raw_response, failure_note, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.sale_id)
        .bind(&payment.user_id)
        .bind(&payment.reference)
        .bind(&payment.link_id)
        .bind(&payment.transaction_id)
        .bind(payment.method)
        .bind(&payment.bank_code)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status)
        .bind(Json(&payment.snapshot))
        .bind(&payment.redirect_url)
        .bind(&payment.raw_response)
        .bind(&payment.failure_note)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes the write lock on the payment with this reference.
    pub async fn lock_by_reference(
        &self,
        conn: &mut SqliteConnection,
        reference: &str,
    ) -> DbResult<Option<Payment>> {
        Self::lock_by(conn, "reference", reference).await
    }

    /// Takes the write lock on the payment created for this payment link.
    pub async fn lock_by_link_id(
        &self,
        conn: &mut SqliteConnection,
        link_id: &str,
    ) -> DbResult<Option<Payment>> {
        Self::lock_by(conn, "link_id", link_id).await
    }

    /// Takes the write lock on the payment with this ID.
    pub async fn lock_by_id(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
    ) -> DbResult<Option<Payment>> {
        Self::lock_by(conn, "id", id).await
    }

    async fn lock_by(
        conn: &mut SqliteConnection,
        column: &str,
        value: &str,
    ) -> DbResult<Option<Payment>> {
        let sql = format!(
            "UPDATE payments SET updated_at = updated_at WHERE {} = ?1 RETURNING {}",
            column, PAYMENT_COLUMNS
        );
        Ok(sqlx::query_as::<_, Payment>(&sql)
            .bind(value)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Moves a pending payment to `status`.
    ///
    /// ## Returns
    /// * `Ok(true)` - The payment was pending and now carries `status`
    /// * `Ok(false)` - The payment had already left `pending`; nothing changed
    pub async fn update_status_if_pending(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        status: PaymentStatus,
        transaction_id: Option<&str>,
        raw_response: Option<&str>,
    ) -> DbResult<bool> {
        debug!(id = %id, status = %status.as_str(), "Updating payment status");

        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = ?2,
                transaction_id = COALESCE(?3, transaction_id),
                raw_response = COALESCE(?4, raw_response),
                updated_at = ?5
            WHERE id = ?1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(status)
        .bind(transaction_id)
        .bind(raw_response)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Links the payment to the sale it produced.
    pub async fn set_sale_id(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        sale_id: &str,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE payments SET sale_id = ?2, failure_note = NULL, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id)
        .bind(sale_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Payment", id));
        }

        Ok(())
    }
}

/// Helper to generate a new payment ID.
pub fn generate_payment_id() -> String {
    Uuid::new_v4().to_string()
}

/// Generates an internal payment reference: `MP-<unix millis>-<4 digits>`.
pub fn generate_reference() -> String {
    let suffix: u32 = rand::thread_rng().gen_range(0..10_000);
    format!("MP-{}-{:04}", Utc::now().timestamp_millis(), suffix)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{Database, DbConfig};
    use manchas_core::{CustomerSnapshot, Money, PaymentMethod, PaymentSnapshot};

    pub(crate) fn sample_payment(method: PaymentMethod) -> Payment {
        let now = Utc::now();
        let customer = CustomerSnapshot {
            full_name: "Laura Gomez".to_string(),
            email: Some("laura@example.com".to_string()),
            phone: Some("3001234567".to_string()),
            document_type: None,
            document_number: Some("1020304050".to_string()),
            person_type: None,
            address: "Calle 10 # 5-20".to_string(),
            city: "Medellin".to_string(),
            notes: None,
        };
        Payment {
            id: generate_payment_id(),
            sale_id: None,
            user_id: "user-1".to_string(),
            reference: generate_reference(),
            link_id: None,
            transaction_id: None,
            method,
            bank_code: None,
            amount: Money::from_major(3_000),
            currency: "COP".to_string(),
            status: PaymentStatus::Pending,
            snapshot: PaymentSnapshot::new(customer, Vec::new()),
            redirect_url: None,
            raw_response: None,
            failure_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_reference_format() {
        let reference = generate_reference();
        let parts: Vec<&str> = reference.split('-').collect();

        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "MP");
        assert!(parts[1].parse::<i64>().is_ok());
        assert_eq!(parts[2].len(), 4);
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.payments();
        let mut payment = sample_payment(PaymentMethod::Pse);
        payment.link_id = Some("link-1".into());
        payment.redirect_url = Some("https://checkout/l/link-1".into());

        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &payment).await.unwrap();
        tx.commit().await.unwrap();

        let by_ref = repo.get_by_reference(&payment.reference).await.unwrap().unwrap();
        assert_eq!(by_ref.snapshot, payment.snapshot);
        assert_eq!(by_ref.link_id.as_deref(), Some("link-1"));

        let by_link = repo.get_by_link_id("link-1").await.unwrap().unwrap();
        assert_eq!(by_link.id, payment.id);
    }

    #[tokio::test]
    async fn test_status_guard_applies_once() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.payments();
        let payment = sample_payment(PaymentMethod::Pse);

        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &payment).await.unwrap();
        let first = repo
            .update_status_if_pending(&mut tx, &payment.id, PaymentStatus::Approved, Some("tx-1"), None)
            .await
            .unwrap();
        let second = repo
            .update_status_if_pending(&mut tx, &payment.id, PaymentStatus::Declined, None, None)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert!(first);
        assert!(!second);
        let stored = repo.get_by_id(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Approved);
        assert_eq!(stored.transaction_id.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_failure_note_survives_rollback() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.payments();
        let payment = sample_payment(PaymentMethod::Cash);

        let mut tx = db.begin().await.unwrap();
        repo.insert(&mut tx, &payment).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        repo.lock_by_reference(&mut tx, &payment.reference).await.unwrap().unwrap();
        repo.update_status_if_pending(&mut tx, &payment.id, PaymentStatus::Approved, None, None)
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        repo.record_failure_note(&payment.id, "stock agotado").await.unwrap();

        let stored = repo.get_by_id(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.failure_note.as_deref(), Some("stock agotado"));
    }
}
