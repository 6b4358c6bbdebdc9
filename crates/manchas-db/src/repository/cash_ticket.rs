//! # Cash Ticket Repository
//!
//! Payable codes handed to customers who pay cash at a partner point.

use chrono::{DateTime, Utc};
use rand::Rng;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use crate::error::{DbError, DbResult};
use manchas_core::CashPaymentTicket;

const TICKET_COLUMNS: &str = "id, payment_id, code, expires_at, paid_at, status, created_at";

/// Repository for cash payment tickets.
#[derive(Debug, Clone)]
pub struct CashTicketRepository {
    pool: SqlitePool,
}

impl CashTicketRepository {
    /// Creates a new CashTicketRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CashTicketRepository { pool }
    }

    /// Gets a ticket by its payable code.
    pub async fn get_by_code(&self, code: &str) -> DbResult<Option<CashPaymentTicket>> {
        let sql = format!(
            "SELECT {} FROM cash_payment_tickets WHERE code = ?1",
            TICKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, CashPaymentTicket>(&sql)
            .bind(code)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Gets the ticket issued for a payment.
    pub async fn get_by_payment_id(&self, payment_id: &str) -> DbResult<Option<CashPaymentTicket>> {
        let sql = format!(
            "SELECT {} FROM cash_payment_tickets WHERE payment_id = ?1",
            TICKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, CashPaymentTicket>(&sql)
            .bind(payment_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    // =========================================================================
    // Transaction-scoped operations
    // =========================================================================

    /// Inserts a ticket.
    ///
    /// ## Returns
    /// * `Err(DbError::UniqueViolation)` - The code is taken; callers draw a new one
    pub async fn insert(&self, conn: &mut SqliteConnection, ticket: &CashPaymentTicket) -> DbResult<()> {
        debug!(code = %ticket.code, payment_id = %ticket.payment_id, "Inserting cash ticket");

        sqlx::query(
            r#"
            INSERT INTO cash_payment_tickets (
                id, payment_id, code, expires_at, paid_at, status, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.payment_id)
        .bind(&ticket.code)
        .bind(ticket.expires_at)
        .bind(ticket.paid_at)
        .bind(ticket.status)
        .bind(ticket.created_at)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }

    /// Takes the write lock on the ticket with this code.
    pub async fn lock_by_code(
        &self,
        conn: &mut SqliteConnection,
        code: &str,
    ) -> DbResult<Option<CashPaymentTicket>> {
        let sql = format!(
            "UPDATE cash_payment_tickets SET status = status WHERE code = ?1 RETURNING {}",
            TICKET_COLUMNS
        );
        Ok(sqlx::query_as::<_, CashPaymentTicket>(&sql)
            .bind(code)
            .fetch_optional(&mut *conn)
            .await?)
    }

    /// Marks a pending ticket paid.
    pub async fn mark_paid(
        &self,
        conn: &mut SqliteConnection,
        id: &str,
        paid_at: DateTime<Utc>,
    ) -> DbResult<()> {
        let result = sqlx::query(
            "UPDATE cash_payment_tickets SET status = 'paid', paid_at = ?2 \
             WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .bind(paid_at)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Pending cash ticket", id));
        }

        Ok(())
    }

    /// Marks a pending ticket expired. Returns whether it changed.
    pub async fn mark_expired(&self, conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE cash_payment_tickets SET status = 'expired' WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Expires every pending ticket whose `expires_at` is at or before `now`.
    ///
    /// Returns the payment ids of the tickets that changed.
    pub async fn expire_overdue(
        &self,
        conn: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<String>> {
        let payment_ids: Vec<String> = sqlx::query_scalar(
            r#"
            UPDATE cash_payment_tickets
            SET status = 'expired'
            WHERE status = 'pending' AND expires_at <= ?1
            RETURNING payment_id
            "#,
        )
        .bind(now)
        .fetch_all(&mut *conn)
        .await?;

        if !payment_ids.is_empty() {
            debug!(count = payment_ids.len(), "Expired overdue cash tickets");
        }

        Ok(payment_ids)
    }
}

/// Draws a numeric payable code of `length` digits.
pub fn generate_cash_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::payment::tests::sample_payment;
    use crate::{Database, DbConfig};
    use chrono::Duration;
    use manchas_core::{CashTicketStatus, PaymentMethod};
    use uuid::Uuid;

    fn ticket(payment_id: &str, code: &str, expires_at: DateTime<Utc>) -> CashPaymentTicket {
        CashPaymentTicket {
            id: Uuid::new_v4().to_string(),
            payment_id: payment_id.to_string(),
            code: code.to_string(),
            expires_at,
            paid_at: None,
            status: CashTicketStatus::Pending,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_cash_code_is_numeric() {
        let code = generate_cash_code(10);
        assert_eq!(code.len(), 10);
        assert!(code.chars().all(|c| c.is_ascii_digit()));
    }

    #[tokio::test]
    async fn test_expire_overdue_only_touches_past_tickets() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let payments = db.payments();
        let tickets = db.cash_tickets();
        let now = Utc::now();

        let overdue = sample_payment(PaymentMethod::Cash);
        let current = sample_payment(PaymentMethod::Cash);

        let mut tx = db.begin().await.unwrap();
        payments.insert(&mut tx, &overdue).await.unwrap();
        payments.insert(&mut tx, &current).await.unwrap();
        tickets
            .insert(&mut tx, &ticket(&overdue.id, "1111111111", now - Duration::hours(1)))
            .await
            .unwrap();
        tickets
            .insert(&mut tx, &ticket(&current.id, "2222222222", now + Duration::hours(47)))
            .await
            .unwrap();

        let expired = tickets.expire_overdue(&mut tx, now).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(expired, vec![overdue.id.clone()]);
        let stored = tickets.get_by_code("1111111111").await.unwrap().unwrap();
        assert_eq!(stored.status, CashTicketStatus::Expired);
        let stored = tickets.get_by_payment_id(&current.id).await.unwrap().unwrap();
        assert_eq!(stored.status, CashTicketStatus::Pending);
    }

    #[tokio::test]
    async fn test_duplicate_code_and_paid_guard() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let payments = db.payments();
        let tickets = db.cash_tickets();
        let expires = Utc::now() + Duration::hours(48);

        let first = sample_payment(PaymentMethod::Cash);
        let second = sample_payment(PaymentMethod::Cash);

        let mut tx = db.begin().await.unwrap();
        payments.insert(&mut tx, &first).await.unwrap();
        payments.insert(&mut tx, &second).await.unwrap();
        let issued = ticket(&first.id, "1234567890", expires);
        tickets.insert(&mut tx, &issued).await.unwrap();

        let err = tickets
            .insert(&mut tx, &ticket(&second.id, "1234567890", expires))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation_on("cash_payment_tickets.code"));

        let locked = tickets.lock_by_code(&mut tx, "1234567890").await.unwrap().unwrap();
        tickets.mark_paid(&mut tx, &locked.id, Utc::now()).await.unwrap();
        assert!(tickets.mark_paid(&mut tx, &locked.id, Utc::now()).await.is_err());
        assert!(!tickets.mark_expired(&mut tx, &locked.id).await.unwrap());
        tx.commit().await.unwrap();
    }
}
