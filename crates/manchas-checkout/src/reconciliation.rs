//! # Reconciliation Gateway
//!
//! Webhooks, polls and cash confirmations all end in
//! [`ReconciliationGateway::apply_payment_status`], the single place a
//! payment leaves `pending`.
//!
//! ## Transition Function
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  new == current          ──► no-op (replays, duplicate polls)          │
//! │  current is terminal     ──► InvalidTransition                         │
//! │  UPDATE … WHERE status = 'pending'                                     │
//! │      0 rows              ──► no-op (another writer won)                │
//! │      1 row, approved     ──► materialize sale, link sale_id            │
//! │      1 row, other        ──► done                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Materialization Failures
//! The whole transaction rolls back, the payment stays `pending` and a
//! failure note is written on its own. The webhook answers 409 so the
//! aggregator retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use manchas_core::signature::{verify_checksum, SignedFields};
use manchas_core::{CashPaymentTicket, Money, Payment, PaymentStatus, Sale};
use manchas_db::{Database, DbError, SqliteConnection};

use crate::aggregator::AggregatorTransaction;
use crate::error::{CheckoutError, CheckoutResult};
use crate::sale::SaleEngine;

/// Aggregator event as posted to the webhook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
    pub timestamp: i64,
    pub signature: WebhookSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookData {
    pub transaction: AggregatorTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSignature {
    pub checksum: String,
}

/// Result of applying a status to a payment.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub payment: Payment,
    pub previous: PaymentStatus,
    /// False when nothing changed.
    pub applied: bool,
    /// The sale created by an approval.
    pub sale: Option<Sale>,
}

impl StatusChange {
    fn unchanged(payment: Payment) -> Self {
        StatusChange {
            previous: payment.status,
            payment,
            applied: false,
            sale: None,
        }
    }
}

/// Normalizes every confirmation channel into one idempotent transition.
#[derive(Debug, Clone)]
pub struct ReconciliationGateway {
    db: Database,
    sales: SaleEngine,
    events_secret: String,
}

impl ReconciliationGateway {
    pub fn new(db: Database, sales: SaleEngine, events_secret: impl Into<String>) -> Self {
        ReconciliationGateway {
            db,
            sales,
            events_secret: events_secret.into(),
        }
    }

    /// Moves `payment` (locked by the caller) to `new_status`.
    ///
    /// Approval materializes the sale in the same transaction; any failure
    /// there comes back as `MaterializationFailed`.
    pub async fn apply_payment_status(
        &self,
        conn: &mut SqliteConnection,
        payment: &Payment,
        new_status: PaymentStatus,
        transaction_id: Option<&str>,
        raw_payload: Option<&str>,
    ) -> CheckoutResult<StatusChange> {
        if new_status == payment.status {
            debug!(reference = %payment.reference, status = %new_status, "Status unchanged");
            return Ok(StatusChange::unchanged(payment.clone()));
        }
        if payment.status.is_terminal() {
            warn!(
                reference = %payment.reference,
                from = %payment.status,
                to = %new_status,
                "Refusing to move a settled payment"
            );
            return Err(CheckoutError::InvalidTransition {
                entity: "Payment".into(),
                from: payment.status.to_string(),
                to: new_status.to_string(),
            });
        }

        let payments = self.db.payments();
        let claimed = payments
            .update_status_if_pending(conn, &payment.id, new_status, transaction_id, raw_payload)
            .await?;
        if !claimed {
            debug!(reference = %payment.reference, "Payment already settled by another writer");
            return Ok(StatusChange::unchanged(payment.clone()));
        }

        let sale = if new_status == PaymentStatus::Approved {
            let sale = self.sales.materialize(conn, payment).await.map_err(|e| {
                CheckoutError::MaterializationFailed {
                    reference: payment.reference.clone(),
                    reason: e.to_string(),
                }
            })?;
            payments.set_sale_id(conn, &payment.id, &sale.id).await?;
            Some(sale)
        } else {
            None
        };

        let updated = payments
            .lock_by_id(conn, &payment.id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Pago", &payment.id))?;

        info!(
            reference = %payment.reference,
            from = %payment.status,
            to = %new_status,
            sale_id = ?sale.as_ref().map(|s| &s.id),
            "Payment status applied"
        );
        Ok(StatusChange {
            payment: updated,
            previous: payment.status,
            applied: true,
            sale,
        })
    }

    /// Applies an aggregator view of the payment's transaction.
    ///
    /// Shared by webhooks and polls: the amount must match and the status
    /// is mapped before the transition runs.
    pub(crate) async fn apply_transaction(
        &self,
        conn: &mut SqliteConnection,
        payment: &Payment,
        transaction: &AggregatorTransaction,
        raw_payload: &str,
    ) -> CheckoutResult<StatusChange> {
        if transaction.amount_in_cents != payment.amount.cents() {
            warn!(
                reference = %payment.reference,
                expected = payment.amount.cents(),
                received = transaction.amount_in_cents,
                "Aggregator amount does not match payment"
            );
            return Err(CheckoutError::AmountMismatch {
                reference: payment.reference.clone(),
                expected: payment.amount,
                received: Money::from_cents(transaction.amount_in_cents),
            });
        }

        self.apply_payment_status(
            conn,
            payment,
            transaction.payment_status(),
            Some(&transaction.id),
            Some(raw_payload),
        )
        .await
    }

    /// Verifies and applies an aggregator event.
    pub async fn handle_webhook(&self, event: &WebhookEvent) -> CheckoutResult<StatusChange> {
        let transaction = &event.data.transaction;

        if self.events_secret.is_empty() {
            error!("Webhook received but no events secret is configured");
            return Err(CheckoutError::InvalidSignature);
        }
        let fields = SignedFields {
            reference: &transaction.reference,
            transaction_id: &transaction.id,
            amount_in_cents: transaction.amount_in_cents,
            status: &transaction.status,
            timestamp: event.timestamp,
        };
        if !verify_checksum(&fields, &self.events_secret, &event.signature.checksum) {
            warn!(reference = %transaction.reference, "Webhook checksum mismatch");
            return Err(CheckoutError::InvalidSignature);
        }

        debug!(
            event = %event.event,
            reference = %transaction.reference,
            status = %transaction.status,
            "Webhook verified"
        );

        let raw = serde_json::to_string(event)?;
        let payments = self.db.payments();
        let mut tx = self.db.begin().await?;

        let mut payment = payments.lock_by_reference(&mut tx, &transaction.reference).await?;
        if payment.is_none() {
            if let Some(link_id) = transaction.payment_link_id.as_deref() {
                payment = payments.lock_by_link_id(&mut tx, link_id).await?;
            }
        }
        let payment =
            payment.ok_or_else(|| CheckoutError::not_found("Pago", &transaction.reference))?;

        match self.apply_transaction(&mut tx, &payment, transaction, &raw).await {
            Ok(change) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(change)
            }
            Err(err) => {
                tx.rollback().await.map_err(DbError::from)?;
                self.note_failure(&payment, &err).await;
                Err(err)
            }
        }
    }

    /// Records a materialization failure for manual reconciliation.
    ///
    /// Must run after the failed transaction is gone.
    pub(crate) async fn note_failure(&self, payment: &Payment, err: &CheckoutError) {
        let CheckoutError::MaterializationFailed { reason, .. } = err else {
            return;
        };
        error!(reference = %payment.reference, reason = %reason, "Approved payment could not be applied");
        if let Err(e) = self.db.payments().record_failure_note(&payment.id, reason).await {
            error!(reference = %payment.reference, error = %e, "Failed to record failure note");
        }
    }

    /// Expires one overdue ticket and voids its payment.
    pub(crate) async fn expire_ticket(
        &self,
        conn: &mut SqliteConnection,
        ticket: &CashPaymentTicket,
    ) -> CheckoutResult<bool> {
        let expired = self.db.cash_tickets().mark_expired(conn, &ticket.id).await?;
        if expired {
            self.db
                .payments()
                .update_status_if_pending(conn, &ticket.payment_id, PaymentStatus::Voided, None, None)
                .await?;
            info!(code = %ticket.code, payment_id = %ticket.payment_id, "Cash ticket expired");
        }
        Ok(expired)
    }

    /// Expires every pending ticket past `now` and voids their payments.
    pub async fn expire_overdue_tickets(&self, now: DateTime<Utc>) -> CheckoutResult<usize> {
        let payments = self.db.payments();
        let mut tx = self.db.begin().await?;

        let payment_ids = self.db.cash_tickets().expire_overdue(&mut tx, now).await?;
        for payment_id in &payment_ids {
            payments
                .update_status_if_pending(&mut tx, payment_id, PaymentStatus::Voided, None, None)
                .await?;
        }
        tx.commit().await.map_err(DbError::from)?;

        if !payment_ids.is_empty() {
            info!(count = payment_ids.len(), "Overdue cash tickets expired");
        }
        Ok(payment_ids.len())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::cart::tests::seed_product;
    use chrono::Duration;
    use manchas_core::signature::compute_checksum;
    use manchas_core::{
        CartItemSnapshot, CashTicketStatus, CustomerSnapshot, PaymentMethod,
        PaymentSnapshot, Product, SaleStatus,
    };
    use manchas_db::repository::payment::{generate_payment_id, generate_reference};
    use manchas_db::DbConfig;

    pub(crate) const SECRET: &str = "test_events_secret";

    pub(crate) fn gateway(db: &Database) -> ReconciliationGateway {
        ReconciliationGateway::new(db.clone(), SaleEngine::new(db.clone()), SECRET)
    }

    /// A pending payment for `qty` units of `product`, stored directly.
    pub(crate) async fn pending_payment(
        db: &Database,
        product: &Product,
        qty: i64,
        method: PaymentMethod,
    ) -> Payment {
        let now = Utc::now();
        let subtotal = product.sell_price.multiply_quantity(qty);
        let snapshot = PaymentSnapshot::new(
            CustomerSnapshot {
                full_name: "Laura Gómez".into(),
                email: Some("laura@example.com".into()),
                phone: Some("3001234567".into()),
                document_type: None,
                document_number: Some("1020304050".into()),
                person_type: None,
                address: "Calle 10 # 5-20".into(),
                city: "Medellín".into(),
                notes: None,
            },
            vec![CartItemSnapshot {
                product_id: product.id.clone(),
                product_name: product.name.clone(),
                quantity: qty,
                unit_price: product.sell_price,
                subtotal,
            }],
        );
        let payment = Payment {
            id: generate_payment_id(),
            sale_id: None,
            user_id: "user-1".into(),
            reference: generate_reference(),
            link_id: Some(format!("link-{}", qty)),
            transaction_id: None,
            method,
            bank_code: None,
            amount: subtotal,
            currency: "COP".into(),
            status: PaymentStatus::Pending,
            snapshot,
            redirect_url: None,
            raw_response: None,
            failure_note: None,
            created_at: now,
            updated_at: now,
        };
        let mut tx = db.begin().await.unwrap();
        db.payments().insert(&mut tx, &payment).await.unwrap();
        tx.commit().await.unwrap();
        payment
    }

    pub(crate) fn signed_event(payment: &Payment, status: &str, amount: i64) -> WebhookEvent {
        let transaction = AggregatorTransaction {
            id: "tx-1234-5678".into(),
            reference: payment.reference.clone(),
            amount_in_cents: amount,
            status: status.into(),
            payment_link_id: payment.link_id.clone(),
        };
        let timestamp = 1_700_000_100;
        let checksum = compute_checksum(
            &SignedFields {
                reference: &transaction.reference,
                transaction_id: &transaction.id,
                amount_in_cents: amount,
                status,
                timestamp,
            },
            SECRET,
        );
        WebhookEvent {
            event: "transaction.updated".into(),
            data: WebhookData { transaction },
            timestamp,
            signature: WebhookSignature { checksum },
        }
    }

    async fn count_sales(db: &Database) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM sales")
            .fetch_one(db.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_webhook_replay_creates_one_sale() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 3, PaymentMethod::Pse).await;
        let gateway = gateway(&db);
        let event = signed_event(&payment, "APPROVED", payment.amount.cents());

        let first = gateway.handle_webhook(&event).await.unwrap();
        assert!(first.applied);
        let sale = first.sale.unwrap();
        assert_eq!(sale.status, SaleStatus::Completed);
        assert_eq!(sale.payment_method, Some(PaymentMethod::Pse));
        assert_eq!(first.payment.sale_id.as_deref(), Some(sale.id.as_str()));
        assert_eq!(first.payment.transaction_id.as_deref(), Some("tx-1234-5678"));

        let second = gateway.handle_webhook(&event).await.unwrap();
        assert!(!second.applied);

        assert_eq!(count_sales(&db).await, 1);
        assert_eq!(db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock, 2);
    }

    #[tokio::test]
    async fn test_webhook_rejects_bad_signature_and_amount() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 1, PaymentMethod::Pse).await;
        let gateway = gateway(&db);

        let mut tampered = signed_event(&payment, "APPROVED", payment.amount.cents());
        tampered.data.transaction.amount_in_cents += 1;
        let err = gateway.handle_webhook(&tampered).await.unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidSignature));

        let wrong_amount = signed_event(&payment, "APPROVED", 1);
        let err = gateway.handle_webhook(&wrong_amount).await.unwrap_err();
        assert!(matches!(err, CheckoutError::AmountMismatch { .. }));

        let stored = db.payments().get_by_id(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
    }

    #[tokio::test]
    async fn test_declined_then_approved_is_conflict() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 1, PaymentMethod::Pse).await;
        let gateway = gateway(&db);

        let declined = gateway
            .handle_webhook(&signed_event(&payment, "DECLINED", payment.amount.cents()))
            .await
            .unwrap();
        assert!(declined.applied);
        assert!(declined.sale.is_none());

        let err = gateway
            .handle_webhook(&signed_event(&payment, "APPROVED", payment.amount.cents()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::InvalidTransition { .. }));

        // Unknown statuses keep the payment where it is.
        let other = pending_payment(&db, &bone, 2, PaymentMethod::Pse).await;
        let change = gateway
            .handle_webhook(&signed_event(&other, "PENDING", other.amount.cents()))
            .await
            .unwrap();
        assert!(!change.applied);
    }

    #[tokio::test]
    async fn test_stock_gone_at_approval_keeps_payment_pending() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 4, PaymentMethod::Pse).await;
        let gateway = gateway(&db);

        let mut tx = db.begin().await.unwrap();
        db.products().adjust_stock(&mut tx, &bone.id, -3).await.unwrap();
        tx.commit().await.unwrap();

        let err = gateway
            .handle_webhook(&signed_event(&payment, "APPROVED", payment.amount.cents()))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::MaterializationFailed { .. }));

        let stored = db.payments().get_by_id(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert!(stored.failure_note.unwrap().contains("Hueso Carnaza"));
        assert_eq!(count_sales(&db).await, 0);
        assert_eq!(db.products().get_by_id(&bone.id).await.unwrap().unwrap().stock, 2);
    }

    #[tokio::test]
    async fn test_webhook_falls_back_to_link_id() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 1, PaymentMethod::Pse).await;
        let gateway = gateway(&db);

        let mut other = payment.clone();
        other.reference = "ref-from-link-checkout".into();
        let event = signed_event(&other, "VOIDED", payment.amount.cents());

        let change = gateway.handle_webhook(&event).await.unwrap();
        assert_eq!(change.payment.id, payment.id);
        assert_eq!(change.payment.status, PaymentStatus::Voided);
    }

    #[tokio::test]
    async fn test_sweep_expires_tickets_and_voids_payments() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let bone = seed_product(&db, "Hueso Carnaza", 1000, 5).await;
        let payment = pending_payment(&db, &bone, 1, PaymentMethod::Cash).await;
        let gateway = gateway(&db);
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        db.cash_tickets()
            .insert(
                &mut tx,
                &CashPaymentTicket {
                    id: generate_payment_id(),
                    payment_id: payment.id.clone(),
                    code: "5555555555".into(),
                    expires_at: now - Duration::minutes(5),
                    paid_at: None,
                    status: CashTicketStatus::Pending,
                    created_at: now - Duration::hours(48),
                },
            )
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(gateway.expire_overdue_tickets(now).await.unwrap(), 1);
        assert_eq!(gateway.expire_overdue_tickets(now).await.unwrap(), 0);

        let stored = db.payments().get_by_id(&payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Voided);
        let ticket = db.cash_tickets().get_by_code("5555555555").await.unwrap().unwrap();
        assert_eq!(ticket.status, CashTicketStatus::Expired);
        assert_eq!(stored.amount, Money::from_major(1000));
    }
}
