//! # Payment Orchestrator
//!
//! Creates payment intents and drives them to a settled state.
//!
//! ## Intent Creation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  validate (every missing field reported at once)                       │
//! │                                                                         │
//! │  ┌──────── PSE ───────────────────┐  ┌──────── CASH ───────────────┐   │
//! │  │ BEGIN                          │  │ BEGIN                        │   │
//! │  │   lock products, check stock,  │  │   lock products, check stock │   │
//! │  │   total = Σ qty × unit price   │  │   INSERT payments (pending)  │   │
//! │  │ ROLLBACK (nothing written)     │  │   INSERT cash_payment_tickets│   │
//! │  │ aggregator.create_payment_link │  │     code collision ──► redraw│   │
//! │  │   failure ──► no payment row   │  │ COMMIT                       │   │
//! │  │ BEGIN                          │  └──────────────────────────────┘   │
//! │  │   INSERT payments (pending,    │                                     │
//! │  │     link id + checkout URL)    │   stock is never decremented here   │
//! │  │ COMMIT                         │                                     │
//! │  └────────────────────────────────┘                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use manchas_core::validation::{require_fields, validate_document, validate_email, validate_phone};
use manchas_core::{
    CashPaymentTicket, CashTicketStatus, CustomerSnapshot, DocumentType, Money, Payment,
    PaymentMethod, PaymentSnapshot, PaymentStatus, PersonType,
};
use manchas_db::repository::cash_ticket::generate_cash_code;
use manchas_db::repository::payment::{generate_payment_id, generate_reference};
use manchas_db::{Database, DbError};

use crate::aggregator::{Bank, PaymentAggregator, PaymentLinkRequest};
use crate::cart::{lock_cart, validate_items, Availability, CartItem, LockedCart};
use crate::config::{AggregatorSettings, CashSettings};
use crate::error::{CheckoutError, CheckoutResult};
use crate::reconciliation::{ReconciliationGateway, StatusChange};

/// Draws before giving up on a free cash code.
const MAX_CODE_ATTEMPTS: usize = 5;

// =============================================================================
// Requests & Responses
// =============================================================================

/// Customer data sent with a payment request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentCustomer {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub document_type: DocumentType,
    pub document_number: String,
    pub person_type: Option<PersonType>,
    pub address: String,
    pub city: String,
    pub notes: Option<String>,
}

impl PaymentCustomer {
    fn snapshot(&self) -> CustomerSnapshot {
        let trimmed = |s: &str| s.trim().to_string();
        CustomerSnapshot {
            full_name: trimmed(&self.full_name),
            email: Some(trimmed(&self.email)),
            phone: self.phone.as_deref().map(trimmed).filter(|p| !p.is_empty()),
            document_type: Some(self.document_type),
            document_number: Some(trimmed(&self.document_number)),
            person_type: self.person_type,
            address: trimmed(&self.address),
            city: trimmed(&self.city),
            notes: self.notes.as_deref().map(trimmed).filter(|n| !n.is_empty()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BankPaymentRequest {
    pub bank_code: String,
    pub customer: PaymentCustomer,
    pub items: Vec<CartItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CashPaymentRequest {
    pub customer: PaymentCustomer,
    pub items: Vec<CartItem>,
}

/// A PSE intent waiting for the customer at the aggregator checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankPaymentInitiated {
    pub reference: String,
    pub link_id: String,
    /// Hosted checkout the customer is sent to.
    pub redirect_url: String,
    pub amount: Money,
}

/// A cash intent: the customer pays `amount` quoting `code`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashPaymentInitiated {
    pub reference: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub amount: Money,
}

/// A cash ticket with its payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashPaymentState {
    pub ticket: CashPaymentTicket,
    pub payment: Payment,
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Payment intents for PSE and cash, and their confirmation paths.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    db: Database,
    aggregator: Arc<dyn PaymentAggregator>,
    reconciliation: ReconciliationGateway,
    settings: AggregatorSettings,
    cash: CashSettings,
}

impl PaymentOrchestrator {
    pub fn new(
        db: Database,
        aggregator: Arc<dyn PaymentAggregator>,
        reconciliation: ReconciliationGateway,
        settings: AggregatorSettings,
        cash: CashSettings,
    ) -> Self {
        PaymentOrchestrator {
            db,
            aggregator,
            reconciliation,
            settings,
            cash,
        }
    }

    /// Creates a PSE payment and its aggregator payment link.
    ///
    /// The cart is priced and checked in a short transaction that is rolled
    /// back before the aggregator is called, so no write lock is held across
    /// the network. The payment row is only written once the aggregator
    /// accepted the link.
    pub async fn initiate_bank_payment(
        &self,
        user_id: &str,
        request: BankPaymentRequest,
    ) -> CheckoutResult<BankPaymentInitiated> {
        validate_customer(&request.customer, Some(&request.bank_code), &request.items)?;

        let mut tx = self.db.begin().await?;
        let cart = lock_cart(&self.db.products(), &mut tx, &request.items, Availability::InStock)
            .await?;
        tx.rollback().await.map_err(DbError::from)?;

        let mut payment = self.new_intent(
            user_id,
            PaymentMethod::Pse,
            Some(request.bank_code.trim()),
            &request.customer,
            &cart,
        );

        let names: Vec<&str> = cart.lines.iter().map(|l| l.product_name.as_str()).collect();
        let link_request = PaymentLinkRequest {
            reference: payment.reference.clone(),
            name: format!("Pago ManchasYPecas - {}", payment.reference),
            description: format!("Compra en ManchasYPecas - {}", names.join(", ")),
            amount: payment.amount,
            currency: payment.currency.clone(),
            redirect_url: format!(
                "{}/resultado-pago/{}",
                self.settings.redirect_base_url.trim_end_matches('/'),
                payment.reference
            ),
            document_type: request.customer.document_type,
            document_number: request.customer.document_number.trim().to_string(),
        };

        let link = self
            .aggregator
            .create_payment_link(&link_request)
            .await
            .inspect_err(|e| {
                warn!(reference = %payment.reference, error = %e, "Payment link creation failed");
            })?;

        payment.link_id = Some(link.id.clone());
        payment.redirect_url = Some(link.checkout_url.clone());
        payment.raw_response = Some(link.raw.to_string());

        let mut tx = self.db.begin().await?;
        self.db.payments().insert(&mut tx, &payment).await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            reference = %payment.reference,
            link_id = %link.id,
            amount = %payment.amount,
            "PSE payment initiated"
        );
        Ok(BankPaymentInitiated {
            reference: payment.reference,
            link_id: link.id,
            redirect_url: link.checkout_url,
            amount: payment.amount,
        })
    }

    /// Creates a cash payment and its payable code.
    pub async fn initiate_cash_payment(
        &self,
        user_id: &str,
        request: CashPaymentRequest,
    ) -> CheckoutResult<CashPaymentInitiated> {
        validate_customer(&request.customer, None, &request.items)?;

        let tickets = self.db.cash_tickets();
        let mut tx = self.db.begin().await?;
        let cart = lock_cart(&self.db.products(), &mut tx, &request.items, Availability::InStock)
            .await?;
        let payment = self.new_intent(user_id, PaymentMethod::Cash, None, &request.customer, &cart);
        self.db.payments().insert(&mut tx, &payment).await?;

        let now = Utc::now();
        let mut ticket = CashPaymentTicket {
            id: generate_payment_id(),
            payment_id: payment.id.clone(),
            code: String::new(),
            expires_at: now + self.cash.ticket_validity(),
            paid_at: None,
            status: CashTicketStatus::Pending,
            created_at: now,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            ticket.code = generate_cash_code(self.cash.code_length);
            match tickets.insert(&mut tx, &ticket).await {
                Ok(()) => break,
                Err(e)
                    if e.is_unique_violation_on("cash_payment_tickets.code")
                        && attempt < MAX_CODE_ATTEMPTS =>
                {
                    debug!(attempt, "Cash code collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        tx.commit().await.map_err(DbError::from)?;

        info!(
            reference = %payment.reference,
            code = %ticket.code,
            expires_at = %ticket.expires_at,
            amount = %payment.amount,
            "Cash payment initiated"
        );
        Ok(CashPaymentInitiated {
            reference: payment.reference,
            code: ticket.code,
            expires_at: ticket.expires_at,
            amount: payment.amount,
        })
    }

    /// A Pending payment for a priced cart, not yet stored.
    fn new_intent(
        &self,
        user_id: &str,
        method: PaymentMethod,
        bank_code: Option<&str>,
        customer: &PaymentCustomer,
        cart: &LockedCart,
    ) -> Payment {
        let now = Utc::now();
        Payment {
            id: generate_payment_id(),
            sale_id: None,
            user_id: user_id.to_string(),
            reference: generate_reference(),
            link_id: None,
            transaction_id: None,
            method,
            bank_code: bank_code.map(str::to_string),
            amount: cart.total,
            currency: self.settings.currency.clone(),
            status: PaymentStatus::Pending,
            snapshot: PaymentSnapshot::new(customer.snapshot(), cart.lines.clone()),
            redirect_url: None,
            raw_response: None,
            failure_note: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Settles a cash ticket presented at the counter and creates the sale.
    ///
    /// An overdue ticket is expired (and its payment voided) before the
    /// conflict is returned.
    pub async fn confirm_cash_payment(&self, code: &str) -> CheckoutResult<StatusChange> {
        let code = code.trim();
        if code.is_empty() {
            return Err(CheckoutError::validation("codigo is required"));
        }

        let tickets = self.db.cash_tickets();
        let mut tx = self.db.begin().await?;

        let ticket = tickets
            .lock_by_code(&mut tx, code)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Ticket de pago", code))?;
        let now = Utc::now();

        if ticket.is_overdue(now) {
            self.reconciliation.expire_ticket(&mut tx, &ticket).await?;
            tx.commit().await.map_err(DbError::from)?;
            warn!(code = %code, "Expired cash ticket presented");
            return Err(CheckoutError::TicketExpired {
                code: code.to_string(),
            });
        }
        if ticket.status != CashTicketStatus::Pending {
            return Err(CheckoutError::InvalidTransition {
                entity: "Cash ticket".into(),
                from: ticket.status.to_string(),
                to: CashTicketStatus::Paid.to_string(),
            });
        }

        let payment = self
            .db
            .payments()
            .lock_by_id(&mut tx, &ticket.payment_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Pago", &ticket.payment_id))?;

        let result = async {
            let change = self
                .reconciliation
                .apply_payment_status(&mut tx, &payment, PaymentStatus::Approved, None, None)
                .await?;
            tickets.mark_paid(&mut tx, &ticket.id, now).await?;
            Ok::<_, CheckoutError>(change)
        }
        .await;

        match result {
            Ok(change) => {
                tx.commit().await.map_err(DbError::from)?;
                info!(code = %code, reference = %payment.reference, "Cash payment confirmed");
                Ok(change)
            }
            Err(err) => {
                tx.rollback().await.map_err(DbError::from)?;
                self.reconciliation.note_failure(&payment, &err).await;
                Err(err)
            }
        }
    }

    /// Asks the aggregator about a pending PSE payment and applies the
    /// answer. Aggregator trouble leaves the payment as it was.
    pub async fn poll_status(&self, reference: &str) -> CheckoutResult<Payment> {
        let payment = self.get_payment(reference).await?;
        if payment.method != PaymentMethod::Pse || payment.status.is_terminal() {
            return Ok(payment);
        }

        let lookup = match (&payment.transaction_id, &payment.link_id) {
            (Some(id), _) => self.aggregator.get_transaction(id).await.map(Some),
            (None, Some(link_id)) => self.aggregator.find_transaction_by_link(link_id).await,
            (None, None) => Ok(None),
        };
        let transaction = match lookup {
            Ok(Some(transaction)) => transaction,
            Ok(None) => {
                debug!(reference = %reference, "No aggregator transaction yet");
                return Ok(payment);
            }
            Err(e) => {
                warn!(reference = %reference, error = %e, "Status poll failed, keeping last known status");
                return Ok(payment);
            }
        };

        let raw = serde_json::to_string(&transaction)?;
        let mut tx = self.db.begin().await?;
        let locked = self
            .db
            .payments()
            .lock_by_id(&mut tx, &payment.id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Pago", reference))?;

        match self
            .reconciliation
            .apply_transaction(&mut tx, &locked, &transaction, &raw)
            .await
        {
            Ok(change) => {
                tx.commit().await.map_err(DbError::from)?;
                Ok(change.payment)
            }
            Err(err) => {
                tx.rollback().await.map_err(DbError::from)?;
                self.reconciliation.note_failure(&locked, &err).await;
                Err(err)
            }
        }
    }

    /// Ticket and payment for a cash code, expiring the ticket if overdue.
    pub async fn cash_status(&self, code: &str) -> CheckoutResult<CashPaymentState> {
        let tickets = self.db.cash_tickets();
        let ticket = tickets
            .get_by_code(code)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Ticket de pago", code))?;

        if ticket.is_overdue(Utc::now()) {
            let mut tx = self.db.begin().await?;
            if let Some(locked) = tickets.lock_by_code(&mut tx, code).await? {
                self.reconciliation.expire_ticket(&mut tx, &locked).await?;
            }
            tx.commit().await.map_err(DbError::from)?;
        }

        let ticket = tickets
            .get_by_code(code)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Ticket de pago", code))?;
        let payment = self
            .db
            .payments()
            .get_by_id(&ticket.payment_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Pago", &ticket.payment_id))?;

        Ok(CashPaymentState { ticket, payment })
    }

    /// PSE financial institutions, sorted by name.
    pub async fn list_banks(&self) -> CheckoutResult<Vec<Bank>> {
        let mut banks = self.aggregator.list_banks().await?;
        banks.sort_by(|a, b| a.financial_institution_name.cmp(&b.financial_institution_name));
        Ok(banks)
    }

    pub async fn get_payment(&self, reference: &str) -> CheckoutResult<Payment> {
        self.db
            .payments()
            .get_by_reference(reference)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Pago", reference))
    }
}

/// Reports every missing field together, then checks formats.
fn validate_customer(
    customer: &PaymentCustomer,
    bank_code: Option<&str>,
    items: &[CartItem],
) -> CheckoutResult<()> {
    let mut fields = Vec::with_capacity(7);
    if let Some(code) = bank_code {
        fields.push(("banco_codigo", code));
    }
    fields.extend([
        ("documento", customer.document_number.as_str()),
        ("nombreCompleto", customer.full_name.as_str()),
        ("email", customer.email.as_str()),
        ("direccion", customer.address.as_str()),
        ("ciudad", customer.city.as_str()),
    ]);
    if items.is_empty() {
        fields.push(("items", ""));
    }
    require_fields(&fields)?;

    validate_email(&customer.email)?;
    validate_document(customer.document_type, &customer.document_number)?;
    if let Some(phone) = customer.phone.as_deref().filter(|p| !p.trim().is_empty()) {
        validate_phone(phone)?;
    }
    validate_items(items)
}
