//! # Domain Types
//!
//! Core domain types used throughout the back office.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  Supplier ──< Purchase ──< PurchaseLine >── Product                    │
//! │                                               │                         │
//! │                               Sale ──< SaleLine                         │
//! │                                 ▲                                       │
//! │                                 │ sale_id (set on materialization)      │
//! │                              Payment ──── PaymentSnapshot (JSON)        │
//! │                                 │                                       │
//! │                                 └──1:1── CashPaymentTicket              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Identity
//! Every entity is keyed by a UUID v4 string. Business keys (payment
//! reference, cash code, purchase reference) are unique but separate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;

/// Version written into every new [`PaymentSnapshot`].
pub const SNAPSHOT_VERSION: u32 = 1;

// =============================================================================
// Catalog
// =============================================================================

/// Closed set of store categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ProductCategory {
    Snacks,
    Hygiene,
    Toys,
    Accessories,
    Feeders,
}

/// Whether a product may be sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum ProductState {
    #[default]
    Active,
    Inactive,
}

/// A catalog product.
///
/// `stock` never goes below zero: the schema carries a CHECK constraint and
/// every decrement is conditional on the remaining stock.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Product {
    pub id: String,
    /// Unique, 3-50 characters.
    pub name: String,
    pub category: ProductCategory,
    pub description: Option<String>,
    /// Last unit cost paid to a supplier.
    pub cost_price: Money,
    pub sell_price: Money,
    pub stock: i64,
    pub state: ProductState,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

impl Product {
    /// Checks if the product is active.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.state == ProductState::Active
    }

    /// Checks that `quantity` units can be taken from this product.
    ///
    /// ## Example
    /// ```rust,ignore
    /// product.ensure_sellable(3)?; // InactiveProduct or InsufficientStock
    /// ```
    pub fn ensure_sellable(&self, quantity: i64) -> CoreResult<()> {
        if !self.is_active() {
            return Err(CoreError::InactiveProduct {
                product: self.name.clone(),
            });
        }
        self.ensure_stock(quantity)
    }

    /// Checks stock only. Used for payment intents, which do not reserve.
    pub fn ensure_stock(&self, quantity: i64) -> CoreResult<()> {
        if self.stock < quantity {
            return Err(CoreError::InsufficientStock {
                product: self.name.clone(),
                available: self.stock,
                requested: quantity,
            });
        }
        Ok(())
    }
}

// =============================================================================
// Suppliers & Purchases
// =============================================================================

/// A supplier purchases are made from.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Supplier {
    pub id: String,
    pub name: String,
    pub document_type: String,
    pub document_number: String,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub is_active: bool,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

/// Payment status of a supplier purchase.
///
/// ## Invariants
/// ```text
/// PendingPayment : amount_paid <= total
/// PartiallyPaid  : 0 < amount_paid < total
/// Paid           : amount_paid == total
/// Cancelled      : terminal, stock already reversed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    #[default]
    PendingPayment,
    Paid,
    PartiallyPaid,
    Cancelled,
}

impl PurchaseStatus {
    pub const ALL: [PurchaseStatus; 4] = [
        PurchaseStatus::PendingPayment,
        PurchaseStatus::Paid,
        PurchaseStatus::PartiallyPaid,
        PurchaseStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::PendingPayment => "pending_payment",
            PurchaseStatus::Paid => "paid",
            PurchaseStatus::PartiallyPaid => "partially_paid",
            PurchaseStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purchase header.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Purchase {
    pub id: String,
    pub supplier_id: String,
    /// Supplier invoice number, unique when present.
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub purchase_date: DateTime<Utc>,
    pub total: Money,
    pub amount_paid: Money,
    pub status: PurchaseStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// An immutable purchase line.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct PurchaseLine {
    pub id: String,
    pub purchase_id: String,
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost: Money,
    /// Margin in basis points (2000 = 20%), when one was given.
    pub margin_bps: Option<i64>,
    /// Sell price written to the catalog for this line.
    pub sell_price: Money,
    pub subtotal: Money,
}

// =============================================================================
// Sales
// =============================================================================

/// Sale lifecycle.
///
/// ```text
/// Pending ──► Completed ──► Sent ──► Received
///    │            │
///    └────────────┴──► Cancelled (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    #[default]
    Pending,
    Completed,
    Sent,
    Received,
    Cancelled,
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::Pending => "pending",
            SaleStatus::Completed => "completed",
            SaleStatus::Sent => "sent",
            SaleStatus::Received => "received",
            SaleStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine allows `self -> to`.
    pub fn can_transition_to(&self, to: SaleStatus) -> bool {
        matches!(
            (self, to),
            (SaleStatus::Pending, SaleStatus::Completed)
                | (SaleStatus::Completed, SaleStatus::Sent)
                | (SaleStatus::Sent, SaleStatus::Received)
                | (SaleStatus::Pending, SaleStatus::Cancelled)
                | (SaleStatus::Completed, SaleStatus::Cancelled)
        )
    }

    /// Returns `to` if allowed, otherwise `InvalidTransition`.
    pub fn transition(&self, to: SaleStatus) -> CoreResult<SaleStatus> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(CoreError::InvalidTransition {
                entity: "Sale",
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }
}

impl fmt::Display for SaleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment rail. Only PSE and cash have flows; card is carried as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "UPPERCASE")]
pub enum PaymentMethod {
    Pse,
    Cash,
    Card,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::Pse => f.write_str("PSE"),
            PaymentMethod::Cash => f.write_str("CASH"),
            PaymentMethod::Card => f.write_str("CARD"),
        }
    }
}

/// A sale header with its customer snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Sale {
    pub id: String,
    pub user_id: Option<String>,
    pub total: Money,
    pub status: SaleStatus,
    /// `None` for sales entered manually by staff.
    pub payment_method: Option<PaymentMethod>,
    pub payment_reference: Option<String>,
    pub customer_name: String,
    pub customer_phone: String,
    pub customer_address: String,
    pub customer_city: String,
    pub customer_notes: Option<String>,
    /// Local path of the delivery photo.
    pub delivery_image: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub sent_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub received_at: Option<DateTime<Utc>>,
    #[ts(as = "Option<String>")]
    pub cancelled_at: Option<DateTime<Utc>>,
}

/// An immutable sale line. Name and price are frozen at sale time.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct SaleLine {
    pub id: String,
    pub sale_id: String,
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

// =============================================================================
// Payments
// =============================================================================

/// Payment lifecycle. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[default]
    Pending,
    Approved,
    Declined,
    Error,
    Voided,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Approved => "approved",
            PaymentStatus::Declined => "declined",
            PaymentStatus::Error => "error",
            PaymentStatus::Voided => "voided",
        }
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colombian identity document types accepted at checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
pub enum DocumentType {
    /// Cédula de ciudadanía.
    #[default]
    CC,
    /// Cédula de extranjería.
    CE,
    NIT,
    /// Passport.
    PP,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentType::CC => "CC",
            DocumentType::CE => "CE",
            DocumentType::NIT => "NIT",
            DocumentType::PP => "PP",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum PersonType {
    #[default]
    Natural,
    Juridica,
}

/// Customer data captured when a payment is initiated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CustomerSnapshot {
    pub full_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub document_type: Option<DocumentType>,
    pub document_number: Option<String>,
    pub person_type: Option<PersonType>,
    pub address: String,
    pub city: String,
    pub notes: Option<String>,
}

/// One cart line frozen into a payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartItemSnapshot {
    pub product_id: String,
    pub product_name: String,
    pub quantity: i64,
    pub unit_price: Money,
    pub subtotal: Money,
}

/// Everything needed to materialize a sale long after the cart is gone.
///
/// Stored as JSON on the payment row. `version` is bumped whenever the
/// shape changes so older rows stay decodable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PaymentSnapshot {
    pub version: u32,
    pub customer: CustomerSnapshot,
    pub items: Vec<CartItemSnapshot>,
}

impl PaymentSnapshot {
    pub fn new(customer: CustomerSnapshot, items: Vec<CartItemSnapshot>) -> Self {
        PaymentSnapshot {
            version: SNAPSHOT_VERSION,
            customer,
            items,
        }
    }

    /// Σ item subtotals.
    pub fn total(&self) -> Money {
        self.items.iter().map(|i| i.subtotal).sum()
    }
}

/// A payment intent and its reconciliation state.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct Payment {
    pub id: String,
    /// Set when the payment is approved and its sale materialized.
    pub sale_id: Option<String>,
    pub user_id: String,
    /// Internal reference shared with the aggregator, `MP-<millis>-<random>`.
    pub reference: String,
    /// Aggregator payment link id.
    pub link_id: Option<String>,
    /// Aggregator transaction id, known once the customer paid.
    pub transaction_id: Option<String>,
    pub method: PaymentMethod,
    pub bank_code: Option<String>,
    pub amount: Money,
    pub currency: String,
    pub status: PaymentStatus,
    #[cfg_attr(feature = "sqlx", sqlx(json))]
    pub snapshot: PaymentSnapshot,
    pub redirect_url: Option<String>,
    /// Last raw aggregator payload, kept for audits.
    pub raw_response: Option<String>,
    /// Why the last confirmation attempt could not be applied.
    pub failure_note: Option<String>,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

/// Cash ticket lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CashTicketStatus {
    #[default]
    Pending,
    Paid,
    Expired,
    Voided,
}

impl fmt::Display for CashTicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CashTicketStatus::Pending => "pending",
            CashTicketStatus::Paid => "paid",
            CashTicketStatus::Expired => "expired",
            CashTicketStatus::Voided => "voided",
        };
        f.write_str(s)
    }
}

/// A code the customer takes to a cashier or retail partner.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
#[ts(export)]
pub struct CashPaymentTicket {
    pub id: String,
    pub payment_id: String,
    /// Unique, digits only.
    pub code: String,
    #[ts(as = "String")]
    pub expires_at: DateTime<Utc>,
    #[ts(as = "Option<String>")]
    pub paid_at: Option<DateTime<Utc>>,
    pub status: CashTicketStatus,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
}

impl CashPaymentTicket {
    /// Pending and past its expiration.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status == CashTicketStatus::Pending && self.expires_at <= now
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
