//! # Repository Module
//!
//! Database repository implementations for the back office.
//!
//! ## Two kinds of methods
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Reads                         Transaction-scoped writes               │
//! │  ─────                         ─────────────────────────               │
//! │  db.sales().get_by_id(id)      let mut tx = db.begin().await?;         │
//! │       │                        repo.lock_for_update(&mut tx, id)       │
//! │       ▼                        repo.adjust_stock(&mut tx, id, -3)      │
//! │  SqlitePool                    tx.commit().await?                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`product::ProductRepository`] - Catalog rows and stock
//! - [`supplier::SupplierRepository`] - Suppliers referenced by purchases
//! - [`purchase::PurchaseRepository`] - Purchase headers and lines
//! - [`sale::SaleRepository`] - Sale headers, lines and lifecycle
//! - [`payment::PaymentRepository`] - Payment intents
//! - [`cash_ticket::CashTicketRepository`] - Cash payable codes

pub mod cash_ticket;
pub mod payment;
pub mod product;
pub mod purchase;
pub mod sale;
pub mod supplier;
