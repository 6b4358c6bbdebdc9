//! # manchas-db: Database Layer for the Manchas y Pecas Back Office
//!
//! SQLite storage through sqlx: pool setup, embedded migrations and one
//! repository per table family.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  manchas-checkout engines (sale, purchase, payment, reconciliation)    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   manchas-db (THIS CRATE)                       │   │
//! │  │   Database (pool.rs) ◄── Repositories ──► Migrations (embedded) │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite (WAL, foreign keys on, busy timeout)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use manchas_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("manchas.db")).await?;
//!
//! let mut tx = db.begin().await?;
//! let product = db.products().lock_for_update(&mut tx, &id).await?;
//! db.products().adjust_stock(&mut tx, &id, -2).await?;
//! tx.commit().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::cash_ticket::CashTicketRepository;
pub use repository::payment::PaymentRepository;
pub use repository::product::ProductRepository;
pub use repository::purchase::PurchaseRepository;
pub use repository::sale::SaleRepository;
pub use repository::supplier::SupplierRepository;

/// The connection type repositories accept for transaction-scoped work.
pub use sqlx::SqliteConnection;
