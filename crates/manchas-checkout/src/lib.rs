//! # manchas-checkout: Sales, Purchases and Payments
//!
//! The consistency engine of the back office. Every operation that touches
//! more than one row runs in a single SQLite transaction and rolls back as a
//! whole.
//!
//! ## Components
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  Client ──► PaymentOrchestrator ──► aggregator (PSE) / cash code       │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │            ReconciliationGateway ◄── webhook / poll / cash confirm     │
//! │                     │                                                   │
//! │                     ▼                                                   │
//! │               SaleEngine (materialize) ──► products.stock              │
//! │                                                                         │
//! │  PurchaseEngine ──────────────────────────► products.stock/prices      │
//! │  CatalogEngine ───────────────────────────► products, suppliers        │
//! │                                                                         │
//! │  ExpirationSweeper ──► expire overdue cash tickets (interval)          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let config = CheckoutConfig::load_or_default(None);
//! let aggregator = Arc::new(WompiClient::new(config.aggregator.clone())?);
//! let engines = CheckoutEngines::new(db, &config, aggregator);
//!
//! let sale = engines.sales.create_sale(Some(user), customer, &items).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod aggregator;
pub mod cart;
pub mod catalog;
pub mod config;
pub mod error;
pub mod payment;
pub mod purchase;
pub mod reconciliation;
pub mod sale;
pub mod sweeper;

// =============================================================================
// Re-exports
// =============================================================================

pub use aggregator::{AggregatorError, Bank, PaymentAggregator, WompiClient};
pub use cart::CartItem;
pub use catalog::{CatalogEngine, NewProduct, SupplierData, UpdateProduct};
pub use config::{CheckoutConfig, ConfigError};
pub use error::{CheckoutError, CheckoutResult, ErrorKind};
pub use payment::{
    BankPaymentInitiated, BankPaymentRequest, CashPaymentInitiated, CashPaymentRequest,
    CashPaymentState, PaymentCustomer, PaymentOrchestrator,
};
pub use purchase::{NewPurchase, NewPurchaseLine, PurchaseDetail, PurchaseEngine, UpdatePurchase};
pub use reconciliation::{ReconciliationGateway, StatusChange, WebhookEvent};
pub use sale::{SaleCustomer, SaleDetail, SaleEngine};
pub use sweeper::{ExpirationSweeper, ExpirationSweeperHandle};

use std::sync::Arc;

use manchas_db::Database;

/// Every engine, wired to one database and one aggregator.
#[derive(Clone)]
pub struct CheckoutEngines {
    pub sales: SaleEngine,
    pub purchases: PurchaseEngine,
    pub catalog: CatalogEngine,
    pub payments: PaymentOrchestrator,
    pub reconciliation: ReconciliationGateway,
}

impl CheckoutEngines {
    pub fn new(db: Database, config: &CheckoutConfig, aggregator: Arc<dyn PaymentAggregator>) -> Self {
        let sales = SaleEngine::new(db.clone());
        let reconciliation = ReconciliationGateway::new(
            db.clone(),
            sales.clone(),
            config.aggregator.events_secret.clone(),
        );
        let payments = PaymentOrchestrator::new(
            db.clone(),
            aggregator,
            reconciliation.clone(),
            config.aggregator.clone(),
            config.cash.clone(),
        );
        let catalog = CatalogEngine::new(db.clone(), config.pricing.margin_mode);
        let purchases = PurchaseEngine::new(db, config.pricing.margin_mode);

        CheckoutEngines {
            sales,
            purchases,
            catalog,
            payments,
            reconciliation,
        }
    }

    /// A sweeper over this wiring, ticking every `interval`.
    pub fn sweeper(&self, interval: std::time::Duration) -> (ExpirationSweeper, ExpirationSweeperHandle) {
        ExpirationSweeper::new(self.reconciliation.clone(), interval)
    }
}
