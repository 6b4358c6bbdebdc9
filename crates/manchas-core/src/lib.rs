//! # manchas-core: Pure Business Logic for the Manchas y Pecas Back Office
//!
//! Everything here is a pure function or a plain type. No database, no
//! network, no clock reads beyond what callers pass in.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Back Office Architecture                            │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                apps/manchas-api (axum)                          │   │
//! │  │   /sales  /purchases  /payments/pse  /payments/cash  /webhook   │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │                   manchas-checkout (engines)                    │   │
//! │  └─────────────┬───────────────────────────────────┬───────────────┘   │
//! │                │                                   │                    │
//! │  ┌─────────────▼───────────────────┐ ┌─────────────▼───────────────┐   │
//! │  │  ★ manchas-core (THIS CRATE) ★  │ │  manchas-db (SQLite)        │   │
//! │  │                                 │ │                             │   │
//! │  │  types   money   pricing        │ │  repositories, migrations   │   │
//! │  │  validation      signature      │ │                             │   │
//! │  └─────────────────────────────────┘ └─────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types and state machines
//! - [`money`] - Integer minor-unit money
//! - [`pricing`] - Margin to sell price
//! - [`signature`] - Aggregator webhook checksum
//! - [`validation`] - Input rules
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use manchas_core::money::Money;
//! use manchas_core::pricing::{MarginMode, MarginRate};
//!
//! let cost = Money::from_major(25_000);
//! let margin = MarginRate::parse_percent("20").unwrap();
//!
//! let price = MarginMode::OnPrice.sell_price(cost, margin).unwrap();
//! assert_eq!(price.to_string(), "$31250.00");
//! ```

pub mod error;
pub mod money;
pub mod pricing;
pub mod signature;
pub mod types;
pub mod validation;

pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use pricing::{MarginMode, MarginRate};
pub use types::*;

/// Currency of every amount handled by the store.
pub const CURRENCY: &str = "COP";

/// Maximum lines in a single cart or purchase.
pub const MAX_CART_ITEMS: usize = 100;

/// Maximum quantity on a single line.
pub const MAX_ITEM_QUANTITY: i64 = 999;
