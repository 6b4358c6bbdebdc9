//! HTTP handlers, one module per resource.

pub mod health;
pub mod payments;
pub mod products;
pub mod purchases;
pub mod sales;
pub mod suppliers;
