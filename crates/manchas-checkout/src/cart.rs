//! # Cart Locking
//!
//! Shared by sale creation, payment intents and materialization: lock every
//! product a cart touches, check availability against the combined quantity,
//! then price the lines.
//!
//! ```text
//! items: [A x2, B x1, A x3]
//!
//! lock A ──► lock B            (first appearance order)
//! A: stock >= 5?  B: stock >= 1?
//! lines priced in request order, total = Σ qty × unit price
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use manchas_core::validation::{validate_line_count, validate_non_negative, validate_quantity};
use manchas_core::{CartItemSnapshot, Money, Product, ValidationError};
use manchas_db::{DbError, ProductRepository, SqliteConnection};

use crate::error::{CheckoutError, CheckoutResult};

/// One requested cart line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: String,
    pub quantity: i64,
    /// Price the client displayed; sales and payments charge this amount.
    pub unit_price: Money,
}

/// What a locked product must satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Availability {
    /// Active and in stock. Direct sales.
    Sellable,
    /// In stock only. Payment intents and paid-for materialization.
    InStock,
}

/// A locked, checked and priced cart.
#[derive(Debug)]
pub(crate) struct LockedCart {
    pub products: Vec<(Product, i64)>,
    pub lines: Vec<CartItemSnapshot>,
    pub total: Money,
}

impl LockedCart {
    /// Takes the combined quantity of every product out of stock.
    pub async fn decrement(
        &self,
        repo: &ProductRepository,
        conn: &mut SqliteConnection,
    ) -> CheckoutResult<()> {
        for (product, quantity) in &self.products {
            match repo.adjust_stock(conn, &product.id, -quantity).await {
                Ok(_) => {}
                // The row is locked, so this only fires if the lock was skipped.
                Err(DbError::StockUnderflow { .. }) => {
                    return Err(CheckoutError::InsufficientStock {
                        product: product.name.clone(),
                        available: product.stock,
                        requested: *quantity,
                    })
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Input checks that need no database.
pub(crate) fn validate_items(items: &[CartItem]) -> CheckoutResult<()> {
    validate_line_count("items", items.len())?;
    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(CheckoutError::validation("id_producto is required"));
        }
        validate_quantity(item.quantity)?;
        validate_non_negative("precioUnitario", item.unit_price)?;
    }
    Ok(())
}

/// Locks, checks and prices `items` inside the caller's transaction.
pub(crate) async fn lock_cart(
    repo: &ProductRepository,
    conn: &mut SqliteConnection,
    items: &[CartItem],
    availability: Availability,
) -> CheckoutResult<LockedCart> {
    let mut order: Vec<(&str, i64)> = Vec::new();
    for item in items {
        match order.iter_mut().find(|(id, _)| *id == item.product_id) {
            Some((_, qty)) => *qty += item.quantity,
            None => order.push((item.product_id.as_str(), item.quantity)),
        }
    }

    let mut products = Vec::with_capacity(order.len());
    for (id, quantity) in order {
        let product = repo
            .lock_for_update(conn, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Producto", id))?;

        match availability {
            Availability::Sellable => product.ensure_sellable(quantity)?,
            Availability::InStock => product.ensure_stock(quantity)?,
        }
        debug!(product_id = %id, stock = product.stock, requested = quantity, "Product locked");
        products.push((product, quantity));
    }

    let mut lines = Vec::with_capacity(items.len());
    let mut total = Money::zero();
    for item in items {
        let name = products
            .iter()
            .find(|(p, _)| p.id == item.product_id)
            .map(|(p, _)| p.name.clone())
            .unwrap_or_default();
        let subtotal = add_line(&mut total, "precioUnitario", item.unit_price, item.quantity)?;
        lines.push(CartItemSnapshot {
            product_id: item.product_id.clone(),
            product_name: name,
            quantity: item.quantity,
            unit_price: item.unit_price,
            subtotal,
        });
    }

    Ok(LockedCart {
        products,
        lines,
        total,
    })
}

/// `quantity × unit_price`, added to `total`. Overflow is a validation
/// error on `field`.
pub(crate) fn add_line(
    total: &mut Money,
    field: &str,
    unit_price: Money,
    quantity: i64,
) -> CheckoutResult<Money> {
    let too_large = || {
        CheckoutError::from(ValidationError::AmountTooLarge {
            field: field.to_string(),
        })
    };
    let subtotal = unit_price
        .checked_multiply_quantity(quantity)
        .ok_or_else(too_large)?;
    *total = total.checked_add(subtotal).ok_or_else(too_large)?;
    Ok(subtotal)
}

/// Rebuilds cart items from a frozen payment snapshot.
pub(crate) fn items_from_snapshot(lines: &[CartItemSnapshot]) -> Vec<CartItem> {
    lines
        .iter()
        .map(|l| CartItem {
            product_id: l.product_id.clone(),
            quantity: l.quantity,
            unit_price: l.unit_price,
        })
        .collect()
}
