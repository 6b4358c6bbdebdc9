//! # Purchase Engine
//!
//! Supplier purchases: stock comes in, cost and sell price are recomputed.
//!
//! ## Intake
//! ```text
//! BEGIN
//!   lock supplier                         NotFound
//!   lock each distinct product (request order)
//!   price lines: subtotal = qty × unit cost
//!                sell = margin < 100% ? cost ⊕ margin : current sell price
//!   INSERT purchases (pending_payment, total = Σ subtotals)
//!   INSERT purchase_lines
//!   per product: stock += Σ qty, cost/sell = last line
//! COMMIT
//! ```
//!
//! ## Status Rules
//! ```text
//! pending_payment   0 <= paid <= total
//! partially_paid    0 <  paid <  total
//! paid              paid == total (defaults to total)
//! cancelled         stock reversed, terminal
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use manchas_core::pricing::{line_sell_price, purchase_margin};
use manchas_core::validation::{validate_line_count, validate_non_negative, validate_quantity};
use manchas_core::{MarginMode, Money, Product, Purchase, PurchaseLine, PurchaseStatus};
use manchas_db::repository::purchase::generate_purchase_id;
use manchas_db::{Database, DbError};

use crate::cart::add_line;
use crate::error::{CheckoutError, CheckoutResult};

/// One line of a purchase request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchaseLine {
    pub product_id: String,
    pub quantity: i64,
    pub unit_cost: Money,
    /// Margin in basis points; `None` or 100% and above keep the product's
    /// sell price.
    pub margin_bps: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPurchase {
    pub supplier_id: String,
    pub reference: Option<String>,
    /// Defaults to now.
    pub purchase_date: Option<DateTime<Utc>>,
    pub lines: Vec<NewPurchaseLine>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePurchase {
    pub supplier_id: String,
    pub reference: Option<String>,
    pub status: PurchaseStatus,
    /// Keeps the stored amount when absent, except for `paid`.
    pub amount_paid: Option<Money>,
}

/// A purchase with its lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseDetail {
    #[serde(flatten)]
    pub purchase: Purchase,
    pub lines: Vec<PurchaseLine>,
}

/// Purchase intake and maintenance.
#[derive(Debug, Clone)]
pub struct PurchaseEngine {
    db: Database,
    margin_mode: MarginMode,
}

impl PurchaseEngine {
    pub fn new(db: Database, margin_mode: MarginMode) -> Self {
        PurchaseEngine { db, margin_mode }
    }

    /// Records a purchase and brings its units into stock.
    pub async fn create_purchase(&self, request: NewPurchase) -> CheckoutResult<PurchaseDetail> {
        if request.supplier_id.trim().is_empty() {
            return Err(CheckoutError::validation("id_proveedor is required"));
        }
        validate_line_count("detalles", request.lines.len())?;
        let mut margins = Vec::with_capacity(request.lines.len());
        for line in &request.lines {
            if line.product_id.trim().is_empty() {
                return Err(CheckoutError::validation("id_producto is required"));
            }
            validate_quantity(line.quantity)?;
            validate_non_negative("precio_costo_unitario", line.unit_cost)?;
            let margin = purchase_margin(line.margin_bps)?;
            if margin.is_none() {
                if let Some(bps) = line.margin_bps {
                    warn!(
                        product_id = %line.product_id,
                        margin_bps = bps,
                        "Margin of 100% or more, keeping current sell price"
                    );
                }
            }
            margins.push(margin);
        }
        let reference = normalize_reference(request.reference.as_deref());

        let products = self.db.products();
        let purchases = self.db.purchases();
        let mut tx = self.db.begin().await?;

        self.db
            .suppliers()
            .lock_for_update(&mut tx, &request.supplier_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Proveedor", &request.supplier_id))?;

        // Distinct products in first-appearance order, with their running
        // quantity and the pricing of their last line.
        let mut touched: Vec<(Product, i64, Money, Money)> = Vec::new();
        for line in &request.lines {
            if !touched.iter().any(|(p, ..)| p.id == line.product_id) {
                let product = products
                    .lock_for_update(&mut tx, &line.product_id)
                    .await?
                    .ok_or_else(|| CheckoutError::not_found("Producto", &line.product_id))?;
                let (cost, sell) = (product.cost_price, product.sell_price);
                touched.push((product, 0, cost, sell));
            }
        }

        let purchase_id = generate_purchase_id();
        let mut lines = Vec::with_capacity(request.lines.len());
        let mut total = Money::zero();
        for (line, margin) in request.lines.iter().zip(margins) {
            let Some(entry) = touched.iter_mut().find(|(p, ..)| p.id == line.product_id) else {
                continue;
            };
            let sell_price =
                line_sell_price(self.margin_mode, line.unit_cost, margin, entry.0.sell_price)?;
            let subtotal =
                add_line(&mut total, "precio_costo_unitario", line.unit_cost, line.quantity)?;

            entry.1 += line.quantity;
            entry.2 = line.unit_cost;
            entry.3 = sell_price;

            lines.push(PurchaseLine {
                id: generate_purchase_id(),
                purchase_id: purchase_id.clone(),
                product_id: line.product_id.clone(),
                quantity: line.quantity,
                unit_cost: line.unit_cost,
                margin_bps: margin.map(|m| m.bps()),
                sell_price,
                subtotal,
            });
        }

        let now = Utc::now();
        let purchase = Purchase {
            id: purchase_id,
            supplier_id: request.supplier_id.clone(),
            reference,
            purchase_date: request.purchase_date.unwrap_or(now),
            total,
            amount_paid: Money::zero(),
            status: PurchaseStatus::PendingPayment,
            created_at: now,
            updated_at: now,
        };
        purchases.insert(&mut tx, &purchase).await?;
        for line in &lines {
            purchases.insert_line(&mut tx, line).await?;
        }

        for (product, quantity, cost, sell) in &touched {
            products.adjust_stock(&mut tx, &product.id, *quantity).await?;
            products.update_pricing(&mut tx, &product.id, *cost, *sell).await?;
            debug!(
                product_id = %product.id,
                added = quantity,
                cost = %cost,
                sell = %sell,
                "Product restocked"
            );
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(
            purchase_id = %purchase.id,
            supplier_id = %purchase.supplier_id,
            total = %purchase.total,
            lines = lines.len(),
            "Purchase created"
        );
        Ok(PurchaseDetail { purchase, lines })
    }

    /// Rewrites supplier, reference, status and amount paid.
    ///
    /// Cancelling takes every line's units back out of stock; if a product
    /// no longer holds them, nothing changes and `StockUnderflow` is returned.
    pub async fn update_purchase(&self, id: &str, update: UpdatePurchase) -> CheckoutResult<Purchase> {
        if update.supplier_id.trim().is_empty() {
            return Err(CheckoutError::validation("id_proveedor is required"));
        }
        let reference = normalize_reference(update.reference.as_deref());

        let purchases = self.db.purchases();
        let mut tx = self.db.begin().await?;

        let current = purchases
            .lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Compra", id))?;

        if current.status == PurchaseStatus::Cancelled {
            return Err(CheckoutError::InvalidTransition {
                entity: "Purchase".into(),
                from: current.status.to_string(),
                to: update.status.to_string(),
            });
        }

        self.db
            .suppliers()
            .lock_for_update(&mut tx, &update.supplier_id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Proveedor", &update.supplier_id))?;

        let amount_paid = settle_amount(update.status, update.amount_paid, &current)?;

        if update.status == PurchaseStatus::Cancelled {
            let products = self.db.products();
            for line in purchases.lines_in(&mut tx, id).await? {
                products
                    .adjust_stock(&mut tx, &line.product_id, -line.quantity)
                    .await
                    .inspect_err(|e| {
                        warn!(purchase_id = %id, product_id = %line.product_id, error = %e, "Cannot reverse purchase stock");
                    })?;
            }
        }

        let purchase = purchases
            .update_header(
                &mut tx,
                id,
                &update.supplier_id,
                reference.as_deref(),
                update.status,
                amount_paid,
            )
            .await?;
        tx.commit().await.map_err(DbError::from)?;

        info!(
            purchase_id = %id,
            from = %current.status,
            to = %purchase.status,
            amount_paid = %purchase.amount_paid,
            "Purchase updated"
        );
        Ok(purchase)
    }

    pub async fn get_purchase(&self, id: &str) -> CheckoutResult<PurchaseDetail> {
        let purchases = self.db.purchases();
        let purchase = purchases
            .get_by_id(id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Compra", id))?;
        let lines = purchases.get_lines(id).await?;
        Ok(PurchaseDetail { purchase, lines })
    }

    /// Newest purchase date first.
    pub async fn list_purchases(&self) -> CheckoutResult<Vec<Purchase>> {
        Ok(self.db.purchases().list().await?)
    }
}

fn normalize_reference(reference: Option<&str>) -> Option<String> {
    reference
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(str::to_string)
}

/// Amount paid after an update, checked against the target status.
fn settle_amount(
    status: PurchaseStatus,
    requested: Option<Money>,
    current: &Purchase,
) -> CheckoutResult<Money> {
    let total = current.total;
    let paid = match (status, requested) {
        (PurchaseStatus::Paid, None) => total,
        (_, Some(amount)) => amount,
        (_, None) => current.amount_paid,
    };

    if paid.is_negative() {
        return Err(CheckoutError::validation("monto_pagado cannot be negative"));
    }
    if paid > total {
        return Err(CheckoutError::validation(format!(
            "monto_pagado ({}) cannot exceed the purchase total ({})",
            paid, total
        )));
    }

    match status {
        PurchaseStatus::Paid if paid != total => Err(CheckoutError::validation(format!(
            "A paid purchase must have monto_pagado equal to the total ({})",
            total
        ))),
        PurchaseStatus::PartiallyPaid if !paid.is_positive() || paid >= total => {
            Err(CheckoutError::validation(
                "A partially paid purchase needs 0 < monto_pagado < total",
            ))
        }
        _ => Ok(paid),
    }
}
