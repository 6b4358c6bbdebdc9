//! # Catalog Engine
//!
//! Product and supplier maintenance for the back office.
//!
//! ## Repricing on a cost change
//! ```text
//! BEGIN
//!   lock product                          NotFound
//!   UPDATE name, category, description
//!   cost given?
//!     margin = last purchase line margin (non-cancelled purchases)
//!     margin < 100%  ──► sell = cost ⊕ margin
//!     otherwise      ──► sell unchanged
//! COMMIT
//! ```
//!
//! Rows referenced by sales or purchases cannot be deleted; they answer
//! [`CheckoutError::InUse`] and should be deactivated instead.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use manchas_core::pricing::purchase_margin;
use manchas_core::validation::{
    require_fields, validate_document, validate_email, validate_non_negative, validate_phone,
    validate_product_name,
};
use manchas_core::{
    DocumentType, MarginMode, Money, Product, ProductCategory, ProductState, Supplier,
    ValidationError,
};
use manchas_db::repository::product::generate_product_id;
use manchas_db::{Database, DbError};

use crate::error::{CheckoutError, CheckoutResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub category: ProductCategory,
    pub description: Option<String>,
    /// Defaults to active.
    pub state: Option<ProductState>,
    pub sell_price: Money,
    pub stock: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateProduct {
    pub name: String,
    pub category: ProductCategory,
    pub description: Option<String>,
    /// A new unit cost reprices the product from its last purchase margin.
    pub cost_price: Option<Money>,
}

/// Supplier identity and contact data, for create and update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupplierData {
    pub name: String,
    pub document_type: DocumentType,
    pub document_number: String,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl SupplierData {
    fn validate(&self) -> CheckoutResult<()> {
        require_fields(&[
            ("nombre", &self.name),
            ("numero_documento", &self.document_number),
        ])?;
        validate_document(self.document_type, &self.document_number)?;
        if let Some(phone) = non_blank(&self.phone) {
            validate_phone(phone)?;
        }
        if let Some(email) = non_blank(&self.email) {
            validate_email(email)?;
        }
        Ok(())
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Products and suppliers.
#[derive(Debug, Clone)]
pub struct CatalogEngine {
    db: Database,
    margin_mode: MarginMode,
}

impl CatalogEngine {
    pub fn new(db: Database, margin_mode: MarginMode) -> Self {
        CatalogEngine { db, margin_mode }
    }

    // =========================================================================
    // Products
    // =========================================================================

    pub async fn list_products(
        &self,
        category: Option<ProductCategory>,
        state: Option<ProductState>,
    ) -> CheckoutResult<Vec<Product>> {
        Ok(self.db.products().list_by(category, state).await?)
    }

    pub async fn get_product(&self, id: &str) -> CheckoutResult<Product> {
        self.db
            .products()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Producto", id))
    }

    /// Adds a product to the catalog. Its cost stays zero until the first
    /// purchase.
    pub async fn create_product(&self, request: NewProduct) -> CheckoutResult<Product> {
        validate_product_name(&request.name)?;
        validate_non_negative("precioVenta", request.sell_price)?;
        if request.stock < 0 {
            return Err(ValidationError::Negative {
                field: "stock".to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let product = Product {
            id: generate_product_id(),
            name: request.name.trim().to_string(),
            category: request.category,
            description: non_blank(&request.description).map(str::to_string),
            cost_price: Money::zero(),
            sell_price: request.sell_price,
            stock: request.stock,
            state: request.state.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        };
        let product = self.db.products().insert(&product).await?;

        info!(id = %product.id, name = %product.name, "Product created");
        Ok(product)
    }

    /// Rewrites a product's details and, when a cost is given, its pricing.
    pub async fn update_product(&self, id: &str, request: UpdateProduct) -> CheckoutResult<Product> {
        validate_product_name(&request.name)?;
        if let Some(cost) = request.cost_price {
            validate_non_negative("precioCosto", cost)?;
        }

        let products = self.db.products();
        let mut tx = self.db.begin().await?;

        products
            .lock_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Producto", id))?;
        let mut product = products
            .update_details(
                &mut tx,
                id,
                request.name.trim(),
                request.category,
                non_blank(&request.description),
            )
            .await?;

        if let Some(cost) = request.cost_price {
            let last_margin = self.db.purchases().last_margin_for_product(&mut tx, id).await?;
            let sell = match purchase_margin(last_margin)? {
                Some(margin) => self.margin_mode.sell_price(cost, margin)?,
                None => {
                    debug!(product_id = %id, "No purchase margin on record, keeping sell price");
                    product.sell_price
                }
            };
            products.update_pricing(&mut tx, id, cost, sell).await?;
            product.cost_price = cost;
            product.sell_price = sell;
        }

        tx.commit().await.map_err(DbError::from)?;

        info!(id = %product.id, cost = %product.cost_price, sell = %product.sell_price, "Product updated");
        Ok(product)
    }

    pub async fn set_product_state(&self, id: &str, state: ProductState) -> CheckoutResult<Product> {
        let product = self
            .db
            .products()
            .set_state(id, state)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Producto", id))?;

        info!(id = %id, state = ?state, "Product state changed");
        Ok(product)
    }

    pub async fn delete_product(&self, id: &str) -> CheckoutResult<()> {
        match self.db.products().delete(id).await {
            Ok(true) => {
                info!(id = %id, "Product deleted");
                Ok(())
            }
            Ok(false) => Err(CheckoutError::not_found("Producto", id)),
            Err(DbError::ForeignKeyViolation { .. }) => Err(CheckoutError::in_use("Producto", id)),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Suppliers
    // =========================================================================

    /// All suppliers, or only the active ones.
    pub async fn list_suppliers(&self, only_active: bool) -> CheckoutResult<Vec<Supplier>> {
        let suppliers = self.db.suppliers();
        let list = if only_active {
            suppliers.list_active().await?
        } else {
            suppliers.list().await?
        };
        Ok(list)
    }

    pub async fn get_supplier(&self, id: &str) -> CheckoutResult<Supplier> {
        self.db
            .suppliers()
            .get_by_id(id)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Proveedor", id))
    }

    pub async fn create_supplier(&self, data: SupplierData) -> CheckoutResult<Supplier> {
        data.validate()?;
        let supplier = self
            .db
            .suppliers()
            .create(
                &data.name,
                data.document_type.as_str(),
                &data.document_number,
                non_blank(&data.phone),
                non_blank(&data.email),
            )
            .await?;

        info!(id = %supplier.id, name = %supplier.name, "Supplier created");
        Ok(supplier)
    }

    pub async fn update_supplier(&self, id: &str, data: SupplierData) -> CheckoutResult<Supplier> {
        data.validate()?;
        self.db
            .suppliers()
            .update(
                id,
                &data.name,
                data.document_type.as_str(),
                &data.document_number,
                non_blank(&data.phone),
                non_blank(&data.email),
            )
            .await?
            .ok_or_else(|| CheckoutError::not_found("Proveedor", id))
    }

    pub async fn set_supplier_active(&self, id: &str, active: bool) -> CheckoutResult<Supplier> {
        let supplier = self
            .db
            .suppliers()
            .set_active(id, active)
            .await?
            .ok_or_else(|| CheckoutError::not_found("Proveedor", id))?;

        info!(id = %id, active, "Supplier state changed");
        Ok(supplier)
    }

    pub async fn delete_supplier(&self, id: &str) -> CheckoutResult<()> {
        match self.db.suppliers().delete(id).await {
            Ok(true) => {
                info!(id = %id, "Supplier deleted");
                Ok(())
            }
            Ok(false) => Err(CheckoutError::not_found("Proveedor", id)),
            Err(DbError::ForeignKeyViolation { .. }) => Err(CheckoutError::in_use("Proveedor", id)),
            Err(e) => Err(e.into()),
        }
    }
}
