//! # Validation Module
//!
//! Input validation run before any transaction is opened.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: HTTP (axum extractors)                                       │
//! │  └── Shape: JSON types, decimal amounts                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Required fields, formats, ranges                                  │
//! │  └── No database access                                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Engines inside a transaction                                 │
//! │  └── Existence, active state, stock                                    │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 4: SQLite                                                       │
//! │  └── UNIQUE, FOREIGN KEY, CHECK (stock >= 0)                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::DocumentType;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

// =============================================================================
// Required Fields
// =============================================================================

/// Collects every blank field and reports them together.
///
/// ## Example
/// ```rust
/// use manchas_core::validation::require_fields;
///
/// let err = require_fields(&[("banco_codigo", ""), ("email", " "), ("ciudad", "Cali")]).unwrap_err();
/// assert_eq!(err.to_string(), "Missing required fields: banco_codigo, email");
/// ```
pub fn require_fields(fields: &[(&str, &str)]) -> ValidationResult<()> {
    let missing: Vec<String> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name.to_string())
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::MissingFields { fields: missing })
    }
}

// =============================================================================
// String Validators
// =============================================================================

/// Validates a product name: 3 to 50 characters after trimming.
pub fn validate_product_name(name: &str) -> ValidationResult<()> {
    let len = name.trim().chars().count();

    if len == 0 {
        return Err(ValidationError::Required {
            field: "name".to_string(),
        });
    }
    if len < 3 {
        return Err(ValidationError::TooShort {
            field: "name".to_string(),
            min: 3,
        });
    }
    if len > 50 {
        return Err(ValidationError::TooLong {
            field: "name".to_string(),
            max: 50,
        });
    }

    Ok(())
}

/// Validates a phone number: required, digits only.
///
/// ## Example
/// ```rust
/// use manchas_core::validation::validate_phone;
///
/// assert!(validate_phone("3001234567").is_ok());
/// assert!(validate_phone("300-123").is_err());
/// ```
pub fn validate_phone(phone: &str) -> ValidationResult<()> {
    let phone = phone.trim();

    if phone.is_empty() {
        return Err(ValidationError::Required {
            field: "telefono".to_string(),
        });
    }
    if !phone.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "telefono".to_string(),
            reason: "must contain only digits".to_string(),
        });
    }

    Ok(())
}

/// Minimal email shape check: `local@domain.tld`.
pub fn validate_email(email: &str) -> ValidationResult<()> {
    let email = email.trim();
    let invalid = || ValidationError::InvalidFormat {
        field: "email".to_string(),
        reason: "must be a valid email address".to_string(),
    };

    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
        || email.chars().any(char::is_whitespace)
    {
        return Err(invalid());
    }

    Ok(())
}

/// Validates a document number against its type.
///
/// ## Rules
/// ```text
/// CC   8-10 digits
/// CE   3-12 letters or digits
/// NIT  9-11 digits, optional "-<check digit>"
/// PP   6-15 letters or digits
/// ```
pub fn validate_document(doc_type: DocumentType, number: &str) -> ValidationResult<()> {
    let number = number.trim();
    let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    let is_alnum = |s: &str| s.chars().all(|c| c.is_ascii_alphanumeric());
    let len = number.len();

    let valid = match doc_type {
        DocumentType::CC => is_digits(number) && (8..=10).contains(&len),
        DocumentType::CE => is_alnum(number) && (3..=12).contains(&len),
        DocumentType::PP => is_alnum(number) && (6..=15).contains(&len),
        DocumentType::NIT => {
            let (base, check) = match number.split_once('-') {
                Some((b, c)) => (b, Some(c)),
                None => (number, None),
            };
            is_digits(base)
                && (9..=11).contains(&base.len())
                && check.map(|c| c.len() == 1 && is_digits(c)).unwrap_or(true)
        }
    };

    if valid {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "documento".to_string(),
            reason: format!("not a valid {} number", doc_type.as_str()),
        })
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a line quantity: 1 to MAX_ITEM_QUANTITY.
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "cantidad".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "cantidad".to_string(),
            min: 1,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a unit price or cost. Zero is allowed.
pub fn validate_non_negative(field: &str, amount: Money) -> ValidationResult<()> {
    if amount.is_negative() {
        return Err(ValidationError::Negative {
            field: field.to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Collection Validators
// =============================================================================

/// Validates the number of lines in a cart or purchase: 1 to MAX_CART_ITEMS.
pub fn validate_line_count(field: &str, count: usize) -> ValidationResult<()> {
    if count == 0 {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }
    if count > MAX_CART_ITEMS {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 1,
            max: MAX_CART_ITEMS as i64,
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
