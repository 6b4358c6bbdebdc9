//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## One Representation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DISPLAY PRICES AND AGGREGATOR AMOUNTS ARE THE SAME NUMBER              │
//! │                                                                         │
//! │  Catalog:    sell price 1000.00 COP   ──► Money(100000)                │
//! │  Sale:       total      3000.00 COP   ──► Money(300000)                │
//! │  Aggregator: amount_in_cents 300000   ──► Money(300000)                │
//! │                                                                         │
//! │  Prices arrive from clients as JSON numbers ("1000", "1000.5") and     │
//! │  are parsed from their decimal text, never through float arithmetic.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use manchas_core::money::Money;
//!
//! let price = Money::parse_decimal("1000").unwrap();
//! assert_eq!(price.cents(), 100_000);
//!
//! let line = price.multiply_quantity(3);
//! assert_eq!(line.to_string(), "$3000.00");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in minor units (centavos for COP).
///
/// ## Design Decisions
/// - **i64 (signed)**: stock reversals and compensations may produce negatives
/// - **Transparent**: stored as a plain INTEGER column
/// - **Two implied decimals**: `Money(31_250_00)` is `31250.00`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(transparent))]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from minor units.
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::money::Money;
    ///
    /// let price = Money::from_cents(100_050); // 1000.50
    /// assert_eq!(price.cents(), 100_050);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from whole currency units.
    #[inline]
    pub const fn from_major(major: i64) -> Self {
        Money(major * 100)
    }

    /// Parses a decimal string such as `"1000"`, `"1000.5"` or `"-2.25"`.
    ///
    /// ## Rules
    /// - At most one `.` separator
    /// - Digits beyond the second decimal are rounded half-up
    /// - Exponent notation is rejected
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::money::Money;
    ///
    /// assert_eq!(Money::parse_decimal("31250").unwrap().cents(), 3_125_000);
    /// assert_eq!(Money::parse_decimal("0.125").unwrap().cents(), 13);
    /// assert!(Money::parse_decimal("1e3").is_err());
    /// ```
    pub fn parse_decimal(input: &str) -> Result<Self, ValidationError> {
        let invalid = || ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: format!("'{}' is not a decimal amount", input),
        };

        let trimmed = input.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (whole, fraction) = match digits.split_once('.') {
            Some((w, f)) => (w, f),
            None => (digits, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid());
        }

        let whole_value: i64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };

        let mut frac_digits = fraction.bytes().map(|b| i64::from(b - b'0'));
        let tenths = frac_digits.next().unwrap_or(0);
        let hundredths = frac_digits.next().unwrap_or(0);
        let round_up = frac_digits.next().map(|d| d >= 5).unwrap_or(false);

        let cents = whole_value
            .checked_mul(100)
            .and_then(|c| c.checked_add(tenths * 10 + hundredths + i64::from(round_up)))
            .ok_or_else(invalid)?;

        Ok(Money(if negative { -cents } else { cents }))
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the whole currency units portion.
    #[inline]
    pub const fn major(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the minor unit portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Checks if the value is zero.
    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the value is positive (greater than zero).
    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    /// Checks if the value is negative (less than zero).
    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Multiplies money by a quantity.
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::money::Money;
    ///
    /// let unit_price = Money::from_major(25_000);
    /// assert_eq!(unit_price.multiply_quantity(3), Money::from_major(75_000));
    /// ```
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Multiplies by a quantity, `None` on overflow.
    ///
    /// Client supplied prices go through this one.
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::money::Money;
    ///
    /// assert_eq!(Money::from_major(10).checked_multiply_quantity(3), Some(Money::from_major(30)));
    /// assert_eq!(Money::from_cents(i64::MAX / 2 + 1).checked_multiply_quantity(2), None);
    /// ```
    #[inline]
    pub const fn checked_multiply_quantity(&self, qty: i64) -> Option<Self> {
        match self.0.checked_mul(qty) {
            Some(v) => Some(Money(v)),
            None => None,
        }
    }

    /// Adds two amounts, `None` on overflow.
    #[inline]
    pub const fn checked_add(&self, other: Money) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(v) => Some(Money(v)),
            None => None,
        }
    }

    /// Scales by `numerator / denominator` with half-up rounding.
    ///
    /// Uses i128 so large amounts times basis points cannot overflow.
    /// Returns `None` when the denominator is not positive.
    pub fn scale(&self, numerator: i64, denominator: i64) -> Option<Money> {
        if denominator <= 0 {
            return None;
        }
        let product = self.0 as i128 * numerator as i128;
        let half = denominator as i128 / 2;
        let rounded = if product >= 0 {
            (product + half) / denominator as i128
        } else {
            (product - half) / denominator as i128
        };
        i64::try_from(rounded).ok().map(Money)
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Human-readable form, `$31250.00`. Storefront formatting is localized on the client.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.major().abs(), self.cents_part())
    }
}

impl Add for Money {
    type Output = Money;

    #[inline]
    fn add(self, other: Money) -> Money {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Money) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Money;

    #[inline]
    fn sub(self, other: Money) -> Money {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Money) {
        self.0 -= other.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

// =============================================================================
// Decimal JSON representation
// =============================================================================

/// Serde adapter for JSON payloads that carry amounts as decimal numbers
/// in major units (`"precioUnitario": 1000.5`).
///
/// ## Usage
/// ```rust,ignore
/// #[derive(Deserialize)]
/// struct Item {
///     #[serde(with = "manchas_core::money::decimal")]
///     precio_unitario: Money,
/// }
/// ```
pub mod decimal {
    use super::Money;
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;

    pub fn serialize<S: Serializer>(value: &Money, serializer: S) -> Result<S::Ok, S::Error> {
        if value.cents_part() == 0 {
            serializer.serialize_i64(value.major())
        } else {
            serializer.serialize_f64(value.cents() as f64 / 100.0)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Money, D::Error> {
        deserializer.deserialize_any(DecimalVisitor)
    }

    struct DecimalVisitor;

    impl<'de> Visitor<'de> for DecimalVisitor {
        type Value = Money;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a decimal amount")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Money, E> {
            v.checked_mul(100)
                .map(Money::from_cents)
                .ok_or_else(|| E::custom("amount out of range"))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Money, E> {
            i64::try_from(v)
                .map_err(|_| E::custom("amount out of range"))
                .and_then(|v| self.visit_i64(v))
        }

        // Shortest round-trip text of the float, so 1000.1 stays 1000.1
        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Money, E> {
            if !v.is_finite() {
                return Err(E::custom("amount must be finite"));
            }
            let text = format!("{}", v);
            Money::parse_decimal(&text).map_err(E::custom)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Money, E> {
            Money::parse_decimal(v).map_err(E::custom)
        }
    }
}

/// Same as [`decimal`] for optional fields.
pub mod decimal_opt {
    use super::Money;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Money>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(m) => super::decimal::serialize(m, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Money>, D::Error> {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::decimal")] Money);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(m)| m))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        let m = Money::from_cents(3_125_000);
        assert_eq!(m.cents(), 3_125_000);
        assert_eq!(m.major(), 31_250);
        assert_eq!(m.cents_part(), 0);
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(100_050).to_string(), "$1000.50");
        assert_eq!(Money::from_cents(-550).to_string(), "-$5.50");
        assert_eq!(Money::zero().to_string(), "$0.00");
    }

    #[test]
    fn test_arithmetic() {
        let a = Money::from_major(1000);
        let b = Money::from_cents(50);

        assert_eq!((a + b).cents(), 100_050);
        assert_eq!((a - b).cents(), 99_950);

        let mut c = a;
        c += b;
        c -= Money::from_cents(100_000);
        assert_eq!(c.cents(), 50);

        let total: Money = vec![a, a, a].into_iter().sum();
        assert_eq!(total, Money::from_major(3000));
    }

    #[test]
    fn test_checked_arithmetic() {
        let price = Money::from_major(25_000);
        assert_eq!(price.checked_multiply_quantity(4), Some(Money::from_major(100_000)));
        assert_eq!(price.checked_add(price), Some(Money::from_major(50_000)));

        let huge = Money::from_cents(9_000_000_000_000_000_000);
        assert_eq!(huge.checked_multiply_quantity(2), None);
        assert_eq!(huge.checked_add(huge), None);
        assert_eq!(Money::from_cents(i64::MIN).checked_multiply_quantity(-1), None);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!(Money::parse_decimal("1000").unwrap().cents(), 100_000);
        assert_eq!(Money::parse_decimal("1000.5").unwrap().cents(), 100_050);
        assert_eq!(Money::parse_decimal("1000.05").unwrap().cents(), 100_005);
        assert_eq!(Money::parse_decimal(".75").unwrap().cents(), 75);
        assert_eq!(Money::parse_decimal("-2.25").unwrap().cents(), -225);
        assert_eq!(Money::parse_decimal("0.125").unwrap().cents(), 13);
        assert_eq!(Money::parse_decimal("0.124").unwrap().cents(), 12);
    }

    #[test]
    fn test_parse_decimal_rejects_garbage() {
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal(".").is_err());
        assert!(Money::parse_decimal("1e3").is_err());
        assert!(Money::parse_decimal("12.3.4").is_err());
        assert!(Money::parse_decimal("abc").is_err());
    }

    #[test]
    fn test_scale_rounds_half_up() {
        // 25000.00 / 0.8 = 31250.00
        let cost = Money::from_major(25_000);
        assert_eq!(cost.scale(10_000, 8_000), Some(Money::from_major(31_250)));

        // 0.05 * 1/2 = 0.025 -> 0.03
        assert_eq!(Money::from_cents(5).scale(1, 2), Some(Money::from_cents(3)));
        assert_eq!(Money::from_cents(-5).scale(1, 2), Some(Money::from_cents(-3)));
        assert_eq!(Money::from_cents(5).scale(1, 0), None);
    }

    #[test]
    fn test_decimal_serde() {
        #[derive(Serialize, Deserialize)]
        struct Line {
            #[serde(with = "decimal")]
            price: Money,
        }

        let line: Line = serde_json::from_str(r#"{"price": 1000}"#).unwrap();
        assert_eq!(line.price.cents(), 100_000);

        let line: Line = serde_json::from_str(r#"{"price": 1000.1}"#).unwrap();
        assert_eq!(line.price.cents(), 100_010);

        let line: Line = serde_json::from_str(r#"{"price": "19.99"}"#).unwrap();
        assert_eq!(line.price.cents(), 1_999);

        let json = serde_json::to_string(&Line { price: Money::from_major(3000) }).unwrap();
        assert_eq!(json, r#"{"price":3000}"#);
    }
}
