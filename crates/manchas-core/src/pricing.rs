//! # Purchase Pricing
//!
//! Derives a product's sell price from the unit cost of a purchase line.
//!
//! ## Margin Modes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  unit cost 25000.00, margin 20%                                         │
//! │                                                                         │
//! │  OnPrice (default): cost / (1 - m)   = 25000 / 0.80 = 31250.00         │
//! │                     margin is a share of the SELL price                 │
//! │                                                                         │
//! │  OnCost:            cost * (1 + m)   = 25000 * 1.20 = 30000.00         │
//! │                     margin is a markup over the COST                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both are computed in basis points with i128 intermediates and rounded
//! half-up to the cent.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::money::Money;

/// 100% expressed in basis points.
const FULL_BPS: i64 = 10_000;

// =============================================================================
// Margin Rate
// =============================================================================

/// Margin in basis points (2000 = 20%).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct MarginRate(i64);

impl MarginRate {
    /// Creates a margin from basis points, rejecting values outside [0, 100%).
    pub fn from_bps(bps: i64) -> CoreResult<Self> {
        if !(0..FULL_BPS).contains(&bps) {
            return Err(CoreError::InvalidMargin { bps });
        }
        Ok(MarginRate(bps))
    }

    /// Parses a percentage with up to two decimals, e.g. `"20"` or `"12.5"`.
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::pricing::MarginRate;
    ///
    /// assert_eq!(MarginRate::parse_percent("12.5").unwrap().bps(), 1250);
    /// assert!(MarginRate::parse_percent("100").is_err());
    /// ```
    pub fn parse_percent(input: &str) -> CoreResult<Self> {
        Self::from_bps(percent_to_bps(input)?)
    }

    #[inline]
    pub const fn bps(&self) -> i64 {
        self.0
    }
}

/// Basis points of a decimal percentage text, without range checks.
///
/// `"12.5"` is 1250. Exponents and more than one separator are rejected.
pub fn percent_to_bps(input: &str) -> CoreResult<i64> {
    // Percent with two decimals has the same scale as money cents
    let invalid = |_| ValidationError::InvalidFormat {
        field: "margin".to_string(),
        reason: format!("'{}' is not a percentage", input.trim()),
    };
    Ok(Money::parse_decimal(input).map_err(invalid)?.cents())
}

/// Margin a purchase line reprices with.
///
/// Negative margins are rejected. A margin of 100% or more cannot produce a
/// price, so the line keeps the product's current sell price (`None`).
pub fn purchase_margin(bps: Option<i64>) -> CoreResult<Option<MarginRate>> {
    match bps {
        None => Ok(None),
        Some(bps) if bps < 0 => Err(CoreError::InvalidMargin { bps }),
        Some(bps) if bps >= FULL_BPS => Ok(None),
        Some(bps) => MarginRate::from_bps(bps).map(Some),
    }
}

// =============================================================================
// Margin Mode
// =============================================================================

/// How a margin percentage turns a cost into a sell price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum MarginMode {
    /// `cost / (1 - m)`: margin as a share of the sell price.
    #[default]
    OnPrice,
    /// `cost * (1 + m)`: markup over cost.
    OnCost,
}

impl std::str::FromStr for MarginMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "on_price" | "price" => Ok(MarginMode::OnPrice),
            "on_cost" | "cost" | "markup" => Ok(MarginMode::OnCost),
            other => Err(format!(
                "Unknown margin mode: '{}'. Valid options: on_price, on_cost",
                other
            )),
        }
    }
}

impl MarginMode {
    /// Sell price for `unit_cost` at `margin`.
    ///
    /// ## Example
    /// ```rust
    /// use manchas_core::money::Money;
    /// use manchas_core::pricing::{MarginMode, MarginRate};
    ///
    /// let cost = Money::from_major(25_000);
    /// let margin = MarginRate::from_bps(2000).unwrap();
    ///
    /// assert_eq!(MarginMode::OnPrice.sell_price(cost, margin).unwrap(), Money::from_major(31_250));
    /// assert_eq!(MarginMode::OnCost.sell_price(cost, margin).unwrap(), Money::from_major(30_000));
    /// ```
    pub fn sell_price(&self, unit_cost: Money, margin: MarginRate) -> CoreResult<Money> {
        let scaled = match self {
            MarginMode::OnPrice => unit_cost.scale(FULL_BPS, FULL_BPS - margin.bps()),
            MarginMode::OnCost => unit_cost.scale(FULL_BPS + margin.bps(), FULL_BPS),
        };
        scaled.ok_or(CoreError::InvalidMargin { bps: margin.bps() })
    }
}

/// Sell price for a purchase line: computed from the margin when one is
/// given, otherwise the product keeps `current_sell_price`.
pub fn line_sell_price(
    mode: MarginMode,
    unit_cost: Money,
    margin: Option<MarginRate>,
    current_sell_price: Money,
) -> CoreResult<Money> {
    match margin {
        Some(m) => mode.sell_price(unit_cost, m),
        None => Ok(current_sell_price),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
