//! # Money Module
//!
//! Provides the `Money` type for handling monetary values safely.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  THE FLOATING POINT PROBLEM                                             │
//! │                                                                         │
//! │    0.1 + 0.2 = 0.30000000000000004  ❌                                  │
//! │                                                                         │
//! │  Persisted amounts, gateway amounts and surcharge disclosures must     │
//! │  agree to the cent, so every amount is an i64 count of cents.          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rounding
//! Percentages (tax, surcharge) round **half up** to the cent at the point
//! of computation. This matches the surcharge disclosure the card networks
//! expect to see on the receipt.
//!
//! ## Usage
//! ```rust
//! use tender_core::money::Money;
//!
//! let price = Money::from_cents(1099); // $10.99
//! let doubled = price * 2;             // $21.98
//! assert_eq!(doubled.to_decimal_string(), "21.98");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Mul, Sub, SubAssign};
use std::str::FromStr;
use ts_rs::TS;

use crate::error::ValidationError;
use crate::types::TaxRate;

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents for USD).
///
/// Single-currency: the store's currency is implicit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    ///
    /// ```rust
    /// use tender_core::money::Money;
    ///
    /// let price = Money::from_cents(1099);
    /// assert_eq!(price.cents(), 1099);
    /// ```
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Creates a Money value from dollars and cents.
    ///
    /// For negative amounts only the major unit carries the sign:
    /// `from_major_minor(-5, 50)` is -$5.50.
    #[inline]
    pub const fn from_major_minor(major: i64, minor: i64) -> Self {
        if major < 0 {
            Money(major * 100 - minor)
        } else {
            Money(major * 100 + minor)
        }
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns the dollars portion.
    #[inline]
    pub const fn dollars(&self) -> i64 {
        self.0 / 100
    }

    /// Returns the cents portion (always 0-99).
    #[inline]
    pub const fn cents_part(&self) -> i64 {
        (self.0 % 100).abs()
    }

    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    #[inline]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn is_positive(&self) -> bool {
        self.0 > 0
    }

    #[inline]
    pub const fn is_negative(&self) -> bool {
        self.0 < 0
    }

    #[inline]
    pub const fn abs(&self) -> Self {
        Money(self.0.abs())
    }

    /// Returns `bps` basis points of this amount, rounded half up to the cent.
    ///
    /// Half up means away from zero for negative amounts, so a refund's
    /// surcharge mirrors the sale's surcharge exactly.
    ///
    /// ```rust
    /// use tender_core::money::Money;
    ///
    /// // $107.50 × 3% = $3.225 → $3.23
    /// assert_eq!(Money::from_cents(10_750).percentage_bps(300).cents(), 323);
    /// ```
    pub fn percentage_bps(&self, bps: u32) -> Money {
        let product = self.0 as i128 * bps as i128;
        let rounded = if product >= 0 {
            (product + 5_000) / 10_000
        } else {
            (product - 5_000) / 10_000
        };
        Money(rounded as i64)
    }

    /// Calculates tax at the given rate, rounded half up.
    ///
    /// ```rust
    /// use tender_core::money::Money;
    /// use tender_core::types::TaxRate;
    ///
    /// let tax = Money::from_cents(1000).calculate_tax(TaxRate::from_bps(825));
    /// assert_eq!(tax.cents(), 83); // $0.825 → $0.83
    /// ```
    #[inline]
    pub fn calculate_tax(&self, rate: TaxRate) -> Money {
        self.percentage_bps(rate.bps())
    }

    /// Multiplies by a whole quantity.
    #[inline]
    pub const fn multiply_quantity(&self, qty: i64) -> Self {
        Money(self.0 * qty)
    }

    /// Multiplies by a quantity expressed in thousandths, rounding half up.
    ///
    /// Used for weighed goods and unit-of-measure multipliers
    /// (2.5 lb = 2500 milli-units).
    pub fn multiply_milli(&self, milli: i64) -> Self {
        let product = self.0 as i128 * milli as i128;
        let rounded = if product >= 0 {
            (product + 500) / 1_000
        } else {
            (product - 500) / 1_000
        };
        Money(rounded as i64)
    }

    /// Formats as a plain decimal string for gateway payloads ("110.73").
    pub fn to_decimal_string(&self) -> String {
        let sign = if self.0 < 0 { "-" } else { "" };
        format!("{}{}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

// =============================================================================
// Trait Implementations
// =============================================================================

/// Debug-friendly display ("$10.99"). The UI formats for locale.
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{}${}.{:02}", sign, self.dollars().abs(), self.cents_part())
    }
}

/// Parses a decimal amount as returned by gateways ("110.73", "5", "5.5").
impl FromStr for Money {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ValidationError::InvalidFormat {
            field: "amount".to_string(),
            reason: format!("'{}' is not a decimal amount", s),
        };

        let s = s.trim();
        let (negative, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };

        let (major, minor) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major.is_empty() || !major.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        if minor.len() > 2 || !minor.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let major: i64 = major.parse().map_err(|_| invalid())?;
        let minor: i64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => minor.parse().map_err(|_| invalid())?,
        };

        let cents = major * 100 + minor;
        Ok(Money(if negative { -cents } else { cents }))
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl Add for Money {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Money(self.0 + other.0)
    }
}

impl AddAssign for Money {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.0 += other.0;
    }
}

impl Sub for Money {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Money(self.0 - other.0)
    }
}

impl SubAssign for Money {
    #[inline]
    fn sub_assign(&mut self, other: Self) {
        self.0 -= other.0;
    }
}

impl Mul<i64> for Money {
    type Output = Self;

    #[inline]
    fn mul(self, qty: i64) -> Self {
        Money(self.0 * qty)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), Add::add)
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
        let money = Money::from_cents(1099);
        assert_eq!(money.cents(), 1099);
        assert_eq!(money.dollars(), 10);
        assert_eq!(money.cents_part(), 99);
    }

    #[test]
    fn test_display_and_decimal_string() {
        assert_eq!(format!("{}", Money::from_cents(1099)), "$10.99");
        assert_eq!(format!("{}", Money::from_cents(-550)), "-$5.50");
        assert_eq!(Money::from_cents(11_073).to_decimal_string(), "110.73");
        assert_eq!(Money::from_cents(5).to_decimal_string(), "0.05");
    }

    #[test]
    fn test_percentage_rounds_half_up() {
        // 107.50 × 3% = 3.225 → 3.23
        assert_eq!(Money::from_cents(10_750).percentage_bps(300).cents(), 323);
        // 0.50 × 1% = 0.005 → 0.01
        assert_eq!(Money::from_cents(50).percentage_bps(100).cents(), 1);
        // 0.49 × 1% = 0.0049 → 0.00
        assert_eq!(Money::from_cents(49).percentage_bps(100).cents(), 0);
        // negative mirrors positive
        assert_eq!(Money::from_cents(-10_750).percentage_bps(300).cents(), -323);
    }

    #[test]
    fn test_multiply_milli() {
        // $3.99/lb × 2.5 lb = $9.975 → $9.98
        assert_eq!(Money::from_cents(399).multiply_milli(2_500).cents(), 998);
        assert_eq!(Money::from_cents(399).multiply_milli(1_000).cents(), 399);
    }

    #[test]
    fn test_parse_decimal() {
        assert_eq!("110.73".parse::<Money>().unwrap().cents(), 11_073);
        assert_eq!("5".parse::<Money>().unwrap().cents(), 500);
        assert_eq!("5.5".parse::<Money>().unwrap().cents(), 550);
        assert_eq!("-1.25".parse::<Money>().unwrap().cents(), -125);
        assert!("1.234".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
        assert!("".parse::<Money>().is_err());
    }

    #[test]
    fn test_sum() {
        let total: Money = [100, 250, 5].into_iter().map(Money::from_cents).sum();
        assert_eq!(total.cents(), 355);
    }
}
