//! # Fee/Tax Calculator
//!
//! Computes subtotal, tax, card surcharge and total for one payment.
//!
//! ```text
//!   subtotal  = Σ line.price × uom multiplier × quantity
//!   tax       = exempt ? 0 : round½↑(subtotal × rate)
//!   surcharge = card ? round½↑((subtotal + tax) × 3%) : 0
//!   total     = subtotal + tax + surcharge
//! ```
//!
//! Surcharge rounds at the point it is computed, on the tax-inclusive
//! amount, which is what the card-network disclosure shows. The calculator
//! holds only its configured surcharge rate, so identical inputs always
//! give identical outputs.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{LineItem, PaymentMethod, TaxRate};
use crate::DEFAULT_SURCHARGE_BPS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeInput {
    pub subtotal: Money,
    pub tax_rate: TaxRate,
    pub tax_exempt: bool,
    pub method: PaymentMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct FeeBreakdown {
    pub subtotal: Money,
    pub tax: Money,
    pub surcharge: Money,
    pub total: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeCalculator {
    surcharge_bps: u32,
}

impl Default for FeeCalculator {
    fn default() -> Self {
        FeeCalculator {
            surcharge_bps: DEFAULT_SURCHARGE_BPS,
        }
    }
}

impl FeeCalculator {
    pub const fn new(surcharge_bps: u32) -> Self {
        FeeCalculator { surcharge_bps }
    }

    pub const fn surcharge_bps(&self) -> u32 {
        self.surcharge_bps
    }

    /// Sums line totals. Each line rounds once, then lines add exactly.
    pub fn subtotal(lines: &[LineItem]) -> Money {
        lines.iter().map(LineItem::line_total).sum()
    }

    pub fn calculate(&self, input: &FeeInput) -> FeeBreakdown {
        let subtotal = input.subtotal;
        let tax = if input.tax_exempt {
            Money::zero()
        } else {
            subtotal.calculate_tax(input.tax_rate)
        };
        let surcharge = self.surcharge_for(input.method, subtotal + tax);

        FeeBreakdown {
            subtotal,
            tax,
            surcharge,
            total: subtotal + tax + surcharge,
        }
    }

    /// Surcharge on an already tax-inclusive amount.
    ///
    /// Bulk charges call this per document so each transaction carries
    /// its own surcharge.
    pub fn surcharge_for(&self, method: PaymentMethod, amount: Money) -> Money {
        if method.is_card() {
            amount.percentage_bps(self.surcharge_bps)
        } else {
            Money::zero()
        }
    }
}
