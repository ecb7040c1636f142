//! # Validation Module
//!
//! Local input checks that run before any gateway call.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Register UI                                                  │
//! │  └── Format hints, immediate feedback                                  │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Adapter (THIS MODULE)                                        │
//! │  ├── Luhn + length, expiry, CVV, routing/account numbers               │
//! │  └── Fails fast: no wasted gateway call                                │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Gateway                                                      │
//! │  └── Authoritative accept/decline                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Error messages never echo card or account digits back.

use crate::error::ValidationError;
use crate::money::Money;
use crate::types::{BankAccount, CardDetails};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Largest single payment accepted ($999,999.99).
pub const MAX_PAYMENT_CENTS: i64 = 99_999_999;

fn card_error(reason: &str) -> ValidationError {
    ValidationError::InvalidCardFormat {
        reason: reason.to_string(),
    }
}

// =============================================================================
// Card Validators
// =============================================================================

/// Strips spaces and dashes the UI may leave in a keyed number.
fn card_digits(number: &str) -> String {
    number.chars().filter(|c| !matches!(c, ' ' | '-')).collect()
}

/// Validates a card number: 13–19 digits passing the Luhn check.
///
/// ```rust
/// use tender_core::validation::validate_card_number;
///
/// assert!(validate_card_number("4111 1111 1111 1111").is_ok());
/// assert!(validate_card_number("4111111111111112").is_err());
/// ```
pub fn validate_card_number(number: &str) -> ValidationResult<()> {
    let digits = card_digits(number);

    if !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(card_error("card number must contain only digits"));
    }
    if !(13..=19).contains(&digits.len()) {
        return Err(card_error("card number must be 13 to 19 digits"));
    }
    if !luhn_valid(&digits) {
        return Err(card_error("card number failed checksum"));
    }
    Ok(())
}

fn luhn_valid(digits: &str) -> bool {
    let sum: u32 = digits
        .chars()
        .rev()
        .filter_map(|c| c.to_digit(10))
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

/// Parses and validates an expiry in `MM/YY`, `MMYY` or `MM/YYYY` form.
///
/// Returns `(month, two-digit year)`.
pub fn validate_expiry(expiry: &str) -> ValidationResult<(u32, u32)> {
    let expiry = expiry.trim();
    let (month, year) = match expiry.split_once('/') {
        Some((m, y)) => (m, y),
        None if expiry.len() == 4 && expiry.is_ascii() => expiry.split_at(2),
        None => return Err(card_error("expiry must be MM/YY")),
    };

    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
    if month.len() != 2 || !all_digits(month) || !all_digits(year) {
        return Err(card_error("expiry must be MM/YY"));
    }

    let year = match year.len() {
        2 => year,
        4 => &year[2..],
        _ => return Err(card_error("expiry must be MM/YY")),
    };

    let month: u32 = month.parse().map_err(|_| card_error("expiry must be MM/YY"))?;
    let year: u32 = year.parse().map_err(|_| card_error("expiry must be MM/YY"))?;

    if !(1..=12).contains(&month) {
        return Err(card_error("expiry month must be 01 to 12"));
    }
    Ok((month, year))
}

/// CVV is 3 digits (4 for Amex).
pub fn validate_cvv(cvv: &str) -> ValidationResult<()> {
    let cvv = cvv.trim();
    if !(3..=4).contains(&cvv.len()) || !cvv.chars().all(|c| c.is_ascii_digit()) {
        return Err(card_error("CVV must be 3 or 4 digits"));
    }
    Ok(())
}

/// US ZIP: `12345` or `12345-6789`.
pub fn validate_zip(zip: &str) -> ValidationResult<()> {
    let zip = zip.trim();
    let ok = match zip.split_once('-') {
        Some((five, four)) => {
            five.len() == 5
                && four.len() == 4
                && five.chars().chain(four.chars()).all(|c| c.is_ascii_digit())
        }
        None => zip.len() == 5 && zip.chars().all(|c| c.is_ascii_digit()),
    };

    if ok {
        Ok(())
    } else {
        Err(ValidationError::InvalidFormat {
            field: "zip".to_string(),
            reason: "must be 5 digits or ZIP+4".to_string(),
        })
    }
}

/// All checks a keyed card must pass before the gateway sees it.
pub fn validate_card(card: &CardDetails) -> ValidationResult<()> {
    validate_card_number(&card.number)?;
    validate_expiry(&card.expiry)?;
    validate_cvv(&card.cvv)?;
    if let Some(zip) = card.zip.as_deref().filter(|z| !z.trim().is_empty()) {
        validate_zip(zip)?;
    }
    Ok(())
}

/// Best-effort brand from the leading digits, for receipts.
pub fn detect_card_brand(number: &str) -> Option<&'static str> {
    let digits = card_digits(number);
    let prefix2: u32 = digits.get(..2)?.parse().ok()?;
    let prefix4: u32 = digits.get(..4).and_then(|p| p.parse().ok()).unwrap_or(0);

    match prefix2 {
        34 | 37 => Some("AmericanExpress"),
        40..=49 => Some("Visa"),
        51..=55 => Some("MasterCard"),
        22..=27 if (2221..=2720).contains(&prefix4) => Some("MasterCard"),
        60 | 64 | 65 => Some("Discover"),
        35 => Some("JCB"),
        36 | 38 | 30 => Some("DinersClub"),
        _ => None,
    }
}

// =============================================================================
// Bank Account Validators
// =============================================================================

/// ABA routing number: exactly 9 digits.
pub fn validate_routing_number(routing: &str) -> ValidationResult<()> {
    let routing = routing.trim();
    if routing.len() != 9 || !routing.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "routing_number".to_string(),
            reason: "must be exactly 9 digits".to_string(),
        });
    }
    Ok(())
}

/// Account number: 4–17 digits.
pub fn validate_account_number(account: &str) -> ValidationResult<()> {
    let account = account.trim();
    if !(4..=17).contains(&account.len()) || !account.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "account_number".to_string(),
            reason: "must be 4 to 17 digits".to_string(),
        });
    }
    Ok(())
}

pub fn validate_bank_account(account: &BankAccount) -> ValidationResult<()> {
    validate_routing_number(&account.routing_number)?;
    validate_account_number(&account.account_number)?;
    if account.name_on_account.trim().is_empty() {
        return Err(ValidationError::Required {
            field: "name_on_account".to_string(),
        });
    }
    if account.name_on_account.len() > 22 {
        return Err(ValidationError::TooLong {
            field: "name_on_account".to_string(),
            max: 22,
        });
    }
    Ok(())
}

// =============================================================================
// Identifier & Amount Validators
// =============================================================================

/// Terminal serial / EPI must be present before a push is attempted.
pub fn validate_device_id(device_id: &str) -> ValidationResult<()> {
    let device_id = device_id.trim();
    if device_id.is_empty() {
        return Err(ValidationError::Required {
            field: "device_id".to_string(),
        });
    }
    if device_id.len() > 64 {
        return Err(ValidationError::TooLong {
            field: "device_id".to_string(),
            max: 64,
        });
    }
    Ok(())
}

/// Invoice numbers are keyed on a terminal keypad: digits only, 4–20 long.
pub fn validate_invoice_number(invoice: &str) -> ValidationResult<()> {
    if !(4..=20).contains(&invoice.len()) || !invoice.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::InvalidFormat {
            field: "invoice_number".to_string(),
            reason: "must be 4 to 20 digits".to_string(),
        });
    }
    Ok(())
}

/// Validates an amount to be charged.
///
/// ```rust
/// use tender_core::money::Money;
/// use tender_core::validation::validate_payment_amount;
///
/// assert!(validate_payment_amount(Money::from_cents(1000)).is_ok());
/// assert!(validate_payment_amount(Money::zero()).is_err());
/// ```
pub fn validate_payment_amount(amount: Money) -> ValidationResult<()> {
    if !amount.is_positive() {
        return Err(ValidationError::MustBePositive {
            field: "amount".to_string(),
        });
    }
    if amount.cents() > MAX_PAYMENT_CENTS {
        return Err(ValidationError::OutOfRange {
            field: "amount".to_string(),
            min: 1,
            max: MAX_PAYMENT_CENTS,
        });
    }
    Ok(())
}

/// Validates a tax rate in basis points (0–100%).
pub fn validate_tax_rate_bps(bps: u32) -> ValidationResult<()> {
    if bps > 10_000 {
        return Err(ValidationError::OutOfRange {
            field: "tax_rate_bps".to_string(),
            min: 0,
            max: 10_000,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================
