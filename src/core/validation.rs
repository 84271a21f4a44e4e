//! Amount parsing and the pledge, deposit, withdrawal and loan request rules.
//!
//! Everything here is pure: the functions take the raw text the user typed plus
//! whatever balance or minimum applies, and either return the amount in cents or
//! the reason it was rejected. Nothing here touches the store or the gateway, so
//! a rejected amount never produces a network call.

use crate::errors::ValidationError;

const CENTS_PER_UNIT: i64 = 100;

/// Parses decimal text such as `"25"`, `"12.5"` or `"$40.00"` into cents.
///
/// Up to two fractional digits are accepted. Blank, non-numeric, `NaN`,
/// `inf` and exponent forms are rejected rather than coerced to zero. The sign
/// is preserved so callers can report negative input as
/// [`ValidationError::NotPositive`].
pub fn parse_amount(input: &str) -> Result<i64, ValidationError> {
    let not_a_number = || ValidationError::NotANumber {
        input: input.to_string(),
    };

    let trimmed = input.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = unsigned.strip_prefix('$').unwrap_or(unsigned);

    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
    if whole.is_empty() && fraction.is_empty() {
        return Err(not_a_number());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(not_a_number());
    }
    if fraction.len() > 2 {
        return Err(ValidationError::TooPrecise {
            input: input.to_string(),
        });
    }

    let whole_units: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| not_a_number())?
    };
    let fraction_cents: i64 = match fraction.len() {
        0 => 0,
        1 => fraction.parse::<i64>().map_err(|_| not_a_number())? * 10,
        _ => fraction.parse().map_err(|_| not_a_number())?,
    };

    let cents = whole_units
        .checked_mul(CENTS_PER_UNIT)
        .and_then(|c| c.checked_add(fraction_cents))
        .ok_or_else(not_a_number)?;

    Ok(if negative { -cents } else { cents })
}

/// Formats cents as a dollar string, e.g. `4050` → `"$40.50"`.
#[must_use]
pub fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.unsigned_abs();
    format!("{sign}${}.{:02}", abs / 100, abs % 100)
}

fn positive(input: &str) -> Result<i64, ValidationError> {
    let amount = parse_amount(input)?;
    if amount <= 0 {
        return Err(ValidationError::NotPositive);
    }
    Ok(amount)
}

fn whole_units(amount: i64) -> Result<i64, ValidationError> {
    if amount % CENTS_PER_UNIT == 0 {
        Ok(amount)
    } else {
        Err(ValidationError::NotWholeUnits)
    }
}

fn within_balance(amount: i64, balance: i64) -> Result<i64, ValidationError> {
    if amount > balance {
        return Err(ValidationError::InsufficientFunds {
            available: balance,
            requested: amount,
        });
    }
    Ok(amount)
}

/// Validates a pledge: positive whole dollars, at least `min_pledge`, and no
/// more than the lender's current wallet balance.
pub fn validate_pledge(input: &str, balance: i64, min_pledge: i64) -> Result<i64, ValidationError> {
    let amount = whole_units(positive(input)?)?;
    if amount < min_pledge {
        return Err(ValidationError::BelowMinimum {
            minimum: min_pledge,
            amount,
        });
    }
    within_balance(amount, balance)
}

/// Validates a deposit: any positive amount.
pub fn validate_deposit(input: &str) -> Result<i64, ValidationError> {
    positive(input)
}

/// Validates a withdrawal: positive and no more than the current balance.
pub fn validate_withdrawal(input: &str, balance: i64) -> Result<i64, ValidationError> {
    within_balance(positive(input)?, balance)
}

/// Validates a borrower's loan request: positive whole dollars, at least `min_request`.
pub fn validate_loan_request(input: &str, min_request: i64) -> Result<i64, ValidationError> {
    let amount = whole_units(positive(input)?)?;
    if amount < min_request {
        return Err(ValidationError::BelowMinimum {
            minimum: min_request,
            amount,
        });
    }
    Ok(amount)
}

/// Rejects blank required text fields.
pub fn require_field(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::MissingField { field })
    } else {
        Ok(())
    }
}
