//! Small helpers shared by checkout, fraud checks and the courier adapters.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rand::distributions::Alphanumeric;
use rand::Rng;
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

/// Bangladeshi mobile number, optionally prefixed with the country code.
static MOBILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\+?88)?01[3-9]\d{8}$").expect("mobile number pattern is valid")
});

/// Normalizes a mobile number to its 11-digit national form (`01XXXXXXXXX`).
///
/// Spaces and dashes are ignored. Returns `None` when the input is not a valid
/// mobile number.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    if !MOBILE_RE.is_match(&compact) {
        return None;
    }
    let national = &compact[compact.len() - 11..];
    Some(national.to_string())
}

/// `01XXXXXXXXX` -> `+8801XXXXXXXXX`
pub fn international_phone(national: &str) -> String {
    format!("+88{}", national)
}

/// Generates a human readable order number such as `ORD-240615-7KQ2ZD`.
pub fn generate_order_number(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(6)
        .map(|b| (b as char).to_ascii_uppercase())
        .collect();
    format!("ORD-{}-{}", now.format("%y%m%d"), suffix)
}

/// Rounds a money amount to two decimal places, half away from zero.
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
