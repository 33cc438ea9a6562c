use super::{extract_tracking_id, AdapterError};
use reqwest::{Response, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde_json::Value;

/// Whole taka, for providers that take integer amounts.
pub(super) fn whole_amount(amount: Decimal) -> i64 {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

pub(super) fn decimal_number(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Reads a JSON body, turning non-2xx statuses into [`AdapterError::Status`].
pub(super) async fn read_json(response: Response) -> Result<Value, AdapterError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(status_error(status, &body));
    }
    serde_json::from_str(&body).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
}

pub(super) fn status_error(status: StatusCode, body: &str) -> AdapterError {
    let body = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| provider_message(&v))
        .unwrap_or_else(|| truncate(body, 200));
    AdapterError::Status {
        status: status.as_u16(),
        body,
    }
}

/// The human-readable message a provider put in its response, if any.
pub(super) fn provider_message(value: &Value) -> Option<String> {
    ["message", "error_message", "errors", "error", "response_message"]
        .iter()
        .filter_map(|key| value.get(*key))
        .find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Object(_) | Value::Array(_) => Some(v.to_string()),
            _ => None,
        })
}

/// Pulls the tracking id out of a successful response, or reports what the
/// provider said instead.
pub(super) fn require_tracking(body: &Value) -> Result<String, AdapterError> {
    extract_tracking_id(body).ok_or_else(|| {
        AdapterError::Rejected(
            provider_message(body).unwrap_or_else(|| "no tracking id in response".to_string()),
        )
    })
}

fn truncate(body: &str, max: usize) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}
