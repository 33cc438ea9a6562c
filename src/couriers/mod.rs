//! Courier adapter layer.
//!
//! Each delivery company gets one adapter that maps the canonical
//! [`DispatchRequest`] onto its own REST payload and reads a tracking id back.
//! Adapters never let an error escape [`CourierAdapter::dispatch`]; failures
//! come back as an unsuccessful [`DispatchResult`].

pub mod carrybee;
pub mod ecourier;
mod http;
pub mod paperfly;
pub mod pathao;
pub mod redx;
pub mod steadfast;
pub mod token_cache;

use crate::entities::{courier_provider, ProviderType};
use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

pub use token_cache::{FetchedToken, TokenCache};

/// Canonical parcel description handed to every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub order_id: Uuid,
    pub order_number: String,
    pub recipient_name: String,
    /// National format, `01XXXXXXXXX`
    pub phone: String,
    pub address_line: String,
    pub division: Option<String>,
    pub district: String,
    pub thana: Option<String>,
    /// Zero unless the order is cash on delivery
    pub cash_to_collect: Decimal,
    pub weight_kg: Decimal,
    pub declared_value: Decimal,
    pub item_count: i32,
    pub note: Option<String>,
}

impl DispatchRequest {
    /// `line, thana, district, division`, skipping empty parts.
    pub fn full_address(&self) -> String {
        [
            Some(self.address_line.as_str()),
            self.thana.as_deref(),
            Some(self.district.as_str()),
            self.division.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
    }

    /// Weight in whole grams, at least one.
    pub fn weight_grams(&self) -> i64 {
        use rust_decimal::prelude::ToPrimitive;
        (self.weight_kg * Decimal::from(1000))
            .round()
            .to_i64()
            .unwrap_or(0)
            .max(1)
    }
}

/// Outcome of dispatching one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub order_id: Uuid,
    pub order_number: String,
    pub success: bool,
    pub tracking_id: Option<String>,
    pub error: Option<String>,
}

impl DispatchResult {
    pub fn succeeded(order_id: Uuid, order_number: impl Into<String>, tracking_id: String) -> Self {
        Self {
            order_id,
            order_number: order_number.into(),
            success: true,
            tracking_id: Some(tracking_id),
            error: None,
        }
    }

    pub fn failed(
        order_id: Uuid,
        order_number: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            order_number: order_number.into(),
            success: false,
            tracking_id: None,
            error: Some(error.into()),
        }
    }
}

/// Result of one bulk create call, keyed by order number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkDispatch {
    /// Tracking id per order, when the provider reports them individually
    pub tracking_ids: HashMap<String, String>,
    /// Batch-wide tracking id, used for orders without their own
    pub shared_tracking_id: Option<String>,
    /// Orders the provider rejected inside an otherwise accepted batch
    pub rejected: HashMap<String, String>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Courier request timed out")]
    Timeout,
    #[error("Courier request failed: {0}")]
    Http(String),
    #[error("Courier returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Courier rejected the parcel: {0}")]
    Rejected(String),
    #[error("Unexpected courier response: {0}")]
    InvalidResponse(String),
    #[error("Courier authentication failed: {0}")]
    Auth(String),
    #[error("Courier configuration error: {0}")]
    Config(String),
    #[error("Operation not supported by {0}")]
    Unsupported(ProviderType),
    #[error("Invalid tracking id '{0}'")]
    InvalidTrackingId(String),
}

impl From<reqwest::Error> for AdapterError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AdapterError::Timeout
        } else {
            AdapterError::Http(err.to_string())
        }
    }
}

#[async_trait]
pub trait CourierAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Books one parcel and returns the provider's tracking id.
    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError>;

    fn supports_bulk(&self) -> bool {
        false
    }

    async fn dispatch_bulk(
        &self,
        _requests: &[DispatchRequest],
    ) -> Result<BulkDispatch, AdapterError> {
        Err(AdapterError::Unsupported(self.provider_type()))
    }

    /// Current delivery status for a tracking id, in the provider's wording.
    async fn track(&self, _tracking_id: &str) -> Result<String, AdapterError> {
        Err(AdapterError::Unsupported(self.provider_type()))
    }

    async fn dispatch(&self, request: &DispatchRequest) -> DispatchResult {
        match self.create_parcel(request).await {
            Ok(tracking_id) => {
                DispatchResult::succeeded(request.order_id, &request.order_number, tracking_id)
            }
            Err(e) => {
                tracing::warn!(
                    order_id = %request.order_id,
                    provider = %self.provider_type(),
                    "Parcel creation failed: {}", e
                );
                DispatchResult::failed(request.order_id, &request.order_number, e.to_string())
            }
        }
    }
}

const TRACKING_KEYS: [&str; 5] = [
    "consignment_id",
    "tracking_code",
    "tracking_id",
    "tracking_number",
    "ID",
];
const NESTING_KEYS: [&str; 4] = ["data", "consignment", "success", "order"];

/// Finds a tracking id in a provider response.
///
/// Checks the known id keys level by level, descending only through the known
/// wrapper keys. Numeric ids are returned as strings.
pub fn extract_tracking_id(value: &Value) -> Option<String> {
    let mut queue = VecDeque::from([value]);
    while let Some(current) = queue.pop_front() {
        match current {
            Value::Object(map) => {
                for key in TRACKING_KEYS {
                    if let Some(id) = map.get(key).and_then(scalar_id) {
                        return Some(id);
                    }
                }
                for key in NESTING_KEYS {
                    if let Some(nested) = map.get(key) {
                        queue.push_back(nested);
                    }
                }
            }
            Value::Array(items) => queue.extend(items.iter().take(1)),
            _ => {}
        }
    }
    None
}

fn scalar_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Checks a tracking id before it is placed in a courier URL path.
///
/// Ids are ASCII letters, digits, `-` and `_`, at most 64 characters.
pub(crate) fn tracking_path_segment(tracking_id: &str) -> Result<&str, AdapterError> {
    let id = tracking_id.trim();
    let valid = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(AdapterError::InvalidTrackingId(tracking_id.to_string()))
    }
}

/// Builds adapters for configured providers.
///
/// Holds the shared HTTP client and one token cache per provider id for the
/// life of the process.
pub struct CourierRegistry {
    client: reqwest::Client,
    token_caches: DashMap<Uuid, Arc<TokenCache>>,
}

impl CourierRegistry {
    pub fn new(timeout: Duration) -> Result<Self, AdapterError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            token_caches: DashMap::new(),
        }
    }

    pub fn adapter_for(
        &self,
        provider: &courier_provider::Model,
    ) -> Result<Arc<dyn CourierAdapter>, AdapterError> {
        let client = self.client.clone();
        let adapter: Arc<dyn CourierAdapter> = match provider.provider_type {
            ProviderType::Pathao => Arc::new(pathao::PathaoAdapter::new(
                client,
                parse_config(provider)?,
                self.token_cache(provider.id),
            )),
            ProviderType::Steadfast => {
                Arc::new(steadfast::SteadfastAdapter::new(client, parse_config(provider)?))
            }
            ProviderType::Redx => Arc::new(redx::RedxAdapter::new(client, parse_config(provider)?)),
            ProviderType::Paperfly => {
                Arc::new(paperfly::PaperflyAdapter::new(client, parse_config(provider)?))
            }
            ProviderType::Ecourier => {
                Arc::new(ecourier::EcourierAdapter::new(client, parse_config(provider)?))
            }
            ProviderType::Carrybee => {
                Arc::new(carrybee::CarrybeeAdapter::new(client, parse_config(provider)?))
            }
        };
        Ok(adapter)
    }

    fn token_cache(&self, provider_id: Uuid) -> Arc<TokenCache> {
        self.token_caches
            .entry(provider_id)
            .or_insert_with(|| Arc::new(TokenCache::new()))
            .clone()
    }
}

fn parse_config<T: DeserializeOwned>(provider: &courier_provider::Model) -> Result<T, AdapterError> {
    serde_json::from_value(provider.config.clone())
        .map_err(|e| AdapterError::Config(format!("{}: {}", provider.name, e)))
}

/// Picks the override URL, else the sandbox or production default.
pub(crate) fn base_url(
    configured: Option<&str>,
    sandbox: bool,
    sandbox_url: &str,
    production_url: &str,
) -> String {
    let url = match configured {
        Some(url) if !url.trim().is_empty() => url.trim(),
        _ if sandbox => sandbox_url,
        _ => production_url,
    };
    url.trim_end_matches('/').to_string()
}
