//! Pathao merchant API. Bearer-token auth; city and zone ids come from
//! its location hierarchy.

use super::http::{decimal_number, read_json, require_tracking, status_error, whole_amount};
use super::{
    base_url, tracking_path_segment, AdapterError, CourierAdapter, DispatchRequest, FetchedToken,
    TokenCache,
};
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const SANDBOX_URL: &str = "https://courier-api-sandbox.pathao.com";
const PRODUCTION_URL: &str = "https://api-hermes.pathao.com";
/// Normal delivery
const DELIVERY_TYPE: u32 = 48;
/// Parcel
const ITEM_TYPE: u32 = 2;

#[derive(Debug, Clone, Deserialize)]
pub struct PathaoConfig {
    pub client_id: String,
    pub client_secret: String,
    pub username: String,
    pub password: String,
    pub store_id: i64,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_token_lifetime")]
    expires_in: u64,
}

fn default_token_lifetime() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct City {
    city_id: i64,
    city_name: String,
}

#[derive(Debug, Deserialize)]
struct Zone {
    zone_id: i64,
    zone_name: String,
}

pub struct PathaoAdapter {
    client: Client,
    config: PathaoConfig,
    base_url: String,
    tokens: Arc<TokenCache>,
}

impl PathaoAdapter {
    pub fn new(client: Client, config: PathaoConfig, tokens: Arc<TokenCache>) -> Self {
        let base_url = base_url(
            config.base_url.as_deref(),
            config.sandbox,
            SANDBOX_URL,
            PRODUCTION_URL,
        );
        Self {
            client,
            config,
            base_url,
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/aladdin/api/v1/{}", self.base_url, path)
    }

    async fn issue_token(&self) -> Result<FetchedToken, AdapterError> {
        debug!("Requesting Pathao access token");
        let response = self
            .client
            .post(self.url("issue-token"))
            .json(&json!({
                "client_id": self.config.client_id,
                "client_secret": self.config.client_secret,
                "username": self.config.username,
                "password": self.config.password,
                "grant_type": "password",
            }))
            .send()
            .await?;
        let body = read_json(response).await.map_err(|e| match e {
            AdapterError::Status { status, body } if status == 400 || status == 401 => {
                AdapterError::Auth(body)
            }
            other => other,
        })?;
        let token: TokenResponse = serde_json::from_value(body)
            .map_err(|e| AdapterError::Auth(format!("malformed token response: {}", e)))?;
        Ok(FetchedToken {
            token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }

    /// Sends an authorized request, refreshing the token and retrying once
    /// when the provider answers 401.
    async fn send_authorized<F>(&self, build: F) -> Result<Value, AdapterError>
    where
        F: Fn(&str) -> RequestBuilder,
    {
        let token = self.tokens.get_or_refresh(|| self.issue_token()).await?;
        let response = build(&token).send().await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return read_json(response).await;
        }

        debug!("Pathao rejected the cached token, refreshing");
        self.tokens.invalidate(&token).await;
        let token = self.tokens.get_or_refresh(|| self.issue_token()).await?;
        let retry: Response = build(&token).send().await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            let body = retry.text().await.unwrap_or_default();
            return Err(AdapterError::Auth(
                status_error(StatusCode::UNAUTHORIZED, &body).to_string(),
            ));
        }
        read_json(retry).await
    }

    async fn get(&self, path: &str) -> Result<Value, AdapterError> {
        let url = self.url(path);
        self.send_authorized(|token| self.client.get(&url).bearer_auth(token))
            .await
    }

    async fn resolve_city(&self, district: &str) -> Result<i64, AdapterError> {
        let body = self.get("city-list").await?;
        let cities: Vec<City> = list_items(body)?;
        cities
            .into_iter()
            .find(|c| names_match(&c.city_name, district))
            .map(|c| c.city_id)
            .ok_or_else(|| AdapterError::Rejected(format!("Pathao does not serve {}", district)))
    }

    /// Matches the thana against the city's zones, falling back to the
    /// first zone listed.
    async fn resolve_zone(&self, city_id: i64, thana: Option<&str>) -> Result<i64, AdapterError> {
        let body = self.get(&format!("cities/{}/zone-list", city_id)).await?;
        let zones: Vec<Zone> = list_items(body)?;
        let matched = thana.and_then(|t| zones.iter().find(|z| names_match(&z.zone_name, t)));
        matched
            .or_else(|| zones.first())
            .map(|z| z.zone_id)
            .ok_or_else(|| AdapterError::Rejected(format!("no Pathao zones for city {}", city_id)))
    }

    fn order_payload(&self, request: &DispatchRequest, city_id: i64, zone_id: i64) -> Value {
        json!({
            "store_id": self.config.store_id,
            "merchant_order_id": request.order_number,
            "recipient_name": request.recipient_name,
            "recipient_phone": request.phone,
            "recipient_address": request.full_address(),
            "recipient_city": city_id,
            "recipient_zone": zone_id,
            "delivery_type": DELIVERY_TYPE,
            "item_type": ITEM_TYPE,
            "special_instruction": request.note.clone().unwrap_or_default(),
            "item_quantity": request.item_count,
            "item_weight": decimal_number(request.weight_kg).max(0.5),
            "amount_to_collect": whole_amount(request.cash_to_collect),
            "item_description": format!("Order {}", request.order_number),
        })
    }
}

/// Pathao wraps lists as `{"data": {"data": [...]}}`.
fn list_items<T: serde::de::DeserializeOwned>(body: Value) -> Result<Vec<T>, AdapterError> {
    let items = body
        .get("data")
        .and_then(|d| d.get("data"))
        .cloned()
        .ok_or_else(|| AdapterError::InvalidResponse("missing data.data list".to_string()))?;
    serde_json::from_value(items).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
}

fn names_match(candidate: &str, wanted: &str) -> bool {
    candidate.trim().eq_ignore_ascii_case(wanted.trim())
}

#[async_trait]
impl CourierAdapter for PathaoAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Pathao
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let city_id = self.resolve_city(&request.district).await?;
        let zone_id = self.resolve_zone(city_id, request.thana.as_deref()).await?;
        let payload = self.order_payload(request, city_id, zone_id);
        let url = self.url("orders");
        let body = self
            .send_authorized(|token| self.client.post(&url).bearer_auth(token).json(&payload))
            .await?;
        require_tracking(&body)
    }

    async fn track(&self, tracking_id: &str) -> Result<String, AdapterError> {
        let tracking_id = tracking_path_segment(tracking_id)?;
        let body = self.get(&format!("orders/{}/info", tracking_id)).await?;
        body.pointer("/data/order_status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::InvalidResponse("missing data.order_status".to_string()))
    }
}
