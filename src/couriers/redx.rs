//! RedX open API. Token header auth; parcels are booked against a delivery
//! area id looked up by district.

use super::http::{decimal_number, read_json, require_tracking, whole_amount};
use super::{base_url, tracking_path_segment, AdapterError, CourierAdapter, DispatchRequest};
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

const SANDBOX_URL: &str = "https://sandbox.redx.com.bd/v1.0.0-beta";
const PRODUCTION_URL: &str = "https://openapi.redx.com.bd/v1.0.0-beta";

#[derive(Debug, Clone, Deserialize)]
pub struct RedxConfig {
    pub api_token: String,
    #[serde(default)]
    pub pickup_store_id: Option<i64>,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct Area {
    id: i64,
    name: String,
}

pub struct RedxAdapter {
    client: Client,
    config: RedxConfig,
    base_url: String,
}

impl RedxAdapter {
    pub fn new(client: Client, config: RedxConfig) -> Self {
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
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header(
            "API-ACCESS-TOKEN",
            format!("Bearer {}", self.config.api_token),
        )
    }

    /// Prefers the area named like the thana, else the district's first area.
    async fn resolve_area(&self, request: &DispatchRequest) -> Result<Area, AdapterError> {
        let response = self
            .authorized(self.client.get(format!("{}/areas", self.base_url)))
            .query(&[("district_name", request.district.as_str())])
            .send()
            .await?;
        let body = read_json(response).await?;
        let areas: Vec<Area> = body
            .get("areas")
            .cloned()
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| AdapterError::InvalidResponse(e.to_string()))?
            .unwrap_or_default();

        let by_thana = request.thana.as_deref().and_then(|thana| {
            areas
                .iter()
                .find(|a| a.name.trim().eq_ignore_ascii_case(thana.trim()))
                .cloned()
        });
        by_thana
            .or_else(|| areas.into_iter().next())
            .ok_or_else(|| {
                AdapterError::Rejected(format!("RedX has no delivery area in {}", request.district))
            })
    }

    fn parcel_payload(&self, request: &DispatchRequest, area: &Area) -> Value {
        let mut payload = json!({
            "customer_name": request.recipient_name,
            "customer_phone": request.phone,
            "delivery_area": area.name,
            "delivery_area_id": area.id,
            "customer_address": request.full_address(),
            "merchant_invoice_id": request.order_number,
            "cash_collection_amount": whole_amount(request.cash_to_collect).to_string(),
            "parcel_weight": request.weight_grams(),
            "instruction": request.note.clone().unwrap_or_default(),
            "value": decimal_number(request.declared_value),
        });
        if let Some(store) = self.config.pickup_store_id {
            payload["pickup_store_id"] = json!(store);
        }
        payload
    }
}

#[async_trait]
impl CourierAdapter for RedxAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Redx
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let area = self.resolve_area(request).await?;
        let response = self
            .authorized(self.client.post(format!("{}/parcel", self.base_url)))
            .json(&self.parcel_payload(request, &area))
            .send()
            .await?;
        let body = read_json(response).await?;
        require_tracking(&body)
    }

    async fn track(&self, tracking_id: &str) -> Result<String, AdapterError> {
        let tracking_id = tracking_path_segment(tracking_id)?;
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/parcel/info/{}", self.base_url, tracking_id)),
            )
            .send()
            .await?;
        let body = read_json(response).await?;
        body.pointer("/parcel/status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::InvalidResponse("missing parcel.status".to_string()))
    }
}
