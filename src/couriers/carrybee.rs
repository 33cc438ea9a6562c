//! CarryBee merchant API. Client id, secret and context headers; phones go
//! out in international form and weights in grams.

use super::http::{provider_message, read_json, require_tracking, whole_amount};
use super::{base_url, AdapterError, CourierAdapter, DispatchRequest};
use crate::common::international_phone;
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

const SANDBOX_URL: &str = "https://stage-sandbox.carrybee.com";
const PRODUCTION_URL: &str = "https://developers.carrybee.com";

#[derive(Debug, Clone, Deserialize)]
pub struct CarrybeeConfig {
    pub client_id: String,
    pub client_secret: String,
    pub client_context: String,
    pub store_id: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct CarrybeeAdapter {
    client: Client,
    config: CarrybeeConfig,
    base_url: String,
}

impl CarrybeeAdapter {
    pub fn new(client: Client, config: CarrybeeConfig) -> Self {
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

    fn order_payload(&self, request: &DispatchRequest) -> Value {
        json!({
            "store_id": self.config.store_id,
            "merchant_order_id": request.order_number,
            "delivery_type": 1,
            "product_type": 1,
            "recipient_name": request.recipient_name,
            "recipient_phone": international_phone(&request.phone),
            "recipient_address": request.full_address(),
            "item_weight": request.weight_grams(),
            "item_quantity": request.item_count,
            "collectable_amount": whole_amount(request.cash_to_collect),
            "special_instruction": request.note.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CourierAdapter for CarrybeeAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Carrybee
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let response = self
            .client
            .post(format!("{}/api/v2/orders", self.base_url))
            .header("Client-ID", &self.config.client_id)
            .header("Client-Secret", &self.config.client_secret)
            .header("Client-Context", &self.config.client_context)
            .json(&self.order_payload(request))
            .send()
            .await?;
        let body = read_json(response).await?;
        if body.get("error").and_then(Value::as_bool) == Some(true) {
            return Err(AdapterError::Rejected(
                provider_message(&body).unwrap_or_else(|| "order rejected by CarryBee".to_string()),
            ));
        }
        require_tracking(&body)
    }
}
