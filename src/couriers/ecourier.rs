//! eCourier API. Key, secret and user id headers.

use super::http::{decimal_number, provider_message, read_json, require_tracking, whole_amount};
use super::{base_url, AdapterError, CourierAdapter, DispatchRequest};
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

const SANDBOX_URL: &str = "https://staging.ecourier.com.bd/api";
const PRODUCTION_URL: &str = "https://backoffice.ecourier.com.bd/api";

#[derive(Debug, Clone, Deserialize)]
pub struct EcourierConfig {
    pub api_key: String,
    pub api_secret: String,
    pub user_id: String,
    /// Delivery package code, e.g. `#2444`
    pub package_code: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct EcourierAdapter {
    client: Client,
    config: EcourierConfig,
    base_url: String,
}

impl EcourierAdapter {
    pub fn new(client: Client, config: EcourierConfig) -> Self {
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
        builder
            .header("API-KEY", &self.config.api_key)
            .header("API-SECRET", &self.config.api_secret)
            .header("USER-ID", &self.config.user_id)
    }

    fn order_payload(&self, request: &DispatchRequest) -> Value {
        json!({
            "recipient_name": request.recipient_name,
            "recipient_mobile": request.phone,
            "recipient_city": request.district,
            "recipient_area": request.thana.clone().unwrap_or_else(|| request.district.clone()),
            "recipient_thana": request.thana.clone().unwrap_or_default(),
            "recipient_address": request.full_address(),
            "package_code": self.config.package_code,
            "product_price": whole_amount(request.cash_to_collect),
            "payment_method": if request.cash_to_collect.is_zero() { "MPAY" } else { "COD" },
            "parcel_type": "BOX",
            "number_of_item": request.item_count,
            "actual_product_price": decimal_number(request.declared_value),
            "product_id": request.order_number,
            "comments": request.note.clone().unwrap_or_default(),
        })
    }
}

#[async_trait]
impl CourierAdapter for EcourierAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Ecourier
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let response = self
            .authorized(self.client.post(format!("{}/order-place", self.base_url)))
            .json(&self.order_payload(request))
            .send()
            .await?;
        let body = read_json(response).await?;
        if body.get("success").and_then(Value::as_bool) == Some(false) {
            return Err(AdapterError::Rejected(
                provider_message(&body)
                    .unwrap_or_else(|| "order rejected by eCourier".to_string()),
            ));
        }
        require_tracking(&body)
    }

    async fn track(&self, tracking_id: &str) -> Result<String, AdapterError> {
        let response = self
            .authorized(self.client.post(format!("{}/track", self.base_url)))
            .json(&json!({ "ecr": tracking_id }))
            .send()
            .await?;
        let body = read_json(response).await?;
        body.pointer("/query_data/status/0/status")
            .or_else(|| body.get("status"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::InvalidResponse("missing tracking status".to_string()))
    }
}
