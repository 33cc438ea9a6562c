//! Paperfly merchant API. Basic auth plus a static merchant key header.

use super::http::{provider_message, read_json, require_tracking, whole_amount};
use super::{base_url, AdapterError, CourierAdapter, DispatchRequest};
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::{json, Value};

const SANDBOX_URL: &str = "https://sandbox.paperfly.com.bd";
const PRODUCTION_URL: &str = "https://api.paperfly.com.bd";
const NEW_ORDER_PATH: &str = "/merchant/api/service/new_order.php";

#[derive(Debug, Clone, Deserialize)]
pub struct PaperflyConfig {
    pub username: String,
    pub password: String,
    pub merchant_key: String,
    pub pickup_name: String,
    pub pickup_address: String,
    pub pickup_thana: String,
    pub pickup_district: String,
    pub pickup_phone: String,
    #[serde(default)]
    pub sandbox: bool,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct PaperflyAdapter {
    client: Client,
    config: PaperflyConfig,
    base_url: String,
}

impl PaperflyAdapter {
    pub fn new(client: Client, config: PaperflyConfig) -> Self {
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
        let max_weight = request.weight_kg.ceil().to_i64().unwrap_or(1).max(1);
        json!({
            "merOrderRef": request.order_number,
            "pickMerchantName": self.config.pickup_name,
            "pickMerchantAddress": self.config.pickup_address,
            "pickMerchantThana": self.config.pickup_thana,
            "pickMerchantDistrict": self.config.pickup_district,
            "pickupMerchantPhone": self.config.pickup_phone,
            "productSizeWeight": "standard",
            "productBrief": format!("{} item(s)", request.item_count),
            "packagePrice": whole_amount(request.cash_to_collect).to_string(),
            "deliveryOption": "regular",
            "custname": request.recipient_name,
            "custaddress": request.address_line,
            "customerThana": request.thana.clone().unwrap_or_else(|| request.district.clone()),
            "customerDistrict": request.district,
            "custPhone": request.phone,
            "max_weight": max_weight.to_string(),
        })
    }
}

#[async_trait]
impl CourierAdapter for PaperflyAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Paperfly
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, NEW_ORDER_PATH))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header("paperflykey", &self.config.merchant_key)
            .json(&self.order_payload(request))
            .send()
            .await?;
        let body = read_json(response).await?;
        match body.get("response_code").and_then(Value::as_i64) {
            Some(code) if code != 200 => Err(AdapterError::Rejected(
                provider_message(&body).unwrap_or_else(|| format!("response code {}", code)),
            )),
            _ => require_tracking(&body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    #[test]
    fn payload_rounds_weight_up_and_falls_back_to_district() {
        let adapter = PaperflyAdapter::new(
            Client::new(),
            PaperflyConfig {
                username: "m".into(),
                password: "p".into(),
                merchant_key: "k".into(),
                pickup_name: "Shop".into(),
                pickup_address: "Banani".into(),
                pickup_thana: "Banani".into(),
                pickup_district: "Dhaka".into(),
                pickup_phone: "01900000000".into(),
                sandbox: false,
                base_url: None,
            },
        );
        let request = DispatchRequest {
            order_id: Uuid::new_v4(),
            order_number: "ORD-2".into(),
            recipient_name: "Karim".into(),
            phone: "01612345678".into(),
            address_line: "College Road".into(),
            division: Some("Chattogram".into()),
            district: "Cumilla".into(),
            thana: None,
            cash_to_collect: Decimal::ZERO,
            weight_kg: dec!(1.2),
            declared_value: dec!(900),
            item_count: 1,
            note: None,
        };
        let payload = adapter.order_payload(&request);
        assert_eq!(payload["max_weight"], json!("2"));
        assert_eq!(payload["customerThana"], json!("Cumilla"));
        assert_eq!(payload["packagePrice"], json!("0"));
    }
}
