//! Steadfast (Packzy) API. Static key headers; supports bulk order creation.

use super::http::{provider_message, read_json, require_tracking, whole_amount};
use super::{
    base_url, extract_tracking_id, tracking_path_segment, AdapterError, BulkDispatch,
    CourierAdapter, DispatchRequest,
};
use crate::entities::ProviderType;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};

const DEFAULT_URL: &str = "https://portal.packzy.com/api/v1";
/// Largest batch the bulk endpoint accepts
pub const MAX_BULK_ORDERS: usize = 500;

#[derive(Debug, Clone, Deserialize)]
pub struct SteadfastConfig {
    pub api_key: String,
    pub secret_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

pub struct SteadfastAdapter {
    client: Client,
    config: SteadfastConfig,
    base_url: String,
}

impl SteadfastAdapter {
    pub fn new(client: Client, config: SteadfastConfig) -> Self {
        let base_url = base_url(config.base_url.as_deref(), false, DEFAULT_URL, DEFAULT_URL);
        Self {
            client,
            config,
            base_url,
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("Api-Key", &self.config.api_key)
            .header("Secret-Key", &self.config.secret_key)
    }

    fn order_payload(request: &DispatchRequest) -> Value {
        json!({
            "invoice": request.order_number,
            "recipient_name": request.recipient_name,
            "recipient_phone": request.phone,
            "recipient_address": request.full_address(),
            "cod_amount": whole_amount(request.cash_to_collect),
            "note": request.note.clone().unwrap_or_default(),
        })
    }
}

/// Steadfast reports some failures with HTTP 200 and a status field.
fn check_body_status(body: &Value) -> Result<(), AdapterError> {
    match body.get("status").and_then(Value::as_i64) {
        Some(code) if code != 200 => Err(AdapterError::Rejected(
            provider_message(body).unwrap_or_else(|| format!("status {}", code)),
        )),
        _ => Ok(()),
    }
}

#[async_trait]
impl CourierAdapter for SteadfastAdapter {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Steadfast
    }

    async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
        let response = self
            .authorized(self.client.post(format!("{}/create_order", self.base_url)))
            .json(&Self::order_payload(request))
            .send()
            .await?;
        let body = read_json(response).await?;
        check_body_status(&body)?;
        require_tracking(&body)
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    async fn dispatch_bulk(
        &self,
        requests: &[DispatchRequest],
    ) -> Result<BulkDispatch, AdapterError> {
        if requests.len() > MAX_BULK_ORDERS {
            return Err(AdapterError::Rejected(format!(
                "bulk dispatch is limited to {} orders",
                MAX_BULK_ORDERS
            )));
        }
        let data: Vec<Value> = requests.iter().map(Self::order_payload).collect();
        let response = self
            .authorized(
                self.client
                    .post(format!("{}/create_order/bulk-order", self.base_url)),
            )
            .json(&json!({ "data": data }))
            .send()
            .await?;
        let body = read_json(response).await?;
        check_body_status(&body)?;

        let items = body.get("data").and_then(Value::as_array);
        let mut outcome = BulkDispatch {
            shared_tracking_id: items.is_none().then(|| extract_tracking_id(&body)).flatten(),
            ..BulkDispatch::default()
        };
        for item in items.into_iter().flatten() {
            let Some(invoice) = item.get("invoice").and_then(Value::as_str) else {
                continue;
            };
            let failed = item.get("status").and_then(Value::as_str) == Some("error");
            match extract_tracking_id(item) {
                Some(tracking) if !failed => {
                    outcome.tracking_ids.insert(invoice.to_string(), tracking);
                }
                _ => {
                    let reason = provider_message(item)
                        .unwrap_or_else(|| "rejected by Steadfast".to_string());
                    outcome.rejected.insert(invoice.to_string(), reason);
                }
            }
        }
        Ok(outcome)
    }

    async fn track(&self, tracking_id: &str) -> Result<String, AdapterError> {
        let tracking_id = tracking_path_segment(tracking_id)?;
        let path = if tracking_id.chars().all(|c| c.is_ascii_digit()) {
            "status_by_cid"
        } else {
            "status_by_trackingcode"
        };
        let response = self
            .authorized(
                self.client
                    .get(format!("{}/{}/{}", self.base_url, path, tracking_id)),
            )
            .send()
            .await?;
        let body = read_json(response).await?;
        check_body_status(&body)?;
        body.get("delivery_status")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AdapterError::InvalidResponse("missing delivery_status".to_string()))
    }
}
