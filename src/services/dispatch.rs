use crate::{
    couriers::{AdapterError, CourierAdapter, CourierRegistry, DispatchRequest, DispatchResult},
    entities::{
        address, courier_provider, order, order_line, Address, CourierProvider, Order, OrderLine,
        OrderStatus, Product,
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
};
use chrono::Utc;
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Declared when none of an order's products carry a weight.
pub const DEFAULT_PARCEL_WEIGHT_KG: Decimal = dec!(0.5);

/// Operator request to hand a set of orders to one courier.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DispatchOrdersRequest {
    pub provider_id: Uuid,
    #[validate(length(min = 1, max = 500))]
    pub order_ids: Vec<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchSummary {
    pub results: Vec<DispatchResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn from_results(results: Vec<DispatchResult>) -> Self {
        let succeeded = results.iter().filter(|r| r.success).count();
        let failed = results.len() - succeeded;
        Self {
            results,
            succeeded,
            failed,
        }
    }
}

/// Hands confirmed orders to a courier and records the outcome per order.
#[derive(Clone)]
pub struct DispatchService {
    db: Arc<DatabaseConnection>,
    registry: Arc<CourierRegistry>,
    event_sender: Arc<EventSender>,
    concurrency: usize,
}

impl DispatchService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        registry: Arc<CourierRegistry>,
        event_sender: Arc<EventSender>,
    ) -> Self {
        Self {
            db,
            registry,
            event_sender,
            concurrency: 1,
        }
    }

    /// Number of single-parcel calls allowed in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub async fn list_active_providers(
        &self,
    ) -> Result<Vec<courier_provider::Model>, ServiceError> {
        let providers = CourierProvider::find()
            .filter(courier_provider::Column::IsActive.eq(true))
            .order_by_asc(courier_provider::Column::Name)
            .all(&*self.db)
            .await?;
        Ok(providers)
    }

    async fn active_provider(
        &self,
        provider_id: Uuid,
    ) -> Result<courier_provider::Model, ServiceError> {
        let provider = CourierProvider::find_by_id(provider_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Courier provider {} not found", provider_id))
            })?;
        if !provider.is_active {
            return Err(ServiceError::InvalidOperation(format!(
                "Courier provider {} is not active",
                provider.name
            )));
        }
        Ok(provider)
    }

    fn adapter(
        &self,
        provider: &courier_provider::Model,
    ) -> Result<Arc<dyn CourierAdapter>, ServiceError> {
        self.registry
            .adapter_for(provider)
            .map_err(|e| ServiceError::InvalidOperation(e.to_string()))
    }

    /// Dispatches the given orders to one provider.
    ///
    /// Returns one result per requested id, in request order. Only a missing
    /// or inactive provider fails the whole call.
    #[instrument(skip(self, order_ids), fields(orders = order_ids.len()))]
    pub async fn dispatch_orders(
        &self,
        provider_id: Uuid,
        order_ids: &[Uuid],
    ) -> Result<DispatchSummary, ServiceError> {
        let provider = self.active_provider(provider_id).await?;
        let adapter = self.adapter(&provider)?;

        let mut loaded = self.load_orders(order_ids).await?;
        let mut slots: Vec<Option<DispatchResult>> = vec![None; order_ids.len()];
        let mut pending: Vec<(usize, DispatchRequest)> = Vec::new();
        let mut seen = HashSet::new();

        for (idx, order_id) in order_ids.iter().enumerate() {
            if !seen.insert(*order_id) {
                slots[idx] = Some(DispatchResult::failed(
                    *order_id,
                    "",
                    "Duplicate order in request",
                ));
                continue;
            }
            let Some((order, address)) = loaded.remove(order_id) else {
                slots[idx] = Some(DispatchResult::failed(*order_id, "", "Order not found"));
                continue;
            };
            let Some(address) = address else {
                slots[idx] = Some(DispatchResult::failed(
                    order.id,
                    &order.order_number,
                    "No address found",
                ));
                continue;
            };
            if order.status != OrderStatus::Confirmed {
                slots[idx] = Some(DispatchResult::failed(
                    order.id,
                    &order.order_number,
                    format!("Order is {}, only confirmed orders can be dispatched", order.status),
                ));
                continue;
            }
            pending.push((idx, build_request(&order, &address)));
        }

        if !pending.is_empty() {
            self.fill_parcel_details(&mut pending).await?;
            let requests: Vec<DispatchRequest> = pending.iter().map(|(_, r)| r.clone()).collect();
            let outcomes = if adapter.supports_bulk() && requests.len() > 1 {
                dispatch_bulk(adapter.as_ref(), &requests).await
            } else {
                dispatch_each(adapter.clone(), requests, self.concurrency).await
            };

            for ((idx, request), outcome) in pending.iter().zip(outcomes) {
                let outcome = if outcome.success {
                    self.mark_shipped(&provider, request, outcome).await
                } else {
                    outcome
                };
                metrics::record_dispatch(&provider.provider_type.to_string(), outcome.success);
                slots[*idx] = Some(outcome);
            }
        }

        let results: Vec<DispatchResult> = slots.into_iter().flatten().collect();
        let summary = DispatchSummary::from_results(results);
        info!(
            provider = %provider.provider_type,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Dispatch finished"
        );
        Ok(summary)
    }

    /// Looks up a parcel's status with the provider that carries it.
    #[instrument(skip(self))]
    pub async fn track(&self, provider_id: Uuid, tracking_id: &str) -> Result<String, ServiceError> {
        let provider = self.active_provider(provider_id).await?;
        let adapter = self.adapter(&provider)?;
        adapter.track(tracking_id).await.map_err(|e| match e {
            rejected @ (AdapterError::Unsupported(_) | AdapterError::InvalidTrackingId(_)) => {
                ServiceError::InvalidOperation(rejected.to_string())
            }
            other => ServiceError::ExternalServiceError(other.to_string()),
        })
    }

    async fn load_orders(
        &self,
        order_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, (order::Model, Option<address::Model>)>, ServiceError> {
        let rows = Order::find()
            .filter(order::Column::Id.is_in(order_ids.iter().copied()))
            .find_also_related(Address)
            .all(&*self.db)
            .await?;
        Ok(rows.into_iter().map(|(o, a)| (o.id, (o, a))).collect())
    }

    /// Sets parcel weight and item count from the orders' lines.
    async fn fill_parcel_details(
        &self,
        pending: &mut [(usize, DispatchRequest)],
    ) -> Result<(), ServiceError> {
        let ids: Vec<Uuid> = pending.iter().map(|(_, r)| r.order_id).collect();
        let lines = OrderLine::find()
            .filter(order_line::Column::OrderId.is_in(ids))
            .find_also_related(Product)
            .all(&*self.db)
            .await?;

        let mut totals: HashMap<Uuid, (Decimal, i32)> = HashMap::new();
        for (line, product) in lines {
            let entry = totals.entry(line.order_id).or_insert((Decimal::ZERO, 0));
            if let Some(weight) = product.and_then(|p| p.weight_kg) {
                entry.0 += weight * Decimal::from(line.quantity);
            }
            entry.1 += line.quantity;
        }

        for (_, request) in pending.iter_mut() {
            if let Some((weight, count)) = totals.get(&request.order_id) {
                if *weight > Decimal::ZERO {
                    request.weight_kg = *weight;
                }
                request.item_count = (*count).max(1);
            }
        }
        Ok(())
    }

    /// Marks a dispatched order shipped. A failed write keeps the courier's
    /// success and reports the write problem alongside the tracking id.
    async fn mark_shipped(
        &self,
        provider: &courier_provider::Model,
        request: &DispatchRequest,
        mut outcome: DispatchResult,
    ) -> DispatchResult {
        let Some(tracking) = outcome.tracking_id.clone() else {
            return outcome;
        };
        let now = Utc::now();
        let update = order::ActiveModel {
            status: Set(OrderStatus::Shipped),
            tracking_number: Set(Some(tracking.clone())),
            courier_provider_id: Set(Some(provider.id)),
            dispatched_at: Set(Some(now)),
            updated_at: Set(now),
            ..Default::default()
        };
        let written = Order::update_many()
            .set(update)
            .filter(order::Column::Id.eq(request.order_id))
            .filter(order::Column::Status.eq(OrderStatus::Confirmed))
            .exec(&*self.db)
            .await;

        match written {
            Ok(res) if res.rows_affected == 1 => {
                let event = Event::OrderShipped {
                    order_id: request.order_id,
                    order_number: request.order_number.clone(),
                    provider: provider.name.clone(),
                    tracking_number: tracking,
                    phone: Some(request.phone.clone()),
                };
                if let Err(e) = self.event_sender.publish(event) {
                    warn!(order_id = %request.order_id, "Failed to publish OrderShipped: {}", e);
                }
            }
            Ok(_) => {
                warn!(order_id = %request.order_id, "Order changed status during dispatch");
                outcome.error = Some(
                    "Dispatched, but the order was no longer confirmed and was not marked shipped"
                        .to_string(),
                );
            }
            Err(e) => {
                error!(order_id = %request.order_id, "Failed to mark order shipped: {}", e);
                outcome.error = Some(format!(
                    "Dispatched, but saving the shipped status failed: {}",
                    e
                ));
            }
        }
        outcome
    }
}

fn build_request(order: &order::Model, address: &address::Model) -> DispatchRequest {
    let cash_to_collect = if order.payment_method.is_cash_on_delivery() {
        order.total
    } else {
        Decimal::ZERO
    };
    DispatchRequest {
        order_id: order.id,
        order_number: order.order_number.clone(),
        recipient_name: address.name.clone(),
        phone: address.phone.clone(),
        address_line: address.address_line.clone(),
        division: address.division.clone(),
        district: address.district.clone(),
        thana: address.thana.clone(),
        cash_to_collect,
        weight_kg: DEFAULT_PARCEL_WEIGHT_KG,
        declared_value: order.total,
        item_count: 1,
        note: order.notes.clone(),
    }
}

/// One bulk call; its failure fails every order in the batch.
async fn dispatch_bulk(
    adapter: &dyn CourierAdapter,
    requests: &[DispatchRequest],
) -> Vec<DispatchResult> {
    match adapter.dispatch_bulk(requests).await {
        Ok(bulk) => requests
            .iter()
            .map(|r| {
                if let Some(reason) = bulk.rejected.get(&r.order_number) {
                    return DispatchResult::failed(r.order_id, &r.order_number, reason.clone());
                }
                match bulk
                    .tracking_ids
                    .get(&r.order_number)
                    .or(bulk.shared_tracking_id.as_ref())
                {
                    Some(tracking) => {
                        DispatchResult::succeeded(r.order_id, &r.order_number, tracking.clone())
                    }
                    None => DispatchResult::failed(
                        r.order_id,
                        &r.order_number,
                        "Courier accepted the batch but returned no tracking id",
                    ),
                }
            })
            .collect(),
        Err(e) => {
            warn!(provider = %adapter.provider_type(), "Bulk dispatch failed: {}", e);
            let message = e.to_string();
            requests
                .iter()
                .map(|r| DispatchResult::failed(r.order_id, &r.order_number, message.clone()))
                .collect()
        }
    }
}

/// Single-parcel calls, at most `concurrency` in flight, results in input order.
async fn dispatch_each(
    adapter: Arc<dyn CourierAdapter>,
    requests: Vec<DispatchRequest>,
    concurrency: usize,
) -> Vec<DispatchResult> {
    stream::iter(requests)
        .map(|request| {
            let adapter = adapter.clone();
            async move { adapter.dispatch(&request).await }
        })
        .buffered(concurrency.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::couriers::BulkDispatch;
    use crate::entities::{PaymentMethod, ProviderType};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedAdapter {
        fail_on: Vec<String>,
        calls: Mutex<Vec<String>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedAdapter {
        fn failing(fail_on: &[&str]) -> Self {
            Self {
                fail_on: fail_on.iter().map(|s| s.to_string()).collect(),
                calls: Mutex::new(Vec::new()),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CourierAdapter for ScriptedAdapter {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Redx
        }

        async fn create_parcel(&self, request: &DispatchRequest) -> Result<String, AdapterError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.order_number.clone());
            if self.fail_on.contains(&request.order_number) {
                Err(AdapterError::Rejected("area not serviceable".into()))
            } else {
                Ok(format!("TRK-{}", request.order_number))
            }
        }
    }

    struct BulkOnly(Result<BulkDispatch, ()>);

    #[async_trait]
    impl CourierAdapter for BulkOnly {
        fn provider_type(&self) -> ProviderType {
            ProviderType::Steadfast
        }

        async fn create_parcel(&self, _request: &DispatchRequest) -> Result<String, AdapterError> {
            Err(AdapterError::Http("single calls not expected".into()))
        }

        fn supports_bulk(&self) -> bool {
            true
        }

        async fn dispatch_bulk(
            &self,
            _requests: &[DispatchRequest],
        ) -> Result<BulkDispatch, AdapterError> {
            self.0
                .clone()
                .map_err(|_| AdapterError::Status { status: 503, body: "maintenance".into() })
        }
    }

    fn request(number: &str) -> DispatchRequest {
        let now = Utc::now();
        let order = order::Model {
            id: Uuid::new_v4(),
            order_number: number.to_string(),
            user_id: None,
            address_id: None,
            status: OrderStatus::Confirmed,
            payment_method: PaymentMethod::Cod,
            subtotal: dec!(1000),
            shipping_cost: dec!(60),
            cod_charge: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            total: dec!(1060),
            is_preorder: false,
            promo_code_id: None,
            transaction_id: None,
            shipping_method: None,
            notes: None,
            tracking_number: None,
            courier_provider_id: None,
            dispatched_at: None,
            created_at: now,
            updated_at: now,
        };
        let address = address::Model {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            name: "Ayesha".into(),
            phone: "01711111111".into(),
            email: None,
            division: None,
            district: "Dhaka".into(),
            thana: None,
            address_line: "House 1".into(),
            created_at: now,
        };
        build_request(&order, &address)
    }

    #[test]
    fn cod_orders_collect_the_total() {
        let r = request("ORD-1");
        assert_eq!(r.cash_to_collect, dec!(1060));
        assert_eq!(r.weight_kg, DEFAULT_PARCEL_WEIGHT_KG);
    }

    #[tokio::test]
    async fn one_failure_does_not_abort_the_rest() {
        let adapter = Arc::new(ScriptedAdapter::failing(&["B"]));
        let requests = vec![request("A"), request("B"), request("C")];
        let results = dispatch_each(adapter.clone(), requests, 1).await;

        let flags: Vec<bool> = results.iter().map(|r| r.success).collect();
        assert_eq!(flags, vec![true, false, true]);
        assert_eq!(results[0].tracking_id.as_deref(), Some("TRK-A"));
        assert!(results[1].error.as_deref().unwrap().contains("area not serviceable"));
        assert_eq!(*adapter.calls.lock().unwrap(), vec!["A", "B", "C"]);
        assert_eq!(adapter.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worker_pool_keeps_input_order() {
        let adapter = Arc::new(ScriptedAdapter::failing(&[]));
        let requests: Vec<_> = (0..6).map(|i| request(&format!("N{i}"))).collect();
        let results = dispatch_each(adapter.clone(), requests, 3).await;

        let numbers: Vec<_> = results.iter().map(|r| r.order_number.as_str()).collect();
        assert_eq!(numbers, vec!["N0", "N1", "N2", "N3", "N4", "N5"]);
        assert!(adapter.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn bulk_failure_fails_the_whole_batch() {
        let adapter = BulkOnly(Err(()));
        let results = dispatch_bulk(&adapter, &[request("A"), request("B")]).await;
        assert!(results.iter().all(|r| !r.success));
        assert!(results
            .iter()
            .all(|r| r.error.as_deref() == Some("Courier returned HTTP 503: maintenance")));
    }

    #[tokio::test]
    async fn bulk_success_uses_own_then_shared_tracking() {
        let mut bulk = BulkDispatch {
            shared_tracking_id: Some("BATCH-9".into()),
            ..BulkDispatch::default()
        };
        bulk.tracking_ids.insert("A".into(), "T-A".into());
        bulk.rejected.insert("C".into(), "Invalid phone".into());
        let adapter = BulkOnly(Ok(bulk));

        let results =
            dispatch_bulk(&adapter, &[request("A"), request("B"), request("C")]).await;
        assert_eq!(results[0].tracking_id.as_deref(), Some("T-A"));
        assert_eq!(results[1].tracking_id.as_deref(), Some("BATCH-9"));
        assert!(!results[2].success);
        assert_eq!(results[2].error.as_deref(), Some("Invalid phone"));
    }

    #[test]
    fn summary_counts_outcomes() {
        let id = Uuid::new_v4();
        let summary = DispatchSummary::from_results(vec![
            DispatchResult::succeeded(id, "A", "T".into()),
            DispatchResult::failed(id, "B", "x"),
            DispatchResult::failed(id, "C", "y"),
        ]);
        assert_eq!((summary.succeeded, summary.failed), (1, 2));
    }
}
