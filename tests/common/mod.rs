#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use serde_json::{json, Value};
use storefront_api::{
    auth::CurrentUser,
    config::{AppConfig, CheckoutSettings},
    couriers::CourierRegistry,
    db,
    entities::{
        address, blocked_identity, courier_provider, delivery_zone, order, order_line, product,
        promo_code, BlockKind, DiscountType, OrderStatus, PaymentMethod, ProviderType,
    },
    events::{self, EventSender},
    handlers::AppServices,
    notifications::{Notification, NotificationError, NotificationSink},
    services::commerce::checkout_service::{AddressInput, PlaceOrderRequest},
    services::commerce::pricing_service::CartLine,
    AppState,
};
use tokio::sync::{mpsc, Mutex};
use tower::ServiceExt;
use uuid::Uuid;

/// Collects every notification the event worker delivers.
#[derive(Default)]
pub struct RecordingSink {
    pub delivered: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.delivered.lock().await.push(notification.clone());
        Ok(())
    }
}

/// Helper harness for spinning up an application state backed by an in-memory SQLite database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub db: Arc<DatabaseConnection>,
    pub notifications: Arc<RecordingSink>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Construct a test application, letting the caller adjust the configuration first.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        // One connection keeps every query on the same in-memory database.
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.courier_timeout_secs = 5;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let notifications = Arc::new(RecordingSink::default());
        let event_task = tokio::spawn(events::process_events(event_rx, notifications.clone()));

        let registry = Arc::new(
            CourierRegistry::new(cfg.courier_timeout()).expect("courier client for tests"),
        );
        let services = AppServices::new(db_arc.clone(), event_sender, registry, &cfg);
        let state = AppState {
            db: db_arc.clone(),
            config: cfg,
            services,
        };
        let router = storefront_api::app_router(state.clone());

        Self {
            router,
            state,
            db: db_arc,
            notifications,
            _event_task: event_task,
        }
    }

    /// Send a request against the router with optional JSON body and extra headers.
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Settings with both rate windows relaxed, so tests can place several orders quickly.
    pub fn relaxed_settings(&self) -> CheckoutSettings {
        CheckoutSettings {
            max_orders_per_day: 100,
            min_order_interval_secs: 0,
            ..self.state.config.checkout.clone()
        }
    }

    pub async fn place(
        &self,
        request: PlaceOrderRequest,
        user: CurrentUser,
        settings: &CheckoutSettings,
    ) -> Result<storefront_api::services::commerce::PlacedOrder, storefront_api::errors::ServiceError>
    {
        self.state
            .services
            .checkout
            .place_order(request, user, settings)
            .await
    }

    pub async fn seed_product(
        &self,
        name: &str,
        price: Decimal,
        stock: i32,
        allow_preorder: bool,
    ) -> product::Model {
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            sale_price: Set(None),
            stock_quantity: Set(stock),
            is_active: Set(true),
            allow_preorder: Set(allow_preorder),
            weight_kg: Set(Some(Decimal::ONE)),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_inactive_product(&self, name: &str, price: Decimal) -> product::Model {
        let product = self.seed_product(name, price, 10, false).await;
        let mut active: product::ActiveModel = product.into();
        active.is_active = Set(false);
        active.update(&*self.db).await.expect("deactivate product")
    }

    pub async fn seed_zone(&self, district: &str, cost: Decimal) -> delivery_zone::Model {
        delivery_zone::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("{} zone", district)),
            district: Set(district.to_string()),
            cost: Set(cost),
            is_active: Set(true),
        }
        .insert(&*self.db)
        .await
        .expect("seed delivery zone")
    }

    pub async fn seed_promo(
        &self,
        code: &str,
        discount_type: DiscountType,
        value: Decimal,
        adjust: impl FnOnce(&mut promo_code::ActiveModel),
    ) -> promo_code::Model {
        let mut promo = promo_code::ActiveModel {
            id: Set(Uuid::new_v4()),
            code: Set(code.to_uppercase()),
            discount_type: Set(discount_type),
            discount_value: Set(value),
            min_order_amount: Set(None),
            max_discount_amount: Set(None),
            usage_limit: Set(None),
            used_count: Set(0),
            starts_at: Set(None),
            expires_at: Set(None),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        };
        adjust(&mut promo);
        promo.insert(&*self.db).await.expect("seed promo code")
    }

    pub async fn block(&self, kind: BlockKind, value: &str) {
        blocked_identity::ActiveModel {
            id: Set(Uuid::new_v4()),
            kind: Set(kind),
            value: Set(value.to_string()),
            reason: Set(Some("chargebacks".to_string())),
            is_active: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed blocked identity");
    }

    pub async fn seed_provider(
        &self,
        provider_type: ProviderType,
        config: Value,
        is_active: bool,
    ) -> courier_provider::Model {
        courier_provider::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("{} account", provider_type)),
            provider_type: Set(provider_type),
            is_active: Set(is_active),
            config: Set(config),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed courier provider")
    }

    /// Inserts an order directly, bypassing checkout, with one line of `product`.
    pub async fn seed_order(
        &self,
        number: &str,
        status: OrderStatus,
        with_address: bool,
        product: &product::Model,
    ) -> order::Model {
        let now = Utc::now();
        let address_id = if with_address {
            let address = address::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(Uuid::nil()),
                name: Set("Tanvir Ahmed".to_string()),
                phone: Set("01712345678".to_string()),
                email: Set(None),
                division: Set(Some("Dhaka".to_string())),
                district: Set("Dhaka".to_string()),
                thana: Set(Some("Mirpur".to_string())),
                address_line: Set("House 12, Road 3".to_string()),
                created_at: Set(now),
            }
            .insert(&*self.db)
            .await
            .expect("seed address");
            Some(address.id)
        } else {
            None
        };

        let order = order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(number.to_string()),
            user_id: Set(None),
            address_id: Set(address_id),
            status: Set(status),
            payment_method: Set(PaymentMethod::Cod),
            subtotal: Set(Decimal::from(1000)),
            shipping_cost: Set(Decimal::from(60)),
            cod_charge: Set(Decimal::ZERO),
            discount_amount: Set(Decimal::ZERO),
            total: Set(Decimal::from(1060)),
            is_preorder: Set(false),
            promo_code_id: Set(None),
            transaction_id: Set(None),
            shipping_method: Set(None),
            notes: Set(None),
            tracking_number: Set(None),
            courier_provider_id: Set(None),
            dispatched_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed order");

        order_line::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order.id),
            product_id: Set(product.id),
            product_name: Set(product.name.clone()),
            unit_price: Set(product.price),
            quantity: Set(2),
            line_total: Set(product.price * Decimal::from(2)),
            is_preorder: Set(false),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed order line");

        order
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn address(phone: &str, district: &str) -> AddressInput {
    AddressInput {
        name: "Farhana Islam".to_string(),
        phone: phone.to_string(),
        email: Some("farhana@example.com".to_string()),
        division: Some("Dhaka".to_string()),
        district: district.to_string(),
        thana: Some("Dhanmondi".to_string()),
        address_line: "House 9, Road 27".to_string(),
    }
}

pub fn line(product_id: Uuid, quantity: i32) -> CartLine {
    CartLine {
        product_id,
        quantity,
        price: None,
    }
}

pub fn order_request(items: Vec<CartLine>, phone: &str, payment_method: &str) -> PlaceOrderRequest {
    PlaceOrderRequest {
        items,
        address: address(phone, "Dhaka"),
        payment_method: payment_method.to_string(),
        promo_code: None,
        transaction_id: None,
        shipping_method: None,
        notes: None,
        client_total: None,
    }
}

pub fn order_body(product_id: Uuid, quantity: i32, phone: &str) -> Value {
    json!({
        "items": [{ "product_id": product_id, "quantity": quantity, "price": "1.00" }],
        "address": {
            "name": "Farhana Islam",
            "phone": phone,
            "district": "Dhaka",
            "address_line": "House 9, Road 27"
        },
        "payment_method": "cod"
    })
}

pub async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response is json")
}

/// Waits briefly for the event worker to deliver `count` notifications.
pub async fn wait_for_notifications(sink: &RecordingSink, count: usize) -> Vec<Notification> {
    for _ in 0..50 {
        {
            let delivered = sink.delivered.lock().await;
            if delivered.len() >= count {
                return delivered.clone();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    sink.delivered.lock().await.clone()
}

pub fn minutes_ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::minutes(minutes)
}
