pub mod checkout;
pub mod dispatch;
pub mod health;
pub mod orders;

use crate::config::AppConfig;
use crate::couriers::CourierRegistry;
use crate::events::EventSender;
use crate::services::{
    commerce::CheckoutService, dispatch::DispatchService, orders::OrderService,
    settings::SettingsService,
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub settings: Arc<SettingsService>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub dispatch: Arc<DispatchService>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: Arc<EventSender>,
        registry: Arc<CourierRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self {
            settings: Arc::new(SettingsService::new(db.clone(), config.checkout.clone())),
            checkout: Arc::new(CheckoutService::new(db.clone(), event_sender.clone())),
            orders: Arc::new(OrderService::new(db.clone(), event_sender.clone())),
            dispatch: Arc::new(
                DispatchService::new(db, registry, event_sender)
                    .with_concurrency(config.dispatch_concurrency),
            ),
        }
    }
}
