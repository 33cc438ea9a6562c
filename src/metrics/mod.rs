//! Prometheus counters for the order pipeline, exposed in text format at `/metrics`.

use crate::errors::ServiceError;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    static ref ORDERS_PLACED: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new("storefront_orders_placed_total", "Orders accepted by checkout"),
            &["payment_method"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    static ref CHECKOUT_REJECTIONS: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "storefront_checkout_rejections_total",
                "Checkout attempts rejected, by error code"
            ),
            &["reason"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
    static ref DISPATCH_OUTCOMES: IntCounterVec = {
        let counter = IntCounterVec::new(
            Opts::new(
                "storefront_dispatch_results_total",
                "Per-order courier dispatch results"
            ),
            &["provider", "outcome"],
        )
        .expect("metric can be created");
        REGISTRY
            .register(Box::new(counter.clone()))
            .expect("metric can be registered");
        counter
    };
}

pub fn record_order_placed(payment_method: &str) {
    ORDERS_PLACED.with_label_values(&[payment_method]).inc();
}

pub fn record_checkout_rejection(reason: &str) {
    CHECKOUT_REJECTIONS.with_label_values(&[reason]).inc();
}

pub fn record_dispatch(provider: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    DISPATCH_OUTCOMES
        .with_label_values(&[provider, outcome])
        .inc();
}

/// Renders every registered metric in the Prometheus text exposition format.
pub fn render() -> Result<String, ServiceError> {
    // Counters register themselves on first use.
    lazy_static::initialize(&ORDERS_PLACED);
    lazy_static::initialize(&CHECKOUT_REJECTIONS);
    lazy_static::initialize(&DISPATCH_OUTCOMES);

    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {}", e)))?;
    String::from_utf8(buffer)
        .map_err(|e| ServiceError::InternalError(format!("metrics encoding failed: {}", e)))
}
