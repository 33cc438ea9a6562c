/// Commerce services module - cart pricing, shipping and checkout
pub mod checkout_service;
pub mod pricing_service;
pub mod shipping_service;

// Re-export services for convenience
pub use checkout_service::{CheckoutService, PlaceOrderRequest, PlacedOrder};
pub use pricing_service::PricingService;
pub use shipping_service::ShippingService;
