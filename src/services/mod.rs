// Checkout pipeline
pub mod commerce;
pub mod fraud;
pub mod promotions;
pub mod settings;

// Order lifecycle
pub mod dispatch;
pub mod orders;
