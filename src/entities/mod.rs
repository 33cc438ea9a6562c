//! Database entities, one module per table.

pub mod address;
pub mod blocked_identity;
pub mod cart_item;
pub mod courier_provider;
pub mod delivery_zone;
pub mod order;
pub mod order_line;
pub mod product;
pub mod promo_application;
pub mod promo_code;
pub mod store_setting;

pub use address::{Entity as Address, Model as AddressModel};
pub use blocked_identity::{BlockKind, Entity as BlockedIdentity, Model as BlockedIdentityModel};
pub use cart_item::{Entity as CartItem, Model as CartItemModel};
pub use courier_provider::{
    Entity as CourierProvider, Model as CourierProviderModel, ProviderType,
};
pub use delivery_zone::{Entity as DeliveryZone, Model as DeliveryZoneModel};
pub use order::{Entity as Order, Model as OrderModel, OrderStatus, PaymentMethod};
pub use order_line::{Entity as OrderLine, Model as OrderLineModel};
pub use product::{Entity as Product, Model as ProductModel};
pub use promo_application::{Entity as PromoApplication, Model as PromoApplicationModel};
pub use promo_code::{DiscountType, Entity as PromoCode, Model as PromoCodeModel};
pub use store_setting::{Entity as StoreSetting, Model as StoreSettingModel};
