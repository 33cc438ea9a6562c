use crate::{
    auth::CurrentUser,
    common::{generate_order_number, normalize_phone, round_money},
    config::CheckoutSettings,
    entities::{address, cart_item, order, order_line, promo_code, CartItem, OrderStatus, PaymentMethod},
    errors::ServiceError,
    events::{Event, EventSender},
    metrics,
    services::{
        commerce::{
            pricing_service::{merge_lines, price_lines, CartLine, PricedCart, PricingService},
            shipping_service::{resolve_shipping_cost, ShippingService},
        },
        fraud::FraudGuard,
        promotions::{self, PromotionService},
    },
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Destination address as entered at checkout.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AddressInput {
    #[validate(length(min = 1, max = 120, message = "Recipient name is required"))]
    pub name: String,
    #[validate(custom = "validate_mobile_number")]
    pub phone: String,
    #[validate(email(message = "Invalid email address"))]
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub division: Option<String>,
    #[validate(length(min = 1, max = 100, message = "District is required"))]
    pub district: String,
    #[serde(default)]
    pub thana: Option<String>,
    #[validate(length(min = 1, max = 500, message = "Address is required"))]
    pub address_line: String,
}

impl AddressInput {
    /// Trims every field and drops optional fields left blank.
    fn trimmed(&self) -> Self {
        fn opt(value: &Option<String>) -> Option<String> {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        }

        Self {
            name: self.name.trim().to_string(),
            phone: self.phone.trim().to_string(),
            email: opt(&self.email),
            division: opt(&self.division),
            district: self.district.trim().to_string(),
            thana: opt(&self.thana),
            address_line: self.address_line.trim().to_string(),
        }
    }
}

fn validate_mobile_number(phone: &str) -> Result<(), ValidationError> {
    if normalize_phone(phone).is_some() {
        return Ok(());
    }
    let mut err = ValidationError::new("invalid_phone");
    err.message = Some("Enter a valid Bangladeshi mobile number (01XXXXXXXXX)".into());
    Err(err)
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    pub items: Vec<CartLine>,
    pub address: AddressInput,
    /// `cod`, `bkash`, `nagad` or `bank_transfer`
    pub payment_method: String,
    #[serde(default)]
    pub promo_code: Option<String>,
    #[serde(default)]
    #[validate(length(max = 100))]
    pub transaction_id: Option<String>,
    /// Shipping method hint; `pickup` waives shipping
    #[serde(default)]
    pub shipping_method: Option<String>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    /// Total the client displayed; only compared for logging
    #[serde(default)]
    pub client_total: Option<Decimal>,
}

/// Server-computed outcome of a successful checkout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedOrder {
    pub order_id: Uuid,
    pub order_number: String,
    pub status: OrderStatus,
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub cod_charge: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
    pub is_preorder: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub shipping_cost: Decimal,
    pub cod_charge: Decimal,
    pub discount_amount: Decimal,
    pub total: Decimal,
}

/// `subtotal + shipping + cod - discount`, never below zero.
pub fn compute_totals(
    subtotal: Decimal,
    shipping_cost: Decimal,
    cod_charge: Decimal,
    discount_amount: Decimal,
) -> OrderTotals {
    let total = (subtotal + shipping_cost + cod_charge - discount_amount).max(Decimal::ZERO);
    OrderTotals {
        subtotal: round_money(subtotal),
        shipping_cost: round_money(shipping_cost),
        cod_charge: round_money(cod_charge),
        discount_amount: round_money(discount_amount),
        total: round_money(total),
    }
}

/// Request after shape validation and normalization.
#[derive(Debug, Clone)]
struct ValidatedOrder {
    lines: Vec<(Uuid, i32)>,
    address: AddressInput,
    phone: String,
    payment_method: PaymentMethod,
    promo_code: Option<String>,
    transaction_id: Option<String>,
    shipping_method: Option<String>,
    notes: Option<String>,
    client_total: Option<Decimal>,
}

fn validate_request(
    request: &PlaceOrderRequest,
    settings: &CheckoutSettings,
) -> Result<ValidatedOrder, ServiceError> {
    if request.items.is_empty() {
        return Err(ServiceError::ValidationError("items: cart is empty".into()));
    }
    // Duplicate lines for one product merge before the cap is applied
    let lines = merge_lines(&request.items);
    if lines.len() > settings.max_cart_items {
        return Err(ServiceError::ValidationError(format!(
            "items: at most {} cart lines are allowed",
            settings.max_cart_items
        )));
    }
    request.validate()?;

    let address = request.address.trimmed();
    address.validate()?;
    let phone = normalize_phone(&address.phone).ok_or_else(|| {
        ServiceError::ValidationError("phone: invalid mobile number".into())
    })?;

    let payment_method = PaymentMethod::from_str(&request.payment_method.trim().to_lowercase())
        .map_err(|_| {
            ServiceError::ValidationError(format!(
                "payment_method: unsupported payment method '{}'",
                request.payment_method
            ))
        })?;

    let clean = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Ok(ValidatedOrder {
        lines,
        address,
        phone,
        payment_method,
        promo_code: request.promo_code.as_deref().and_then(promotions::normalize_code),
        transaction_id: clean(&request.transaction_id),
        shipping_method: clean(&request.shipping_method),
        notes: clean(&request.notes),
        client_total: request.client_total,
    })
}

/// Authoritative order creation.
///
/// Prices, shipping, discounts and abuse checks are all re-derived on the
/// server; nothing monetary in the request is trusted.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
    shipping: ShippingService,
    promotions: PromotionService,
    fraud: FraudGuard,
}

impl CheckoutService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            pricing: PricingService::new(db.clone()),
            shipping: ShippingService::new(db.clone()),
            promotions: PromotionService::new(db.clone()),
            fraud: FraudGuard::new(db.clone()),
            db,
            event_sender,
        }
    }

    #[instrument(skip(self, request, settings), fields(user_id = ?user.user_id()))]
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
        user: CurrentUser,
        settings: &CheckoutSettings,
    ) -> Result<PlacedOrder, ServiceError> {
        let result = self.verify_and_place(request, user, settings).await;
        match &result {
            Ok(placed) => {
                info!(
                    order_id = %placed.order_id,
                    order_number = %placed.order_number,
                    total = %placed.total,
                    "Order placed"
                );
            }
            Err(e) => {
                metrics::record_checkout_rejection(e.code());
                warn!(code = e.code(), "Checkout rejected: {}", e);
            }
        }
        result
    }

    async fn verify_and_place(
        &self,
        request: PlaceOrderRequest,
        user: CurrentUser,
        settings: &CheckoutSettings,
    ) -> Result<PlacedOrder, ServiceError> {
        let validated = validate_request(&request, settings)?;
        let now = Utc::now();

        self.fraud
            .check(&validated.phone, user.user_id(), settings, now)
            .await?;

        let product_ids: Vec<Uuid> = validated.lines.iter().map(|(id, _)| *id).collect();
        let (products, zones, promo) = tokio::try_join!(
            self.pricing.fetch_products(&product_ids),
            self.shipping.active_zones(),
            self.lookup_promo(validated.promo_code.as_deref()),
        )?;

        let cart = price_lines(&validated.lines, &products)?;

        let shipping_cost = resolve_shipping_cost(
            validated.shipping_method.as_deref(),
            &validated.address.district,
            &zones,
            cart.subtotal,
            settings,
        );

        let discount = promo
            .as_ref()
            .map(|p| promotions::calculate_discount(p, cart.subtotal, now))
            .unwrap_or(Decimal::ZERO);
        let applied_promo = promo.filter(|_| discount > Decimal::ZERO);

        let cod_charge = if validated.payment_method.is_cash_on_delivery() {
            settings.cod_surcharge
        } else {
            Decimal::ZERO
        };

        let totals = compute_totals(cart.subtotal, shipping_cost, cod_charge, discount);
        if let Some(client_total) = validated.client_total {
            if client_total != totals.total {
                warn!(
                    %client_total,
                    server_total = %totals.total,
                    "Client total differs from server total; using server total"
                );
            }
        }

        let placed = self
            .persist(&validated, &cart, &totals, applied_promo.as_ref(), user, now)
            .await?;

        metrics::record_order_placed(&validated.payment_method.to_string());

        // Best-effort follow-ups: the order is committed, failures below only log.
        if let Some(promo) = &applied_promo {
            if let Err(e) = self
                .promotions
                .record_usage(promo.id, placed.order_id, user.user_id(), totals.discount_amount)
                .await
            {
                warn!(promo_code = %promo.code, "Failed to record promo usage: {}", e);
            }
        }

        if let Some(user_id) = user.user_id() {
            if let Err(e) = self.clear_cart(user_id).await {
                warn!(%user_id, "Failed to clear cart after checkout: {}", e);
            }
        }

        let event = Event::OrderPlaced {
            order_id: placed.order_id,
            order_number: placed.order_number.clone(),
            status: placed.status,
            total: placed.total,
            customer_name: validated.address.name.clone(),
            phone: validated.phone.clone(),
            email: validated.address.email.clone(),
        };
        if let Err(e) = self.event_sender.publish(event) {
            warn!(order_id = %placed.order_id, "Failed to publish OrderPlaced: {}", e);
        }

        Ok(placed)
    }

    async fn lookup_promo(
        &self,
        code: Option<&str>,
    ) -> Result<Option<promo_code::Model>, ServiceError> {
        match code {
            Some(code) => self.promotions.find_by_code(code).await,
            None => Ok(None),
        }
    }

    /// Writes the address, then the order and its lines in one transaction.
    ///
    /// A failed line insert rolls the whole transaction back, so the order row
    /// never becomes visible. The address row is left behind in that case.
    async fn persist(
        &self,
        validated: &ValidatedOrder,
        cart: &PricedCart,
        totals: &OrderTotals,
        promo: Option<&promo_code::Model>,
        user: CurrentUser,
        now: DateTime<Utc>,
    ) -> Result<PlacedOrder, ServiceError> {
        let address = address::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user.owner_id()),
            name: Set(validated.address.name.clone()),
            phone: Set(validated.phone.clone()),
            email: Set(validated.address.email.clone()),
            division: Set(validated.address.division.clone()),
            district: Set(validated.address.district.clone()),
            thana: Set(validated.address.thana.clone()),
            address_line: Set(validated.address.address_line.clone()),
            created_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .map_err(|e| {
            error!("Failed to save address: {}", e);
            ServiceError::PersistenceError(format!("failed to save address: {}", e))
        })?;

        let order_id = Uuid::new_v4();
        let status = validated.payment_method.initial_status();
        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(generate_order_number(now)),
            user_id: Set(user.user_id()),
            address_id: Set(Some(address.id)),
            status: Set(status),
            payment_method: Set(validated.payment_method),
            subtotal: Set(totals.subtotal),
            shipping_cost: Set(totals.shipping_cost),
            cod_charge: Set(totals.cod_charge),
            discount_amount: Set(totals.discount_amount),
            total: Set(totals.total),
            is_preorder: Set(cart.is_preorder),
            promo_code_id: Set(promo.map(|p| p.id)),
            transaction_id: Set(validated.transaction_id.clone()),
            shipping_method: Set(validated.shipping_method.clone()),
            notes: Set(validated.notes.clone()),
            tracking_number: Set(None),
            courier_provider_id: Set(None),
            dispatched_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let txn = self.db.begin().await.map_err(|e| {
            ServiceError::PersistenceError(format!("failed to start transaction: {}", e))
        })?;

        let saved = match order_model.insert(&txn).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(%order_id, "Failed to save order: {}", e);
                if let Err(rb) = txn.rollback().await {
                    error!(%order_id, "Rollback failed: {}", rb);
                }
                return Err(ServiceError::PersistenceError(format!(
                    "failed to save order: {}",
                    e
                )));
            }
        };

        for line in &cart.lines {
            let line_model = order_line::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                product_name: Set(line.product_name.clone()),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
                line_total: Set(line.line_total),
                is_preorder: Set(line.is_preorder),
                created_at: Set(now),
            };

            if let Err(e) = line_model.insert(&txn).await {
                error!(%order_id, product_id = %line.product_id, "Failed to save order line: {}", e);
                if let Err(rb) = txn.rollback().await {
                    error!(%order_id, "Rollback failed: {}", rb);
                }
                return Err(ServiceError::PersistenceError(format!(
                    "failed to save order lines: {}",
                    e
                )));
            }
        }

        txn.commit().await.map_err(|e| {
            error!(%order_id, "Failed to commit order: {}", e);
            ServiceError::PersistenceError(format!("failed to commit order: {}", e))
        })?;

        Ok(PlacedOrder {
            order_id: saved.id,
            order_number: saved.order_number,
            status: saved.status,
            subtotal: totals.subtotal,
            shipping_cost: totals.shipping_cost,
            cod_charge: totals.cod_charge,
            discount_amount: totals.discount_amount,
            total: totals.total,
            is_preorder: saved.is_preorder,
        })
    }

    async fn clear_cart(&self, user_id: Uuid) -> Result<(), ServiceError> {
        CartItem::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
