mod common;

use assert_matches::assert_matches;
use axum::http::{Method, StatusCode};
use common::{line, order_body, order_request, read_json, wait_for_notifications, TestApp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, DatabaseBackend, EntityTrait, PaginatorTrait, Set,
    Statement,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use storefront_api::{
    auth::CurrentUser,
    events::EventSender,
    services::commerce::CheckoutService,
    entities::{
        cart_item, store_setting, BlockKind, CartItem, DiscountType, Order, OrderStatus,
        PromoCode,
    },
    errors::ServiceError,
    notifications::NotificationKind,
    services::promotions::PromotionService,
};
use tokio::sync::mpsc;
use uuid::Uuid;

fn money(value: &serde_json::Value) -> Decimal {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("decimal number"),
    }
}

#[tokio::test]
async fn totals_are_recomputed_from_catalog_prices() {
    let app = TestApp::new().await;
    let product = app.seed_product("Cotton Panjabi", dec!(500), 10, false).await;
    app.seed_zone("Dhaka", dec!(60)).await;

    // The body claims a unit price of 1.00
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(product.id, 2, "01712345678")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let body = read_json(response).await;
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(money(&data["subtotal"]), dec!(1000));
    assert_eq!(money(&data["shipping_cost"]), dec!(60));
    assert_eq!(money(&data["discount_amount"]), Decimal::ZERO);
    assert_eq!(money(&data["total"]), dec!(1060));
    assert_eq!(data["status"], "confirmed");
}

#[tokio::test]
async fn prepaid_orders_wait_for_payment() {
    let app = TestApp::new().await;
    let product = app.seed_product("Saree", dec!(2500), 5, false).await;
    let settings = app.relaxed_settings();

    let placed = app
        .place(
            order_request(vec![line(product.id, 1)], "01812345678", "bkash"),
            CurrentUser::guest(),
            &settings,
        )
        .await
        .expect("bkash order placed");
    assert_eq!(placed.status, OrderStatus::PendingPayment);
    assert_eq!(placed.cod_charge, Decimal::ZERO);

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/payment-confirmation", placed.order_id),
            Some(serde_json::json!({ "transaction_id": "BK8X2Q" })),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["data"]["status"], "confirmed");
    assert_eq!(body["data"]["transaction_id"], "BK8X2Q");

    // Confirming twice is a conflict
    let again = app
        .request(
            Method::POST,
            &format!("/api/v1/orders/{}/payment-confirmation", placed.order_id),
            None,
            &[],
        )
        .await;
    assert_eq!(again.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn cod_surcharge_and_free_shipping_threshold_apply() {
    let app = TestApp::new().await;
    let product = app.seed_product("Bedsheet", dec!(1500), 10, false).await;
    let mut settings = app.relaxed_settings();
    settings.cod_surcharge = dec!(20);
    settings.free_shipping_threshold = Some(dec!(3000));

    // No zone for Sylhet, so the default cost applies, waived above the threshold.
    let mut request = order_request(vec![line(product.id, 2)], "01912345678", "cod");
    request.address.district = "Sylhet".to_string();
    let placed = app
        .place(request, CurrentUser::guest(), &settings)
        .await
        .expect("order placed");

    assert_eq!(placed.shipping_cost, Decimal::ZERO);
    assert_eq!(placed.cod_charge, dec!(20));
    assert_eq!(placed.total, dec!(3020));
}

#[tokio::test]
async fn ineligible_promo_codes_are_ignored() {
    let app = TestApp::new().await;
    let product = app.seed_product("Kurti", dec!(800), 20, false).await;
    let settings = app.relaxed_settings();

    app.seed_promo("EID50", DiscountType::Fixed, dec!(50), |p| {
        p.expires_at = Set(Some(common::minutes_ago(60)));
    })
    .await;
    app.seed_promo("LATER", DiscountType::Fixed, dec!(50), |p| {
        p.starts_at = Set(Some(chrono::Utc::now() + chrono::Duration::days(2)));
    })
    .await;
    app.seed_promo("USEDUP", DiscountType::Fixed, dec!(50), |p| {
        p.usage_limit = Set(Some(3));
        p.used_count = Set(3);
    })
    .await;
    app.seed_promo("BIGSPEND", DiscountType::Fixed, dec!(50), |p| {
        p.min_order_amount = Set(Some(dec!(5000)));
    })
    .await;

    for code in ["EID50", "LATER", "USEDUP", "BIGSPEND", "NOSUCHCODE"] {
        let mut request = order_request(vec![line(product.id, 1)], "01512345678", "cod");
        request.promo_code = Some(code.to_string());
        let placed = app
            .place(request, CurrentUser::guest(), &settings)
            .await
            .unwrap_or_else(|e| panic!("{code} should not fail checkout: {e}"));
        assert_eq!(placed.discount_amount, Decimal::ZERO, "{code}");
    }
}

#[tokio::test]
async fn eligible_promo_is_applied_and_counted() {
    let app = TestApp::new().await;
    let product = app.seed_product("Shirt", dec!(1000), 20, false).await;
    app.seed_zone("Dhaka", dec!(60)).await;
    let settings = app.relaxed_settings();
    let promo = app
        .seed_promo("WINTER10", DiscountType::Percentage, dec!(10), |p| {
            p.max_discount_amount = Set(Some(dec!(150)));
        })
        .await;

    let mut request = order_request(vec![line(product.id, 2)], "01312345678", "cod");
    request.promo_code = Some("  winter10 ".to_string());
    let placed = app
        .place(request, CurrentUser::guest(), &settings)
        .await
        .expect("order placed");

    // 10% of 2000 is 200, capped at 150
    assert_eq!(placed.discount_amount, dec!(150));
    assert_eq!(placed.total, dec!(1910));

    let stored = PromoCode::find_by_id(promo.id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.used_count, 1);

    let applications = PromotionService::new(app.db.clone())
        .applications_for_order(placed.order_id)
        .await
        .unwrap();
    assert_eq!(applications.len(), 1);
    assert_eq!(applications[0].promo_code_id, promo.id);
}

#[tokio::test]
async fn second_order_inside_the_spacing_window_is_rate_limited() {
    let app = TestApp::new().await;
    let product = app.seed_product("Mug", dec!(300), 50, false).await;
    let settings = app.state.config.checkout.clone();
    assert_eq!(settings.min_order_interval_secs, 30);

    app.place(
        order_request(vec![line(product.id, 1)], "01712000111", "cod"),
        CurrentUser::guest(),
        &settings,
    )
    .await
    .expect("first order placed");

    // Same number written in international form
    let second = app
        .place(
            order_request(vec![line(product.id, 1)], "+8801712000111", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(second, Err(ServiceError::RateLimitExceeded(_)));

    // A different phone is unaffected
    app.place(
        order_request(vec![line(product.id, 1)], "01712000222", "cod"),
        CurrentUser::guest(),
        &settings,
    )
    .await
    .expect("other phone placed");
}

#[tokio::test]
async fn daily_order_cap_is_enforced_per_phone() {
    let app = TestApp::new().await;
    let product = app.seed_product("Pen", dec!(20), 500, false).await;
    let mut settings = app.relaxed_settings();
    settings.max_orders_per_day = 2;

    for _ in 0..2 {
        app.place(
            order_request(vec![line(product.id, 1)], "01611000000", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await
        .expect("order under the cap");
    }

    let response = app
        .place(
            order_request(vec![line(product.id, 1)], "01611000000", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(response, Err(ServiceError::RateLimitExceeded(_)));
}

#[tokio::test]
async fn out_of_stock_names_available_quantity_unless_preorderable() {
    let app = TestApp::new().await;
    let scarce = app.seed_product("Silk Scarf", dec!(900), 1, false).await;
    let preorder = app.seed_product("Winter Jacket", dec!(3500), 1, true).await;
    let settings = app.relaxed_settings();

    let rejected = app
        .place(
            order_request(vec![line(scarce.id, 3)], "01711111111", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(
        rejected,
        Err(ServiceError::OutOfStock { product_id, available: 1, requested: 3, .. })
            if product_id == scarce.id
    );

    let placed = app
        .place(
            order_request(vec![line(preorder.id, 3)], "01711111111", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await
        .expect("preorder accepted");
    assert!(placed.is_preorder);
}

#[tokio::test]
async fn out_of_stock_response_carries_product_details() {
    let app = TestApp::new().await;
    let scarce = app.seed_product("Silk Scarf", dec!(900), 2, false).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(scarce.id, 5, "01722222222")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "out_of_stock");
    assert_eq!(body["details"]["name"], "Silk Scarf");
    assert_eq!(body["details"]["available"], 2);
}

#[tokio::test]
async fn unknown_or_inactive_products_abort_checkout() {
    let app = TestApp::new().await;
    let active = app.seed_product("Cap", dec!(250), 10, false).await;
    let retired = app.seed_inactive_product("Old Cap", dec!(200)).await;
    let missing = Uuid::new_v4();
    let settings = app.relaxed_settings();

    let result = app
        .place(
            order_request(
                vec![line(active.id, 1), line(missing, 1)],
                "01733333333",
                "cod",
            ),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(result, Err(ServiceError::ProductNotFound { product_id }) if product_id == missing);

    let result = app
        .place(
            order_request(vec![line(retired.id, 1)], "01733333333", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(result, Err(ServiceError::ProductUnavailable { .. }));

    assert_eq!(Order::find().count(&*app.db).await.unwrap(), 0);
}

#[tokio::test]
async fn blocked_phone_and_user_are_rejected() {
    let app = TestApp::new().await;
    let product = app.seed_product("Lamp", dec!(1200), 10, false).await;
    let blocked_user = Uuid::new_v4();
    app.block(BlockKind::Phone, "01744444444").await;
    app.block(BlockKind::User, &blocked_user.to_string()).await;
    let settings = app.relaxed_settings();

    let by_phone = app
        .place(
            order_request(vec![line(product.id, 1)], "01744444444", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(by_phone, Err(ServiceError::Blocked(_)));

    let user_header = blocked_user.to_string();
    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(product.id, 1, "01755555555")),
            &[("x-user-id", user_header.as_str())],
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_input_is_rejected_before_any_write() {
    let app = TestApp::new().await;
    let product = app.seed_product("Book", dec!(350), 10, false).await;

    let mut bad_phone = order_body(product.id, 1, "0171234");
    let response = app
        .request(Method::POST, "/api/v1/checkout/orders", Some(bad_phone.clone()), &[])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    bad_phone["address"]["phone"] = "01712345678".into();
    bad_phone["payment_method"] = "crypto".into();
    let response = app
        .request(Method::POST, "/api/v1/checkout/orders", Some(bad_phone), &[])
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["code"], "validation_error");

    assert_eq!(Order::find().count(&*app.db).await.unwrap(), 0);
}

#[tokio::test]
async fn failed_line_insert_leaves_no_order_behind() {
    let app = TestApp::new().await;
    let product = app.seed_product("Vase", dec!(700), 10, false).await;
    let settings = app.relaxed_settings();

    app.db
        .execute(Statement::from_string(
            DatabaseBackend::Sqlite,
            "DROP TABLE order_lines;".to_string(),
        ))
        .await
        .expect("drop order_lines");

    let result = app
        .place(
            order_request(vec![line(product.id, 1)], "01766666666", "cod"),
            CurrentUser::guest(),
            &settings,
        )
        .await;
    assert_matches!(result, Err(ServiceError::PersistenceError(_)));
    assert_eq!(Order::find().count(&*app.db).await.unwrap(), 0);
}

#[tokio::test]
async fn signed_in_checkout_clears_the_cart_and_notifies() {
    let app = TestApp::new().await;
    let product = app.seed_product("Headphones", dec!(2200), 10, false).await;
    let user_id = Uuid::new_v4();
    let settings = app.relaxed_settings();

    CartItem::insert(cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product.id),
        quantity: Set(1),
        created_at: Set(chrono::Utc::now()),
    })
    .exec(&*app.db)
    .await
    .expect("seed cart item");

    let placed = app
        .place(
            order_request(vec![line(product.id, 1)], "01777777777", "cod"),
            CurrentUser(Some(user_id)),
            &settings,
        )
        .await
        .expect("order placed");

    assert_eq!(CartItem::find().count(&*app.db).await.unwrap(), 0);

    let stored = Order::find_by_id(placed.order_id)
        .one(&*app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.user_id, Some(user_id));
    assert!(stored.order_number.starts_with("ORD-"));

    let delivered = wait_for_notifications(&app.notifications, 1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, NotificationKind::OrderConfirmation);
    assert_eq!(delivered[0].order_id, placed.order_id);
    assert_eq!(delivered[0].phone.as_deref(), Some("01777777777"));
}

#[tokio::test]
async fn store_settings_override_configured_defaults() {
    let app = TestApp::new().await;
    let product = app.seed_product("Notebook", dec!(100), 10, false).await;
    store_setting::ActiveModel {
        key: Set("default_shipping_cost".to_string()),
        value: Set("80".to_string()),
        updated_at: Set(chrono::Utc::now()),
    }
    .insert(&*app.db)
    .await
    .expect("insert setting");

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(product.id, 1, "01788888888")),
            &[],
        )
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(money(&body["data"]["shipping_cost"]), dec!(80));
}

#[tokio::test]
async fn checkout_returns_while_the_notification_queue_is_full() {
    let app = TestApp::new().await;
    let product = app.seed_product("Block Print Kameez", dec!(700), 10, false).await;
    let settings = app.relaxed_settings();

    // Room for one event and nobody reading
    let (tx, _rx) = mpsc::channel(1);
    let checkout = CheckoutService::new(app.db.clone(), Arc::new(EventSender::new(tx)));

    for phone in ["01711111111", "01722222222", "01733333333"] {
        let placed = tokio::time::timeout(
            Duration::from_secs(3),
            checkout.place_order(
                order_request(vec![line(product.id, 1)], phone, "cod"),
                CurrentUser::guest(),
                &settings,
            ),
        )
        .await
        .expect("checkout must not wait on the event queue");
        assert!(placed.is_ok(), "{:?}", placed.err());
    }

    assert_eq!(Order::find().count(&*app.db).await.unwrap(), 3);
}

#[tokio::test]
async fn out_of_range_store_settings_are_ignored() {
    let app = TestApp::new().await;
    let product = app.seed_product("Tant Saree", dec!(900), 10, false).await;
    for (key, value) in [
        ("min_order_interval_secs", "100000000000000000"),
        ("max_orders_per_day", "0"),
        ("max_cart_items", "0"),
    ] {
        store_setting::ActiveModel {
            key: Set(key.to_string()),
            value: Set(value.to_string()),
            updated_at: Set(chrono::Utc::now()),
        }
        .insert(&*app.db)
        .await
        .expect("insert setting");
    }

    let settings = app
        .state
        .services
        .settings
        .checkout_settings()
        .await
        .expect("settings load");
    assert_eq!(settings, app.state.config.checkout);

    let first = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(product.id, 1, "01744444444")),
            &[],
        )
        .await;
    assert_eq!(first.status(), StatusCode::CREATED);

    // The configured 30 second spacing still applies
    let second = app
        .request(
            Method::POST,
            "/api/v1/checkout/orders",
            Some(order_body(product.id, 1, "01744444444")),
            &[],
        )
        .await;
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}
