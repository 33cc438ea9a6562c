use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use tokio::{signal, sync::mpsc};
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use storefront_api as api;
use storefront_api::notifications::{
    LogNotificationSink, NotificationSink, WebhookNotificationSink,
};

const NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg)
        .await
        .context("failed to connect to database")?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events and the notification worker
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = Arc::new(api::events::EventSender::new(event_tx));
    let sink: Arc<dyn NotificationSink> = match cfg.notification_webhook_url.as_deref() {
        Some(url) => match WebhookNotificationSink::new(url, NOTIFICATION_TIMEOUT) {
            Ok(webhook) => {
                info!("Customer notifications delivered to webhook {}", url);
                Arc::new(webhook.with_retry(3, Duration::from_millis(500)))
            }
            Err(e) => {
                warn!("Invalid notification webhook, logging notifications instead: {}", e);
                Arc::new(LogNotificationSink)
            }
        },
        None => {
            info!("Notification webhook not configured; notifications are logged only");
            Arc::new(LogNotificationSink)
        }
    };
    tokio::spawn(api::events::process_events(event_rx, sink));

    // Courier adapters share one HTTP client and the per-provider token caches
    let registry = Arc::new(
        api::couriers::CourierRegistry::new(cfg.courier_timeout())
            .context("failed to build courier HTTP client")?,
    );

    let services =
        api::handlers::AppServices::new(db_arc.clone(), event_sender, registry, &cfg);
    let app_state = api::AppState {
        db: db_arc,
        config: cfg.clone(),
        services,
    };

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    let app = api::app_router(app_state)
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs)))
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http());

    // Bind and serve
    let host: std::net::IpAddr = cfg
        .host
        .parse()
        .with_context(|| format!("invalid host address '{}'", cfg.host))?;
    let addr = SocketAddr::new(host, cfg.port);
    info!("storefront-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
