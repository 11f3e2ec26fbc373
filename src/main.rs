use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{routing::get, Router};
use tokio::signal;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer};
use tracing::{error, info};

use marketplace_payments as api;
use api::services::{
    notifications::EventNotifier,
    payments::{http_client, CheckoutService, GatewayRegistry},
    pricing::PricingService,
};

/// Upper bound for a whole request, provider round trips included.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);
    api::handlers::health::init_start_time();

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db = Arc::new(db_pool);
    let cfg = Arc::new(cfg);

    // Init events
    let (event_sender, event_rx) = api::events::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    // Build services
    let gateways = GatewayRegistry::standard(
        http_client(cfg.provider_timeout())?,
        Duration::from_secs(cfg.webhook_tolerance_secs),
    );
    let notifier = Arc::new(EventNotifier::new(event_sender.clone()));

    let app_state = api::AppState {
        db: db.clone(),
        config: cfg.clone(),
        pricing: PricingService::new(db.clone(), cfg.service_fee).with_events(event_sender.clone()),
        checkout: CheckoutService::new(db.clone(), gateways.clone(), cfg.clone()),
        webhooks: api::webhooks::WebhookService::new(db.clone(), gateways, notifier)
            .with_events(event_sender),
    };

    let cors_layer = if cfg.is_production() {
        CorsLayer::new()
    } else {
        CorsLayer::permissive()
    };

    let app = api::app_router(app_state)
        .route("/", get(|| async { "marketplace-payments" }))
        // HTTP tracing layer for consistent request/response telemetry
        .layer(api::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(cors_layer);

    serve(app, &cfg.host, cfg.port).await
}

async fn serve(app: Router, host: &str, port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let ip = host.parse().unwrap_or_else(|_| [0, 0, 0, 0].into());
    let addr = SocketAddr::new(ip, port);
    info!("marketplace-payments listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

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
                error!("failed to install SIGTERM handler: {}", e);
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
    info!("shutdown signal received");
}
