//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, FeedHub, PgFeedBridge, ResendDeliveryAdapter},
    config::Config,
    error::ApiError,
    web::{self, rest::ApiDoc, state::AppState},
};
use axum::{extract::DefaultBodyLimit, Router};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use twin_capture_core::{ports::DeliveryService, SessionCoordinator};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize the Delivery Adapter ---
    let delivery: Option<Arc<dyn DeliveryService>> = match &config.delivery {
        Some(settings) => Some(Arc::new(ResendDeliveryAdapter::new(
            reqwest::Client::new(),
            settings.api_key.clone(),
            settings.from.clone(),
            settings.to.clone(),
        ))),
        None => {
            warn!("RESEND_API_KEY is not set; recording delivery is disabled.");
            None
        }
    };

    // --- 3. Connect the Session Store & Change Feed ---
    let shutdown = CancellationToken::new();
    let app_state = match &config.database_url {
        Some(database_url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool.clone()));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");

            let hub = Arc::new(FeedHub::new(config.feed_capacity));
            let bridge = PgFeedBridge::new(db_pool, hub.clone());
            let bridge_cancel = shutdown.clone();
            tokio::spawn(async move {
                if let Err(e) = bridge.run(bridge_cancel).await {
                    error!("Change feed bridge stopped: {}", e);
                }
            });

            AppState {
                commands: Arc::new(SessionCoordinator::new(db_adapter)),
                feed: hub,
                delivery,
                config: config.clone(),
            }
        }
        None => {
            warn!("DATABASE_URL is not set; sessions are kept in memory only.");
            AppState::in_memory(config.clone(), delivery)
        }
    };
    let app_state = Arc::new(app_state);

    // --- 4. Create the Web Router ---
    // Base64 WAV uploads go through /deliveries, so the body limit is raised.
    let app = Router::new()
        .merge(web::router(app_state).layer(DefaultBodyLimit::max(25 * 1024 * 1024)))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received.");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
