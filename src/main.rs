mod analytics;
mod booking_rules;
mod config;
mod connection;
mod db;
mod error;
mod event_rules;
mod handlers;
mod images;
mod models;
mod state;
mod validation;

use analytics::TracingAnalytics;
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use config::Config;
use connection::{ConnectionManager, SqliteConnector};
use images::LocalImageStore;
use state::AppState;
use std::path::Path;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

fn app(app_state: AppState, upload_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/events",
            get(handlers::get_events).post(handlers::create_event_handler),
        )
        .route(
            "/api/events/{slug}",
            get(handlers::get_event_details).patch(handlers::update_event_handler),
        )
        .route("/api/events/{slug}/similar", get(handlers::get_similar_events))
        .route("/api/bookings", post(handlers::create_booking_handler))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "grapplego=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Arc::new(ConnectionManager::new(
        config.database_url.clone(),
        config.connect_timeout,
        Arc::new(SqliteConnector {
            max_connections: config.max_connections,
        }),
    ));

    // connect eagerly so problems show up in the log; requests retry anyway
    if let Err(e) = db.acquire().await {
        tracing::warn!(error = %e, "database not available yet");
    }

    let app_state = AppState {
        db: Arc::clone(&db),
        images: Arc::new(LocalImageStore::new(
            &config.upload_dir,
            &config.public_base_url,
        )),
        analytics: Arc::new(TracingAnalytics),
    };

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "listening");

    axum::serve(listener, app(app_state, &config.upload_dir))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.release().await;
    Ok(())
}
