//! # Call Bridge Backend - Main Application Entry Point
//!
//! Real-time bridge between a telephony carrier's media stream and a
//! conversational AI audio session. Each phone call arrives as a WebSocket on
//! `/ws/media`; the server transcodes audio both ways, handles turn taking and
//! barge-in, and walks the caller through a scripted list of questions.
//!
//! ## Application Architecture:
//! - **config**: Application configuration (TOML files + environment variables)
//! - **state**: Shared application state, metrics and the live call registry
//! - **websocket**: The media-stream gateway, one actor per call
//! - **bridge**: Per-call conversation state machine
//! - **audio**: µ-law/PCM transcoding and voice activity detection
//! - **session**: AI session contract and the Gemini Live client
//! - **workflow**: Question lists and the cursor that walks them
//! - **health / handlers**: HTTP monitoring and configuration endpoints
//! - **middleware**: Request metrics
//! - **error**: Custom error types and HTTP error responses

mod audio;
mod bridge;
mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod registry;
mod session;
mod state;
mod websocket;
mod workflow;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::AppConfig;
use crate::session::GeminiLiveConnector;
use crate::state::AppState;
use crate::workflow::WorkflowCatalog;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Loads the workflow catalog** and builds the AI session connector
/// 4. **Configures the HTTP server** with middleware and routes
/// 5. **Handles graceful shutdown** when receiving system signals
#[actix_web::main]
async fn main() -> Result<()> {
    // It's fine if there's no .env file
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting call-bridge-backend v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);

    let catalog = WorkflowCatalog::load(&config.workflows.path)?;

    if config.session.api_key.is_empty() {
        warn!("No AI session API key configured; calls will end as soon as they start");
    }
    let connector = GeminiLiveConnector::new(config.session.clone());

    let app_state = AppState::new(config.clone(), Arc::new(catalog), Arc::new(connector));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/ws/media", web::get().to(websocket::media_stream))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/config", web::get().to(handlers::get_config))
                    .route("/config", web::put().to(handlers::update_config))
                    .route("/calls", web::get().to(handlers::list_calls))
                    .route("/calls/{call_sid}", web::get().to(handlers::get_call))
                    .route("/calls/{call_sid}", web::delete().to(handlers::hang_up_call)),
            )
            // Also provide health check at root level for convenience
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .disable_signals()
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
            }
        }
        signal = shutdown_signal() => {
            match signal {
                Ok(name) => info!("Received {}, stopping server...", name),
                Err(e) => error!("Failed to listen for shutdown signals: {}", e),
            }
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize tracing.
///
/// `RUST_LOG` controls what gets logged; without it the default is
/// `call_bridge_backend=debug,actix_web=info`.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "call_bridge_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
#[cfg(unix)]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
