//! # Fleetgate API Server
//!
//! The main entry point for the Actix-web HTTP server.

use actix_web::http::header::HeaderName;
use actix_web::{App, HttpServer, web};
use anyhow::Context;
use tracing_actix_web::TracingLogger;

mod config;
mod handlers;
mod middleware;
mod state;
mod telemetry;

use config::AppConfig;
use middleware::subject::SubjectResolver;
use state::AppState;
use telemetry::{TelemetryConfig, init_telemetry};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    init_telemetry(&TelemetryConfig::from_env());

    // Load configuration
    let config = AppConfig::from_env().context("invalid configuration")?;
    let subject_header = HeaderName::try_from(config.subject_header.as_str())
        .with_context(|| format!("invalid SUBJECT_HEADER '{}'", config.subject_header))?;

    tracing::info!(
        "Starting Fleetgate API Server on {}:{}",
        config.host,
        config.port
    );

    // Build application state
    let state = AppState::new(&config).await?;

    // Start HTTP server
    let server_state = state.clone();
    HttpServer::new(move || {
        let state = server_state.clone();
        App::new()
            .wrap(SubjectResolver::new(subject_header.clone()))
            .wrap(TracingLogger::default())
            .app_data(web::Data::new(state.clone()))
            .configure(|cfg| handlers::configure_routes(cfg, &state))
    })
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    tracing::info!(backend = ?state.backend, "Server stopped, releasing window store");
    drop(state);

    Ok(())
}
