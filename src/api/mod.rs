//! REST API server module
//!
//! Provides a REST API for creating export tasks, monitoring the pipeline,
//! downloading finished artifacts, and a per-task WebSocket progress channel.

use crate::{Config, ExportPipeline, Result};
use axum::{
    Router,
    http::HeaderValue,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

pub mod auth;
pub mod error_response;
pub mod openapi;
pub mod routes;
pub mod state;
pub mod ws;

pub use openapi::ApiDoc;
pub use state::AppState;

/// Create the API router with all route definitions
///
/// # Routes
///
/// ## Export Tasks
/// - `POST /exports` - Create export task (accepted as pending, runs in background)
/// - `GET /exports` - List export tasks (optionally filtered by user)
/// - `GET /exports/:id` - Get single export task
/// - `POST /exports/:id/cancel` - Cancel export
/// - `POST /exports/:id/retry` - Retry failed export
/// - `GET /exports/:id/download` - Stream the finished artifact
/// - `GET /exports/:id/progress` - WebSocket progress channel
///
/// ## System
/// - `GET /health` - Health check
/// - `GET /stats` - Gate and hub counters
/// - `GET /openapi.json` - OpenAPI specification
pub fn create_router(pipeline: ExportPipeline, config: Arc<Config>) -> Router {
    let state = AppState::new(pipeline, config.clone());

    let router = Router::new()
        // Export Tasks
        .route("/exports", post(routes::create_export))
        .route("/exports", get(routes::list_exports))
        .route("/exports/:id", get(routes::get_export))
        .route("/exports/:id/cancel", post(routes::cancel_export))
        .route("/exports/:id/retry", post(routes::retry_export))
        .route("/exports/:id/download", get(routes::download_export))
        // System
        .route("/health", get(routes::health_check))
        .route("/stats", get(routes::get_stats))
        .route("/openapi.json", get(routes::openapi_spec));

    // Apply authentication middleware if an API key is configured. The
    // WebSocket route is mounted after this layer: browsers cannot set
    // headers on a WS handshake, so it validates the key itself from a
    // query parameter and closes with a policy violation on mismatch.
    let router = if config.api.api_key.is_some() {
        router.layer(middleware::from_fn_with_state(
            config.api.api_key.clone(),
            auth::require_api_key,
        ))
    } else {
        router
    };

    let router = router
        .route("/exports/:id/progress", get(ws::progress_socket))
        .with_state(state);

    // Apply CORS middleware if enabled in config
    if config.api.cors_enabled {
        let cors = build_cors_layer(&config.api.cors_origins);
        router.layer(cors)
    } else {
        router
    }
}

/// Build a CORS layer based on configured origins
///
/// Allows the specified origins (or any origin when the list contains "*" or
/// is empty), all methods, and all headers for cross-origin requests.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_any = origins.iter().any(|o| o == "*");

    if allow_any || origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let allowed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// Start the API server on the configured bind address.
///
/// Creates a TCP listener, binds it to the configured address, and serves
/// the API router until the server is shut down.
pub async fn start_api_server(pipeline: ExportPipeline, config: Arc<Config>) -> Result<()> {
    let bind_address = config.api.bind_address;

    tracing::info!(
        address = %bind_address,
        "Starting API server"
    );

    let app = create_router(pipeline, config);

    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(crate::error::Error::Io)?;

    tracing::info!(
        address = %bind_address,
        "API server listening"
    );

    axum::serve(listener, app)
        .await
        .map_err(|e| crate::error::Error::ApiServerError(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
