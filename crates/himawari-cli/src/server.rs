//! HTTP surface for `serve`.
//!
//! - `GET /update`: run one ingestion batch
//! - `GET /image[?sector=N]`: newest rendered image (`image/png`)
//! - `GET /stats`: stored artifacts
//! - `GET /`: liveness

use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use himawari_core::App;
use himawari_core::app::{ArtifactSummary, BatchReport};
use himawari_core::domain::Sector;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub app: Arc<App>,
    /// Cancelled when the server shuts down; in-flight reads stop with it.
    pub shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
pub struct ImageQuery {
    pub sector: Option<u8>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/update", get(update))
        .route("/image", get(image))
        .route("/stats", get(stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[tracing::instrument(level = "info", skip(state))]
pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let shutdown = state.shutdown.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "ctrl-c handler unavailable");
            }
            tracing::info!("shutting down");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

async fn index() -> &'static str {
    "himawari: ok\n"
}

async fn update(State(state): State<AppState>) -> Result<Json<BatchReport>, ApiError> {
    Ok(Json(state.app.ingest.run_batch().await?))
}

async fn image(
    State(state): State<AppState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response, ApiError> {
    let sector = match query.sector {
        Some(n) if state.app.config.schedule.sectors.contains(&Sector(n)) => Some(Sector(n)),
        Some(n) => return Err(ApiError::InvalidInput(format!("unknown sector {n}"))),
        None => None,
    };
    // buffered so a deadline hit becomes a 504 before any byte is sent
    let mut body = Vec::new();
    state
        .app
        .latest
        .read_latest(sector, &mut body, &state.shutdown)
        .await?;
    Ok(([(header::CONTENT_TYPE, "image/png")], body).into_response())
}

async fn stats(State(state): State<AppState>) -> Result<Json<Vec<ArtifactSummary>>, ApiError> {
    Ok(Json(state.app.catalog.summaries().await?))
}
