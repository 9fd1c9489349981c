//! cuentakm-server library
//!
//! Weekly odometer reading service: agents upload a photo of their
//! odometer at the start and end of each ISO week; the value is read by a
//! vision model, reconciled against the agent's history, and summarized to
//! administration by email.

use axum::extract::DefaultBodyLimit;
use axum::Router;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod error;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use crate::services::SubmissionEngine;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Reading workflow
    pub engine: Arc<SubmissionEngine>,
    /// Static assets; SPA shell at `dist/index.html`
    pub static_dir: PathBuf,
    /// Media root exposed at `/media` (development mode only)
    pub media_root: Option<PathBuf>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(db: SqlitePool, engine: Arc<SubmissionEngine>, static_dir: PathBuf) -> Self {
        Self {
            db,
            engine,
            static_dir,
            media_root: None,
            max_upload_bytes: 15 * 1024 * 1024,
        }
    }

    /// Serve uploaded photos under `/media`
    pub fn with_media(mut self, media_root: PathBuf) -> Self {
        self.media_root = Some(media_root);
        self
    }

    pub fn with_upload_limit(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }
}

/// Build application router
///
/// API routes are mounted both at the root and under `/api`.
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    let api = api::reading_routes()
        .merge(api::agent_routes())
        .layer(DefaultBodyLimit::max(state.max_upload_bytes));

    let mut router = Router::new()
        .merge(api.clone())
        .nest("/api", api)
        .merge(api::health_routes())
        .route("/", get(api::serve_index))
        .nest_service("/static", ServeDir::new(&state.static_dir));

    if let Some(media_root) = &state.media_root {
        router = router.nest_service("/media", ServeDir::new(media_root));
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}
