//! SPA shell
//!
//! The front end is built separately into `<static_dir>/dist`; assets are
//! served by the `/static` file service and only the shell is handled here.

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::warn;

use crate::AppState;

/// GET /
pub async fn serve_index(State(state): State<AppState>) -> Response {
    let index_path = state.static_dir.join("dist").join("index.html");
    match tokio::fs::read_to_string(&index_path).await {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            warn!(path = %index_path.display(), error = %e, "SPA shell not available");
            (StatusCode::NOT_FOUND, "Front end not built").into_response()
        }
    }
}
