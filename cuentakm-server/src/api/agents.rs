//! Agent directory endpoint

use axum::{extract::State, routing::get, Json, Router};
use cuentakm_common::db::Agent;

use crate::{db, ApiResult, AppState};

/// GET /comerciales/
///
/// All agents as `{id, nombre}`, sorted by name.
pub async fn list_agents(State(state): State<AppState>) -> ApiResult<Json<Vec<Agent>>> {
    let agents = db::agents::list_agents(&state.db).await?;
    Ok(Json(agents))
}

pub fn agent_routes() -> Router<AppState> {
    Router::new().route("/comerciales/", get(list_agents))
}
