//! Reading endpoints
//!
//! - GET  /lecturas/estado/?comercial_id=  current week and allowed kind
//! - POST /lecturas/                       multipart submission
//! - GET  /lecturas/?comercial_id=         record listing, newest first

use axum::{
    extract::{Multipart, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use cuentakm_common::db::{Agent, Reading, ReadingKind};
use serde::{Deserialize, Serialize};

use crate::db::readings::{self, ReadingFilter};
use crate::services::{Submission, SubmissionOutcome};
use crate::{ApiError, ApiResult, AppState};

/// Compact view of a reading
#[derive(Debug, Serialize)]
pub struct ReadingSummary {
    pub id: i64,
    pub tipo_lectura: ReadingKind,
    pub kilometros: Option<u32>,
    pub semana: u32,
    pub anio: i32,
    pub created_at: DateTime<Utc>,
}

impl From<&Reading> for ReadingSummary {
    fn from(r: &Reading) -> Self {
        Self {
            id: r.id,
            tipo_lectura: r.kind,
            kilometros: r.odometer_km,
            semana: r.week,
            anio: r.year,
            created_at: r.created_at,
        }
    }
}

/// Listing view: summary plus flags
#[derive(Debug, Serialize)]
pub struct ReadingRecord {
    #[serde(flatten)]
    pub summary: ReadingSummary,
    pub fin_fuera_de_plazo: bool,
    pub inicio_no_cuadra: bool,
    /// Photo still retained (week not closed yet)
    pub foto_retenida: bool,
}

impl From<&Reading> for ReadingRecord {
    fn from(r: &Reading) -> Self {
        Self {
            summary: r.into(),
            fin_fuera_de_plazo: r.late_close,
            inicio_no_cuadra: r.continuity_mismatch,
            foto_retenida: r.photo_ref.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub comercial_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub comercial: Agent,
    pub semana_actual: u32,
    pub anio_actual: i32,
    /// Always exactly one kind
    pub allowed_types: Vec<ReadingKind>,
    pub last: Option<ReadingSummary>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub comercial: String,
    pub tipo_lectura: ReadingKind,
    pub kilometros: Option<u32>,
    pub semana: u32,
    pub anio: i32,
    pub kms_semana: Option<i64>,
    pub warning: Option<String>,
}

impl From<SubmissionOutcome> for SubmitResponse {
    fn from(outcome: SubmissionOutcome) -> Self {
        Self {
            comercial: outcome.agent.name,
            tipo_lectura: outcome.reading.kind,
            kilometros: outcome.reading.odometer_km,
            semana: outcome.reading.week,
            anio: outcome.reading.year,
            kms_semana: outcome.weekly_distance_km,
            warning: outcome.warning,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub comercial_id: Option<String>,
    pub tipo_lectura: Option<ReadingKind>,
    pub anio: Option<i32>,
    pub semana: Option<u32>,
    #[serde(default)]
    pub flagged: bool,
}

fn parse_agent_id(raw: Option<&str>) -> ApiResult<i64> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Falta comercial_id".to_string()))?;
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("comercial_id inválido: {}", raw)))
}

/// GET /lecturas/estado/
///
/// 400 if `comercial_id` is missing, 404 if the agent does not exist.
pub async fn reading_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<Json<StatusResponse>> {
    let agent_id = parse_agent_id(query.comercial_id.as_deref())?;
    let status = state.engine.status(agent_id).await?;

    Ok(Json(StatusResponse {
        comercial: status.agent,
        semana_actual: status.current_week,
        anio_actual: status.current_year,
        allowed_types: vec![status.state.allowed_next()],
        last: status.last.as_ref().map(ReadingSummary::from),
    }))
}

/// POST /lecturas/
///
/// Multipart fields: `comercial_id`, `tipo_lectura`, `imagen` (file).
/// 201 on success; 400 for missing fields, a kind not allowed now, or a
/// week end without week start; 404 for an unknown agent; 500 when the
/// odometer cannot be read.
pub async fn submit_reading(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let mut agent_id = None;
    let mut kind = None;
    let mut photo = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Formulario inválido: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "comercial_id" => {
                agent_id = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?)
            }
            "tipo_lectura" => {
                kind = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?)
            }
            "imagen" => {
                photo = Some(field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?)
            }
            _ => {}
        }
    }

    let agent_id = parse_agent_id(agent_id.as_deref())?;
    let photo = photo
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Falta imagen".to_string()))?;
    let kind: ReadingKind = kind
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest("Falta tipo_lectura".to_string()))?
        .parse()
        .map_err(|e: cuentakm_common::Error| ApiError::BadRequest(e.to_string()))?;

    let outcome = state
        .engine
        .submit(Submission {
            agent_id,
            kind,
            photo: photo.to_vec(),
        })
        .await?;

    Ok((StatusCode::CREATED, Json(outcome.into())))
}

/// GET /lecturas/
///
/// Optional filters: `tipo_lectura`, `anio`, `semana`, `flagged=true`.
pub async fn list_readings(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<ReadingRecord>>> {
    let agent_id = parse_agent_id(query.comercial_id.as_deref())?;
    if crate::db::agents::get_agent(&state.db, agent_id).await?.is_none() {
        return Err(ApiError::NotFound("Comercial no encontrado".to_string()));
    }

    let filter = ReadingFilter {
        kind: query.tipo_lectura,
        year: query.anio,
        week: query.semana,
        flagged_only: query.flagged,
    };
    let records = readings::list_readings(&state.db, agent_id, &filter).await?;

    Ok(Json(records.iter().map(ReadingRecord::from).collect()))
}

pub fn reading_routes() -> Router<AppState> {
    Router::new()
        .route("/lecturas/", get(list_readings).post(submit_reading))
        .route("/lecturas/estado/", get(reading_status))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_agent_id() {
        assert_eq!(parse_agent_id(Some(" 7 ")).unwrap(), 7);
        assert!(matches!(parse_agent_id(None), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_agent_id(Some("")), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_agent_id(Some("abc")), Err(ApiError::BadRequest(_))));
    }
}
