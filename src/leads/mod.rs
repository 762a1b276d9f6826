use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::info;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::{ApiError, FieldError};
use crate::shared::models::{Lead, PipelineStage};
use crate::shared::schema::{leads, pipeline_stages};
use crate::shared::state::AppState;
use crate::shared::utils::with_deadlock_retry;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreateLeadRequest {
    title: String,
    pipeline_id: Uuid,
    stage_id: Option<Uuid>,
    client_id: Option<Uuid>,
    description: Option<String>,
    value: Option<f64>,
    currency: Option<String>,
    source: Option<String>,
    assigned_to: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct LeadQuery {
    pub pipeline_id: Option<Uuid>,
    pub stage_id: Option<Uuid>,
    pub assigned_to: Option<Uuid>,
    pub search: Option<String>,
    pub open_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct MoveLeadRequest {
    stage_id: Uuid,
}

/// The one cross-row rule the handlers own: a lead may only sit on a stage
/// of its own pipeline.
fn check_stage_scope(
    stage: Option<PipelineStage>,
    pipeline_uuid: Uuid,
) -> Result<PipelineStage, ApiError> {
    match stage {
        Some(stage) if stage.pipeline_id == pipeline_uuid => Ok(stage),
        Some(_) => Err(ApiError::Validation(vec![FieldError {
            field: "stage_id".to_string(),
            message: "stage belongs to a different pipeline".to_string(),
        }])),
        None => Err(ApiError::NotFound("stage")),
    }
}

fn stage_in_pipeline(
    conn: &mut PgConnection,
    stage_uuid: Uuid,
    pipeline_uuid: Uuid,
) -> Result<PipelineStage, ApiError> {
    let stage: Option<PipelineStage> = pipeline_stages::table
        .filter(pipeline_stages::id.eq(stage_uuid))
        .first(conn)
        .optional()?;
    check_stage_scope(stage, pipeline_uuid)
}

fn first_stage_of(conn: &mut PgConnection, pipeline_uuid: Uuid) -> Result<PipelineStage, ApiError> {
    pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .order(pipeline_stages::sort_order.asc())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline stage"))
}

async fn create_lead(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Lead>, ApiError> {
    validate_body("leads", &body)?;
    let req: CreateLeadRequest = serde_json::from_value(body)?;

    let mut conn = state.conn.get()?;

    // a lead always lands on a stage of its own pipeline
    let stage = match req.stage_id {
        Some(stage_uuid) => stage_in_pipeline(&mut conn, stage_uuid, req.pipeline_id)?,
        None => first_stage_of(&mut conn, req.pipeline_id)?,
    };

    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        pipeline_id: req.pipeline_id,
        stage_id: stage.id,
        client_id: req.client_id,
        title: req.title,
        description: req.description,
        value: req.value,
        currency: req.currency.or_else(|| Some("USD".to_string())),
        source: req.source,
        assigned_to: req.assigned_to,
        created_at: now,
        updated_at: now,
        closed_at: None,
    };

    diesel::insert_into(leads::table)
        .values(&lead)
        .execute(&mut conn)?;

    info!("created lead {} in pipeline {}", lead.id, lead.pipeline_id);
    Ok(Json(lead))
}

async fn list_leads(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeadQuery>,
) -> Result<Json<Vec<Lead>>, ApiError> {
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = leads::table.into_boxed();

    if let Some(pipeline_uuid) = query.pipeline_id {
        q = q.filter(leads::pipeline_id.eq(pipeline_uuid));
    }
    if let Some(stage_uuid) = query.stage_id {
        q = q.filter(leads::stage_id.eq(stage_uuid));
    }
    if let Some(user_uuid) = query.assigned_to {
        q = q.filter(leads::assigned_to.eq(user_uuid));
    }
    if query.open_only.unwrap_or(false) {
        q = q.filter(leads::closed_at.is_null());
    }
    if let Some(search) = query.search {
        q = q.filter(leads::title.ilike(format!("%{search}%")));
    }

    let rows: Vec<Lead> = q
        .order(leads::updated_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

async fn get_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, ApiError> {
    let mut conn = state.conn.get()?;
    let lead: Lead = leads::table
        .filter(leads::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("lead"))?;
    Ok(Json(lead))
}

#[derive(AsChangeset)]
#[diesel(table_name = leads)]
struct LeadChanges {
    title: Option<String>,
    description: Option<String>,
    value: Option<f64>,
    currency: Option<String>,
    source: Option<String>,
    assigned_to: Option<Uuid>,
    stage_id: Option<Uuid>,
    closed_at: Option<Option<DateTime<Utc>>>,
    updated_at: DateTime<Utc>,
}

/// Collects the patch into one changeset; `stage` is the already-scope-checked
/// target stage when the body moves the lead.
fn lead_changes(body: &Value, stage: Option<&PipelineStage>) -> Result<LeadChanges, ApiError> {
    let mut changes = LeadChanges {
        title: None,
        description: None,
        value: None,
        currency: None,
        source: None,
        assigned_to: None,
        stage_id: None,
        closed_at: None,
        updated_at: Utc::now(),
    };

    if let Some(stage) = stage {
        changes.stage_id = Some(stage.id);
        changes.closed_at = Some(stage.is_final.then(Utc::now));
    }
    if let Some(title) = body.get("title").and_then(Value::as_str) {
        changes.title = Some(title.to_string());
    }
    if let Some(description) = body.get("description").and_then(Value::as_str) {
        changes.description = Some(description.to_string());
    }
    if let Some(value) = body.get("value").and_then(Value::as_f64) {
        changes.value = Some(value);
    }
    if let Some(currency) = body.get("currency").and_then(Value::as_str) {
        changes.currency = Some(currency.to_string());
    }
    if let Some(source) = body.get("source").and_then(Value::as_str) {
        changes.source = Some(source.to_string());
    }
    if let Some(assigned) = body.get("assigned_to").and_then(Value::as_str) {
        let user_uuid = Uuid::parse_str(assigned)
            .map_err(|_| ApiError::BadRequest("assigned_to is not a UUID".into()))?;
        changes.assigned_to = Some(user_uuid);
    }

    Ok(changes)
}

async fn update_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Lead>, ApiError> {
    validate_partial("leads", &body)?;

    let mut conn = state.conn.get()?;

    let existing: Lead = leads::table
        .filter(leads::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("lead"))?;

    // stage changes through this endpoint get the same pipeline check as a
    // kanban move
    let stage = match body.get("stage_id").and_then(Value::as_str) {
        Some(stage_str) => {
            let stage_uuid = Uuid::parse_str(stage_str)
                .map_err(|_| ApiError::BadRequest("stage_id is not a UUID".into()))?;
            Some(stage_in_pipeline(&mut conn, stage_uuid, existing.pipeline_id)?)
        }
        None => None,
    };

    let changes = lead_changes(&body, stage.as_ref())?;
    diesel::update(leads::table.filter(leads::id.eq(id)))
        .set(&changes)
        .execute(&mut conn)?;

    let lead: Lead = leads::table.filter(leads::id.eq(id)).first(&mut conn)?;
    Ok(Json(lead))
}

async fn delete_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(leads::table.filter(leads::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("lead"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// The kanban drag-and-drop transition. Checks the target stage belongs to
/// the lead's pipeline, then rewrites the stage reference. Concurrent moves
/// of the same lead are last-write-wins by design of the API contract; the
/// update itself retries on deadlocks.
pub async fn move_lead_to_stage(
    state: &Arc<AppState>,
    lead_uuid: Uuid,
    stage_uuid: Uuid,
) -> Result<Lead, ApiError> {
    let mut conn = state.conn.get()?;

    let lead: Lead = leads::table
        .filter(leads::id.eq(lead_uuid))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("lead"))?;

    let stage = stage_in_pipeline(&mut conn, stage_uuid, lead.pipeline_id)?;

    let closed_at = stage.is_final.then(Utc::now);
    with_deadlock_retry(|| {
        diesel::update(leads::table.filter(leads::id.eq(lead_uuid)))
            .set((
                leads::stage_id.eq(stage.id),
                leads::closed_at.eq(closed_at),
                leads::updated_at.eq(Utc::now()),
            ))
            .execute(&mut conn)
    })
    .await?;

    info!("lead {lead_uuid} moved to stage {} ({})", stage.id, stage.name);

    // moves also change board aggregates, so cached pipeline views go too
    state
        .response_cache
        .invalidate_prefixes(&["/api/leads", "/api/pipelines"])
        .await;

    let moved: Lead = leads::table
        .filter(leads::id.eq(lead_uuid))
        .first(&mut conn)?;
    Ok(moved)
}

async fn move_lead(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<MoveLeadRequest>,
) -> Result<Json<Lead>, ApiError> {
    let moved = move_lead_to_stage(&state, id, req.stage_id).await?;
    Ok(Json(moved))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/leads", get(list_leads).post(create_lead))
        .route(
            "/api/leads/:id",
            get(get_lead).put(update_lead).delete(delete_lead),
        )
        .route("/api/leads/:id/move", post(move_lead))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage(pipeline_uuid: Uuid, is_final: bool) -> PipelineStage {
        PipelineStage {
            id: Uuid::new_v4(),
            pipeline_id: pipeline_uuid,
            name: "Won".to_string(),
            sort_order: 3,
            probability: 100,
            is_final,
            color: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn stage_of_own_pipeline_passes_scope_check() {
        let pid = Uuid::new_v4();
        let s = stage(pid, false);
        let checked = check_stage_scope(Some(s.clone()), pid).unwrap();
        assert_eq!(checked.id, s.id);
    }

    #[test]
    fn stage_of_foreign_pipeline_is_a_validation_error() {
        let s = stage(Uuid::new_v4(), false);
        match check_stage_scope(Some(s), Uuid::new_v4()) {
            Err(ApiError::Validation(fields)) => {
                assert_eq!(fields.len(), 1);
                assert_eq!(fields[0].field, "stage_id");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn missing_stage_is_not_found() {
        assert!(matches!(
            check_stage_scope(None, Uuid::new_v4()),
            Err(ApiError::NotFound("stage"))
        ));
    }

    #[test]
    fn patch_collects_only_present_fields() {
        let body = json!({ "title": "New title", "value": 9000.0 });
        let changes = lead_changes(&body, None).unwrap();
        assert_eq!(changes.title.as_deref(), Some("New title"));
        assert_eq!(changes.value, Some(9000.0));
        assert!(changes.description.is_none());
        assert!(changes.stage_id.is_none());
        assert!(changes.closed_at.is_none());
    }

    #[test]
    fn moving_to_a_final_stage_stamps_closed_at() {
        let pid = Uuid::new_v4();
        let won = stage(pid, true);
        let changes = lead_changes(&json!({}), Some(&won)).unwrap();
        assert_eq!(changes.stage_id, Some(won.id));
        assert!(matches!(changes.closed_at, Some(Some(_))));

        let open = stage(pid, false);
        let changes = lead_changes(&json!({}), Some(&open)).unwrap();
        assert_eq!(changes.closed_at, Some(None));
    }

    #[test]
    fn bad_assignee_uuid_is_rejected() {
        let body = json!({ "assigned_to": "not-a-uuid" });
        assert!(matches!(
            lead_changes(&body, None),
            Err(ApiError::BadRequest(_))
        ));
    }
}
