use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::models::{Lead, Pipeline, PipelineStage};
use crate::shared::schema::{leads, pipeline_stages, pipelines};
use crate::shared::state::AppState;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreatePipelineRequest {
    name: String,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreateStageRequest {
    name: String,
    probability: Option<i32>,
    is_final: Option<bool>,
    color: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReorderStagesRequest {
    stage_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PipelineDetail {
    #[serde(flatten)]
    pub pipeline: Pipeline,
    pub stages: Vec<PipelineStage>,
}

/// One kanban column: a stage, its leads, and the derived stage totals.
#[derive(Debug, Serialize)]
pub struct BoardColumn {
    pub stage: PipelineStage,
    pub leads: Vec<Lead>,
    pub count: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

#[derive(Debug, Serialize)]
pub struct PipelineBoard {
    pub pipeline: Pipeline,
    pub columns: Vec<BoardColumn>,
    pub total_deals: usize,
    pub total_value: f64,
    pub weighted_value: f64,
}

/// Groups leads under their stages and derives the per-stage and board
/// totals in one pass. Weighted value = value × stage probability / 100.
pub fn build_board(pipeline: Pipeline, stages: Vec<PipelineStage>, all_leads: Vec<Lead>) -> PipelineBoard {
    let mut columns: Vec<BoardColumn> = stages
        .into_iter()
        .map(|stage| BoardColumn {
            stage,
            leads: Vec::new(),
            count: 0,
            total_value: 0.0,
            weighted_value: 0.0,
        })
        .collect();

    for lead in all_leads {
        if let Some(column) = columns.iter_mut().find(|c| c.stage.id == lead.stage_id) {
            let value = lead.value.unwrap_or(0.0);
            column.count += 1;
            column.total_value += value;
            column.weighted_value += value * f64::from(column.stage.probability) / 100.0;
            column.leads.push(lead);
        }
    }

    let total_deals = columns.iter().map(|c| c.count).sum();
    let total_value = columns.iter().map(|c| c.total_value).sum();
    let weighted_value = columns.iter().map(|c| c.weighted_value).sum();

    PipelineBoard {
        pipeline,
        columns,
        total_deals,
        total_value,
        weighted_value,
    }
}

async fn list_pipelines(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Pipeline>>, ApiError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<Pipeline> = pipelines::table
        .order(pipelines::created_at.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

async fn create_pipeline(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Pipeline>, ApiError> {
    validate_body("pipelines", &body)?;
    let req: CreatePipelineRequest = serde_json::from_value(body)?;

    let pipeline = Pipeline {
        id: Uuid::new_v4(),
        name: req.name,
        description: req.description,
        created_at: Utc::now(),
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(pipelines::table)
        .values(&pipeline)
        .execute(&mut conn)?;

    info!("created pipeline {}", pipeline.id);
    Ok(Json(pipeline))
}

async fn get_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineDetail>, ApiError> {
    let mut conn = state.conn.get()?;

    let pipeline: Pipeline = pipelines::table
        .filter(pipelines::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline"))?;

    let stages: Vec<PipelineStage> = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(id))
        .order(pipeline_stages::sort_order.asc())
        .load(&mut conn)?;

    Ok(Json(PipelineDetail { pipeline, stages }))
}

async fn update_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Pipeline>, ApiError> {
    validate_partial("pipelines", &body)?;

    let mut conn = state.conn.get()?;

    if let Some(name) = body.get("name").and_then(Value::as_str) {
        diesel::update(pipelines::table.filter(pipelines::id.eq(id)))
            .set(pipelines::name.eq(name))
            .execute(&mut conn)?;
    }
    if let Some(description) = body.get("description").and_then(Value::as_str) {
        diesel::update(pipelines::table.filter(pipelines::id.eq(id)))
            .set(pipelines::description.eq(description))
            .execute(&mut conn)?;
    }

    let pipeline: Pipeline = pipelines::table
        .filter(pipelines::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline"))?;
    Ok(Json(pipeline))
}

async fn delete_pipeline(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;

    let attached: i64 = leads::table
        .filter(leads::pipeline_id.eq(id))
        .count()
        .get_result(&mut conn)?;
    if attached > 0 {
        return Err(ApiError::Conflict(format!(
            "pipeline still has {attached} lead(s)"
        )));
    }

    diesel::delete(pipeline_stages::table.filter(pipeline_stages::pipeline_id.eq(id)))
        .execute(&mut conn)?;
    let deleted = diesel::delete(pipelines::table.filter(pipelines::id.eq(id)))
        .execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("pipeline"));
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn create_stage(
    State(state): State<Arc<AppState>>,
    Path(pipeline_uuid): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<PipelineStage>, ApiError> {
    validate_body("stages", &body)?;
    let req: CreateStageRequest = serde_json::from_value(body)?;

    let mut conn = state.conn.get()?;

    let exists: i64 = pipelines::table
        .filter(pipelines::id.eq(pipeline_uuid))
        .count()
        .get_result(&mut conn)?;
    if exists == 0 {
        return Err(ApiError::NotFound("pipeline"));
    }

    // append to the end of the board
    let max_order: Option<i32> = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .select(diesel::dsl::max(pipeline_stages::sort_order))
        .first(&mut conn)?;

    let stage = PipelineStage {
        id: Uuid::new_v4(),
        pipeline_id: pipeline_uuid,
        name: req.name,
        sort_order: max_order.unwrap_or(-1) + 1,
        probability: req.probability.unwrap_or(10).clamp(0, 100),
        is_final: req.is_final.unwrap_or(false),
        color: req.color,
        created_at: Utc::now(),
    };

    diesel::insert_into(pipeline_stages::table)
        .values(&stage)
        .execute(&mut conn)?;

    Ok(Json(stage))
}

async fn update_stage(
    State(state): State<Arc<AppState>>,
    Path((pipeline_uuid, stage_uuid)): Path<(Uuid, Uuid)>,
    Json(body): Json<Value>,
) -> Result<Json<PipelineStage>, ApiError> {
    validate_partial("stages", &body)?;

    let mut conn = state.conn.get()?;

    if let Some(name) = body.get("name").and_then(Value::as_str) {
        diesel::update(
            pipeline_stages::table
                .filter(pipeline_stages::id.eq(stage_uuid))
                .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid)),
        )
        .set(pipeline_stages::name.eq(name))
        .execute(&mut conn)?;
    }
    if let Some(probability) = body.get("probability").and_then(Value::as_i64) {
        diesel::update(
            pipeline_stages::table
                .filter(pipeline_stages::id.eq(stage_uuid))
                .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid)),
        )
        .set(pipeline_stages::probability.eq((probability as i32).clamp(0, 100)))
        .execute(&mut conn)?;
    }
    if let Some(is_final) = body.get("is_final").and_then(Value::as_bool) {
        diesel::update(
            pipeline_stages::table
                .filter(pipeline_stages::id.eq(stage_uuid))
                .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid)),
        )
        .set(pipeline_stages::is_final.eq(is_final))
        .execute(&mut conn)?;
    }
    if let Some(color) = body.get("color").and_then(Value::as_str) {
        diesel::update(
            pipeline_stages::table
                .filter(pipeline_stages::id.eq(stage_uuid))
                .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid)),
        )
        .set(pipeline_stages::color.eq(color))
        .execute(&mut conn)?;
    }

    let stage: PipelineStage = pipeline_stages::table
        .filter(pipeline_stages::id.eq(stage_uuid))
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("stage"))?;
    Ok(Json(stage))
}

async fn delete_stage(
    State(state): State<Arc<AppState>>,
    Path((pipeline_uuid, stage_uuid)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;

    let attached: i64 = leads::table
        .filter(leads::stage_id.eq(stage_uuid))
        .count()
        .get_result(&mut conn)?;
    if attached > 0 {
        return Err(ApiError::Conflict(format!(
            "stage still has {attached} lead(s)"
        )));
    }

    let deleted = diesel::delete(
        pipeline_stages::table
            .filter(pipeline_stages::id.eq(stage_uuid))
            .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid)),
    )
    .execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("stage"));
    }

    Ok(StatusCode::NO_CONTENT)
}

/// True when `proposed` lists exactly the ids in `existing`, each once.
/// Length alone is not enough: a duplicated id would slip a stage out of
/// the ordering.
fn is_exact_permutation(existing: &[Uuid], proposed: &[Uuid]) -> bool {
    if existing.len() != proposed.len() {
        return false;
    }
    let proposed: HashSet<Uuid> = proposed.iter().copied().collect();
    proposed.len() == existing.len() && existing.iter().all(|id| proposed.contains(id))
}

async fn reorder_stages(
    State(state): State<Arc<AppState>>,
    Path(pipeline_uuid): Path<Uuid>,
    Json(req): Json<ReorderStagesRequest>,
) -> Result<Json<Vec<PipelineStage>>, ApiError> {
    let mut conn = state.conn.get()?;

    let existing: Vec<Uuid> = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .select(pipeline_stages::id)
        .load(&mut conn)?;

    if !is_exact_permutation(&existing, &req.stage_ids) {
        return Err(ApiError::BadRequest(
            "stage_ids must list every stage of the pipeline exactly once".into(),
        ));
    }

    for (position, stage_uuid) in req.stage_ids.iter().enumerate() {
        diesel::update(pipeline_stages::table.filter(pipeline_stages::id.eq(stage_uuid)))
            .set(pipeline_stages::sort_order.eq(position as i32))
            .execute(&mut conn)?;
    }

    let stages: Vec<PipelineStage> = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .order(pipeline_stages::sort_order.asc())
        .load(&mut conn)?;
    Ok(Json(stages))
}

async fn get_board(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PipelineBoard>, ApiError> {
    let mut conn = state.conn.get()?;

    let pipeline: Pipeline = pipelines::table
        .filter(pipelines::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline"))?;

    let stages: Vec<PipelineStage> = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(id))
        .order(pipeline_stages::sort_order.asc())
        .load(&mut conn)?;

    let board_leads: Vec<Lead> = leads::table
        .filter(leads::pipeline_id.eq(id))
        .order(leads::updated_at.desc())
        .load(&mut conn)?;

    Ok(Json(build_board(pipeline, stages, board_leads)))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pipelines", get(list_pipelines).post(create_pipeline))
        .route(
            "/api/pipelines/:id",
            get(get_pipeline).put(update_pipeline).delete(delete_pipeline),
        )
        .route("/api/pipelines/:id/board", get(get_board))
        .route(
            "/api/pipelines/:id/stages",
            axum::routing::post(create_stage),
        )
        .route("/api/pipelines/:id/stages/reorder", put(reorder_stages))
        .route(
            "/api/pipelines/:id/stages/:stage_id",
            put(update_stage).delete(delete_stage),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn stage(pipeline_id: Uuid, order: i32, probability: i32) -> PipelineStage {
        PipelineStage {
            id: Uuid::new_v4(),
            pipeline_id,
            name: format!("Stage {order}"),
            sort_order: order,
            probability,
            is_final: false,
            color: None,
            created_at: Utc::now(),
        }
    }

    fn lead(pipeline_id: Uuid, stage_id: Uuid, value: Option<f64>) -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            pipeline_id,
            stage_id,
            client_id: None,
            title: "Lead".to_string(),
            description: None,
            value,
            currency: Some("USD".to_string()),
            source: None,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[test]
    fn board_aggregates_per_stage_and_totals() {
        let pid = Uuid::new_v4();
        let s1 = stage(pid, 0, 20);
        let s2 = stage(pid, 1, 75);
        let pipeline = Pipeline {
            id: pid,
            name: "Sales".into(),
            description: None,
            created_at: Utc::now(),
        };

        let board = build_board(
            pipeline,
            vec![s1.clone(), s2.clone()],
            vec![
                lead(pid, s1.id, Some(10_000.0)),
                lead(pid, s1.id, Some(30_000.0)),
                lead(pid, s2.id, Some(50_000.0)),
                lead(pid, s2.id, None),
            ],
        );

        assert_eq!(board.columns.len(), 2);
        assert_eq!(board.columns[0].count, 2);
        assert_eq!(board.columns[0].total_value, 40_000.0);
        assert_eq!(board.columns[0].weighted_value, 8_000.0);
        assert_eq!(board.columns[1].count, 2);
        assert_eq!(board.columns[1].total_value, 50_000.0);
        assert_eq!(board.columns[1].weighted_value, 37_500.0);
        assert_eq!(board.total_deals, 4);
        assert_eq!(board.total_value, 90_000.0);
        assert_eq!(board.weighted_value, 45_500.0);
    }

    #[test]
    fn board_keeps_empty_columns() {
        let pid = Uuid::new_v4();
        let s1 = stage(pid, 0, 10);
        let pipeline = Pipeline {
            id: pid,
            name: "Sales".into(),
            description: None,
            created_at: Utc::now(),
        };
        let board = build_board(pipeline, vec![s1], vec![]);
        assert_eq!(board.columns.len(), 1);
        assert_eq!(board.columns[0].count, 0);
        assert_eq!(board.total_deals, 0);
    }

    #[test]
    fn reorder_accepts_a_true_permutation() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(is_exact_permutation(&[a, b, c], &[c, a, b]));
    }

    #[test]
    fn reorder_rejects_duplicates_and_gaps() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        // duplicate hides a missing stage behind a matching length
        assert!(!is_exact_permutation(&[a, b], &[a, a]));
        assert!(!is_exact_permutation(&[a, b], &[a]));
        assert!(!is_exact_permutation(&[a, b], &[a, b, b]));
        assert!(!is_exact_permutation(&[a, b], &[a, Uuid::new_v4()]));
    }

    #[test]
    fn leads_from_foreign_stages_are_ignored() {
        let pid = Uuid::new_v4();
        let s1 = stage(pid, 0, 10);
        let stray = lead(pid, Uuid::new_v4(), Some(99.0));
        let pipeline = Pipeline {
            id: pid,
            name: "Sales".into(),
            description: None,
            created_at: Utc::now(),
        };
        let board = build_board(pipeline, vec![s1], vec![stray]);
        assert_eq!(board.total_deals, 0);
        assert_eq!(board.total_value, 0.0);
    }
}
