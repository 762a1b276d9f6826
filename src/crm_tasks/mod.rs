use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::models::Task;
use crate::shared::schema::tasks;
use crate::shared::state::AppState;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreateTaskRequest {
    title: String,
    description: Option<String>,
    lead_id: Option<Uuid>,
    client_id: Option<Uuid>,
    assigned_to: Option<Uuid>,
    due_date: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TaskQuery {
    pub status: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Accepts RFC 3339 timestamps or bare dates (midnight UTC).
pub fn parse_due_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Task>, ApiError> {
    validate_body("tasks", &body)?;
    let req: CreateTaskRequest = serde_json::from_value(body)?;

    let due_date = match req.due_date.as_deref() {
        Some(raw) => Some(
            parse_due_date(raw)
                .ok_or_else(|| ApiError::BadRequest("due_date is not a date".into()))?,
        ),
        None => None,
    };

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        lead_id: req.lead_id,
        client_id: req.client_id,
        assigned_to: req.assigned_to,
        title: req.title,
        description: req.description,
        due_date,
        status: "open".to_string(),
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(tasks::table)
        .values(&task)
        .execute(&mut conn)?;

    Ok(Json(task))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskQuery>,
) -> Result<Json<Vec<Task>>, ApiError> {
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = tasks::table.into_boxed();
    if let Some(status) = query.status {
        q = q.filter(tasks::status.eq(status));
    }
    if let Some(user_uuid) = query.assigned_to {
        q = q.filter(tasks::assigned_to.eq(user_uuid));
    }
    if let Some(lead_uuid) = query.lead_id {
        q = q.filter(tasks::lead_id.eq(lead_uuid));
    }

    let rows: Vec<Task> = q
        .order(tasks::due_date.asc().nulls_last())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let mut conn = state.conn.get()?;
    let task: Task = tasks::table
        .filter(tasks::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("task"))?;
    Ok(Json(task))
}

#[derive(AsChangeset)]
#[diesel(table_name = tasks)]
struct TaskChanges {
    title: Option<String>,
    description: Option<String>,
    status: Option<String>,
    due_date: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

fn task_changes(body: &Value) -> Result<TaskChanges, ApiError> {
    let status = match body.get("status").and_then(Value::as_str) {
        Some(status) if matches!(status, "open" | "done" | "cancelled") => {
            Some(status.to_string())
        }
        Some(_) => {
            return Err(ApiError::BadRequest(
                "status must be open, done or cancelled".into(),
            ))
        }
        None => None,
    };
    let due_date = match body.get("due_date").and_then(Value::as_str) {
        Some(raw) => Some(
            parse_due_date(raw)
                .ok_or_else(|| ApiError::BadRequest("due_date is not a date".into()))?,
        ),
        None => None,
    };

    Ok(TaskChanges {
        title: body.get("title").and_then(Value::as_str).map(str::to_string),
        description: body
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        status,
        due_date,
        updated_at: Utc::now(),
    })
}

async fn update_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Task>, ApiError> {
    validate_partial("tasks", &body)?;
    let changes = task_changes(&body)?;

    let mut conn = state.conn.get()?;

    let updated = diesel::update(tasks::table.filter(tasks::id.eq(id)))
        .set(&changes)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("task"));
    }

    let task: Task = tasks::table.filter(tasks::id.eq(id)).first(&mut conn)?;
    Ok(Json(task))
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, ApiError> {
    let mut conn = state.conn.get()?;

    let updated = diesel::update(tasks::table.filter(tasks::id.eq(id)))
        .set((tasks::status.eq("done"), tasks::updated_at.eq(Utc::now())))
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("task"));
    }

    let task: Task = tasks::table.filter(tasks::id.eq(id)).first(&mut conn)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(tasks::table.filter(tasks::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("task"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/tasks", get(list_tasks).post(create_task))
        .route(
            "/api/tasks/:id",
            get(get_task).put(update_task).delete(delete_task),
        )
        .route("/api/tasks/:id/complete", post(complete_task))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn due_date_accepts_both_formats() {
        assert!(parse_due_date("2026-09-15").is_some());
        assert!(parse_due_date("2026-09-15T10:30:00Z").is_some());
        assert!(parse_due_date("next Tuesday").is_none());
    }

    #[test]
    fn patch_rejects_unknown_status() {
        let err = task_changes(&serde_json::json!({ "status": "paused" }));
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn patch_parses_due_date_and_skips_absent_fields() {
        let changes = task_changes(&serde_json::json!({
            "status": "done",
            "due_date": "2026-09-15",
        }))
        .unwrap();
        assert_eq!(changes.status.as_deref(), Some("done"));
        assert!(changes.due_date.is_some());
        assert!(changes.title.is_none());
    }
}
