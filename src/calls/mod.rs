use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::retell::RetellWebhook;
use crate::shared::error::ApiError;
use crate::shared::models::Call;
use crate::shared::schema::calls;
use crate::shared::state::AppState;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreateCallRequest {
    phone_number: String,
    direction: Option<String>,
    lead_id: Option<Uuid>,
    client_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct CallQuery {
    pub status: Option<String>,
    pub lead_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn create_call(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Call>, ApiError> {
    validate_body("calls", &body)?;
    let req: CreateCallRequest = serde_json::from_value(body)?;

    let now = Utc::now();
    let call = Call {
        id: Uuid::new_v4(),
        lead_id: req.lead_id,
        client_id: req.client_id,
        phone_number: req.phone_number,
        direction: req.direction.unwrap_or_else(|| "outbound".to_string()),
        status: "pending".to_string(),
        retell_call_id: None,
        transcript: None,
        summary: None,
        duration_seconds: None,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(calls::table)
        .values(&call)
        .execute(&mut conn)?;

    Ok(Json(call))
}

async fn list_calls(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallQuery>,
) -> Result<Json<Vec<Call>>, ApiError> {
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = calls::table.into_boxed();
    if let Some(status) = query.status {
        q = q.filter(calls::status.eq(status));
    }
    if let Some(lead_uuid) = query.lead_id {
        q = q.filter(calls::lead_id.eq(lead_uuid));
    }

    let rows: Vec<Call> = q
        .order(calls::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

async fn get_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Call>, ApiError> {
    let mut conn = state.conn.get()?;
    let call: Call = calls::table
        .filter(calls::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("call"))?;
    Ok(Json(call))
}

#[derive(AsChangeset)]
#[diesel(table_name = calls)]
struct CallChanges {
    phone_number: Option<String>,
    direction: Option<String>,
    updated_at: DateTime<Utc>,
}

fn call_changes(body: &Value) -> CallChanges {
    CallChanges {
        phone_number: body
            .get("phone_number")
            .and_then(Value::as_str)
            .map(str::to_string),
        direction: body
            .get("direction")
            .and_then(Value::as_str)
            .map(str::to_string),
        updated_at: Utc::now(),
    }
}

async fn update_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Call>, ApiError> {
    validate_partial("calls", &body)?;
    let changes = call_changes(&body);

    let mut conn = state.conn.get()?;

    let updated = diesel::update(calls::table.filter(calls::id.eq(id)))
        .set(&changes)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("call"));
    }

    let call: Call = calls::table.filter(calls::id.eq(id)).first(&mut conn)?;
    Ok(Json(call))
}

async fn delete_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(calls::table.filter(calls::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("call"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Kicks off the outbound call through Retell and stores the returned call
/// id so the webhook can find this record later.
async fn dial_call(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Call>, ApiError> {
    let call: Call = {
        let mut conn = state.conn.get()?;
        calls::table
            .filter(calls::id.eq(id))
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("call"))?
    };

    if call.retell_call_id.is_some() {
        return Err(ApiError::Conflict("call was already dialed".into()));
    }

    let metadata = serde_json::json!({
        "crm_call_id": call.id,
        "lead_id": call.lead_id,
    });
    let retell_id = state
        .retell
        .create_phone_call(&call.phone_number, metadata)
        .await?;

    let mut conn = state.conn.get()?;
    diesel::update(calls::table.filter(calls::id.eq(id)))
        .set((
            calls::retell_call_id.eq(&retell_id),
            calls::status.eq("dialing"),
            calls::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    info!("call {id} dialing via retell ({retell_id})");

    let call: Call = calls::table.filter(calls::id.eq(id)).first(&mut conn)?;
    Ok(Json(call))
}

#[derive(AsChangeset)]
#[diesel(table_name = calls)]
struct CallResult {
    transcript: Option<String>,
    summary: Option<String>,
    duration_seconds: Option<i32>,
    status: String,
    updated_at: DateTime<Utc>,
}

/// Retell posts call lifecycle events here. Unknown call ids are logged and
/// acknowledged so Retell stops retrying.
pub async fn retell_webhook(
    State(state): State<Arc<AppState>>,
    Json(hook): Json<RetellWebhook>,
) -> Result<StatusCode, ApiError> {
    if hook.event != "call_ended" && hook.event != "call_analyzed" {
        return Ok(StatusCode::OK);
    }

    let mut conn = state.conn.get()?;

    let existing: Option<Uuid> = calls::table
        .filter(calls::retell_call_id.eq(&hook.call.call_id))
        .select(calls::id)
        .first(&mut conn)
        .optional()?;

    let Some(call_uuid) = existing else {
        warn!("retell webhook for unknown call {}", hook.call.call_id);
        return Ok(StatusCode::OK);
    };

    let result = CallResult {
        transcript: hook.call.transcript.clone(),
        summary: hook
            .call
            .call_analysis
            .as_ref()
            .and_then(|a| a.call_summary.clone()),
        duration_seconds: hook.call.duration_ms.map(|ms| (ms / 1000) as i32),
        status: "completed".to_string(),
        updated_at: Utc::now(),
    };
    diesel::update(calls::table.filter(calls::id.eq(call_uuid)))
        .set(&result)
        .execute(&mut conn)?;

    info!("stored retell result for call {call_uuid}");
    Ok(StatusCode::OK)
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/calls", get(list_calls).post(create_call))
        .route(
            "/api/calls/:id",
            get(get_call).put(update_call).delete(delete_call),
        )
        .route("/api/calls/:id/dial", post(dial_call))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_touches_only_present_fields() {
        let changes = call_changes(&serde_json::json!({ "direction": "inbound" }));
        assert_eq!(changes.direction.as_deref(), Some("inbound"));
        assert!(changes.phone_number.is_none());
    }
}
