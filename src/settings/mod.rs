use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use chrono::Utc;
use diesel::prelude::*;
use log::info;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::AuthenticatedUser;
use crate::shared::error::ApiError;
use crate::shared::models::Setting;
use crate::shared::schema::settings;
use crate::shared::state::AppState;
use crate::validation::validate_setting_key;

async fn list_settings(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Setting>>, ApiError> {
    let mut conn = state.conn.get()?;
    let rows: Vec<Setting> = settings::table
        .order(settings::key.asc())
        .load(&mut conn)?;
    Ok(Json(rows))
}

async fn get_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<Json<Setting>, ApiError> {
    let mut conn = state.conn.get()?;
    let setting: Setting = settings::table
        .filter(settings::key.eq(&key))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("setting"))?;
    Ok(Json(setting))
}

/// Upsert. Only admins may change settings; reads are open to any
/// authenticated user.
async fn put_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
    Json(value): Json<Value>,
) -> Result<Json<Setting>, ApiError> {
    if !user.has_role("admin") {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }
    validate_setting_key(&key)?;

    let mut conn = state.conn.get()?;
    let now = Utc::now();

    let updated = diesel::update(settings::table.filter(settings::key.eq(&key)))
        .set((settings::value.eq(&value), settings::updated_at.eq(now)))
        .execute(&mut conn)?;

    if updated == 0 {
        let setting = Setting {
            id: Uuid::new_v4(),
            key: key.clone(),
            value,
            updated_at: now,
        };
        diesel::insert_into(settings::table)
            .values(&setting)
            .execute(&mut conn)?;
        info!("setting {key} created by {}", user.user_id);
        return Ok(Json(setting));
    }

    info!("setting {key} updated by {}", user.user_id);
    let setting: Setting = settings::table
        .filter(settings::key.eq(&key))
        .first(&mut conn)?;
    Ok(Json(setting))
}

async fn delete_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<StatusCode, ApiError> {
    if !user.has_role("admin") {
        return Err(ApiError::Forbidden("admin role required".to_string()));
    }

    let mut conn = state.conn.get()?;
    let deleted =
        diesel::delete(settings::table.filter(settings::key.eq(&key))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("setting"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/settings", get(list_settings))
        .route(
            "/api/settings/:key",
            get(get_setting).put(put_setting).delete(delete_setting),
        )
}
