use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::shared::error::ApiError;
use crate::shared::models::Client;
use crate::shared::schema::clients;
use crate::shared::state::AppState;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreateClientRequest {
    name: String,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    notes: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClientQuery {
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

async fn create_client(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Client>, ApiError> {
    validate_body("clients", &body)?;
    let req: CreateClientRequest = serde_json::from_value(body)?;

    let now = Utc::now();
    let client = Client {
        id: Uuid::new_v4(),
        name: req.name,
        company: req.company,
        email: req.email,
        phone: req.phone,
        address: req.address,
        notes: req.notes,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(clients::table)
        .values(&client)
        .execute(&mut conn)?;

    Ok(Json(client))
}

async fn list_clients(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClientQuery>,
) -> Result<Json<Vec<Client>>, ApiError> {
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = clients::table.into_boxed();
    if let Some(search) = query.search {
        let pattern = format!("%{search}%");
        q = q.filter(
            clients::name
                .ilike(pattern.clone())
                .or(clients::company.ilike(pattern.clone()))
                .or(clients::email.ilike(pattern)),
        );
    }

    let rows: Vec<Client> = q
        .order(clients::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

async fn get_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Client>, ApiError> {
    let mut conn = state.conn.get()?;
    let client: Client = clients::table
        .filter(clients::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("client"))?;
    Ok(Json(client))
}

#[derive(AsChangeset)]
#[diesel(table_name = clients)]
struct ClientChanges {
    name: Option<String>,
    company: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    address: Option<String>,
    notes: Option<String>,
    updated_at: DateTime<Utc>,
}

fn client_changes(body: &Value) -> ClientChanges {
    let field = |name: &str| {
        body.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
    };
    ClientChanges {
        name: field("name"),
        company: field("company"),
        email: field("email"),
        phone: field("phone"),
        address: field("address"),
        notes: field("notes"),
        updated_at: Utc::now(),
    }
}

async fn update_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<Value>,
) -> Result<Json<Client>, ApiError> {
    validate_partial("clients", &body)?;

    let mut conn = state.conn.get()?;

    let changes = client_changes(&body);
    let updated = diesel::update(clients::table.filter(clients::id.eq(id)))
        .set(&changes)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("client"));
    }

    let client: Client = clients::table.filter(clients::id.eq(id)).first(&mut conn)?;
    Ok(Json(client))
}

async fn delete_client(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted = diesel::delete(clients::table.filter(clients::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("client"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/clients", get(list_clients).post(create_client))
        .route(
            "/api/clients/:id",
            get(get_client).put(update_client).delete(delete_client),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn patch_touches_only_present_fields() {
        let changes = client_changes(&json!({ "phone": "+1 555 0100" }));
        assert_eq!(changes.phone.as_deref(), Some("+1 555 0100"));
        assert!(changes.name.is_none());
        assert!(changes.email.is_none());
        assert!(changes.notes.is_none());
    }
}
