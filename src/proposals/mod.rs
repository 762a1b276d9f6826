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

use crate::llm::{ChatMessage, LlmProvider};
use crate::shared::error::ApiError;
use crate::shared::models::{Client, Lead, Proposal};
use crate::shared::schema::{clients, leads, proposals};
use crate::shared::state::AppState;
use crate::validation::{validate_body, validate_partial};

#[derive(Debug, Deserialize)]
struct CreateProposalRequest {
    lead_id: Uuid,
    title: String,
    body: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalQuery {
    pub lead_id: Option<Uuid>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GenerateProposalRequest {
    lead_id: Uuid,
    notes: Option<String>,
}

const PROPOSAL_PROMPT: &str = "You write commercial proposals for a construction \
company. Produce a concise proposal document in plain text with these sections: \
Scope of Work, Timeline, Investment, Terms. Use the deal details provided. \
Do not invent prices that were not given; leave placeholders instead.";

async fn create_proposal(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Value>,
) -> Result<Json<Proposal>, ApiError> {
    validate_body("proposals", &body)?;
    let req: CreateProposalRequest = serde_json::from_value(body)?;

    let mut conn = state.conn.get()?;

    let lead_exists: Option<Uuid> = leads::table
        .filter(leads::id.eq(req.lead_id))
        .select(leads::id)
        .first(&mut conn)
        .optional()?;
    if lead_exists.is_none() {
        return Err(ApiError::NotFound("lead"));
    }

    let now = Utc::now();
    let proposal = Proposal {
        id: Uuid::new_v4(),
        lead_id: req.lead_id,
        title: req.title,
        body: req.body.unwrap_or_default(),
        amount: req.amount,
        currency: req.currency.or_else(|| Some("USD".to_string())),
        status: "draft".to_string(),
        generated_by_ai: false,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(proposals::table)
        .values(&proposal)
        .execute(&mut conn)?;

    Ok(Json(proposal))
}

async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ProposalQuery>,
) -> Result<Json<Vec<Proposal>>, ApiError> {
    let mut conn = state.conn.get()?;

    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let mut q = proposals::table.into_boxed();
    if let Some(lead_uuid) = query.lead_id {
        q = q.filter(proposals::lead_id.eq(lead_uuid));
    }
    if let Some(status) = query.status {
        q = q.filter(proposals::status.eq(status));
    }

    let rows: Vec<Proposal> = q
        .order(proposals::created_at.desc())
        .limit(limit)
        .offset(offset)
        .load(&mut conn)?;

    Ok(Json(rows))
}

async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Proposal>, ApiError> {
    let mut conn = state.conn.get()?;
    let proposal: Proposal = proposals::table
        .filter(proposals::id.eq(id))
        .first(&mut conn)
        .optional()?
        .ok_or(ApiError::NotFound("proposal"))?;
    Ok(Json(proposal))
}

#[derive(AsChangeset)]
#[diesel(table_name = proposals)]
struct ProposalChanges {
    title: Option<String>,
    body: Option<String>,
    amount: Option<f64>,
    currency: Option<String>,
    status: Option<String>,
    updated_at: DateTime<Utc>,
}

fn proposal_changes(payload: &Value) -> Result<ProposalChanges, ApiError> {
    let status = match payload.get("status").and_then(Value::as_str) {
        Some(status) if matches!(status, "draft" | "sent" | "accepted" | "rejected") => {
            Some(status.to_string())
        }
        Some(_) => {
            return Err(ApiError::BadRequest(
                "status must be draft, sent, accepted or rejected".into(),
            ))
        }
        None => None,
    };

    Ok(ProposalChanges {
        title: payload
            .get("title")
            .and_then(Value::as_str)
            .map(str::to_string),
        body: payload
            .get("body")
            .and_then(Value::as_str)
            .map(str::to_string),
        amount: payload.get("amount").and_then(Value::as_f64),
        currency: payload
            .get("currency")
            .and_then(Value::as_str)
            .map(str::to_string),
        status,
        updated_at: Utc::now(),
    })
}

async fn update_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<Value>,
) -> Result<Json<Proposal>, ApiError> {
    validate_partial("proposals", &payload)?;
    let changes = proposal_changes(&payload)?;

    let mut conn = state.conn.get()?;

    let updated = diesel::update(proposals::table.filter(proposals::id.eq(id)))
        .set(&changes)
        .execute(&mut conn)?;
    if updated == 0 {
        return Err(ApiError::NotFound("proposal"));
    }

    let proposal: Proposal = proposals::table
        .filter(proposals::id.eq(id))
        .first(&mut conn)?;
    Ok(Json(proposal))
}

async fn delete_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut conn = state.conn.get()?;
    let deleted =
        diesel::delete(proposals::table.filter(proposals::id.eq(id))).execute(&mut conn)?;
    if deleted == 0 {
        return Err(ApiError::NotFound("proposal"));
    }
    Ok(StatusCode::NO_CONTENT)
}

/// Builds the prompt context from the lead and its client.
fn describe_deal(lead: &Lead, client: Option<&Client>, notes: Option<&str>) -> String {
    let mut parts = vec![format!("Deal: {}", lead.title)];
    if let Some(description) = &lead.description {
        parts.push(format!("Description: {description}"));
    }
    if let Some(value) = lead.value {
        let currency = lead.currency.as_deref().unwrap_or("USD");
        parts.push(format!("Estimated value: {value} {currency}"));
    }
    if let Some(client) = client {
        parts.push(format!("Client: {}", client.name));
        if let Some(company) = &client.company {
            parts.push(format!("Company: {company}"));
        }
        if let Some(address) = &client.address {
            parts.push(format!("Site address: {address}"));
        }
    }
    if let Some(notes) = notes {
        if !notes.trim().is_empty() {
            parts.push(format!("Extra notes from the salesperson: {notes}"));
        }
    }
    parts.join("\n")
}

/// Drafts a proposal with the LLM and stores it against the lead. The draft
/// is never sent automatically; someone still has to review it.
async fn generate_proposal(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateProposalRequest>,
) -> Result<Json<Proposal>, ApiError> {
    let (lead, client) = {
        let mut conn = state.conn.get()?;
        let lead: Lead = leads::table
            .filter(leads::id.eq(req.lead_id))
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("lead"))?;
        let client: Option<Client> = match lead.client_id {
            Some(client_uuid) => clients::table
                .filter(clients::id.eq(client_uuid))
                .first(&mut conn)
                .optional()?,
            None => None,
        };
        (lead, client)
    };

    let context = describe_deal(&lead, client.as_ref(), req.notes.as_deref());
    let messages = [
        ChatMessage::system(PROPOSAL_PROMPT),
        ChatMessage::user(&context),
    ];
    let draft = state.llm.chat(&messages).await?;

    let now = Utc::now();
    let proposal = Proposal {
        id: Uuid::new_v4(),
        lead_id: lead.id,
        title: format!("Proposal: {}", lead.title),
        body: draft,
        amount: lead.value,
        currency: lead.currency.clone(),
        status: "draft".to_string(),
        generated_by_ai: true,
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(proposals::table)
        .values(&proposal)
        .execute(&mut conn)?;

    info!("generated proposal {} for lead {}", proposal.id, lead.id);
    Ok(Json(proposal))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/proposals", get(list_proposals).post(create_proposal))
        .route(
            "/api/proposals/:id",
            get(get_proposal).put(update_proposal).delete(delete_proposal),
        )
        .route("/api/proposals/generate", post(generate_proposal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_lead() -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            pipeline_id: Uuid::new_v4(),
            stage_id: Uuid::new_v4(),
            client_id: None,
            title: "Warehouse roof replacement".to_string(),
            description: Some("4000 sqm flat roof".to_string()),
            value: Some(85000.0),
            currency: Some("USD".to_string()),
            source: None,
            assigned_to: None,
            created_at: now,
            updated_at: now,
            closed_at: None,
        }
    }

    #[test]
    fn deal_description_includes_value_and_notes() {
        let lead = sample_lead();
        let text = describe_deal(&lead, None, Some("client wants EPDM"));
        assert!(text.contains("Warehouse roof replacement"));
        assert!(text.contains("85000 USD"));
        assert!(text.contains("EPDM"));
    }

    #[test]
    fn deal_description_skips_blank_notes() {
        let lead = sample_lead();
        let text = describe_deal(&lead, None, Some("   "));
        assert!(!text.contains("Extra notes"));
    }

    #[test]
    fn patch_rejects_unknown_status() {
        let err = proposal_changes(&serde_json::json!({ "status": "archived" }));
        assert!(matches!(err, Err(ApiError::BadRequest(_))));
    }

    #[test]
    fn patch_collects_only_present_fields() {
        let changes = proposal_changes(&serde_json::json!({
            "status": "sent",
            "amount": 72000.0,
        }))
        .unwrap();
        assert_eq!(changes.status.as_deref(), Some("sent"));
        assert_eq!(changes.amount, Some(72000.0));
        assert!(changes.title.is_none());
        assert!(changes.body.is_none());
    }
}
