use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;
use diesel::prelude::*;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::{intent, ChatMessage, LlmProvider};
use crate::shared::error::ApiError;
use crate::shared::models::{Lead, PipelineStage, Task};
use crate::shared::state::AppState;

const COPILOT_PROMPT: &str = r#"You are the copilot of a construction-industry CRM.
Map the user's command to exactly one JSON object, with no prose around it:
{"action": "create_lead", "params": {"title": "...", "value": 12500.0, "client": "..."}}
{"action": "move_lead", "params": {"lead": "<lead title>", "stage": "<stage name>"}}
{"action": "create_task", "params": {"title": "...", "due": "2026-01-31"}}
{"action": "list_leads", "params": {"stage": "<stage name or omit>"}}
{"action": "help", "params": {}}
Omit params you cannot infer. Use "help" when the command fits nothing."#;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", content = "params", rename_all = "snake_case")]
pub enum CopilotAction {
    CreateLead {
        title: String,
        #[serde(default)]
        value: Option<f64>,
        #[serde(default)]
        client: Option<String>,
    },
    MoveLead {
        lead: String,
        stage: String,
    },
    CreateTask {
        title: String,
        #[serde(default)]
        due: Option<String>,
    },
    ListLeads {
        #[serde(default)]
        stage: Option<String>,
    },
    Help {},
}

/// Pulls the first JSON object out of a model reply. Models wrap JSON in
/// code fences or prose often enough that strict parsing alone loses.
pub fn parse_action(reply: &str) -> Option<CopilotAction> {
    let start = reply.find('{')?;
    let end = reply.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&reply[start..=end]).ok()
}

pub async fn handle_command(state: &Arc<AppState>, text: &str) -> Result<String, ApiError> {
    let messages = [ChatMessage::system(COPILOT_PROMPT), ChatMessage::user(text)];
    let reply = state.llm.chat(&messages).await?;

    match parse_action(&reply) {
        Some(action) => execute(state, action).await,
        None => {
            warn!("copilot reply was not a known action: {reply:?}");
            let guessed = intent::classify(state.llm.as_ref(), text)
                .await
                .unwrap_or_else(|_| intent::keyword_fallback(text));
            Ok(help_text(guessed.label()))
        }
    }
}

fn help_text(guess: &str) -> String {
    format!(
        "I didn't quite get that (closest guess: {guess}). I can create leads, \
move leads between stages, create tasks and list open leads. Try \
\"move the Hilltop depot lead to Negotiation\"."
    )
}

async fn execute(state: &Arc<AppState>, action: CopilotAction) -> Result<String, ApiError> {
    match action {
        CopilotAction::CreateLead {
            title,
            value,
            client,
        } => create_lead(state, title, value, client).await,
        CopilotAction::MoveLead { lead, stage } => move_lead(state, &lead, &stage).await,
        CopilotAction::CreateTask { title, due } => create_task(state, title, due).await,
        CopilotAction::ListLeads { stage } => list_leads(state, stage).await,
        CopilotAction::Help {} => Ok(help_text("help")),
    }
}

fn default_pipeline_entry(
    conn: &mut PgConnection,
) -> Result<(Uuid, PipelineStage), ApiError> {
    use crate::shared::schema::{pipeline_stages, pipelines};

    let pipeline_uuid: Uuid = pipelines::table
        .order(pipelines::created_at.asc())
        .select(pipelines::id)
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline"))?;

    let first_stage: PipelineStage = pipeline_stages::table
        .filter(pipeline_stages::pipeline_id.eq(pipeline_uuid))
        .order(pipeline_stages::sort_order.asc())
        .first(conn)
        .optional()?
        .ok_or(ApiError::NotFound("pipeline stage"))?;

    Ok((pipeline_uuid, first_stage))
}

pub(crate) async fn create_lead(
    state: &Arc<AppState>,
    title: String,
    value: Option<f64>,
    client_name: Option<String>,
) -> Result<String, ApiError> {
    use crate::shared::schema::{clients, leads};

    let mut conn = state.conn.get()?;
    let (pipeline_uuid, first_stage) = default_pipeline_entry(&mut conn)?;

    let client_uuid: Option<Uuid> = match client_name.as_deref() {
        Some(name) if !name.trim().is_empty() => clients::table
            .filter(clients::name.ilike(format!("%{}%", name.trim())))
            .select(clients::id)
            .first(&mut conn)
            .optional()?,
        _ => None,
    };

    let now = Utc::now();
    let lead = Lead {
        id: Uuid::new_v4(),
        pipeline_id: pipeline_uuid,
        stage_id: first_stage.id,
        client_id: client_uuid,
        title: title.clone(),
        description: None,
        value,
        currency: Some("USD".to_string()),
        source: Some("copilot".to_string()),
        assigned_to: None,
        created_at: now,
        updated_at: now,
        closed_at: None,
    };

    diesel::insert_into(leads::table)
        .values(&lead)
        .execute(&mut conn)?;

    // this insert never went through /api/leads, so the middleware had no
    // chance to invalidate
    state
        .response_cache
        .invalidate_prefixes(&["/api/leads", "/api/pipelines"])
        .await;

    info!("copilot created lead {}", lead.id);
    Ok(format!(
        "Created lead \"{}\" in stage {}.",
        title, first_stage.name
    ))
}

async fn move_lead(state: &Arc<AppState>, lead_name: &str, stage_name: &str) -> Result<String, ApiError> {
    use crate::shared::schema::{leads, pipeline_stages};

    let (lead, target) = {
        let mut conn = state.conn.get()?;

        let lead: Lead = leads::table
            .filter(leads::title.ilike(format!("%{lead_name}%")))
            .filter(leads::closed_at.is_null())
            .order(leads::updated_at.desc())
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("lead"))?;

        let target: PipelineStage = pipeline_stages::table
            .filter(pipeline_stages::pipeline_id.eq(lead.pipeline_id))
            .filter(pipeline_stages::name.ilike(format!("%{stage_name}%")))
            .first(&mut conn)
            .optional()?
            .ok_or(ApiError::NotFound("stage"))?;

        (lead, target)
    };

    let moved = crate::leads::move_lead_to_stage(state, lead.id, target.id).await?;
    Ok(format!(
        "Moved \"{}\" to stage {}.",
        moved.title, target.name
    ))
}

async fn create_task(
    state: &Arc<AppState>,
    title: String,
    due: Option<String>,
) -> Result<String, ApiError> {
    use crate::shared::schema::tasks;

    let due_date = due
        .as_deref()
        .and_then(crate::crm_tasks::parse_due_date);

    let now = Utc::now();
    let task = Task {
        id: Uuid::new_v4(),
        lead_id: None,
        client_id: None,
        assigned_to: None,
        title: title.clone(),
        description: None,
        due_date,
        status: "open".to_string(),
        created_at: now,
        updated_at: now,
    };

    let mut conn = state.conn.get()?;
    diesel::insert_into(tasks::table)
        .values(&task)
        .execute(&mut conn)?;

    state.response_cache.invalidate_prefix("/api/tasks").await;

    Ok(match due_date {
        Some(d) => format!("Task \"{}\" created, due {}.", title, d.format("%Y-%m-%d")),
        None => format!("Task \"{title}\" created."),
    })
}

pub(crate) async fn list_leads(
    state: &Arc<AppState>,
    stage_name: Option<String>,
) -> Result<String, ApiError> {
    use crate::shared::schema::{leads, pipeline_stages};

    let mut conn = state.conn.get()?;

    let mut query = leads::table
        .inner_join(pipeline_stages::table.on(pipeline_stages::id.eq(leads::stage_id)))
        .filter(leads::closed_at.is_null())
        .into_boxed();

    if let Some(name) = stage_name.as_deref() {
        query = query.filter(pipeline_stages::name.ilike(format!("%{name}%")));
    }

    let rows: Vec<(Lead, PipelineStage)> = query
        .order(leads::updated_at.desc())
        .limit(10)
        .load(&mut conn)?;

    if rows.is_empty() {
        return Ok("No open leads found.".to_string());
    }

    let mut reply = format!("{} open lead(s):\n", rows.len());
    for (lead, stage) in rows {
        let value = lead
            .value
            .map(|v| format!(" ({} {:.0})", lead.currency.as_deref().unwrap_or("USD"), v))
            .unwrap_or_default();
        reply.push_str(&format!("• {} — {}{}\n", lead.title, stage.name, value));
    }
    Ok(reply.trim_end().to_string())
}

#[derive(Debug, Deserialize)]
pub struct CopilotRequest {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct CopilotResponse {
    pub reply: String,
}

pub async fn copilot_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CopilotRequest>,
) -> Result<Json<CopilotResponse>, ApiError> {
    if req.message.trim().is_empty() {
        return Err(ApiError::BadRequest("message must not be empty".into()));
    }
    let reply = handle_command(&state, &req.message).await?;
    Ok(Json(CopilotResponse { reply }))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/api/copilot", post(copilot_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_action_json() {
        let action = parse_action(
            r#"{"action": "move_lead", "params": {"lead": "Hilltop depot", "stage": "Won"}}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            CopilotAction::MoveLead {
                lead: "Hilltop depot".into(),
                stage: "Won".into()
            }
        );
    }

    #[test]
    fn parses_fenced_action_json() {
        let reply = "Sure!\n```json\n{\"action\": \"list_leads\", \"params\": {}}\n```";
        assert_eq!(
            parse_action(reply),
            Some(CopilotAction::ListLeads { stage: None })
        );
    }

    #[test]
    fn defaults_optional_params() {
        let action = parse_action(
            r#"{"action": "create_lead", "params": {"title": "Depot extension"}}"#,
        )
        .unwrap();
        assert_eq!(
            action,
            CopilotAction::CreateLead {
                title: "Depot extension".into(),
                value: None,
                client: None
            }
        );
    }

    #[test]
    fn rejects_unknown_action() {
        assert!(parse_action(r#"{"action": "drop_tables", "params": {}}"#).is_none());
        assert!(parse_action("no json here").is_none());
    }
}
