use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use log::{debug, error, info};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::TelegramConfig;
use crate::llm::copilot;
use crate::shared::error::ApiError;
use crate::shared::state::AppState;

pub mod wizard;

use wizard::{WizardState, WizardStep};

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TelegramMessage>,
    #[serde(default)]
    pub edited_message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    pub date: i64,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramUser {
    pub id: i64,
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
}

/// Per-chat wizard state, kept in-process.
pub type TelegramSessions = Arc<RwLock<HashMap<i64, WizardState>>>;

pub fn new_sessions() -> TelegramSessions {
    Arc::new(RwLock::new(HashMap::new()))
}

#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    bot_token: String,
    base_url: String,
}

impl TelegramClient {
    pub fn new(config: &TelegramConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token: config.bot_token.clone(),
            base_url: config.base_url.clone(),
        }
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ApiError> {
        let response = self
            .client
            .post(format!(
                "{}/bot{}/sendMessage",
                self.base_url, self.bot_token
            ))
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "sendMessage returned {status}: {body}"
            )));
        }
        Ok(())
    }
}

static COMMAND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/([a-zA-Z_]+)(?:@\w+)?\s*(.*)$").expect("command regex"));

pub fn parse_command(text: &str) -> Option<(&str, &str)> {
    let caps = COMMAND_RE.captures(text.trim())?;
    let command = caps.get(1)?.as_str();
    let args = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    Some((command, args))
}

pub fn configure() -> Router<Arc<AppState>> {
    Router::new().route("/webhook/telegram", post(handle_webhook))
}

pub async fn handle_webhook(
    State(state): State<Arc<AppState>>,
    Json(update): Json<TelegramUpdate>,
) -> impl IntoResponse {
    debug!("telegram update {}", update.update_id);

    if let Some(message) = update.message.or(update.edited_message) {
        let chat_id = message.chat.id;
        let Some(text) = message.text.as_deref() else {
            return StatusCode::OK;
        };

        let reply = match dispatch(&state, chat_id, text).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("telegram dispatch failed: {e}");
                "Something went wrong on our side, please try again.".to_string()
            }
        };

        if let Err(e) = state.telegram.send_message(chat_id, &reply).await {
            error!("failed to send telegram reply: {e}");
        }
    }

    StatusCode::OK
}

/// Routes one incoming message: active wizards first, then slash commands,
/// then everything else goes to the copilot.
pub async fn dispatch(
    state: &Arc<AppState>,
    chat_id: i64,
    text: &str,
) -> Result<String, ApiError> {
    if let Some(("cancel", _)) = parse_command(text) {
        let had_session = state.telegram_sessions.write().await.remove(&chat_id).is_some();
        return Ok(if had_session {
            "Cancelled. Nothing was saved.".to_string()
        } else {
            "Nothing to cancel.".to_string()
        });
    }

    let active = state.telegram_sessions.read().await.get(&chat_id).cloned();
    if let Some(wizard_state) = active {
        return advance_wizard(state, chat_id, wizard_state, text).await;
    }

    match parse_command(text) {
        Some(("start", _)) => Ok("Welcome to the CRM bot. Send /help to see what I can do."
            .to_string()),
        Some(("help", _)) => Ok("Commands:\n\
/newlead — create a lead step by step\n\
/leads — list open leads\n\
/cancel — abort the current dialog\n\
Or just tell me what to do, e.g. \"move the depot lead to Won\"."
            .to_string()),
        Some(("newlead", _)) => {
            state
                .telegram_sessions
                .write()
                .await
                .insert(chat_id, WizardState::AwaitingTitle);
            info!("started /newlead wizard for chat {chat_id}");
            Ok("Let's create a lead. What's the title?".to_string())
        }
        Some(("leads", _)) => copilot::list_leads(state, None).await,
        Some((other, _)) => Ok(format!("Unknown command /{other}. Send /help.")),
        None => copilot::handle_command(state, text).await,
    }
}

async fn advance_wizard(
    state: &Arc<AppState>,
    chat_id: i64,
    wizard_state: WizardState,
    input: &str,
) -> Result<String, ApiError> {
    match wizard::advance(wizard_state, input) {
        WizardStep::Continue(next, prompt) => {
            state.telegram_sessions.write().await.insert(chat_id, next);
            Ok(prompt)
        }
        WizardStep::Abort(reply) => {
            state.telegram_sessions.write().await.remove(&chat_id);
            Ok(reply)
        }
        WizardStep::Complete(draft, reply) => {
            state.telegram_sessions.write().await.remove(&chat_id);
            copilot::create_lead(state, draft.title, draft.value, draft.client).await?;
            Ok(reply)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_parse_with_args_and_bot_suffix() {
        assert_eq!(parse_command("/newlead"), Some(("newlead", "")));
        assert_eq!(
            parse_command("/leads@crm_bot open"),
            Some(("leads", "open"))
        );
        assert_eq!(parse_command("  /help  "), Some(("help", "")));
        assert_eq!(parse_command("move the lead"), None);
    }

    #[test]
    fn update_payload_parses() {
        let payload = serde_json::json!({
            "update_id": 7,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "is_bot": false, "first_name": "Ana"},
                "chat": {"id": 42, "type": "private"},
                "date": 1700000000,
                "text": "/newlead"
            }
        });
        let update: TelegramUpdate = serde_json::from_value(payload).unwrap();
        assert_eq!(update.message.unwrap().chat.id, 42);
    }
}
