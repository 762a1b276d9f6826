use log::debug;

use super::{ChatMessage, LlmProvider};
use crate::shared::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    CreateLead,
    MoveLead,
    CreateTask,
    ListLeads,
    Summary,
    Unknown,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::CreateLead => "create_lead",
            Intent::MoveLead => "move_lead",
            Intent::CreateTask => "create_task",
            Intent::ListLeads => "list_leads",
            Intent::Summary => "summary",
            Intent::Unknown => "unknown",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().trim_matches('"').to_lowercase().as_str() {
            "create_lead" => Some(Intent::CreateLead),
            "move_lead" => Some(Intent::MoveLead),
            "create_task" => Some(Intent::CreateTask),
            "list_leads" => Some(Intent::ListLeads),
            "summary" => Some(Intent::Summary),
            "unknown" => Some(Intent::Unknown),
            _ => None,
        }
    }
}

const CLASSIFY_PROMPT: &str = "You classify CRM commands for a construction company. \
Reply with exactly one label and nothing else: \
create_lead, move_lead, create_task, list_leads, summary, unknown.";

/// Classifies a free-text command. The model is constrained to a fixed label
/// set; anything off-script falls back to keyword matching.
pub async fn classify(llm: &dyn LlmProvider, text: &str) -> Result<Intent, ApiError> {
    let messages = [
        ChatMessage::system(CLASSIFY_PROMPT),
        ChatMessage::user(text),
    ];
    let reply = llm.chat(&messages).await?;

    if let Some(intent) = Intent::from_label(&reply) {
        return Ok(intent);
    }

    debug!("classifier replied off-label ({reply:?}), using keyword fallback");
    Ok(keyword_fallback(text))
}

pub fn keyword_fallback(text: &str) -> Intent {
    let lower = text.to_lowercase();
    if lower.contains("move") || lower.contains("stage") {
        Intent::MoveLead
    } else if lower.contains("task") || lower.contains("remind") {
        Intent::CreateTask
    } else if lower.contains("new lead") || lower.contains("add lead")
        || lower.contains("create lead")
    {
        Intent::CreateLead
    } else if lower.contains("list") || lower.contains("show") {
        Intent::ListLeads
    } else if lower.contains("summary") || lower.contains("report") {
        Intent::Summary
    } else {
        Intent::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct CannedProvider(&'static str);

    #[async_trait]
    impl LlmProvider for CannedProvider {
        async fn chat(&self, _messages: &[ChatMessage]) -> Result<String, ApiError> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn classify_trusts_on_label_replies() {
        let provider = CannedProvider("move_lead");
        let intent = classify(&provider, "shift the depot deal").await.unwrap();
        assert_eq!(intent, Intent::MoveLead);
    }

    #[tokio::test]
    async fn classify_falls_back_on_off_label_replies() {
        let provider = CannedProvider("I think the user wants to create something");
        let intent = classify(&provider, "remind me to call Bob").await.unwrap();
        assert_eq!(intent, Intent::CreateTask);
    }

    #[test]
    fn labels_round_trip() {
        for intent in [
            Intent::CreateLead,
            Intent::MoveLead,
            Intent::CreateTask,
            Intent::ListLeads,
            Intent::Summary,
            Intent::Unknown,
        ] {
            assert_eq!(Intent::from_label(intent.label()), Some(intent));
        }
    }

    #[test]
    fn label_parse_tolerates_quotes_and_case() {
        assert_eq!(Intent::from_label("\"Move_Lead\"\n"), Some(Intent::MoveLead));
    }

    #[test]
    fn fallback_matches_keywords() {
        assert_eq!(
            keyword_fallback("move the Smith job to negotiation"),
            Intent::MoveLead
        );
        assert_eq!(
            keyword_fallback("add lead for the mall project"),
            Intent::CreateLead
        );
        assert_eq!(keyword_fallback("remind me to call Bob"), Intent::CreateTask);
        assert_eq!(keyword_fallback("show open deals"), Intent::ListLeads);
        assert_eq!(keyword_fallback("how's the weather"), Intent::Unknown);
    }
}
