use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RetellConfig;
use crate::shared::error::ApiError;

/// Thin client for the Retell AI call API. Base URL is configurable so
/// tests can point it at a local mock.
#[derive(Clone)]
pub struct RetellClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    from_number: String,
    agent_id: String,
}

impl RetellClient {
    pub fn new(config: &RetellConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: config.api_key.clone(),
            base_url: config.base_url.clone(),
            from_number: config.from_number.clone(),
            agent_id: config.agent_id.clone(),
        }
    }

    /// Starts an outbound phone call and returns Retell's call id.
    pub async fn create_phone_call(
        &self,
        to_number: &str,
        metadata: Value,
    ) -> Result<String, ApiError> {
        let response = self
            .client
            .post(format!("{}/v2/create-phone-call", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "from_number": self.from_number,
                "to_number": to_number,
                "override_agent_id": self.agent_id,
                "metadata": metadata,
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::Upstream(format!(
                "create-phone-call returned {status}: {body}"
            )));
        }

        let result: Value = response.json().await?;
        let call_id = result["call_id"]
            .as_str()
            .ok_or_else(|| ApiError::Upstream("create-phone-call had no call_id".to_string()))?
            .to_string();

        debug!("retell call created: {call_id}");
        Ok(call_id)
    }
}

/// Webhook payload Retell posts on call lifecycle events.
#[derive(Debug, Deserialize)]
pub struct RetellWebhook {
    pub event: String,
    pub call: RetellCallData,
}

#[derive(Debug, Deserialize)]
pub struct RetellCallData {
    pub call_id: String,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<i64>,
    #[serde(default)]
    pub call_analysis: Option<RetellCallAnalysis>,
}

#[derive(Debug, Deserialize)]
pub struct RetellCallAnalysis {
    #[serde(default)]
    pub call_summary: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn webhook_payload_parses_with_optional_fields() {
        let payload = serde_json::json!({
            "event": "call_analyzed",
            "call": {
                "call_id": "c-123",
                "transcript": "hello",
                "duration_ms": 61500,
                "call_analysis": { "call_summary": "left voicemail" }
            }
        });
        let hook: RetellWebhook = serde_json::from_value(payload).unwrap();
        assert_eq!(hook.event, "call_analyzed");
        assert_eq!(hook.call.call_id, "c-123");
        assert_eq!(
            hook.call.call_analysis.unwrap().call_summary.as_deref(),
            Some("left voicemail")
        );
    }

    #[test]
    fn webhook_parses_without_analysis() {
        let payload = serde_json::json!({
            "event": "call_ended",
            "call": { "call_id": "c-9" }
        });
        let hook: RetellWebhook = serde_json::from_value(payload).unwrap();
        assert!(hook.call.transcript.is_none());
        assert!(hook.call.call_analysis.is_none());
    }
}
