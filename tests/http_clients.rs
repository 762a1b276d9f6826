use crmserver::config::{OpenAiConfig, RetellConfig, TelegramConfig};
use crmserver::llm::{ChatMessage, LlmProvider, OpenAiClient};
use crmserver::retell::RetellClient;
use crmserver::shared::error::ApiError;
use crmserver::telegram::TelegramClient;

fn openai_config(base_url: String) -> OpenAiConfig {
    OpenAiConfig {
        api_key: "test-key".to_string(),
        base_url,
        model: "gpt-4o-mini".to_string(),
    }
}

fn retell_config(base_url: String) -> RetellConfig {
    RetellConfig {
        api_key: "test-key".to_string(),
        base_url,
        from_number: "+15550100".to_string(),
        agent_id: "agent_1".to_string(),
    }
}

fn telegram_config(base_url: String) -> TelegramConfig {
    TelegramConfig {
        bot_token: "123:abc".to_string(),
        base_url,
    }
}

#[tokio::test]
async fn openai_chat_returns_trimmed_content() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .match_header("authorization", "Bearer test-key")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            serde_json::json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "  hello there\n" } }
                ]
            })
            .to_string(),
        )
        .create_async()
        .await;

    let client = OpenAiClient::new(&openai_config(server.url()));
    let reply = client
        .chat(&[ChatMessage::user("hi")])
        .await
        .expect("chat should succeed");

    assert_eq!(reply, "hello there");
    mock.assert_async().await;
}

#[tokio::test]
async fn openai_error_status_is_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .with_body("rate limited")
        .create_async()
        .await;

    let client = OpenAiClient::new(&openai_config(server.url()));
    let err = client
        .chat(&[ChatMessage::user("hi")])
        .await
        .expect_err("429 should fail");

    assert!(matches!(err, ApiError::Upstream(_)));
}

#[tokio::test]
async fn openai_missing_content_is_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"choices":[]}"#)
        .create_async()
        .await;

    let client = OpenAiClient::new(&openai_config(server.url()));
    let err = client
        .chat(&[ChatMessage::user("hi")])
        .await
        .expect_err("empty choices should fail");

    assert!(matches!(err, ApiError::Upstream(_)));
}

#[tokio::test]
async fn retell_call_sends_numbers_and_returns_call_id() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v2/create-phone-call")
        .match_header("authorization", "Bearer test-key")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "from_number": "+15550100",
            "to_number": "+15550199",
            "override_agent_id": "agent_1",
        })))
        .with_status(201)
        .with_header("content-type", "application/json")
        .with_body(r#"{"call_id":"call_abc123"}"#)
        .create_async()
        .await;

    let client = RetellClient::new(&retell_config(server.url()));
    let call_id = client
        .create_phone_call("+15550199", serde_json::json!({ "lead_id": "x" }))
        .await
        .expect("call should be created");

    assert_eq!(call_id, "call_abc123");
    mock.assert_async().await;
}

#[tokio::test]
async fn retell_error_status_is_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/v2/create-phone-call")
        .with_status(402)
        .with_body("insufficient balance")
        .create_async()
        .await;

    let client = RetellClient::new(&retell_config(server.url()));
    let err = client
        .create_phone_call("+15550199", serde_json::json!({}))
        .await
        .expect_err("402 should fail");

    assert!(matches!(err, ApiError::Upstream(_)));
}

#[tokio::test]
async fn telegram_send_message_hits_bot_endpoint() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/bot123:abc/sendMessage")
        .match_body(mockito::Matcher::PartialJson(serde_json::json!({
            "chat_id": 42,
            "text": "lead created",
        })))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"ok":true}"#)
        .create_async()
        .await;

    let client = TelegramClient::new(&telegram_config(server.url()));
    client
        .send_message(42, "lead created")
        .await
        .expect("sendMessage should succeed");

    mock.assert_async().await;
}

#[tokio::test]
async fn telegram_error_status_is_upstream_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/bot123:abc/sendMessage")
        .with_status(403)
        .with_body(r#"{"ok":false,"description":"bot was blocked"}"#)
        .create_async()
        .await;

    let client = TelegramClient::new(&telegram_config(server.url()));
    let err = client
        .send_message(42, "hi")
        .await
        .expect_err("403 should fail");

    assert!(matches!(err, ApiError::Upstream(_)));
}
