use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;

use super::{CompletionClient, CompletionError, MissingField};
use crate::state::{Role, Turn};

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ChatMessage<'a> {
    pub role: &'static str,
    pub content: &'a str,
}

/// Request body for an OpenAI-compatible chat completions endpoint
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<ChatMessage<'a>>,
}

impl<'a> ChatRequest<'a> {
    /// Full history first, the new user message last
    pub fn new(model: &'a str, history: &'a [Turn], message: &'a str) -> Self {
        let mut messages: Vec<ChatMessage<'a>> = history
            .iter()
            .map(|turn| ChatMessage {
                role: turn.role.as_str(),
                content: &turn.content,
            })
            .collect();
        messages.push(ChatMessage {
            role: Role::User.as_str(),
            content: message,
        });

        Self { model, messages }
    }
}

#[derive(Clone)]
pub struct OpenAIClient {
    client: Client,
    endpoint: String,
    model: String,
    timeout: Duration,
}

impl OpenAIClient {
    pub fn new(endpoint: &str, model: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            timeout,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn query(&self, history: &[Turn], message: &str) -> Result<String, CompletionError> {
        let request = ChatRequest::new(&self.model, history, message);
        tracing::debug!(
            endpoint = %self.endpoint,
            messages = request.messages.len(),
            "sending completion request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CompletionError::from_transport(e, self.timeout))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CompletionError::from_transport(e, self.timeout))?;

        tracing::debug!(%status, bytes = body.len(), "completion response received");
        interpret_response(status, &body)
    }
}

#[async_trait]
impl CompletionClient for OpenAIClient {
    async fn complete(&self, history: &[Turn], message: &str) -> Result<String, CompletionError> {
        self.query(history, message).await
    }
}

/// Classify an HTTP outcome. Checks run in a fixed order: status, then JSON
/// syntax, then the `choices[0].message.content` path.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<String, CompletionError> {
    if !status.is_success() {
        return Err(CompletionError::RequestRejected {
            status: status.as_u16(),
            message: rejection_message(status, body),
        });
    }

    let value: Value = serde_json::from_str(body)
        .map_err(|e| CompletionError::MalformedResponse(e.to_string()))?;

    extract_content(&value).map_err(CompletionError::IncompleteResponse)
}

fn rejection_message(status: StatusCode, body: &str) -> String {
    let server_message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| match value.get("error")? {
            Value::String(message) => Some(message.clone()),
            Value::Object(fields) => fields
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|message| !message.trim().is_empty());

    server_message.unwrap_or_else(|| format!("request failed: {}", status))
}

fn extract_content(value: &Value) -> Result<String, MissingField> {
    let choices = value
        .get("choices")
        .and_then(Value::as_array)
        .ok_or(MissingField::Choices)?;
    let first = choices.first().ok_or(MissingField::FirstChoice)?;
    let message = first.get("message").ok_or(MissingField::Message)?;
    let content = message
        .get("content")
        .and_then(Value::as_str)
        .ok_or(MissingField::Content)?;

    if content.is_empty() {
        return Err(MissingField::EmptyContent);
    }
    Ok(content.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ErrorKind;

    fn kind_of(status: u16, body: &str) -> ErrorKind {
        let status = StatusCode::from_u16(status).unwrap();
        interpret_response(status, body).unwrap_err().kind()
    }

    #[test]
    fn test_request_lists_history_then_new_message() {
        let history = vec![Turn::user("2+2?"), Turn::assistant("4")];
        let request = ChatRequest::new("deepseek-chat", &history, "and 3+3?");

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "deepseek-chat",
                "messages": [
                    {"role": "user", "content": "2+2?"},
                    {"role": "assistant", "content": "4"},
                    {"role": "user", "content": "and 3+3?"}
                ]
            })
        );
    }

    #[test]
    fn test_success_returns_first_choice_content() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"4"}},{"message":{"content":"5"}}]}"#;
        let text = interpret_response(StatusCode::OK, body).unwrap();
        assert_eq!(text, "4");
    }

    #[test]
    fn test_rejection_uses_server_error_string() {
        let err = interpret_response(StatusCode::INTERNAL_SERVER_ERROR, r#"{"error":"overloaded"}"#)
            .unwrap_err();
        match err {
            CompletionError::RequestRejected { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message, "overloaded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejection_uses_nested_error_message() {
        let body = r#"{"error":{"message":"invalid model","type":"invalid_request_error"}}"#;
        let err = interpret_response(StatusCode::BAD_REQUEST, body).unwrap_err();
        assert!(matches!(
            err,
            CompletionError::RequestRejected { ref message, .. } if message == "invalid model"
        ));
    }

    #[test]
    fn test_rejection_falls_back_to_status_text() {
        let err = interpret_response(StatusCode::BAD_GATEWAY, "<html>bad gateway</html>").unwrap_err();
        match err {
            CompletionError::RequestRejected { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "request failed: 502 Bad Gateway");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_error_status_wins_over_malformed_body() {
        assert_eq!(kind_of(503, "not json"), ErrorKind::RequestRejected);
    }

    #[test]
    fn test_success_with_unparseable_body_is_malformed() {
        assert_eq!(kind_of(200, "not json"), ErrorKind::MalformedResponse);
    }

    #[test]
    fn test_missing_parts_are_incomplete_and_distinguishable() {
        let cases = [
            (r#"{}"#, MissingField::Choices),
            (r#"{"choices":{}}"#, MissingField::Choices),
            (r#"{"choices":[]}"#, MissingField::FirstChoice),
            (r#"{"choices":[{}]}"#, MissingField::Message),
            (r#"{"choices":[{"message":{}}]}"#, MissingField::Content),
            (r#"{"choices":[{"message":{"content":null}}]}"#, MissingField::Content),
            (r#"{"choices":[{"message":{"content":""}}]}"#, MissingField::EmptyContent),
        ];

        for (body, expected) in cases {
            match interpret_response(StatusCode::OK, body) {
                Err(CompletionError::IncompleteResponse(missing)) => {
                    assert_eq!(missing, expected, "body: {body}")
                }
                other => panic!("body {body}: unexpected outcome {other:?}"),
            }
        }
    }
}
