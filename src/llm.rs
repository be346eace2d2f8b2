//! Client for OpenAI-compatible chat-completions APIs (Groq by default).
//!
//! One request per call: no retry, no streaming. Every request is bounded
//! by `[llm].timeout_secs`; a timeout surfaces as
//! [`UpstreamError::Timeout`].

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use surgisense_core::error::{ConfigurationError, UpstreamError};
use surgisense_core::llm::{ChatMessage, ChatModel, ChatRequest};
use tracing::debug;

use crate::config::{read_api_key, LlmConfig};
use crate::upstream::{build_client, check_status, map_transport_error};

const OPERATION: &str = "chat completion";

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
}

/// Hosted chat model reached over HTTP.
pub struct HostedChatModel {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout_secs: u64,
}

impl HostedChatModel {
    /// Build a client from `[llm]`, reading the API key from the environment.
    pub fn new(config: &LlmConfig) -> Result<Self, ConfigurationError> {
        let api_key = read_api_key(&config.api_key_env)?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &LlmConfig, api_key: String) -> Result<Self, ConfigurationError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model: config.chat_model.clone(),
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatModel for HostedChatModel {
    fn model_name(&self) -> &str {
        &self.default_model
    }

    async fn complete(&self, request: &ChatRequest) -> Result<String, UpstreamError> {
        let model = request.model.as_deref().unwrap_or(&self.default_model);
        let body = WireRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            response_format: request
                .json_response
                .then_some(ResponseFormat { kind: "json_object" }),
        };

        debug!(model, messages = request.messages.len(), "sending chat completion");

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(OPERATION, self.timeout_secs, e))?;
        let response = check_status(OPERATION, response).await?;
        let parsed: WireResponse = response
            .json()
            .await
            .map_err(|e| map_transport_error(OPERATION, self.timeout_secs, e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or(UpstreamError::InvalidResponse {
                operation: OPERATION,
                message: "response contained no choices".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_request_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let body = WireRequest {
            model: "llama-3.3-70b-versatile",
            messages: &messages,
            temperature: Some(0.0),
            response_format: Some(ResponseFormat { kind: "json_object" }),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "llama-3.3-70b-versatile");
        assert_eq!(json["temperature"], 0.0);
        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["content"], "hi");
    }

    #[test]
    fn test_optional_fields_omitted() {
        let messages = vec![ChatMessage::user("hi")];
        let body = WireRequest {
            model: "m",
            messages: &messages,
            temperature: None,
            response_format: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("temperature").is_none());
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = LlmConfig {
            api_key_env: "SURGISENSE_TEST_LLM_KEY_NOT_SET".to_string(),
            ..LlmConfig::default()
        };
        assert!(matches!(
            HostedChatModel::new(&config),
            Err(ConfigurationError::MissingCredential(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_error() {
        let config = LlmConfig {
            base_url: "http://127.0.0.1:9/v1".to_string(),
            timeout_secs: 2,
            ..LlmConfig::default()
        };
        let model = HostedChatModel::with_api_key(&config, "test".to_string()).unwrap();
        let err = model
            .complete(&ChatRequest::new(vec![ChatMessage::user("hi")]))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.operation(), "chat completion");
    }
}
