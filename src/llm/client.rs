use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PipelineError, Result};

pub const DEFAULT_API_URL: &str = "https://api.together.xyz/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "openai/gpt-oss-120b";

/// Configuration for the chat-completions client
#[derive(Debug, Clone)]
pub struct CompletionConfig {
    /// API key (from TOGETHER_API_KEY env var)
    pub api_key: String,
    /// Model to use (e.g., "openai/gpt-oss-120b")
    pub model: String,
    /// OpenAI-compatible chat completions endpoint
    pub api_url: String,
}

impl CompletionConfig {
    /// Create config from environment variables
    ///
    /// `BRAND_LLM_MODEL` and `BRAND_LLM_API_URL` override the defaults.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("TOGETHER_API_KEY").map_err(|_| {
            PipelineError::Config("TOGETHER_API_KEY environment variable not set".to_string())
        })?;

        Ok(Self {
            api_key,
            model: std::env::var("BRAND_LLM_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string()),
            api_url: std::env::var("BRAND_LLM_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
        })
    }
}

/// A single structured completion request
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    /// Name of the JSON schema the answer must follow
    pub schema_name: String,
    /// JSON schema for the answer
    pub schema: serde_json::Value,
    pub temperature: f64,
}

/// What came back from one completion attempt
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// Text content of the first choice
    Success(String),
    /// The endpoint answered but not in the expected envelope
    Malformed(String),
    /// Connection failure or non-success HTTP status
    TransportFailure(String),
    /// The request did not finish in time
    Timeout,
}

/// The external completion capability: prompt in, text out
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome;
}

/// Client for OpenAI-compatible chat completion endpoints with JSON-schema output
pub struct ChatCompletionClient {
    client: Client,
    config: CompletionConfig,
}

impl ChatCompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionClient {
    async fn complete(&self, request: &CompletionRequest) -> CompletionOutcome {
        let body = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: request.system.clone(),
                },
                Message {
                    role: "user".to_string(),
                    content: request.user.clone(),
                },
            ],
            response_format: ResponseFormat {
                format_type: "json_schema".to_string(),
                json_schema: JsonSchemaFormat {
                    name: request.schema_name.clone(),
                    schema: request.schema.clone(),
                    strict: true,
                },
            },
            temperature: request.temperature,
        };

        let response = match self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return CompletionOutcome::Timeout,
            Err(e) => return CompletionOutcome::TransportFailure(e.to_string()),
        };

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let preview: String = body.chars().take(200).collect();
            return CompletionOutcome::TransportFailure(format!("HTTP {}: {}", status, preview));
        }

        let text = match response.text().await {
            Ok(text) => text,
            Err(e) if e.is_timeout() => return CompletionOutcome::Timeout,
            Err(e) => return CompletionOutcome::TransportFailure(e.to_string()),
        };

        debug!("Completion response: {} bytes", text.len());
        parse_chat_response(&text)
    }
}

/// Pull the first choice's message content out of a chat completion body
fn parse_chat_response(body: &str) -> CompletionOutcome {
    let response: ChatResponse = match serde_json::from_str(body) {
        Ok(response) => response,
        Err(e) => return CompletionOutcome::Malformed(format!("invalid response envelope: {}", e)),
    };

    match response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
    {
        Some(content) if !content.trim().is_empty() => CompletionOutcome::Success(content),
        _ => CompletionOutcome::Malformed("no text content in response".to_string()),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    response_format: ResponseFormat,
    temperature: f64,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: JsonSchemaFormat,
}

#[derive(Debug, Serialize)]
struct JsonSchemaFormat {
    name: String,
    schema: serde_json::Value,
    strict: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_response() {
        let body = r#"{"choices": [{"message": {"role": "assistant", "content": "{\"confidence\": 0.9}"}}]}"#;
        assert_eq!(
            parse_chat_response(body),
            CompletionOutcome::Success(r#"{"confidence": 0.9}"#.to_string())
        );
    }

    #[test]
    fn test_parse_chat_response_malformed() {
        assert!(matches!(
            parse_chat_response("<html>bad gateway</html>"),
            CompletionOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_chat_response(r#"{"choices": []}"#),
            CompletionOutcome::Malformed(_)
        ));
        assert!(matches!(
            parse_chat_response(r#"{"choices": [{"message": {"content": null}}]}"#),
            CompletionOutcome::Malformed(_)
        ));
    }
}
