//! OpenAI-compatible chat-completions client.
//!
//! Works against OpenAI and the many servers that speak the same protocol (vLLM,
//! LM Studio, Ollama's `/v1`, OpenRouter).
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatMessage, CompletionRequest, EndpointConfig, HttpEndpoint, LanguageModel};
//!
//! let config = EndpointConfig::new("primary", "https://api.openai.com/v1", "gpt-4o-mini")
//!     .with_api_key_env("OPENAI_API_KEY");
//! let endpoint = HttpEndpoint::new(config)?;
//!
//! let request = CompletionRequest::new(vec![ChatMessage::user("Summarize the incident")]);
//! let response = endpoint.complete(&request).await?;
//! ```

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, CompletionRequest, CompletionResponse, LanguageModel, Usage};

/// HTTP client for one endpoint.
#[derive(Clone)]
pub struct HttpEndpoint {
    config: EndpointConfig,
    api_key: Option<String>,
    client: Client,
}

impl std::fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("config", &self.config)
            .field(
                "api_key",
                &self.api_key.as_deref().map(tooling::logging::mask_secret),
            )
            .finish()
    }
}

impl HttpEndpoint {
    /// Build a client; resolves the API key now so a missing key fails at startup.
    pub fn new(config: EndpointConfig) -> Result<Self> {
        config.validate()?;
        let api_key = config.resolve_api_key()?;
        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            api_key,
            client,
        })
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn body<'a>(&'a self, request: &'a CompletionRequest) -> ApiRequest<'a> {
        ApiRequest {
            model: &self.config.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
        }
    }

    fn convert_response(&self, response: ApiResponse) -> Result<CompletionResponse> {
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".into()))?;
        let content = choice
            .message
            .content
            .ok_or_else(|| LlmError::InvalidResponse("choice contained no content".into()))?;

        Ok(CompletionResponse {
            content,
            model: response.model.unwrap_or_else(|| self.config.model.clone()),
            endpoint: self.config.name.clone(),
            usage: response.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
        })
    }
}

/// Map a non-success status to an error, transient or not.
pub(crate) fn classify_status(status: StatusCode, body: String) -> LlmError {
    match status.as_u16() {
        401 | 403 => LlmError::AuthenticationError(body),
        408 => LlmError::Timeout(body),
        429 => LlmError::RateLimitExceeded(body),
        400 | 404 | 422 => LlmError::InvalidRequest(format!("{}: {}", status, body)),
        code if code >= 500 => LlmError::ServiceUnavailable(format!("{}: {}", status, body)),
        _ => LlmError::ProviderError(format!("{}: {}", status, body)),
    }
}

fn classify_transport(err: reqwest::Error) -> LlmError {
    if err.is_timeout() {
        LlmError::Timeout(err.to_string())
    } else if err.is_connect() {
        LlmError::ServiceUnavailable(err.to_string())
    } else {
        LlmError::HttpError(err)
    }
}

#[async_trait]
impl LanguageModel for HttpEndpoint {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        if request.messages.is_empty() {
            return Err(LlmError::InvalidRequest("request has no messages".into()));
        }

        let mut req = self.client.post(self.url()).json(&self.body(request));
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!(endpoint = %self.config.name, model = %self.config.model, "Sending completion request");
        let response = req.send().await.map_err(classify_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, body));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;
        self.convert_response(parsed)
    }
}

#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn endpoint() -> HttpEndpoint {
        HttpEndpoint::new(
            EndpointConfig::new("primary", "https://api.example.com/v1/", "gpt-test")
                .with_api_key("sk-test-123456"),
        )
        .unwrap()
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        assert_eq!(endpoint().url(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_body_shape() {
        let endpoint = endpoint();
        let request = CompletionRequest::new(vec![
            ChatMessage::system("You write dispatch reports."),
            ChatMessage::user("Unit 7 assigned"),
        ])
        .with_max_tokens(200);

        let body = serde_json::to_value(endpoint.body(&request)).unwrap();
        assert_eq!(
            body,
            json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "You write dispatch reports."},
                    {"role": "user", "content": "Unit 7 assigned"}
                ],
                "max_tokens": 200,
                "stream": false
            })
        );
    }

    #[test]
    fn test_response_conversion() {
        let raw: ApiResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "model": "gpt-test-0613",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "Dispatched."}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3, "total_tokens": 15}
        }))
        .unwrap();

        let response = endpoint().convert_response(raw).unwrap();
        assert_eq!(response.content, "Dispatched.");
        assert_eq!(response.model, "gpt-test-0613");
        assert_eq!(response.endpoint, "primary");
        assert_eq!(response.usage.unwrap().completion_tokens, 3);
    }

    #[test]
    fn test_empty_choices_is_invalid_response() {
        let raw: ApiResponse = serde_json::from_value(json!({"choices": []})).unwrap();
        assert!(matches!(
            endpoint().convert_response(raw),
            Err(LlmError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, "bad key".into()),
            LlmError::AuthenticationError(_)
        ));
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, String::new()).is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, String::new()).is_retryable());
        assert!(!classify_status(StatusCode::BAD_REQUEST, String::new()).is_retryable());
    }

    #[test]
    fn test_debug_hides_key() {
        let rendered = format!("{:?}", endpoint());
        assert!(!rendered.contains("test-123456"));
    }

    #[tokio::test]
    async fn test_empty_request_rejected_before_sending() {
        let err = endpoint()
            .complete(&CompletionRequest::new(Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::InvalidRequest(_)));
    }
}
