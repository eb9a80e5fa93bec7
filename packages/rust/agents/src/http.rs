//! OpenAI-compatible `/chat/completions` client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use longform_shared::{CompletionConfig, LongformError, Result, ToolDefinition};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, instrument};
use url::Url;

use crate::completion::{CompletionClient, CompletionRequest, CompletionResponse, Message};

/// Characters of an error body kept in the error message.
const MAX_ERROR_BODY: usize = 500;

pub struct HttpCompletionClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    model: String,
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("endpoint", &self.endpoint.as_str())
            .field("model", &self.model)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl HttpCompletionClient {
    pub fn new(base_url: &str, api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let endpoint = Url::parse(&base)
            .and_then(|u| u.join("chat/completions"))
            .map_err(|e| LongformError::config(format!("invalid completion base_url '{base_url}': {e}")))?;

        let client = Client::builder()
            .user_agent(concat!("longform/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LongformError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.into(),
            model: model.into(),
        })
    }

    pub fn from_config(config: &CompletionConfig, api_key: impl Into<String>) -> Result<Self> {
        Self::new(&config.base_url, api_key, config.model.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

fn tool_spec(def: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len(), tools = request.tools.len()))]
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse> {
        let body = ChatRequest {
            model: &self.model,
            messages: &request.messages,
            temperature: request.temperature,
            tools: request.tools.iter().map(tool_spec).collect(),
            response_format: request.schema.as_ref().map(|s| {
                json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": s.name,
                        "description": s.description,
                        "schema": s.schema,
                        "strict": true,
                    }
                })
            }),
        };

        let response = self
            .client
            .post(self.endpoint.as_str())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LongformError::Network(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LongformError::CompletionStatus {
                status: status.as_u16(),
                message: text.chars().take(MAX_ERROR_BODY).collect(),
            });
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| LongformError::Completion(format!("malformed response: {e}")))?;

        if let Some(err) = parsed.error {
            return Err(LongformError::Completion(err.message));
        }

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LongformError::Completion("response has no choices".into()))?;

        debug!(
            finish_reason = choice.finish_reason.as_deref().unwrap_or("-"),
            tool_calls = choice.message.tool_calls.len(),
            "completion received"
        );

        Ok(CompletionResponse {
            message: choice.message,
            finish_reason: choice.finish_reason,
        })
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::completion::ResponseSchema;

    fn client(server: &MockServer) -> HttpCompletionClient {
        HttpCompletionClient::new(&format!("{}/api/v1", server.uri()), "sk-test", "test/model")
            .expect("client")
    }

    #[tokio::test]
    async fn sends_messages_tools_and_schema() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .and(body_partial_json(json!({
                "model": "test/model",
                "temperature": 0.2,
                "messages": [{"role": "user", "content": "hello"}],
                "tools": [{"type": "function", "function": {"name": "web_search"}}],
                "response_format": {"type": "json_schema", "json_schema": {"name": "plan"}}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{
                    "message": {"role": "assistant", "content": "hi there"},
                    "finish_reason": "stop"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let request = CompletionRequest::new(vec![Message::user("hello")])
            .with_temperature(0.2)
            .with_tools(vec![ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                parameters: json!({"type": "object"}),
            }])
            .with_schema(Some(ResponseSchema {
                name: "plan".into(),
                description: "a plan".into(),
                schema: json!({"type": "object"}),
            }));

        let response = client(&server).complete(request).await.expect("complete");
        assert_eq!(response.message.content(), "hi there");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_string("slow down"))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete(CompletionRequest::new(vec![Message::user("x")]))
            .await
            .unwrap_err();
        match err {
            LongformError::CompletionStatus { status, message } => {
                assert_eq!(status, 429);
                assert_eq!(message, "slow down");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn empty_choices_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
            .mount(&server)
            .await;

        let err = client(&server)
            .complete(CompletionRequest::new(vec![Message::user("x")]))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no choices"));
    }

    #[test]
    fn bad_base_url_is_config_error() {
        let err = HttpCompletionClient::new("not a url", "k", "m").unwrap_err();
        assert!(matches!(err, LongformError::Config { .. }));
    }

    #[test]
    fn debug_output_hides_the_key() {
        let client = HttpCompletionClient::new("https://api.example.com/v1", "sk-secret", "m")
            .expect("client");
        let shown = format!("{client:?}");
        assert!(shown.contains("chat/completions"));
        assert!(!shown.contains("sk-secret"));
    }
}
