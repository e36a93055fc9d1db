//! OpenRouter API client implementation
//!
//! Candidates are generated with the raw `/completions` endpoint in streaming
//! mode; grading and naming use `/chat/completions` without streaming.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, Response};
use reqwest_eventsource::{Error as EventSourceError, Event, EventSource, retry::Never};
use serde::Serialize;
use serde_json::Value;

use crate::llm::client::{CompletionRequest, LlmClient, LlmError, TokenStream};
use crate::llm::streaming::{SseData, parse_sse_data};

/// OpenRouter API base URL
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Environment variable consulted when no token is configured
pub const API_KEY_ENV: &str = "OPENROUTER_API_KEY";

/// Configuration for the OpenRouter client
#[derive(Debug, Clone)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    /// Whole-request timeout for non-streaming calls
    pub request_timeout: Option<Duration>,
    pub referer: Option<String>,
    pub app_title: Option<String>,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: None,
            referer: None,
            app_title: Some("selfloom".to_string()),
        }
    }
}

impl OpenRouterConfig {
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min_p: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

/// OpenRouter API client
pub struct OpenRouterClient {
    client: Client,
    base_url: String,
    request_timeout: Option<Duration>,
}

impl OpenRouterClient {
    /// Create a new client, reading the token from OPENROUTER_API_KEY
    pub fn new(config: OpenRouterConfig) -> Result<Self, LlmError> {
        let api_key = std::env::var(API_KEY_ENV).map_err(|_| LlmError::MissingApiKey {
            env_var: API_KEY_ENV.to_string(),
        })?;

        Self::with_api_key(api_key, config)
    }

    /// Create a client with an explicit API key
    pub fn with_api_key(api_key: impl Into<String>, config: OpenRouterConfig) -> Result<Self, LlmError> {
        let api_key = api_key.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|_| LlmError::ApiError {
            status: 401,
            message: "API key contains characters not allowed in a header".to_string(),
        })?;
        headers.insert(AUTHORIZATION, auth_value);

        if let Some(referer) = config.referer.as_deref()
            && let Ok(value) = HeaderValue::from_str(referer)
        {
            headers.insert("HTTP-Referer", value);
        }
        if let Some(title) = config.app_title.as_deref()
            && let Ok(value) = HeaderValue::from_str(title)
        {
            headers.insert("X-Title", value);
        }

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/completions", self.base_url)
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn build_stream_body(request: &CompletionRequest) -> Value {
        let body = CompletionBody {
            model: &request.model,
            prompt: &request.prompt,
            stream: true,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            min_p: request.min_p,
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    fn build_chat_body(request: &CompletionRequest) -> Value {
        let body = ChatBody {
            model: &request.model,
            messages: [ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        serde_json::to_value(body).unwrap_or(Value::Null)
    }

    /// Extract the assistant text from a chat completion body
    fn parse_chat_response(body: &Value) -> Result<String, LlmError> {
        if let Some(error) = body.get("error") {
            let message = error["message"].as_str().unwrap_or("unknown error").to_string();
            return Err(match error["code"].as_u64().and_then(|c| u16::try_from(c).ok()) {
                Some(status) => status_error(status, None, message),
                None => LlmError::InvalidResponse(message),
            });
        }

        let choice = body["choices"]
            .as_array()
            .and_then(|choices| choices.first())
            .ok_or_else(|| LlmError::InvalidResponse("No choices in response".to_string()))?;

        Ok(choice["message"]["content"].as_str().unwrap_or("").to_string())
    }

    async fn check_status(response: Response) -> Result<Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let retry_after = parse_retry_after(response.headers());
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(status_error(status.as_u16(), retry_after, message))
    }
}

/// Build the error for a non-success upstream status.
fn status_error(status: u16, retry_after: Option<Duration>, message: String) -> LlmError {
    if status == 429 {
        LlmError::RateLimited {
            retry_after: retry_after.unwrap_or_default(),
        }
    } else {
        LlmError::ApiError { status, message }
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[async_trait]
impl LlmClient for OpenRouterClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        let mut builder = self.client.post(self.chat_url()).json(&Self::build_chat_body(request));
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }

        let response = Self::check_status(builder.send().await?).await?;
        let text = response.text().await?;
        let body: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::InvalidResponse(format!("Invalid JSON: {}", e)))?;
        Self::parse_chat_response(&body)
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TokenStream, LlmError> {
        let builder = self
            .client
            .post(self.completions_url())
            .json(&Self::build_stream_body(request));

        let mut source = EventSource::new(builder).map_err(|e| LlmError::Stream(e.to_string()))?;
        // Retries are owned by the caller's backoff loop
        source.set_retry_policy(Box::new(Never));

        let stream = async_stream::stream! {
            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => match parse_sse_data(&message.data) {
                        SseData::Text(text) => yield Ok(text),
                        SseData::Done => break,
                        SseData::Skip => {}
                        SseData::Error { code, message } => {
                            yield Err(match code {
                                Some(status) => status_error(status, None, message),
                                None => LlmError::Stream(message),
                            });
                            break;
                        }
                    },
                    Err(EventSourceError::StreamEnded) => break,
                    Err(EventSourceError::InvalidStatusCode(status, response)) => {
                        let retry_after = parse_retry_after(response.headers());
                        let message = response.text().await.unwrap_or_default();
                        yield Err(status_error(status.as_u16(), retry_after, message));
                        break;
                    }
                    Err(EventSourceError::InvalidContentType(_, response)) => {
                        let message = response.text().await.unwrap_or_default();
                        yield Err(LlmError::InvalidResponse(format!("Expected an event stream, got: {}", message)));
                        break;
                    }
                    Err(EventSourceError::Transport(e)) => {
                        yield Err(LlmError::Network(e));
                        break;
                    }
                    Err(other) => {
                        yield Err(LlmError::Stream(other.to_string()));
                        break;
                    }
                }
            }
            source.close();
        };

        Ok(Box::pin(stream))
    }
}

impl std::fmt::Debug for OpenRouterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterClient")
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
