/// LLM Client: the single point of entry for all chat-completion calls.
///
/// ARCHITECTURAL RULE: No other module may call the provider API directly.
/// Services depend on the `TextGenerator` trait; `LlmClient` is the production
/// implementation against an OpenAI-compatible `/chat/completions` endpoint.
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::extraction::{interpret, Extraction};

pub mod prompts;
pub mod retry;

use retry::{retry_with_backoff, Cancelled, RetryDecision, RetryPolicy};

const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TEMPERATURE: f32 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    Cancelled,
    TimedOut,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("LLM returned an empty response")]
    EmptyResponse,

    #[error("Generation aborted: {0:?}")]
    Aborted(AbortReason),
}

impl LlmError {
    pub fn is_aborted(&self) -> bool {
        matches!(self, LlmError::Aborted(_))
    }
}

impl From<Cancelled> for LlmError {
    fn from(_: Cancelled) -> Self {
        LlmError::Aborted(AbortReason::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    /// Role of model turns; only ever deserialized here.
    #[allow(dead_code)]
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// The `{ systemPrompt, userPrompt, temperature, maxTokens }` shape.
    pub fn prompt(system: impl Into<String>, user: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            params,
        }
    }
}

/// Anything that turns a chat transcript into generated text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError>;
}

/// Generates text and interprets it as JSON, falling back to the plain text.
pub async fn generate_structured(
    generator: &dyn TextGenerator,
    request: &GenerationRequest,
    cancel: &CancellationToken,
) -> Result<Extraction, LlmError> {
    let text = generator.generate(request, cancel).await?;
    interpret(&text).map_err(|_| LlmError::EmptyResponse)
}

// ────────────────────────────────────────────────────────────────────────────
// Wire types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ProviderError {
    error: ProviderErrorBody,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

// ────────────────────────────────────────────────────────────────────────────
// Client
// ────────────────────────────────────────────────────────────────────────────

/// Connection settings for `LlmClient`.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    /// Advisory per-attempt timeout; expiry is reported as an abort.
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Wraps the chat-completions API with cancellation, timeouts and rate-limit retries.
#[derive(Clone)]
pub struct LlmClient {
    client: Client,
    settings: LlmSettings,
}

impl LlmClient {
    pub fn new(settings: LlmSettings) -> Result<Self, LlmError> {
        Ok(Self {
            client: Client::builder().build()?,
            settings,
        })
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        )
    }

    /// One HTTP round trip, bounded by the advisory timeout and the token.
    async fn attempt(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        let call = async {
            let body = ChatCompletionRequest {
                model: &self.settings.model,
                messages: &request.messages,
                max_tokens: request.params.max_tokens,
                temperature: request.params.temperature,
            };
            let response = self
                .client
                .post(self.endpoint())
                .bearer_auth(&self.settings.api_key)
                .json(&body)
                .send()
                .await?;
            read_completion(response).await
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(LlmError::Aborted(AbortReason::Cancelled)),
            timed = tokio::time::timeout(self.settings.timeout, call) => match timed {
                Ok(result) => result,
                Err(_) => Err(LlmError::Aborted(AbortReason::TimedOut)),
            },
        }
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<String, LlmError> {
        retry_with_backoff(&self.settings.retry, cancel, classify, |_| {
            self.attempt(request, cancel)
        })
        .await
    }
}

fn classify(error: &LlmError) -> RetryDecision {
    match error {
        LlmError::RateLimited {
            retry_after: Some(hint),
        } => RetryDecision::RetryAfter(*hint),
        LlmError::RateLimited { retry_after: None } => RetryDecision::Retry,
        LlmError::Api { status, .. } if *status >= 500 => RetryDecision::Retry,
        _ => RetryDecision::Stop,
    }
}

async fn read_completion(response: Response) -> Result<String, LlmError> {
    let status = response.status();

    if !status.is_success() {
        let header_hint = retry_after_from_headers(&response);
        let body = response.text().await.unwrap_or_default();
        let provider = serde_json::from_str::<ProviderError>(&body).ok();
        let message = provider
            .as_ref()
            .map(|e| e.error.message.clone())
            .unwrap_or(body);

        // Exhausted quota also arrives as 429 but waiting does not help.
        let quota_exhausted = provider.as_ref().is_some_and(|e| {
            e.error.kind.as_deref() == Some("insufficient_quota")
                || e.error.code.as_deref() == Some("insufficient_quota")
        });

        if status == StatusCode::TOO_MANY_REQUESTS && !quota_exhausted {
            let retry_after = header_hint.or_else(|| retry_after_from_message(&message));
            warn!("LLM API rate limited (retry after {:?}): {}", retry_after, message);
            return Err(LlmError::RateLimited { retry_after });
        }

        warn!("LLM API returned {}: {}", status, message);
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    let completion: ChatCompletionResponse = serde_json::from_str(&response.text().await?)?;

    if let Some(usage) = &completion.usage {
        debug!(
            "LLM call succeeded: prompt_tokens={}, completion_tokens={}",
            usage.prompt_tokens, usage.completion_tokens
        );
    }

    completion
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .filter(|text| !text.trim().is_empty())
        .ok_or(LlmError::EmptyResponse)
}

/// Reads `retry-after-ms` (milliseconds) or `retry-after` (seconds).
fn retry_after_from_headers(response: &Response) -> Option<Duration> {
    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
    };
    header("retry-after-ms")
        .map(|ms| Duration::from_micros((ms * 1_000.0).round() as u64))
        .or_else(|| header("retry-after").map(|s| Duration::from_micros((s * 1_000_000.0).round() as u64)))
}

/// Parses hints like "Please try again in 1.5s" or "try again in 20ms".
fn retry_after_from_message(message: &str) -> Option<Duration> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)try again in (\d+(?:\.\d+)?)\s*(ms|s)\b").expect("retry hint pattern is valid")
    });
    let caps = re.captures(message)?;
    let value: f64 = caps[1].parse().ok()?;
    let micros = if caps[2].eq_ignore_ascii_case("ms") {
        value * 1_000.0
    } else {
        value * 1_000_000.0
    };
    Some(Duration::from_micros(micros.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use serde_json::json;

    fn settings(base_url: String) -> LlmSettings {
        LlmSettings {
            api_key: "test-key".to_string(),
            base_url,
            model: "test-model".to_string(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(20),
            },
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest::prompt("You are helpful.", "Say hi", GenerationParams::default())
    }

    fn completion_body(content: serde_json::Value) -> String {
        json!({
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}],
            "usage": {"prompt_tokens": 12, "completion_tokens": 3}
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_generate_returns_first_choice_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "test-model",
                "max_tokens": 1024,
                "messages": [
                    {"role": "system", "content": "You are helpful."},
                    {"role": "user", "content": "Say hi"}
                ]
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(completion_body(json!("Hi there!")))
            .expect(1)
            .create_async()
            .await;

        let client = LlmClient::new(settings(server.url())).unwrap();
        let text = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(text, "Hi there!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_null_or_blank_content_is_empty_response_error() {
        for content in [json!(null), json!("   ")] {
            let mut server = mockito::Server::new_async().await;
            server
                .mock("POST", "/chat/completions")
                .with_status(200)
                .with_body(completion_body(content))
                .create_async()
                .await;

            let client = LlmClient::new(settings(server.url())).unwrap();
            let err = client
                .generate(&request(), &CancellationToken::new())
                .await
                .unwrap_err();
            assert!(matches!(err, LlmError::EmptyResponse), "got {err:?}");
        }
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_then_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_header("retry-after-ms", "5")
            .with_body(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
            .expect(3)
            .create_async()
            .await;

        let client = LlmClient::new(settings(server.url())).unwrap();
        let err = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LlmError::RateLimited {
                retry_after: Some(d)
            } if d == Duration::from_millis(5)
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_retry_after_seconds_header_is_honoured() {
        for (header, expected) in [("2", Duration::from_secs(2)), ("0.5", Duration::from_millis(500))] {
            let mut server = mockito::Server::new_async().await;
            let mock = server
                .mock("POST", "/chat/completions")
                .with_status(429)
                .with_header("retry-after", header)
                .with_body(r#"{"error":{"message":"Rate limit reached","type":"requests"}}"#)
                .expect(3)
                .create_async()
                .await;

            let client = LlmClient::new(settings(server.url())).unwrap();
            let err = client
                .generate(&request(), &CancellationToken::new())
                .await
                .unwrap_err();

            assert!(
                matches!(err, LlmError::RateLimited { retry_after: Some(d) } if d == expected),
                "retry-after {header}: got {err:?}"
            );
            mock.assert_async().await;
        }
    }

    #[tokio::test]
    async fn test_quota_exhaustion_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body(r#"{"error":{"message":"You exceeded your quota","type":"insufficient_quota"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = LlmClient::new(settings(server.url())).unwrap();
        let err = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 429, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_errors_are_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(503)
            .with_body("upstream unavailable")
            .expect(3)
            .create_async()
            .await;

        let client = LlmClient::new(settings(server.url())).unwrap();
        let err = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 503, ref message } if message == "upstream unavailable"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_client_errors_fail_fast_with_provider_message() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .with_status(400)
            .with_body(r#"{"error":{"message":"max_tokens is too large","type":"invalid_request_error"}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = LlmClient::new(settings(server.url())).unwrap();
        let err = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, LlmError::Api { status: 400, ref message } if message == "max_tokens is too large"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts_without_calling_provider() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat/completions")
            .expect(0)
            .create_async()
            .await;

        let token = CancellationToken::new();
        token.cancel();

        let client = LlmClient::new(settings(server.url())).unwrap();
        let err = client.generate(&request(), &token).await.unwrap_err();

        assert!(matches!(err, LlmError::Aborted(AbortReason::Cancelled)));
        assert!(err.is_aborted());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_timeout_maps_to_abort() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut cfg = settings(format!("http://{addr}"));
        cfg.timeout = Duration::from_millis(50);
        let client = LlmClient::new(cfg).unwrap();

        let err = client
            .generate(&request(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Aborted(AbortReason::TimedOut)));
    }

    #[test]
    fn test_retry_hint_parsed_from_message() {
        assert_eq!(
            retry_after_from_message("Rate limit reached. Please try again in 1.5s. Visit ..."),
            Some(Duration::from_millis(1500))
        );
        assert_eq!(
            retry_after_from_message("please try again in 20ms"),
            Some(Duration::from_millis(20))
        );
        assert_eq!(retry_after_from_message("slow down"), None);
    }

    #[test]
    fn test_classify_only_retries_transient_errors() {
        assert_eq!(
            classify(&LlmError::RateLimited {
                retry_after: Some(Duration::from_secs(2))
            }),
            RetryDecision::RetryAfter(Duration::from_secs(2))
        );
        assert_eq!(
            classify(&LlmError::RateLimited { retry_after: None }),
            RetryDecision::Retry
        );
        assert_eq!(
            classify(&LlmError::Api {
                status: 502,
                message: String::new()
            }),
            RetryDecision::Retry
        );
        assert_eq!(classify(&LlmError::EmptyResponse), RetryDecision::Stop);
        assert_eq!(
            classify(&LlmError::Aborted(AbortReason::TimedOut)),
            RetryDecision::Stop
        );
    }

    #[test]
    fn test_prompt_request_shape() {
        let req = GenerationRequest::prompt("sys", "usr", GenerationParams::default());
        assert_eq!(req.messages[0], ChatMessage::system("sys"));
        assert_eq!(req.messages[1], ChatMessage::user("usr"));
        assert_eq!(req.params.max_tokens, 1024);
    }
}
