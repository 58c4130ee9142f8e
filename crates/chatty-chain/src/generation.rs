//! Generative model clients.
//!
//! - `OpenAiCompatibleClient` calls `/chat/completions` on any
//!   OpenAI-compatible endpoint (Groq by default).
//! - `ScriptedGeneration` replays queued replies and records prompts. Used
//!   by the test suites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use chatty_core::config::GenerationConfig;

use crate::error::GenerationError;

/// One prompt in, one completion out. Sampling parameters are fixed when
/// the client is built.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

// ---------------------------------------------------------------------------
// OpenAiCompatibleClient
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
}

/// Non-streaming chat-completions client. No retries.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    client: Client,
    base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    api_key: String,
}

impl OpenAiCompatibleClient {
    /// Build from configuration, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &GenerationConfig) -> Result<Self, GenerationError> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey(config.api_key_env.clone()));
        }
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(
        config: &GenerationConfig,
        api_key: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::MissingApiKey(config.api_key_env.clone()));
        }
        Ok(Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            api_key,
        })
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatibleClient {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(prompt))
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: CompletionResponse = res.json().await?;

        let content = payload
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GenerationError::InvalidResponse("no choice content".to_string()))?;

        if content.trim().is_empty() {
            return Err(GenerationError::InvalidResponse(
                "empty completion".to_string(),
            ));
        }

        debug!(model = %self.model, chars = content.len(), "Completion received");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OpenAiCompatibleClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ScriptedGeneration
// ---------------------------------------------------------------------------

/// Replays queued outcomes in order and records every prompt it receives.
///
/// An exhausted script answers with `InvalidResponse`.
#[derive(Debug, Default)]
pub struct ScriptedGeneration {
    script: Mutex<VecDeque<Result<String, GenerationError>>>,
    prompts: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl ScriptedGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script that answers with each reply in turn.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let script = Self::new();
        for reply in replies {
            script.push_reply(reply);
        }
        script
    }

    /// Wait this long before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_reply(&self, reply: impl Into<String>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Ok(reply.into()));
        }
    }

    pub fn push_failure(&self, error: GenerationError) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(Err(error));
        }
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().map(|p| p.len()).unwrap_or(0)
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self
            .script
            .lock()
            .map_err(|e| GenerationError::InvalidResponse(format!("script lock poisoned: {}", e)))?
            .pop_front();

        next.unwrap_or_else(|| {
            Err(GenerationError::InvalidResponse(
                "scripted generation exhausted".to_string(),
            ))
        })
    }

    fn model(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    use super::*;

    // ---- stub OpenAI-compatible server ----

    #[derive(Clone)]
    struct Stub {
        status: StatusCode,
        reply: Value,
        seen: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    }

    async fn completions(
        State(stub): State<Stub>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        stub.seen.lock().unwrap().push((auth, body));
        (stub.status, Json(stub.reply.clone()))
    }

    async fn spawn_stub(status: StatusCode, reply: Value) -> (String, Stub) {
        let stub = Stub {
            status,
            reply,
            seen: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(stub.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/v1", addr), stub)
    }

    fn config_for(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            base_url: base_url.to_string(),
            ..GenerationConfig::default()
        }
    }

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-1",
            "choices": [{ "index": 0, "message": { "role": "assistant", "content": content } }]
        })
    }

    // ---- OpenAiCompatibleClient ----

    #[tokio::test]
    async fn test_generate_returns_first_choice() {
        let (base, stub) = spawn_stub(StatusCode::OK, completion("4")).await;
        let client = OpenAiCompatibleClient::with_api_key(&config_for(&base), "test-key").unwrap();

        let answer = client.generate("What is 2+2?").await.unwrap();
        assert_eq!(answer, "4");

        let seen = stub.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let (auth, body) = &seen[0];
        assert_eq!(auth.as_deref(), Some("Bearer test-key"));
        assert_eq!(body["model"], "llama-3.3-70b-versatile");
        assert_eq!(body["stream"], false);
        assert_eq!(body["max_tokens"], 4096);
        assert!((body["temperature"].as_f64().unwrap() - 0.7).abs() < 1e-9);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "What is 2+2?");
    }

    #[tokio::test]
    async fn test_trailing_slash_in_base_url() {
        let (base, _stub) = spawn_stub(StatusCode::OK, completion("ok")).await;
        let client =
            OpenAiCompatibleClient::with_api_key(&config_for(&format!("{}/", base)), "k").unwrap();
        assert_eq!(client.generate("hi").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_non_success_status_maps_to_status_error() {
        let (base, _stub) =
            spawn_stub(StatusCode::TOO_MANY_REQUESTS, json!({"error": "rate limited"})).await;
        let client = OpenAiCompatibleClient::with_api_key(&config_for(&base), "k").unwrap();

        match client.generate("hi").await.unwrap_err() {
            GenerationError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("expected status error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_choices_is_invalid_response() {
        let (base, _stub) = spawn_stub(StatusCode::OK, json!({"choices": []})).await;
        let client = OpenAiCompatibleClient::with_api_key(&config_for(&base), "k").unwrap();
        assert!(matches!(
            client.generate("hi").await.unwrap_err(),
            GenerationError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_empty_content_is_invalid_response() {
        let (base, _stub) = spawn_stub(StatusCode::OK, completion("  ")).await;
        let client = OpenAiCompatibleClient::with_api_key(&config_for(&base), "k").unwrap();
        assert!(matches!(
            client.generate("hi").await.unwrap_err(),
            GenerationError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_undecodable_body_is_invalid_response() {
        let (base, _stub) = spawn_stub(StatusCode::OK, json!("just a string")).await;
        let client = OpenAiCompatibleClient::with_api_key(&config_for(&base), "k").unwrap();
        assert!(matches!(
            client.generate("hi").await.unwrap_err(),
            GenerationError::InvalidResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = OpenAiCompatibleClient::with_api_key(
            &config_for(&format!("http://{}/v1", addr)),
            "k",
        )
        .unwrap();
        let err = client.generate("hi").await.unwrap_err();
        assert!(matches!(err, GenerationError::Transport(_)));

        // The underlying reqwest error stays reachable for callers.
        let source = std::error::Error::source(&err).unwrap();
        let reqwest_err = source.downcast_ref::<reqwest::Error>().unwrap();
        assert!(reqwest_err.is_connect());
    }

    #[test]
    fn test_blank_api_key_rejected() {
        let err = OpenAiCompatibleClient::with_api_key(&GenerationConfig::default(), " ").unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey(ref var) if var == "GROQ_API_KEY"));
    }

    #[test]
    fn test_from_config_reads_named_env_var() {
        let config = GenerationConfig {
            api_key_env: "CHATTY_TEST_UNSET_KEY_7F3A".to_string(),
            ..GenerationConfig::default()
        };
        let err = OpenAiCompatibleClient::from_config(&config).unwrap_err();
        assert!(matches!(err, GenerationError::MissingApiKey(_)));
    }

    #[test]
    fn test_debug_hides_api_key() {
        let client = OpenAiCompatibleClient::with_api_key(&GenerationConfig::default(), "secret").unwrap();
        assert!(!format!("{:?}", client).contains("secret"));
    }

    // ---- ScriptedGeneration ----

    #[tokio::test]
    async fn test_scripted_replays_in_order_and_records_prompts() {
        let script = ScriptedGeneration::with_replies(["4", "8"]);
        assert_eq!(script.generate("p1").await.unwrap(), "4");
        assert_eq!(script.generate("p2").await.unwrap(), "8");
        assert!(script.generate("p3").await.is_err());
        assert_eq!(script.prompts(), vec!["p1", "p2", "p3"]);
        assert_eq!(script.call_count(), 3);
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let script = ScriptedGeneration::new();
        script.push_failure(GenerationError::InvalidResponse("truncated".to_string()));
        script.push_reply("after");
        assert!(matches!(
            script.generate("p").await.unwrap_err(),
            GenerationError::InvalidResponse(_)
        ));
        assert_eq!(script.generate("p").await.unwrap(), "after");
    }
}
