//! # ai — เรียก LLM (Together / OpenAI / Claude)
//!
//! The classifier only sees the [`Oracle`] trait: prompt in, raw text out.
//! Together and OpenAI share the chat-completions envelope
//! `{choices:[{message:{content}}]}`; Claude answers with `{content:[{text}]}`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::{AiConfig, AiProvider};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_TOKENS: u32 = 512;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("AI API request failed: {0}")]
    Transport(String),

    #[error("AI API error {status}: {body}")]
    Http { status: u16, body: String },

    #[error("AI response envelope malformed: {0}")]
    Envelope(String),

    #[error("AI returned empty content")]
    EmptyContent,
}

/// A remote text-classification oracle.
#[async_trait]
pub trait Oracle: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

// ─── Chat-completions wire types ──────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model:      &'a str,
    messages:   Vec<ChatMessage<'a>>,
    max_tokens: u32,
    temperature: f32,
    top_p:      f32,
    // Together-only sampling knobs; OpenAI rejects unknown fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k:      Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    repetition_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop:       Option<Vec<&'a str>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role:    &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMsg,
}

#[derive(Deserialize)]
struct ChatChoiceMsg {
    content: Option<String>,
}

// ─── Claude wire types ────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ClaudeRequest<'a> {
    model:      &'a str,
    max_tokens: u32,
    messages:   Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeContent>,
}

#[derive(Deserialize)]
struct ClaudeContent {
    #[serde(default)]
    text: Option<String>,
}

// ─── ChatOracle ───────────────────────────────────────────────────────────────

pub struct ChatOracle {
    client: reqwest::Client,
    config: AiConfig,
}

impl ChatOracle {
    pub fn new(client: reqwest::Client, config: AiConfig) -> Self {
        Self { client, config }
    }

    async fn call_chat_completions(&self, prompt: &str) -> Result<String, OracleError> {
        let together = self.config.provider == AiProvider::Together;
        let body = ChatRequest {
            model:      &self.config.model,
            messages:   vec![ChatMessage { role: "system", content: prompt }],
            max_tokens: MAX_TOKENS,
            temperature: 0.7,
            top_p:      0.7,
            top_k:      together.then_some(50),
            repetition_penalty: together.then_some(1.0),
            stop:       together.then(|| vec!["<|eot_id|>", "<|eom_id|>"]),
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));
        debug!(provider = %self.config.provider, url = %url, "Calling chat completions API...");

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let data: ChatResponse = read_json(resp).await?;
        extract_chat_content(data)
    }

    async fn call_claude(&self, prompt: &str) -> Result<String, OracleError> {
        let body = ClaudeRequest {
            model:      &self.config.model,
            max_tokens: MAX_TOKENS,
            messages:   vec![ChatMessage { role: "user", content: prompt }],
        };

        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        debug!(url = %url, "Calling Claude API...");

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(|e| OracleError::Transport(e.to_string()))?;

        let data: ClaudeResponse = read_json(resp).await?;
        data.content
            .into_iter()
            .find_map(|c| c.text)
            .filter(|t| !t.trim().is_empty())
            .ok_or(OracleError::EmptyContent)
    }
}

#[async_trait]
impl Oracle for ChatOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        match self.config.provider {
            AiProvider::Together | AiProvider::OpenAi => self.call_chat_completions(prompt).await,
            AiProvider::Claude => self.call_claude(prompt).await,
        }
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, OracleError> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        return Err(OracleError::Http { status, body });
    }
    resp.json().await.map_err(|e| OracleError::Envelope(e.to_string()))
}

fn extract_chat_content(data: ChatResponse) -> Result<String, OracleError> {
    let choice = data
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| OracleError::Envelope("response has no choices".into()))?;

    choice
        .message
        .content
        .filter(|c| !c.trim().is_empty())
        .ok_or(OracleError::EmptyContent)
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use serde_json::{json, Value};

    fn parse(value: Value) -> Result<String, OracleError> {
        extract_chat_content(serde_json::from_value(value).unwrap())
    }

    #[test]
    fn chat_envelope_extraction() {
        assert_eq!(
            parse(json!({ "choices": [{ "message": { "content": "{\"action\":\"none\"}" } }] })).unwrap(),
            "{\"action\":\"none\"}"
        );
        assert!(matches!(parse(json!({ "choices": [] })), Err(OracleError::Envelope(_))));
        assert!(matches!(
            parse(json!({ "choices": [{ "message": { "content": "   " } }] })),
            Err(OracleError::EmptyContent)
        ));
        assert!(matches!(
            parse(json!({ "choices": [{ "message": { "content": null } }] })),
            Err(OracleError::EmptyContent)
        ));
    }

    async fn spawn_provider(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn config(provider: AiProvider, base_url: String) -> AiConfig {
        AiConfig {
            provider,
            api_key: "test-key".into(),
            model: provider.default_model().into(),
            base_url,
        }
    }

    #[tokio::test]
    async fn together_request_carries_sampling_knobs() {
        let app = Router::new().route("/chat/completions", post(|Json(body): Json<Value>| async move {
            assert_eq!(body["top_k"], 50);
            assert_eq!(body["messages"][0]["role"], "system");
            Json(json!({ "choices": [{ "message": { "content": "ok" } }] }))
        }));
        let url = spawn_provider(app).await;

        let oracle = ChatOracle::new(reqwest::Client::new(), config(AiProvider::Together, url));
        assert_eq!(oracle.complete("hi").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn http_errors_surface_status() {
        let app = Router::new().route("/messages", post(|| async {
            (axum::http::StatusCode::TOO_MANY_REQUESTS, "slow down")
        }));
        let url = spawn_provider(app).await;

        let oracle = ChatOracle::new(reqwest::Client::new(), config(AiProvider::Claude, url));
        match oracle.complete("hi").await {
            Err(OracleError::Http { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "slow down");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
