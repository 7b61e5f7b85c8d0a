//! Model adapter: hosted chat completion behind a single `complete` call.
//!
//! The `ChatModel` trait takes the restored history plus the new user message
//! and returns the assistant's reply. `GeminiChatClient` implements it against
//! the Gemini `generateContent` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

use crate::config::ModelConfig;
use crate::history::{ConversationHistory, Speaker};

// ============================================================================
// ChatModel trait
// ============================================================================

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Produce the next assistant turn for `input`, given the prior turns.
    async fn complete(&self, history: &ConversationHistory, input: &str)
        -> Result<String, ModelError>;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Response contained no candidate text")]
    EmptyResponse,

    #[error("Missing API key")]
    MissingApiKey,

    #[error("All {attempts} attempts failed")]
    RetryExhausted { attempts: usize },
}

impl ModelError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            ModelError::Http(e) => !e.is_decode() && !e.is_builder(),
            ModelError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: Option<GeminiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    code: u16,
    message: String,
}

fn role_for(speaker: Speaker) -> &'static str {
    match speaker {
        Speaker::User => "user",
        Speaker::Assistant => "model",
    }
}

// ============================================================================
// GeminiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: ModelConfig,
    api_key: String,
}

impl GeminiChatClient {
    /// Build a client. An empty `api_key` is accepted here; every call then
    /// fails with [`ModelError::MissingApiKey`].
    pub fn new(config: ModelConfig, api_key: String) -> Result<Self, ModelError> {
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder.build()?;

        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    pub fn has_api_key(&self) -> bool {
        !self.api_key.is_empty()
    }

    fn build_request(&self, history: &ConversationHistory, input: &str) -> GenerateRequest {
        let mut contents: Vec<GeminiContent> = history
            .turns()
            .iter()
            .map(|turn| GeminiContent {
                role: Some(role_for(turn.speaker)),
                parts: vec![GeminiPart {
                    text: turn.text.clone(),
                }],
            })
            .collect();
        contents.push(GeminiContent {
            role: Some("user"),
            parts: vec![GeminiPart {
                text: input.to_string(),
            }],
        });

        GenerateRequest {
            system_instruction: self.config.system_instruction.as_ref().map(|text| GeminiContent {
                role: None,
                parts: vec![GeminiPart { text: text.clone() }],
            }),
            contents,
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        }
    }

    async fn generate_once(&self, request: &GenerateRequest) -> Result<String, ModelError> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| ModelError::Http(e.without_url()))?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<GeminiErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code, e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::warn!(code = code, message = %message, "Gemini API error");

            return Err(ModelError::Api { code, message });
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Http(e.without_url()))?;

        let text: String = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            return Err(ModelError::EmptyResponse);
        }

        Ok(text)
    }
}

#[async_trait]
impl ChatModel for GeminiChatClient {
    async fn complete(
        &self,
        history: &ConversationHistory,
        input: &str,
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::MissingApiKey);
        }

        let request = self.build_request(history, input);
        let retry_strategy = ExponentialBackoff::from_millis(self.config.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries);

        let attempts = self.config.max_retries + 1;
        let result = RetryIf::spawn(
            retry_strategy,
            || self.generate_once(&request),
            |e: &ModelError| e.is_transient(),
        )
        .await;

        match result {
            Ok(text) => Ok(text),
            Err(e) if e.is_transient() => {
                tracing::error!(attempts, error = %e, "All model retry attempts failed");
                Err(ModelError::RetryExhausted { attempts })
            }
            Err(e) => Err(e),
        }
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// TESTS
// ============================================================================
