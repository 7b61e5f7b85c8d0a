use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ChatRelayConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://chatrelay.db".to_string(),
            max_connections: 5,
        }
    }
}

/// Settings for the hosted chat-completion backend.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelConfig {
    pub model: String,
    pub base_url: String,
    /// Name of the environment variable holding the provider API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_output_tokens: Option<u32>,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Per-request timeout. Unset means the call may block indefinitely.
    pub timeout_secs: Option<u64>,
    pub system_instruction: Option<String>,
}

pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "The following is a friendly conversation between a human and an AI. \
The AI is talkative and provides lots of specific details from its context. \
If the AI does not know the answer to a question, it truthfully says it does not know.";

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: "gemini-1.5-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            api_key_env: "GOOGLE_API_KEY".to_string(),
            temperature: 0.0,
            max_output_tokens: None,
            max_retries: 2,
            retry_delay_ms: 500,
            timeout_secs: None,
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
        }
    }
}

impl ModelConfig {
    /// Reads the API key from the configured environment variable.
    /// An unset variable yields an empty key.
    pub fn api_key_from_env(&self) -> String {
        std::env::var(&self.api_key_env).unwrap_or_default()
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

impl ChatRelayConfig {
    /// Load from a TOML file. A missing file falls back to defaults for every section.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .build()?;
        s.try_deserialize()
    }
}
