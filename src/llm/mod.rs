//! LLM integration: model seam plus concrete clients
//!
//! Stages talk to a `LanguageModel`; which server sits behind it (Ollama,
//! an OpenAI-compatible chat endpoint, or a scripted stand-in) is decided
//! once from configuration.

pub mod chat_client;
pub mod json;
pub mod ollama_client;
pub mod scripted;

pub use chat_client::ChatCompletionsClient;
pub use json::extract_json_from_response;
pub use ollama_client::OllamaClient;
pub use scripted::ScriptedModel;

use crate::config::{LlmConfig, LlmProvider};
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// One completion call
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub prompt: String,
    pub temperature: f32,

    /// Ask the server to constrain output to a JSON object
    pub json: bool,
    pub max_tokens: u32,
}

impl CompletionRequest {
    /// JSON-mode request with the given sampling temperature
    pub fn json(prompt: impl Into<String>, temperature: f32, max_tokens: u32) -> Self {
        Self {
            system: None,
            prompt: prompt.into(),
            temperature,
            json: true,
            max_tokens,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LlmError {
    #[error("request to {endpoint} failed: {message}")]
    Transport { endpoint: String, message: String },

    #[error("{endpoint} answered HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },

    #[error("cannot decode model response: {message}")]
    Decode { message: String },

    #[error("model returned no content")]
    EmptyResponse,

    #[error("model unavailable: {message}")]
    Unavailable { message: String },
}

impl LlmError {
    pub fn transport(endpoint: &str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            endpoint: endpoint.to_string(),
            message: err.to_string(),
        }
    }

    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::Decode {
            message: err.to_string(),
        }
    }
}

/// A text-completion backend
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Model name used in logs
    fn name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

/// Build the configured model client
pub fn build_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>> {
    let model: Arc<dyn LanguageModel> = match config.provider {
        LlmProvider::Ollama => Arc::new(OllamaClient::new(config.base_url.clone(), config.model.clone())),
        LlmProvider::ChatCompletions => {
            let Some(api_key) = config.api_key.clone() else {
                bail!("chat_completions provider needs an API key (GROQ_API_KEY or SAMARTH_LLM_API_KEY)");
            };
            Arc::new(ChatCompletionsClient::new(
                config.base_url.clone(),
                config.model.clone(),
                api_key,
            ))
        }
    };

    tracing::info!(provider = ?config.provider, model = model.name(), "language model configured");
    Ok(model)
}
