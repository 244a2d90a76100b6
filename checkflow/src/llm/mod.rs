//! LLM-backed stages.
//!
//! A [`PromptStage`] renders a [`PromptTemplate`] from the run context and
//! sends it to a [`CompletionClient`]. The client is a trait so tests and
//! alternative providers can plug in; an OpenAI-compatible HTTP client is
//! available behind the `http` feature.

mod presets;
mod stage;
mod template;

#[cfg(feature = "http")]
mod http;

pub use presets::{code_generation_pipeline, REFACTOR_PROMPT, REVIEW_PROMPT, WRITE_PROMPT};
pub use stage::PromptStage;
pub use template::PromptTemplate;

#[cfg(feature = "http")]
pub use http::OpenAiCompatibleClient;

use crate::stages::StageError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single completion request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// System instructions, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    /// The rendered user prompt.
    pub prompt: String,
    /// Model override; the client's default is used when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Maximum tokens to generate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// Creates a request for `prompt`.
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    /// Sets the system instructions.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Errors from a completion provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompletionError {
    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The provider throttled the request.
    #[error("Rate limited (retry after {retry_after_secs:?}s)")]
    RateLimited {
        /// Seconds the provider asked us to wait.
        retry_after_secs: Option<f64>,
    },

    /// The provider returned an error status.
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider message.
        message: String,
    },

    /// The response could not be understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) | Self::RateLimited { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            Self::InvalidResponse(_) => false,
        }
    }
}

impl From<CompletionError> for StageError {
    fn from(err: CompletionError) -> Self {
        let retryable = err.is_retryable();
        StageError::failed(err.to_string()).with_retryable(retryable)
    }
}

/// A text completion provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Completes `request`, returning the generated text.
    async fn complete(&self, request: CompletionRequest) -> Result<String, CompletionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(CompletionError::Transport("reset".into()).is_retryable());
        assert!(CompletionError::RateLimited {
            retry_after_secs: Some(1.0)
        }
        .is_retryable());
        assert!(CompletionError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!CompletionError::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!CompletionError::InvalidResponse("no choices".into()).is_retryable());
    }

    #[test]
    fn test_into_stage_error_keeps_retryability() {
        let err: StageError = CompletionError::RateLimited {
            retry_after_secs: None,
        }
        .into();
        assert!(err.retryable);
        assert!(err.message.contains("Rate limited"));
    }

    #[test]
    fn test_request_serialization_skips_unset_fields() {
        let req = CompletionRequest::new("hi").with_model("gpt-4o");
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, serde_json::json!({"prompt": "hi", "model": "gpt-4o"}));
    }
}
