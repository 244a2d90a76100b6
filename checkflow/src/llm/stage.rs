//! A stage that renders a prompt and asks a completion client.

use super::{CompletionClient, CompletionRequest, PromptTemplate};
use crate::context::StageContext;
use crate::pipeline::StageSpec;
use crate::stages::{Stage, StageError};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// An LLM-backed stage.
///
/// The prompt (and optional system) template placeholders are the keys this
/// stage reads; [`into_spec`](Self::into_spec) declares them as the stage's
/// inputs.
#[derive(Clone)]
pub struct PromptStage {
    prompt: PromptTemplate,
    system: Option<PromptTemplate>,
    client: Arc<dyn CompletionClient>,
    model: Option<String>,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
}

impl PromptStage {
    /// Creates a stage sending `prompt` to `client`.
    pub fn new(prompt: impl Into<PromptTemplate>, client: Arc<dyn CompletionClient>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            client,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Sets a system template.
    #[must_use]
    pub fn with_system(mut self, system: impl Into<PromptTemplate>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the temperature.
    #[must_use]
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the token limit.
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Keys referenced by the templates, in order of first use.
    #[must_use]
    pub fn inputs(&self) -> Vec<String> {
        let mut keys: Vec<String> = Vec::new();
        let system = self.system.iter().flat_map(PromptTemplate::placeholders);
        for key in system.chain(self.prompt.placeholders()) {
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
        keys
    }

    /// Wraps the stage in a [`StageSpec`] with its placeholders as inputs.
    pub fn into_spec(self, name: impl Into<String>, output_key: impl Into<String>) -> StageSpec {
        let inputs = self.inputs();
        StageSpec::new(name, output_key, Arc::new(self)).with_inputs(inputs)
    }

    fn request(&self, ctx: &StageContext) -> Result<CompletionRequest, StageError> {
        let system = self
            .system
            .as_ref()
            .map(|t| t.render(ctx))
            .transpose()?;
        Ok(CompletionRequest {
            system,
            prompt: self.prompt.render(ctx)?,
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }
}

impl fmt::Debug for PromptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptStage")
            .field("prompt", &self.prompt.source())
            .field("system", &self.system.as_ref().map(PromptTemplate::source))
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Stage for PromptStage {
    async fn execute(&self, ctx: &StageContext) -> Result<Value, StageError> {
        let request = self.request(ctx)?;
        debug!(
            stage = %ctx.stage_name(),
            prompt_len = request.prompt.len(),
            "Sending completion request"
        );
        let text = self.client.complete(request).await?;
        Ok(Value::String(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunIdentity;
    use crate::llm::{CompletionError, MockCompletionClient};
    use crate::stages::StageErrorKind;
    use pretty_assertions::assert_eq;
    use serde_json::{json, Map};

    fn snapshot() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "input": "write a csv parser",
            "generated_code": "def parse(): pass",
        }) else {
            unreachable!()
        };
        map
    }

    fn ctx_for(spec: &StageSpec) -> StageContext {
        StageContext::new(
            RunIdentity::new("a", "u", "s"),
            &spec.name,
            "write a csv parser",
            snapshot(),
        )
        .with_declared_inputs(spec.inputs.iter().cloned())
    }

    #[tokio::test]
    async fn test_renders_prompt_and_returns_completion() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .withf(|req| {
                req.prompt == "Review:\ndef parse(): pass"
                    && req.system.as_deref() == Some("You review code.")
                    && req.model.as_deref() == Some("gpt-4o")
            })
            .times(1)
            .returning(|_| Ok("looks fine".to_string()));

        let spec = PromptStage::new("Review:\n{generated_code}", Arc::new(client))
            .with_system("You review code.")
            .with_model("gpt-4o")
            .into_spec("review", "review_comments");
        assert_eq!(spec.inputs, vec!["generated_code".to_string()]);

        let out = spec.runner.execute(&ctx_for(&spec)).await.unwrap();
        assert_eq!(out, json!("looks fine"));
    }

    #[tokio::test]
    async fn test_client_errors_become_stage_errors() {
        let mut client = MockCompletionClient::new();
        client
            .expect_complete()
            .returning(|_| Err(CompletionError::RateLimited { retry_after_secs: None }));

        let spec = PromptStage::new("{input}", Arc::new(client)).into_spec("write", "code");
        let err = spec.runner.execute(&ctx_for(&spec)).await.unwrap_err();
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn test_unresolved_placeholder_skips_client() {
        let mut client = MockCompletionClient::new();
        client.expect_complete().times(0);

        let spec =
            PromptStage::new("{review_comments}", Arc::new(client)).into_spec("refactor", "out");
        let err = spec.runner.execute(&ctx_for(&spec)).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::MissingInput);
    }

    #[test]
    fn test_inputs_merge_system_and_prompt() {
        let stage = PromptStage::new("{b} {a}", Arc::new(MockCompletionClient::new()))
            .with_system("{a} {c}");
        assert_eq!(stage.inputs(), vec!["a", "c", "b"]);
    }
}
