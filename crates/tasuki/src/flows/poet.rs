//! Poem composition from keywords.

use crate::activity::{AgentActivity, AgentRegistration};
use crate::config::require_env;
use crate::marshal::MarshalPlan;
use crate::runtime::AgentRuntime;
use crate::stage::ActivityStage;
use crate::workflow::Workflow;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tasuki_core::{
    Absence, Activity, ActivityError, ActivityResult, AgentHandler, AgentInvocationResult,
    AgentInvocationSpec, CancellationSignal, ExecutionMode, WorkflowError,
};
use tracing::debug;

/// Instruction guiding the composer.
pub const POEM_INSTRUCTION: &str = "How to Generate a Poem";
/// Argument carrying the staged instruction path.
pub const INSTRUCTION_ARG: &str = "instruction-file";
/// Context key and agent argument holding the keywords.
pub const KEYWORDS_KEY: &str = "keywords";
/// Context key receiving the [`Poem`].
pub const POEM_KEY: &str = "poem";
/// Environment variable holding the Gemini API key.
pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";

/// A composed poem, as printed by the composer agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poem {
    /// The poem itself.
    pub text: String,
}

/// Composes a [`Poem`] from keywords. An empty poem counts as no output.
#[derive(Debug)]
pub struct ComposerActivity {
    inner: AgentActivity<Poem>,
}

impl ComposerActivity {
    /// Activity and step name.
    pub const NAME: &'static str = "GeneratePoem";

    /// The composer contract: resolves [`POEM_INSTRUCTION`] and passes its
    /// staged path as `--instruction-file`.
    pub fn registration(agent: impl Into<String>, mode: ExecutionMode) -> AgentRegistration {
        AgentRegistration::new(Self::NAME, agent, mode)
            .instruction(POEM_INSTRUCTION)
            .plan(MarshalPlan::new().instruction_arg(INSTRUCTION_ARG))
    }

    /// Builds the activity against `agent` on `runtime`.
    pub fn new(runtime: &AgentRuntime, agent: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            inner: runtime.activity(Self::registration(agent, mode)),
        }
    }
}

#[async_trait]
impl Activity for ComposerActivity {
    type Input = String;
    type Output = Poem;

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        keywords: String,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<Poem>, ActivityError> {
        let args = BTreeMap::from([(KEYWORDS_KEY.to_string(), keywords)]);
        let result = self.inner.invoke(&args, cancel).await?;
        Ok(result.and_then(|poem| {
            if poem.text.trim().is_empty() {
                ActivityResult::Absent(Absence::NoOutput)
            } else {
                ActivityResult::Completed(poem)
            }
        }))
    }
}

/// Single-step workflow: `keywords` in, `poem` out.
pub fn poet_workflow(composer: ComposerActivity) -> Result<Workflow, WorkflowError> {
    Workflow::builder()
        .add_step(
            ComposerActivity::NAME,
            ActivityStage::new(composer, KEYWORDS_KEY, POEM_KEY),
        )
        .start_with(ComposerActivity::NAME)
        .build()
}

/// Agent that asks Gemini for a poem.
///
/// Reads the staged instruction named by `--instruction-file` and sends it
/// together with `--keywords` to the `generateContent` endpoint. Prints
/// `{"text": ...}` on success.
#[derive(Debug, Clone)]
pub struct GeminiComposer {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl GeminiComposer {
    /// The public `gemini-1.5-flash` endpoint.
    pub const DEFAULT_ENDPOINT: &'static str =
        "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-flash:generateContent";

    /// Calls [`DEFAULT_ENDPOINT`](Self::DEFAULT_ENDPOINT) with `api_key`.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ActivityError> {
        Self::with_endpoint(Self::DEFAULT_ENDPOINT, api_key)
    }

    /// Reads the key from `GEMINI_API_KEY`.
    pub fn from_env() -> Result<Self, ActivityError> {
        Self::new(require_env(GEMINI_API_KEY)?)
    }

    /// Calls another `generateContent`-compatible endpoint.
    pub fn with_endpoint(endpoint: &str, api_key: impl Into<String>) -> Result<Self, ActivityError> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            ActivityError::Configuration(format!("invalid Gemini endpoint '{endpoint}': {err}"))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
        })
    }

    async fn compose(&self, spec: &AgentInvocationSpec) -> Result<String, String> {
        let path = spec
            .args
            .get(INSTRUCTION_ARG)
            .ok_or_else(|| format!("missing --{INSTRUCTION_ARG}"))?;
        let instruction = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| format!("cannot read instruction at {path}: {err}"))?;
        let keywords = spec.args.get(KEYWORDS_KEY).cloned().unwrap_or_default();
        debug!(keywords = %keywords, "requesting poem");

        let body = json!({
            "contents": [{
                "parts": [{ "text": instruction }, { "text": keywords }]
            }]
        });
        let response = self
            .client
            .post(self.endpoint.clone())
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await
            .map_err(|err| format!("request failed: {err}"))?;

        let status = response.status();
        if !status.is_success() {
            let details = response.text().await.unwrap_or_default();
            return Err(format!("Gemini returned {status}: {details}"));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| format!("unreadable response: {err}"))?;
        Ok(payload
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }
}

#[async_trait]
impl AgentHandler for GeminiComposer {
    async fn handle(&self, spec: &AgentInvocationSpec) -> AgentInvocationResult {
        let text = match self.compose(spec).await {
            Ok(text) => text,
            Err(details) => return AgentInvocationResult::failed(None, details),
        };
        // No candidate text means no output, not failure.
        if text.is_empty() {
            return AgentInvocationResult::succeeded("");
        }
        match serde_json::to_string(&Poem { text }) {
            Ok(json) => AgentInvocationResult::succeeded(json),
            Err(err) => AgentInvocationResult::failed(None, err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_resolves_poem_instruction() {
        let registration = ComposerActivity::registration("gemini", ExecutionMode::InProcess);
        assert_eq!(registration.instruction.as_deref(), Some(POEM_INSTRUCTION));
        assert_eq!(registration.activity, ComposerActivity::NAME);
    }

    #[tokio::test]
    async fn test_composer_without_instruction_file_fails() {
        let composer = GeminiComposer::with_endpoint("http://127.0.0.1:9/", "key").expect("endpoint");
        let result = composer.handle(&AgentInvocationSpec::new()).await;
        assert!(!result.is_success());
        assert!(result.stderr.contains(INSTRUCTION_ARG));
    }
}
