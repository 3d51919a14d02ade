//! LinkedIn company reader: web search, then a containerized page reader.

use crate::activity::{AgentActivity, AgentRegistration};
use crate::config::require_env;
use crate::marshal::MarshalPlan;
use crate::runtime::AgentRuntime;
use crate::stage::ActivityStage;
use crate::workflow::Workflow;
use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tasuki_core::{
    Absence, Activity, ActivityError, ActivityResult, AgentHandler, AgentInvocationResult,
    AgentInvocationSpec, CancellationSignal, ExecutionMode, RetryPolicy, WorkflowError,
};

/// Instruction guiding the page reader.
pub const READER_INSTRUCTION: &str = "Read LinkedIn Company Page";
/// Where the reader container sees the instruction.
pub const PROMPT_MOUNT: &str = "/prompt.txt";
/// Default identifier of the packaged search agent.
pub const SEARCH_AGENT: &str = "google-search";

/// Context key holding the company name.
pub const COMPANY_KEY: &str = "company";
/// Context key receiving the LinkedIn URL.
pub const URL_KEY: &str = "linkedin_url";
/// Context key receiving the [`LinkedInCompany`].
pub const PROFILE_KEY: &str = "company_profile";

/// Environment variable holding the ValueSERP API key.
pub const VALUESERP_API_KEY: &str = "VALUESERP_API_KEY";
/// Model name handed to the reader container.
pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
/// API key handed to the reader container.
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

/// A company profile as extracted by the reader agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedInCompany {
    /// Company name, `company_name` on the wire.
    #[serde(rename = "company_name")]
    pub name: String,
    /// The "About" text.
    pub description: Option<String>,
    /// Industry label as LinkedIn shows it.
    pub industry: Option<String>,
    /// Employee range as shown on the page, e.g. `51-200 employees`.
    pub company_size: Option<String>,
    /// City and country of the head office.
    pub headquarters: Option<String>,
    /// Founding year as shown on the page.
    pub founded: Option<String>,
    /// The company's own site, not the LinkedIn page.
    pub website: Option<String>,
    /// Listed specialties in page order.
    pub specialties: Option<Vec<String>>,
}

/// What the search agent prints.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    /// Hits in ranking order.
    #[serde(default)]
    pub items: Vec<SearchItem>,
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchItem {
    /// Result URL.
    pub link: String,
    /// Page title, when the engine reports one.
    #[serde(default)]
    pub title: Option<String>,
}

/// Finds the LinkedIn URL of a company through a packaged search agent.
///
/// The agent receives `--query` and `--num` and prints [`SearchResults`].
#[derive(Debug)]
pub struct UrlSearchActivity {
    inner: AgentActivity<SearchResults>,
}

impl UrlSearchActivity {
    /// Activity and step name.
    pub const NAME: &'static str = "FindLinkedInUrl";

    /// A packaged-remote registration for the search agent `agent`.
    pub fn registration(agent: impl Into<String>) -> AgentRegistration {
        AgentRegistration::new(Self::NAME, agent, ExecutionMode::PackagedRemote)
    }

    /// Builds the activity against the search agent `agent`.
    pub fn new(runtime: &AgentRuntime, agent: impl Into<String>) -> Self {
        Self {
            inner: runtime.activity(Self::registration(agent)),
        }
    }
}

#[async_trait]
impl Activity for UrlSearchActivity {
    type Input = String;
    type Output = String;

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        company: String,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<String>, ActivityError> {
        let args = BTreeMap::from([
            ("query".to_string(), format!("site:linkedin.com {company}")),
            ("num".to_string(), "1".to_string()),
        ]);
        let results = self.inner.invoke(&args, cancel).await?;
        Ok(results.and_then(|results| {
            match results.items.into_iter().map(|item| item.link).find(|link| !link.is_empty()) {
                Some(link) => ActivityResult::Completed(link),
                None => ActivityResult::Absent(Absence::NoOutput),
            }
        }))
    }
}

/// Reads a LinkedIn page with a containerized agent.
///
/// The container gets the model settings as environment variables, the
/// staged instruction mounted at [`PROMPT_MOUNT`], and
/// `--prompt-file /prompt.txt --source <url>`.
#[derive(Debug)]
pub struct WebReaderActivity {
    inner: AgentActivity<LinkedInCompany>,
}

impl WebReaderActivity {
    /// Activity and step name.
    pub const NAME: &'static str = "ReadLinkedInPage";

    /// The reader contract for container `image`.
    pub fn registration(
        image: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> AgentRegistration {
        AgentRegistration::new(Self::NAME, image, ExecutionMode::Containerized)
            .instruction(READER_INSTRUCTION)
            .plan(
                MarshalPlan::new()
                    .env(OPENAI_MODEL, model)
                    .env(OPENAI_API_KEY, api_key)
                    .mount_instruction_at(PROMPT_MOUNT)
                    .instruction_arg("prompt-file"),
            )
    }

    /// Builds the activity from a registration, usually [`Self::registration`].
    pub fn new(runtime: &AgentRuntime, registration: AgentRegistration) -> Self {
        Self {
            inner: runtime.activity(registration),
        }
    }

    /// Reads `OPENAI_MODEL` and `OPENAI_API_KEY` from the environment.
    pub fn from_env(runtime: &AgentRuntime, image: impl Into<String>) -> Result<Self, ActivityError> {
        let registration =
            Self::registration(image, require_env(OPENAI_MODEL)?, require_env(OPENAI_API_KEY)?);
        Ok(Self::new(runtime, registration))
    }
}

#[async_trait]
impl Activity for WebReaderActivity {
    type Input = String;
    type Output = LinkedInCompany;

    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(
        &self,
        url: String,
        cancel: &CancellationSignal,
    ) -> Result<ActivityResult<LinkedInCompany>, ActivityError> {
        let args = BTreeMap::from([("source".to_string(), url)]);
        self.inner.invoke(&args, cancel).await
    }
}

/// `company` → [`UrlSearchActivity`] → `linkedin_url` → [`WebReaderActivity`] → `company_profile`.
///
/// The search step retries twice on transient failures.
pub fn linkedin_reader_workflow(
    search: UrlSearchActivity,
    reader: WebReaderActivity,
) -> Result<Workflow, WorkflowError> {
    Workflow::builder()
        .add_retryable(
            UrlSearchActivity::NAME,
            ActivityStage::new(search, COMPANY_KEY, URL_KEY).then(WebReaderActivity::NAME),
            RetryPolicy::exponential(2, Duration::from_secs(1)),
        )
        .add_step(
            WebReaderActivity::NAME,
            ActivityStage::new(reader, URL_KEY, PROFILE_KEY),
        )
        .start_with(UrlSearchActivity::NAME)
        .build()
}

/// Search agent backed by the ValueSERP Google search API.
#[derive(Debug, Clone)]
pub struct ValueSerpSearch {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct ValueSerpResponse {
    #[serde(default)]
    organic_results: Vec<SearchItem>,
}

impl ValueSerpSearch {
    /// The public ValueSERP search endpoint.
    pub const DEFAULT_ENDPOINT: &'static str = "https://api.valueserp.com/search";

    /// Searches [`DEFAULT_ENDPOINT`](Self::DEFAULT_ENDPOINT) with `api_key`.
    pub fn new(api_key: impl Into<String>) -> Result<Self, ActivityError> {
        Self::with_endpoint(Self::DEFAULT_ENDPOINT, api_key)
    }

    /// Reads the key from `VALUESERP_API_KEY`.
    pub fn from_env() -> Result<Self, ActivityError> {
        Self::new(require_env(VALUESERP_API_KEY)?)
    }

    /// Searches another ValueSERP-compatible endpoint.
    pub fn with_endpoint(endpoint: &str, api_key: impl Into<String>) -> Result<Self, ActivityError> {
        let endpoint = Url::parse(endpoint).map_err(|err| {
            ActivityError::Configuration(format!("invalid search endpoint '{endpoint}': {err}"))
        })?;
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
        })
    }

    async fn search(&self, spec: &AgentInvocationSpec) -> Result<SearchResults, String> {
        let query = spec.args.get("query").ok_or("missing --query")?;
        let num = spec.args.get("num").map(String::as_str).unwrap_or("1");

        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("api_key", self.api_key.as_str()), ("q", query.as_str()), ("num", num)])
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|err| format!("search request failed: {err}"))?;
        let body: ValueSerpResponse = response
            .json()
            .await
            .map_err(|err| format!("unreadable search response: {err}"))?;

        Ok(SearchResults {
            items: body.organic_results,
        })
    }
}

#[async_trait]
impl AgentHandler for ValueSerpSearch {
    async fn handle(&self, spec: &AgentInvocationSpec) -> AgentInvocationResult {
        let results = match self.search(spec).await {
            Ok(results) => results,
            Err(details) => return AgentInvocationResult::failed(None, details),
        };
        match serde_json::to_string(&results) {
            Ok(json) => AgentInvocationResult::succeeded(json),
            Err(err) => AgentInvocationResult::failed(None, err.to_string()),
        }
    }
}
