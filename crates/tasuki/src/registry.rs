//! Packaged agent registries.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tasuki_core::{
    ActivityError, AgentHandler, AgentInstance, AgentInvocationResult, AgentInvocationSpec,
    AgentRegistry,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Runs packaged handlers as tasks on the current runtime.
///
/// Each started agent gets its own task, so a cancelled agent is aborted
/// without affecting others.
#[derive(Clone, Default)]
pub struct LocalAgentRegistry {
    agents: HashMap<String, Arc<dyn AgentHandler>>,
}

impl LocalAgentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a packaged agent.
    pub fn with_agent(mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        self.agents.insert(name.into(), handler);
        self
    }
}

#[async_trait]
impl AgentRegistry for LocalAgentRegistry {
    async fn start(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
    ) -> Result<Box<dyn AgentInstance>, ActivityError> {
        let handler = self.agents.get(agent).cloned().ok_or_else(|| {
            ActivityError::AgentLaunchFailure {
                agent: agent.to_string(),
                details: "agent is not registered".to_string(),
            }
        })?;

        let spec = spec.clone();
        let task = tokio::spawn(async move { handler.handle(&spec).await });
        debug!(agent, "packaged agent started");
        Ok(Box::new(LocalInstance { task }))
    }
}

struct LocalInstance {
    task: JoinHandle<AgentInvocationResult>,
}

#[async_trait]
impl AgentInstance for LocalInstance {
    async fn wait(&mut self) -> Result<AgentInvocationResult, ActivityError> {
        (&mut self.task)
            .await
            .map_err(|err| ActivityError::Transport(format!("packaged agent task ended: {err}")))
    }

    async fn cancel(&mut self) -> Result<(), ActivityError> {
        self.task.abort();
        Ok(())
    }
}

impl Drop for LocalInstance {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Agent registry reached over HTTP.
///
/// - `POST {base}/agents/{agent}/invocations` with `{"env", "args", "files"}`
///   returns `{"id": ...}`
/// - `GET {base}/invocations/{id}` blocks until the agent finishes and returns the result
/// - `DELETE {base}/invocations/{id}` cancels it
///
/// Host paths mean nothing to a remote agent, so every mounted file is sent
/// inline in `files`, keyed by the path the agent expects it at. An instance
/// dropped before it finished is cancelled in the background.
#[derive(Debug, Clone)]
pub struct HttpAgentRegistry {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StartedInvocation {
    id: String,
}

#[derive(Debug, Serialize)]
struct RemoteInvocation<'a> {
    env: &'a BTreeMap<String, String>,
    args: &'a BTreeMap<String, String>,
    files: BTreeMap<&'a str, String>,
}

impl<'a> RemoteInvocation<'a> {
    async fn inline(spec: &'a AgentInvocationSpec) -> Result<Self, ActivityError> {
        let mut files = BTreeMap::new();
        for (host_path, agent_path) in &spec.mounts {
            let text = tokio::fs::read_to_string(host_path)
                .await
                .map_err(|err| ActivityError::io(host_path, err))?;
            files.insert(agent_path.as_str(), text);
        }
        Ok(Self {
            env: &spec.env,
            args: &spec.args,
            files,
        })
    }
}

impl HttpAgentRegistry {
    /// Creates a registry rooted at `base_url`, sending `api_key` as a bearer token.
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url, ActivityError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| {
                ActivityError::Configuration(format!(
                    "agent registry URL cannot have path segments: {}",
                    self.base_url
                ))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn transport(err: reqwest::Error) -> ActivityError {
    ActivityError::Transport(err.to_string())
}

#[async_trait]
impl AgentRegistry for HttpAgentRegistry {
    async fn start(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
    ) -> Result<Box<dyn AgentInstance>, ActivityError> {
        let url = self.url(&["agents", agent, "invocations"])?;
        let body = RemoteInvocation::inline(spec).await?;
        let response = self
            .authorize(self.client.post(url).json(&body))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if !status.is_success() {
            let details = match status {
                StatusCode::NOT_FOUND => "agent is not registered".to_string(),
                status => format!("registry returned {status}"),
            };
            return Err(ActivityError::AgentLaunchFailure {
                agent: agent.to_string(),
                details,
            });
        }

        let started: StartedInvocation = response.json().await.map_err(transport)?;
        debug!(agent, invocation = %started.id, "packaged agent started");
        Ok(Box::new(HttpInstance {
            registry: self.clone(),
            id: started.id,
            settled: false,
        }))
    }
}

struct HttpInstance {
    registry: HttpAgentRegistry,
    id: String,
    /// Finished or cancelled; nothing to clean up on drop.
    settled: bool,
}

#[async_trait]
impl AgentInstance for HttpInstance {
    async fn wait(&mut self) -> Result<AgentInvocationResult, ActivityError> {
        let url = self.registry.url(&["invocations", &self.id])?;
        let response = self
            .registry
            .authorize(self.registry.client.get(url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;
        let result = response.json().await.map_err(transport)?;
        self.settled = true;
        Ok(result)
    }

    async fn cancel(&mut self) -> Result<(), ActivityError> {
        let url = self.registry.url(&["invocations", &self.id])?;
        self.registry
            .authorize(self.registry.client.delete(url))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(transport)?;
        self.settled = true;
        Ok(())
    }
}

impl Drop for HttpInstance {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(invocation = %self.id, "dropped outside a runtime; packaged agent left running");
            return;
        };
        let Ok(url) = self.registry.url(&["invocations", &self.id]) else {
            return;
        };
        let request = self.registry.authorize(self.registry.client.delete(url));
        let id = std::mem::take(&mut self.id);
        runtime.spawn(async move {
            match request
                .send()
                .await
                .and_then(reqwest::Response::error_for_status)
            {
                Ok(_) => debug!(invocation = %id, "abandoned packaged agent cancelled"),
                Err(err) => warn!(invocation = %id, "failed to cancel abandoned packaged agent: {err}"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Upper;

    #[async_trait]
    impl AgentHandler for Upper {
        async fn handle(&self, spec: &AgentInvocationSpec) -> AgentInvocationResult {
            let query = spec.args.get("query").cloned().unwrap_or_default();
            AgentInvocationResult::succeeded(query.to_uppercase())
        }
    }

    struct Forever;

    #[async_trait]
    impl AgentHandler for Forever {
        async fn handle(&self, _spec: &AgentInvocationSpec) -> AgentInvocationResult {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_local_registry_runs_agent() {
        let registry = LocalAgentRegistry::new().with_agent("upper", Arc::new(Upper));
        let mut spec = AgentInvocationSpec::new();
        spec.args.insert("query".to_string(), "acme".to_string());

        let mut instance = registry.start("upper", &spec).await.expect("start");
        let result = instance.wait().await.expect("wait");
        assert_eq!(result.stdout, "ACME");
    }

    #[tokio::test]
    async fn test_local_registry_unknown_agent() {
        let registry = LocalAgentRegistry::new();
        let err = registry
            .start("missing", &AgentInvocationSpec::new())
            .await
            .err()
            .expect("launch failure");
        assert!(matches!(err, ActivityError::AgentLaunchFailure { .. }));
    }

    #[tokio::test]
    async fn test_local_registry_cancel_aborts_task() {
        let registry = LocalAgentRegistry::new().with_agent("forever", Arc::new(Forever));
        let mut instance = registry
            .start("forever", &AgentInvocationSpec::new())
            .await
            .expect("start");

        instance.cancel().await.expect("cancel");
        let waited = tokio::time::timeout(Duration::from_secs(1), instance.wait())
            .await
            .expect("wait returns after abort");
        assert!(matches!(waited, Err(ActivityError::Transport(_))));
    }

    #[test]
    fn test_http_registry_urls() {
        let base = Url::parse("https://agents.example.com/v1").expect("url");
        let registry = HttpAgentRegistry::new(base, None);
        let url = registry
            .url(&["agents", "google search", "invocations"])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://agents.example.com/v1/agents/google%20search/invocations"
        );
    }
}
