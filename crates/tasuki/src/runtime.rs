//! Wiring of resolver and executor into activities.

use crate::activity::{AgentActivity, AgentRegistration};
use crate::config::Config;
use crate::executor::AgentExecutor;
use crate::instruction::{HttpInstructionStore, InstructionResolver};
use crate::registry::HttpAgentRegistry;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tasuki_core::{AgentHandler, AgentRegistry};
use tracing::info;

/// Shared collaborators for every activity of a process.
///
/// Cheap to clone. Handlers and registries added after an activity was
/// built do not affect that activity.
#[derive(Debug, Clone)]
pub struct AgentRuntime {
    resolver: InstructionResolver,
    executor: Arc<AgentExecutor>,
    default_timeout: Option<Duration>,
}

impl AgentRuntime {
    /// Wires an existing resolver and executor, with no default timeout.
    pub fn new(resolver: InstructionResolver, executor: AgentExecutor) -> Self {
        Self {
            resolver,
            executor: Arc::new(executor),
            default_timeout: None,
        }
    }

    /// Builds the HTTP instruction store, the executor and, when configured,
    /// the HTTP agent registry.
    pub fn from_config(config: &Config) -> Self {
        let store = HttpInstructionStore::new(
            config.instruction_store_url.clone(),
            config.api_key.clone(),
        );
        let mut executor = AgentExecutor::new(config.container_runtime.clone())
            .with_grace_period(config.grace_period);
        if let Some(url) = &config.agent_registry_url {
            executor = executor.with_registry(Arc::new(HttpAgentRegistry::new(
                url.clone(),
                config.api_key.clone(),
            )));
        }
        info!(
            store = %config.instruction_store_url,
            runtime = ?config.container_runtime,
            staging = %config.staging_dir.display(),
            "agent runtime configured"
        );

        Self {
            resolver: InstructionResolver::new(Arc::new(store), config.staging_dir.clone()),
            executor: Arc::new(executor),
            default_timeout: config.agent_timeout,
        }
    }

    /// Registers an in-process handler.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        Arc::make_mut(&mut self.executor).register_handler(name, handler);
        self
    }

    /// Replaces the packaged agent registry.
    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        Arc::make_mut(&mut self.executor).set_registry(registry);
        self
    }

    /// Deadline applied to registrations without their own timeout.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    /// The shared instruction resolver.
    pub fn resolver(&self) -> &InstructionResolver {
        &self.resolver
    }

    /// The shared agent executor.
    pub fn executor(&self) -> &AgentExecutor {
        &self.executor
    }

    /// Builds an activity for `registration`.
    pub fn activity<T: DeserializeOwned>(&self, mut registration: AgentRegistration) -> AgentActivity<T> {
        if registration.timeout.is_none() {
            registration.timeout = self.default_timeout;
        }
        AgentActivity::new(registration, self.resolver.clone(), self.executor.clone())
    }
}
