//! Agent invocation: launch, wait, cancel, capture.
//!
//! Every mode returns an [`AgentInvocationResult`]; nothing here retries.
//! Cancellation and deadlines are handled identically: the agent is stopped
//! and the result is [`InvocationStatus::Cancelled`].
//!
//! Containerized agents lead their own process group. Stopping one kills
//! the whole group and force-removes its named container, including when the
//! invocation future is dropped midway.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tasuki_core::{
    AgentHandler, AgentInvocationResult, AgentInvocationSpec, AgentRegistry, CancellationSignal,
    ExecutionMode, InvocationStatus,
};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static CONTAINER_SEQ: AtomicU64 = AtomicU64::new(0);

/// How containerized agents are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRuntime {
    /// A docker-compatible CLI (`docker`, `podman`, ...). The agent
    /// identifier is the image reference.
    Docker {
        /// Program name or path of the CLI.
        program: String,
    },
    /// Runs the agent identifier as a local command line, split on
    /// whitespace. Mount paths seen by the agent are rewritten to host paths.
    Local,
}

impl Default for ContainerRuntime {
    fn default() -> Self {
        ContainerRuntime::docker()
    }
}

impl ContainerRuntime {
    /// The `docker` CLI.
    pub fn docker() -> Self {
        ContainerRuntime::Docker {
            program: "docker".to_string(),
        }
    }

    /// Parses a runtime setting: `local`, or the program of a docker-compatible CLI.
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "local" => ContainerRuntime::Local,
            "" => ContainerRuntime::docker(),
            program => ContainerRuntime::Docker {
                program: program.to_string(),
            },
        }
    }

    fn launch(&self, agent: &str, spec: &AgentInvocationSpec) -> Result<Launch, String> {
        match self {
            ContainerRuntime::Docker { program } => {
                let name = container_name(agent);
                let mut command = Command::new(program);
                command.args(["run", "--rm", "--name", name.as_str()]);
                // Values travel through the client environment, never argv.
                for (key, value) in &spec.env {
                    command.arg("-e").arg(key).env(key, value);
                }
                for (host, guest) in &spec.mounts {
                    command
                        .arg("-v")
                        .arg(format!("{}:{}:ro", host.display(), guest));
                }
                command.arg(agent).args(spec.command_line());
                Ok(Launch {
                    command,
                    container: Some(name),
                })
            }
            ContainerRuntime::Local => {
                let mut parts = agent.split_whitespace();
                let program = parts
                    .next()
                    .ok_or_else(|| "agent command line is empty".to_string())?;
                let to_host = |value: &str| {
                    spec.mounts
                        .iter()
                        .find(|(_, guest)| guest.as_str() == value)
                        .map(|(host, _)| host.display().to_string())
                        .unwrap_or_else(|| value.to_string())
                };

                let mut command = Command::new(program);
                command.args(parts);
                for (key, value) in &spec.env {
                    command.env(key, to_host(value));
                }
                for (name, value) in &spec.args {
                    command.arg(format!("--{name}")).arg(to_host(value));
                }
                Ok(Launch {
                    command,
                    container: None,
                })
            }
        }
    }
}

struct Launch {
    command: Command,
    container: Option<String>,
}

fn container_name(image: &str) -> String {
    let repository = image.rsplit('/').next().unwrap_or(image);
    let base = repository.split([':', '@']).next().unwrap_or(repository);
    let slug: String = base
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '-' })
        .collect();
    format!(
        "tasuki-{}-{}-{}",
        if slug.is_empty() { "agent" } else { slug.as_str() },
        std::process::id(),
        CONTAINER_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

/// Launches agents in any [`ExecutionMode`].
#[derive(Clone)]
pub struct AgentExecutor {
    handlers: HashMap<String, Arc<dyn AgentHandler>>,
    registry: Option<Arc<dyn AgentRegistry>>,
    runtime: ContainerRuntime,
    grace_period: Duration,
}

impl std::fmt::Debug for AgentExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentExecutor")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .field("registry", &self.registry.is_some())
            .field("runtime", &self.runtime)
            .field("grace_period", &self.grace_period)
            .finish()
    }
}

impl Default for AgentExecutor {
    fn default() -> Self {
        Self::new(ContainerRuntime::default())
    }
}

impl AgentExecutor {
    /// Creates an executor with no handlers and no registry.
    pub fn new(runtime: ContainerRuntime) -> Self {
        Self {
            handlers: HashMap::new(),
            registry: None,
            runtime,
            grace_period: Duration::from_secs(5),
        }
    }

    /// Registers an in-process handler under `name`.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) -> Self {
        self.register_handler(name, handler);
        self
    }

    /// Registers an in-process handler under `name`.
    pub fn register_handler(&mut self, name: impl Into<String>, handler: Arc<dyn AgentHandler>) {
        self.handlers.insert(name.into(), handler);
    }

    /// Sets the registry used for [`ExecutionMode::PackagedRemote`].
    pub fn with_registry(mut self, registry: Arc<dyn AgentRegistry>) -> Self {
        self.set_registry(registry);
        self
    }

    /// Sets the registry used for [`ExecutionMode::PackagedRemote`].
    pub fn set_registry(&mut self, registry: Arc<dyn AgentRegistry>) {
        self.registry = Some(registry);
    }

    /// Sets how long a cancelled agent may take to exit.
    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    /// The container runtime in use.
    pub fn runtime(&self) -> &ContainerRuntime {
        &self.runtime
    }

    /// Runs `agent` and captures its outcome.
    ///
    /// `deadline` bounds the whole invocation; exceeding it is treated as
    /// cancellation.
    pub async fn invoke(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
        mode: ExecutionMode,
        cancel: &CancellationSignal,
        deadline: Option<Duration>,
    ) -> AgentInvocationResult {
        info!(agent, mode = %mode, "invoking agent");
        let result = match mode {
            ExecutionMode::InProcess => self.invoke_in_process(agent, spec, cancel, deadline).await,
            ExecutionMode::PackagedRemote => self.invoke_packaged(agent, spec, cancel, deadline).await,
            ExecutionMode::Containerized => self.invoke_container(agent, spec, cancel, deadline).await,
        };

        match result.status {
            InvocationStatus::Succeeded => {
                info!(agent, "agent finished ({} bytes of output)", result.stdout.len())
            }
            InvocationStatus::Failed => warn!(
                agent,
                exit_code = ?result.exit_code,
                launched = result.launched,
                "agent failed: {}",
                result.stderr.trim()
            ),
            InvocationStatus::Cancelled => warn!(agent, "agent invocation cancelled"),
        }
        result
    }

    async fn invoke_in_process(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
        cancel: &CancellationSignal,
        deadline: Option<Duration>,
    ) -> AgentInvocationResult {
        let Some(handler) = self.handlers.get(agent) else {
            return AgentInvocationResult::launch_failed(format!(
                "no in-process handler registered as '{agent}'"
            ));
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => AgentInvocationResult::cancelled(),
            _ = expire(deadline) => AgentInvocationResult::cancelled(),
            result = handler.handle(spec) => result,
        }
    }

    async fn invoke_packaged(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
        cancel: &CancellationSignal,
        deadline: Option<Duration>,
    ) -> AgentInvocationResult {
        let Some(registry) = &self.registry else {
            return AgentInvocationResult::launch_failed("no agent registry configured");
        };

        let expired = expire(deadline);
        tokio::pin!(expired);

        let mut instance = tokio::select! {
            biased;
            _ = cancel.cancelled() => return AgentInvocationResult::cancelled(),
            _ = &mut expired => return AgentInvocationResult::cancelled(),
            started = registry.start(agent, spec) => match started {
                Ok(instance) => instance,
                Err(err) => return AgentInvocationResult::launch_failed(err.to_string()),
            },
        };

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = &mut expired => None,
            waited = instance.wait() => Some(waited),
        };

        match waited {
            Some(Ok(result)) => result,
            Some(Err(err)) => AgentInvocationResult::failed(None, err.to_string()),
            None => {
                match tokio::time::timeout(self.grace_period, instance.cancel()).await {
                    Ok(Ok(())) => debug!(agent, "packaged agent cancelled"),
                    Ok(Err(err)) => warn!(agent, "failed to cancel packaged agent: {err}"),
                    Err(_) => warn!(agent, "packaged agent did not acknowledge cancellation"),
                }
                AgentInvocationResult::cancelled()
            }
        }
    }

    async fn invoke_container(
        &self,
        agent: &str,
        spec: &AgentInvocationSpec,
        cancel: &CancellationSignal,
        deadline: Option<Duration>,
    ) -> AgentInvocationResult {
        if cancel.is_cancelled() {
            return AgentInvocationResult::cancelled();
        }

        let Launch {
            mut command,
            container,
        } = match self.runtime.launch(agent, spec) {
            Ok(launch) => launch,
            Err(details) => return AgentInvocationResult::launch_failed(details),
        };
        debug!(
            agent,
            args = ?command.as_std().get_args().collect::<Vec<_>>(),
            "launching {:?}",
            command.as_std().get_program()
        );

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The agent leads its own group so its descendants can be signalled too.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.as_std_mut().process_group(0);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) => {
                return AgentInvocationResult::launch_failed(format!(
                    "failed to start {:?}: {err}",
                    command.as_std().get_program()
                ))
            }
        };
        let mut guard = Teardown::new(agent, &child, &self.runtime, container);

        let mut stdout = child.stdout.take().map(|pipe| tokio::spawn(drain(pipe)));
        let mut stderr = child.stderr.take().map(|pipe| tokio::spawn(drain(pipe)));

        let expired = expire(deadline);
        tokio::pin!(expired);

        let waited = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = &mut expired => None,
            status = child.wait() => Some(status),
        };
        let status = match waited {
            Some(Ok(status)) => status,
            Some(Err(err)) => {
                abort(&stdout, &stderr);
                let details = format!("failed waiting for agent: {err}");
                return AgentInvocationResult::failed(None, details);
            }
            None => {
                abort(&stdout, &stderr);
                self.terminate(agent, &mut child, &mut guard).await;
                return AgentInvocationResult::cancelled();
            }
        };
        // The CLI client exits with its container, which `--rm` removes.
        guard.container = None;

        // Descendants may still hold the pipes open after the agent exits.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            _ = &mut expired => None,
            output = async { (collect(&mut stdout).await, collect(&mut stderr).await) } => Some(output),
        };
        let Some((out, err)) = output else {
            abort(&stdout, &stderr);
            self.terminate(agent, &mut child, &mut guard).await;
            return AgentInvocationResult::cancelled();
        };

        AgentInvocationResult {
            status: if status.success() {
                InvocationStatus::Succeeded
            } else {
                InvocationStatus::Failed
            },
            exit_code: status.code(),
            stdout: out,
            stderr: err,
            launched: true,
        }
    }

    async fn terminate(&self, agent: &str, child: &mut Child, guard: &mut Teardown) {
        if let Some(group) = guard.group.take() {
            kill_group(agent, group);
        }
        if let Err(err) = child.start_kill() {
            debug!(agent, "kill signal not delivered: {err}");
        }
        match tokio::time::timeout(self.grace_period, child.wait()).await {
            Ok(Ok(status)) => debug!(agent, %status, "agent process stopped"),
            Ok(Err(err)) => warn!(agent, "failed to reap agent process: {err}"),
            Err(_) => warn!(agent, "agent process outlived the grace period"),
        }

        // Killing the CLI client does not stop the container itself.
        if let Some((program, name)) = guard.container.take() {
            let mut removal = Command::from(remove_container(&program, &name));
            match tokio::time::timeout(self.grace_period, removal.status()).await {
                Ok(Ok(status)) if status.success() => {
                    debug!(agent, container = %name, "container removed")
                }
                Ok(Ok(status)) => warn!(agent, container = %name, %status, "container removal failed"),
                Ok(Err(err)) => warn!(agent, container = %name, "container removal failed: {err}"),
                Err(_) => warn!(agent, container = %name, "container removal timed out"),
            }
        }
    }
}

/// Stops whatever an invocation left behind when it is dropped: the agent's
/// process group and, until the CLI client has exited, the named container.
struct Teardown {
    agent: String,
    group: Option<u32>,
    container: Option<(String, String)>,
}

impl Teardown {
    fn new(
        agent: &str,
        child: &Child,
        runtime: &ContainerRuntime,
        container: Option<String>,
    ) -> Self {
        let container = match (runtime, container) {
            (ContainerRuntime::Docker { program }, Some(name)) => Some((program.clone(), name)),
            _ => None,
        };
        Self {
            agent: agent.to_string(),
            group: if cfg!(unix) { child.id() } else { None },
            container,
        }
    }
}

impl Drop for Teardown {
    fn drop(&mut self) {
        if let Some(group) = self.group.take() {
            kill_group(&self.agent, group);
        }
        if let Some((program, name)) = self.container.take() {
            debug!(agent = %self.agent, container = %name, "removing abandoned container");
            detach(remove_container(&program, &name));
        }
    }
}

/// Sends `SIGKILL` to every process left in the agent's group.
#[cfg(unix)]
fn kill_group(agent: &str, group: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(group) else {
        return;
    };
    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) => debug!(agent, group, "agent process group killed"),
        // Nothing left in the group.
        Err(Errno::ESRCH) => {}
        Err(err) => warn!(agent, group, "failed to kill agent process group: {err}"),
    }
}

#[cfg(not(unix))]
fn kill_group(_agent: &str, _group: u32) {}

fn remove_container(program: &str, name: &str) -> std::process::Command {
    let mut command = std::process::Command::new(program);
    command
        .args(["rm", "-f", name])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    command
}

/// Starts a container removal without waiting for it.
fn detach(command: std::process::Command) {
    let started = if tokio::runtime::Handle::try_current().is_ok() {
        // Tokio reaps the dropped child in the background.
        Command::from(command).spawn().map(drop)
    } else {
        let mut command = command;
        command.status().map(drop)
    };
    if let Err(err) = started {
        debug!("cleanup command not started: {err}");
    }
}

fn abort(stdout: &Option<JoinHandle<String>>, stderr: &Option<JoinHandle<String>>) {
    for reader in [stdout, stderr].into_iter().flatten() {
        reader.abort();
    }
}

async fn expire(deadline: Option<Duration>) {
    match deadline {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending::<()>().await,
    }
}

async fn drain<R: AsyncRead + Unpin>(mut pipe: R) -> String {
    let mut buf = Vec::new();
    // A crash mid-write leaves whatever was read so far.
    if let Err(err) = pipe.read_to_end(&mut buf).await {
        debug!("agent output stream closed early: {err}");
    }
    String::from_utf8_lossy(&buf).into_owned()
}

async fn collect(reader: &mut Option<JoinHandle<String>>) -> String {
    match reader {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::ffi::OsStr;
    use std::path::PathBuf;

    struct Echo;

    #[async_trait]
    impl AgentHandler for Echo {
        async fn handle(&self, spec: &AgentInvocationSpec) -> AgentInvocationResult {
            AgentInvocationResult::succeeded(spec.args.get("text").cloned().unwrap_or_default())
        }
    }

    struct Stall;

    #[async_trait]
    impl AgentHandler for Stall {
        async fn handle(&self, _spec: &AgentInvocationSpec) -> AgentInvocationResult {
            tokio::time::sleep(Duration::from_secs(30)).await;
            AgentInvocationResult::succeeded("too late")
        }
    }

    fn spec_with(key: &str, value: &str) -> AgentInvocationSpec {
        let mut spec = AgentInvocationSpec::new();
        spec.args.insert(key.to_string(), value.to_string());
        spec
    }

    #[tokio::test]
    async fn test_in_process_handler() {
        let executor = AgentExecutor::default().with_handler("echo", Arc::new(Echo));
        let result = executor
            .invoke(
                "echo",
                &spec_with("text", "hi"),
                ExecutionMode::InProcess,
                &CancellationSignal::new(),
                None,
            )
            .await;
        assert!(result.is_success());
        assert_eq!(result.stdout, "hi");
    }

    #[tokio::test]
    async fn test_unknown_handler_is_launch_failure() {
        let executor = AgentExecutor::default();
        let result = executor
            .invoke(
                "missing",
                &AgentInvocationSpec::new(),
                ExecutionMode::InProcess,
                &CancellationSignal::new(),
                None,
            )
            .await;
        assert_eq!(result.status, InvocationStatus::Failed);
        assert!(!result.launched);
    }

    #[tokio::test]
    async fn test_packaged_without_registry_is_launch_failure() {
        let result = AgentExecutor::default()
            .invoke(
                "search",
                &AgentInvocationSpec::new(),
                ExecutionMode::PackagedRemote,
                &CancellationSignal::new(),
                None,
            )
            .await;
        assert!(!result.launched);
    }

    #[tokio::test]
    async fn test_deadline_cancels_in_process_handler() {
        let executor = AgentExecutor::default().with_handler("stall", Arc::new(Stall));
        let result = executor
            .invoke(
                "stall",
                &AgentInvocationSpec::new(),
                ExecutionMode::InProcess,
                &CancellationSignal::new(),
                Some(Duration::from_millis(20)),
            )
            .await;
        assert_eq!(result.status, InvocationStatus::Cancelled);
    }

    #[test]
    fn test_docker_command_keeps_secrets_out_of_argv() {
        let mut spec = spec_with("source", "https://example.com");
        spec.env
            .insert("OPENAI_API_KEY".to_string(), "sk-secret".to_string());
        spec.mounts
            .insert(PathBuf::from("/tmp/instruction-1.txt"), "/prompt.txt".to_string());

        let launch = ContainerRuntime::docker()
            .launch("ghcr.io/acme/reader:latest", &spec)
            .expect("launch");
        let args: Vec<&OsStr> = launch.command.as_std().get_args().collect();

        assert_eq!(args[0], "run");
        assert!(args.contains(&OsStr::new("OPENAI_API_KEY")));
        assert!(!args.contains(&OsStr::new("sk-secret")));
        assert!(args.contains(&OsStr::new("/tmp/instruction-1.txt:/prompt.txt:ro")));

        let image_at = args
            .iter()
            .position(|a| *a == "ghcr.io/acme/reader:latest")
            .expect("image");
        assert_eq!(&args[image_at + 1..], ["--source", "https://example.com"]);

        let envs: Vec<_> = launch.command.as_std().get_envs().collect();
        assert!(envs.contains(&(OsStr::new("OPENAI_API_KEY"), Some(OsStr::new("sk-secret")))));
        assert!(launch
            .container
            .as_deref()
            .is_some_and(|name| name.starts_with("tasuki-reader-")));
    }

    #[test]
    fn test_local_runtime_translates_mount_paths() {
        let mut spec = spec_with("prompt-file", "/prompt.txt");
        spec.mounts
            .insert(PathBuf::from("/tmp/instruction-2.txt"), "/prompt.txt".to_string());

        let launch = ContainerRuntime::Local
            .launch("/bin/sh agent.sh", &spec)
            .expect("launch");
        let args: Vec<&OsStr> = launch.command.as_std().get_args().collect();
        assert_eq!(args, ["agent.sh", "--prompt-file", "/tmp/instruction-2.txt"]);
        assert!(launch.container.is_none());
    }

    #[test]
    fn test_runtime_parse() {
        assert_eq!(ContainerRuntime::parse("local"), ContainerRuntime::Local);
        assert_eq!(
            ContainerRuntime::parse("podman"),
            ContainerRuntime::Docker {
                program: "podman".to_string()
            }
        );
        assert_eq!(ContainerRuntime::parse(""), ContainerRuntime::docker());
    }
}
