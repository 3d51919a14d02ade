//! Instruction resolution: fetch by name, stage as a scoped file.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tasuki_core::{ActivityError, CancellationSignal, InstructionStore};
use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A resolved instruction and its staged file.
///
/// The staged file is removed when the handle is dropped, whichever way the
/// invocation that owns it ends.
#[derive(Debug)]
pub struct InstructionHandle {
    name: String,
    text: String,
    file: NamedTempFile,
}

impl InstructionHandle {
    /// The instruction name that was resolved.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The instruction text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Host path of the staged file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Fetches instructions from a store and stages them for one invocation.
#[derive(Clone)]
pub struct InstructionResolver {
    store: Arc<dyn InstructionStore>,
    staging_dir: PathBuf,
}

impl std::fmt::Debug for InstructionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstructionResolver")
            .field("staging_dir", &self.staging_dir)
            .finish_non_exhaustive()
    }
}

impl InstructionResolver {
    /// Creates a resolver staging files under `staging_dir`.
    pub fn new(store: Arc<dyn InstructionStore>, staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            staging_dir: staging_dir.into(),
        }
    }

    /// Directory that receives staged instruction files.
    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    /// Fetches `name` and stages it.
    ///
    /// # Errors
    ///
    /// - [`ActivityError::InstructionNotFound`] if the store has no entry or
    ///   the entry is blank; nothing is staged.
    /// - [`ActivityError::Cancelled`] if `cancel` fires during the fetch.
    pub async fn resolve(
        &self,
        name: &str,
        cancel: &CancellationSignal,
    ) -> Result<InstructionHandle, ActivityError> {
        let fetched = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ActivityError::Cancelled),
            fetched = self.store.fetch(name) => fetched?,
        };

        let text = match fetched {
            Some(text) if !text.trim().is_empty() => text,
            _ => {
                return Err(ActivityError::InstructionNotFound {
                    name: name.to_string(),
                })
            }
        };
        info!(instruction = name, "resolved instruction ({} bytes)", text.len());

        let file = self.stage(&text)?;
        debug!(instruction = name, path = %file.path().display(), "staged instruction");

        Ok(InstructionHandle {
            name: name.to_string(),
            text,
            file,
        })
    }

    fn stage(&self, text: &str) -> Result<NamedTempFile, ActivityError> {
        let mut file = tempfile::Builder::new()
            .prefix("instruction-")
            .suffix(".txt")
            .tempfile_in(&self.staging_dir)
            .map_err(|err| ActivityError::io(&self.staging_dir, err))?;

        file.write_all(text.as_bytes())
            .and_then(|()| file.flush())
            .map_err(|err| ActivityError::io(file.path(), err))?;

        // Containers usually run as a different user than the host process.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o644))
                .map_err(|err| ActivityError::io(file.path(), err))?;
        }

        Ok(file)
    }
}

/// Instruction store reached over HTTP.
///
/// `GET {base}/instructions/{name}` returns the text; `404` means not found.
#[derive(Debug, Clone)]
pub struct HttpInstructionStore {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpInstructionStore {
    /// Creates a store rooted at `base_url`, sending `api_key` as a bearer token.
    pub fn new(base_url: Url, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
        }
    }

    fn instruction_url(&self, name: &str) -> Result<Url, ActivityError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                ActivityError::Configuration(format!(
                    "instruction store URL cannot have path segments: {}",
                    self.base_url
                ))
            })?;
            segments.pop_if_empty().push("instructions").push(name);
        }
        Ok(url)
    }
}

#[async_trait]
impl InstructionStore for HttpInstructionStore {
    async fn fetch(&self, name: &str) -> Result<Option<String>, ActivityError> {
        let url = self.instruction_url(name)?;
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|err| ActivityError::Transport(err.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .text()
                .await
                .map(Some)
                .map_err(|err| ActivityError::Transport(err.to_string())),
            status => Err(ActivityError::Transport(format!(
                "instruction store returned {status} for '{name}'"
            ))),
        }
    }
}

/// In-memory instruction store.
#[derive(Debug, Default)]
pub struct MemoryInstructionStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryInstructionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entry while building the store.
    pub fn with(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.entries.get_mut().insert(name.into(), text.into());
        self
    }

    /// Adds or replaces an entry.
    pub async fn insert(&self, name: impl Into<String>, text: impl Into<String>) {
        self.entries.write().await.insert(name.into(), text.into());
    }

    /// Removes an entry.
    pub async fn remove(&self, name: &str) -> Option<String> {
        self.entries.write().await.remove(name)
    }
}

#[async_trait]
impl InstructionStore for MemoryInstructionStore {
    async fn fetch(&self, name: &str) -> Result<Option<String>, ActivityError> {
        Ok(self.entries.read().await.get(name).cloned())
    }
}
