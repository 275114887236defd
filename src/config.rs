//! Global configuration parsing, validation, and credential loading.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Keychain service name holding the platform API token.
const KEYRING_SERVICE: &str = "exec-relay";

/// Connection settings for the remote execution platform.
///
/// The API token is loaded at runtime via OS keychain or environment
/// variable, never from the TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PlatformConfig {
    /// Base URL of the platform REST API.
    pub base_url: String,
    /// Project that owns the conversation datasets.
    pub project_id: String,
    /// Per-call HTTP timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Bearer token (populated at runtime).
    #[serde(skip)]
    pub api_token: Option<String>,
}

fn default_request_timeout() -> u64 {
    30
}

/// How newly produced assistant content is split into events.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeltaMode {
    /// Emit the whole message whenever it changes.
    #[default]
    Message,
    /// Emit only the unseen suffix, one event per character chunk.
    Character,
}

/// Polling cadence and limits for a single watch loop.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WatchConfig {
    /// Global per-request deadline.
    #[serde(default = "default_deadline_seconds")]
    pub deadline_seconds: u64,
    /// Sleep between sink discovery polls.
    #[serde(default = "default_locate_poll_interval")]
    pub locate_poll_interval_ms: u64,
    /// Sleep between content polls.
    #[serde(default = "default_content_poll_interval")]
    pub content_poll_interval_ms: u64,
    /// Consecutive terminal-but-empty discovery polls tolerated before failing.
    #[serde(default = "default_empty_terminal_threshold")]
    pub empty_terminal_poll_threshold: u32,
    /// Delta emission policy.
    #[serde(default)]
    pub delta_mode: DeltaMode,
    /// Characters per event in character mode.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause between character chunks; 0 disables pacing.
    #[serde(default = "default_char_delay")]
    pub char_delay_ms: u64,
}

fn default_deadline_seconds() -> u64 {
    300
}

fn default_locate_poll_interval() -> u64 {
    500
}

fn default_content_poll_interval() -> u64 {
    100
}

fn default_empty_terminal_threshold() -> u32 {
    2
}

fn default_chunk_size() -> usize {
    1
}

fn default_char_delay() -> u64 {
    10
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: default_deadline_seconds(),
            locate_poll_interval_ms: default_locate_poll_interval(),
            content_poll_interval_ms: default_content_poll_interval(),
            empty_terminal_poll_threshold: default_empty_terminal_threshold(),
            delta_mode: DeltaMode::default(),
            chunk_size: default_chunk_size(),
            char_delay_ms: default_char_delay(),
        }
    }
}

/// Where session documents are stored.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DatasetScope {
    /// One dataset for every conversation.
    #[default]
    Shared,
    /// One dataset per job (`prompt-for-pipeline-<jobId>`).
    PerJob,
}

/// Session document storage settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct DocumentsConfig {
    /// Dataset name used in shared scope.
    #[serde(default = "default_dataset_name")]
    pub dataset_name: String,
    /// Dataset partitioning.
    #[serde(default)]
    pub dataset_scope: DatasetScope,
    /// Largest accepted attachment.
    #[serde(default = "default_max_attachment_bytes")]
    pub max_attachment_bytes: usize,
}

fn default_dataset_name() -> String {
    "ai-playground-history".into()
}

fn default_max_attachment_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            dataset_name: default_dataset_name(),
            dataset_scope: DatasetScope::default(),
            max_attachment_bytes: default_max_attachment_bytes(),
        }
    }
}

fn default_http_host() -> String {
    "127.0.0.1".into()
}

fn default_http_port() -> u16 {
    5463
}

fn default_max_concurrent_streams() -> usize {
    10
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Interface the HTTP server binds to.
    #[serde(default = "default_http_host")]
    pub http_host: String,
    /// HTTP port for the SSE endpoints.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Upper bound on simultaneously running watch loops.
    #[serde(default = "default_max_concurrent_streams")]
    pub max_concurrent_streams: usize,
    /// Remote execution platform connection.
    pub platform: PlatformConfig,
    /// Watch loop timing.
    #[serde(default)]
    pub watch: WatchConfig,
    /// Session document storage.
    #[serde(default)]
    pub documents: DocumentsConfig,
}

/// Resolved watch timing, expressed as durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    /// Global per-request deadline.
    pub deadline: Duration,
    /// Sleep between sink discovery polls.
    pub locate_poll_interval: Duration,
    /// Sleep between content polls.
    pub content_poll_interval: Duration,
    /// Consecutive terminal-but-empty discovery polls tolerated.
    pub empty_terminal_poll_threshold: u32,
    /// Delta emission policy.
    pub delta_mode: DeltaMode,
    /// Characters per event in character mode.
    pub chunk_size: usize,
    /// Pause between character chunks.
    pub char_delay: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        WatchConfig::default().settings()
    }
}

impl WatchConfig {
    /// Convert raw millisecond/second values into [`WatchSettings`].
    #[must_use]
    pub fn settings(&self) -> WatchSettings {
        WatchSettings {
            deadline: Duration::from_secs(self.deadline_seconds),
            locate_poll_interval: Duration::from_millis(self.locate_poll_interval_ms),
            content_poll_interval: Duration::from_millis(self.content_poll_interval_ms),
            empty_terminal_poll_threshold: self.empty_terminal_poll_threshold,
            delta_mode: self.delta_mode,
            chunk_size: self.chunk_size,
            char_delay: Duration::from_millis(self.char_delay_ms),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and validate it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Watch timing for the relay.
    #[must_use]
    pub fn watch_settings(&self) -> WatchSettings {
        self.watch.settings()
    }

    /// Load the platform API token from OS keychain with env-var fallback.
    ///
    /// A missing token is not an error: the platform may allow anonymous
    /// access, so the absence is only logged.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the keychain lookup task panics.
    pub async fn load_credentials(&mut self) -> Result<()> {
        self.platform.api_token =
            load_credential("platform_api_token", "EXEC_RELAY_API_TOKEN").await?;
        if self.platform.api_token.is_none() {
            warn!("no platform api token configured; using anonymous access");
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_concurrent_streams == 0 {
            return Err(AppError::Config(
                "max_concurrent_streams must be greater than zero".into(),
            ));
        }

        let base_url = self.platform.base_url.trim_end_matches('/');
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(AppError::Config(format!(
                "platform.base_url must be an http(s) url, got '{}'",
                self.platform.base_url
            )));
        }
        self.platform.base_url = base_url.to_owned();

        if self.platform.project_id.trim().is_empty() {
            return Err(AppError::Config("platform.project_id must not be empty".into()));
        }

        if self.watch.empty_terminal_poll_threshold == 0 {
            return Err(AppError::Config(
                "watch.empty_terminal_poll_threshold must be at least 1".into(),
            ));
        }

        if self.watch.locate_poll_interval_ms == 0 {
            return Err(AppError::Config(
                "watch.locate_poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.watch.content_poll_interval_ms == 0 {
            return Err(AppError::Config(
                "watch.content_poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.watch.chunk_size == 0 {
            return Err(AppError::Config("watch.chunk_size must be at least 1".into()));
        }

        if self.watch.deadline_seconds == 0 {
            return Err(AppError::Config(
                "watch.deadline_seconds must be greater than zero".into(),
            ));
        }

        if self.documents.dataset_name.trim().is_empty() {
            return Err(AppError::Config(
                "documents.dataset_name must not be empty".into(),
            ));
        }

        Ok(())
    }
}

/// Load a single credential from OS keychain with env-var fallback.
async fn load_credential(keyring_key: &str, env_key: &str) -> Result<Option<String>> {
    let key = keyring_key.to_owned();

    // keyring is synchronous I/O.
    let keychain_result = tokio::task::spawn_blocking(move || {
        keyring::Entry::new(KEYRING_SERVICE, &key).and_then(|entry| entry.get_password())
    })
    .await
    .map_err(|err| AppError::Config(format!("keychain task panicked: {err}")))?;

    match keychain_result {
        Ok(value) if !value.is_empty() => return Ok(Some(value)),
        Ok(_) => {
            warn!(key = keyring_key, "keychain entry is empty, trying env var");
        }
        Err(err) => {
            tracing::debug!(
                key = keyring_key,
                ?err,
                "keychain lookup failed, trying env var"
            );
        }
    }

    Ok(env::var(env_key).ok().filter(|value| !value.is_empty()))
}
