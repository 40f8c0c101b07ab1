//! Persisted configuration and the config store boundary.
//!
//! The configuration is loaded once at process start and shared through a
//! [`ConfigHandle`]; the wizard is the only writer and commits through
//! [`ConfigStore::save`], which is atomic (tmp sibling + rename).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

/// Which provider block is active
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Remote,
    Local,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Remote => write!(f, "remote"),
            ProviderKind::Local => write!(f, "local"),
        }
    }
}

/// OpenAI-style remote provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSettings {
    pub api_key: String,
    pub model: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: "gpt-3.5-turbo".to_string(),
        }
    }
}

/// Local inference server settings (LM-Studio-style endpoint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSettings {
    pub base_url: String,
    pub model: String,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:1234/v1".to_string(),
            model: "local-model".to_string(),
        }
    }
}

/// Surface preferences. Opaque to the core; carried through load/save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiSettings {
    pub theme: String,
    pub font_size: u16,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            font_size: 12,
        }
    }
}

/// Output directories shared by all tasks.
///
/// Collisions inside a directory are avoided by per-task unique file names,
/// not by locking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPaths {
    pub documents: PathBuf,
    pub presentations: PathBuf,
    pub logs: PathBuf,
    pub temp: PathBuf,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            documents: PathBuf::from("./documents"),
            presentations: PathBuf::from("./presentations"),
            logs: PathBuf::from("./logs"),
            temp: PathBuf::from("./temp"),
        }
    }
}

impl OutputPaths {
    pub fn all(&self) -> [&Path; 4] {
        [
            &self.documents,
            &self.presentations,
            &self.logs,
            &self.temp,
        ]
    }
}

/// The single source of truth consumed at process start and by every task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub provider: ProviderKind,
    #[serde(default)]
    pub remote: RemoteSettings,
    #[serde(default)]
    pub local: LocalSettings,
    #[serde(default)]
    pub ui: UiSettings,
    #[serde(default)]
    pub paths: OutputPaths,
    /// Upper bound for any single provider/collaborator HTTP call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            remote: RemoteSettings::default(),
            local: LocalSettings::default(),
            ui: UiSettings::default(),
            paths: OutputPaths::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Configuration {
    /// Remote API key with everything but the first and last character
    /// replaced. Safe for display; the full key is only ever persisted.
    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.remote.api_key)
    }

    /// Fill the remote API key from `OPENAI_API_KEY` when the persisted
    /// value is empty. Environment never overrides an explicit key.
    pub fn apply_env_overrides(&mut self) {
        if self.remote.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                if !key.is_empty() {
                    self.remote.api_key = key;
                }
            }
        }
    }
}

/// Mask a secret, keeping the first and last character visible
pub fn mask_secret(secret: &str) -> String {
    let n = secret.chars().count();
    if n <= 2 {
        return "*".repeat(n);
    }
    let first = secret.chars().next().unwrap();
    let last = secret.chars().last().unwrap();
    format!("{}{}{}", first, "*".repeat(n - 2), last)
}

/// Config store boundary errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config format error: {0}")]
    Format(#[from] serde_yaml::Error),
}

/// Load/save of the configuration object. Pure I/O, no branching logic.
pub trait ConfigStore: Send + Sync {
    /// `Ok(None)` when no configuration has been committed yet
    fn load(&self) -> Result<Option<Configuration>, ConfigError>;

    /// Atomic: either the whole object is written or the previous file is
    /// left intact.
    fn save(&self, config: &Configuration) -> Result<(), ConfigError>;
}

/// YAML file store under the platform config directory
pub struct YamlConfigStore {
    path: PathBuf,
}

impl YamlConfigStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn at_default_location() -> Self {
        Self::new(default_config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Platform config file location, with a working-directory fallback
pub fn default_config_path() -> PathBuf {
    use directories::ProjectDirs;

    if let Some(proj_dirs) = ProjectDirs::from("com", "desk-agent", "desk-agent") {
        proj_dirs.config_dir().join("config.yaml")
    } else {
        PathBuf::from(".desk-agent-config.yaml")
    }
}

impl ConfigStore for YamlConfigStore {
    fn load(&self) -> Result<Option<Configuration>, ConfigError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let config = serde_yaml::from_str(&content)?;
        Ok(Some(config))
    }

    fn save(&self, config: &Configuration) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(config)?;

        // Write the full object beside the target, then rename over it
        let tmp = self.path.with_extension("yaml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Shared view of the live configuration.
///
/// Tasks snapshot under the read lock at submit time; the wizard commit
/// swaps the value under the write lock after a successful store save, so a
/// submission never observes a torn configuration.
pub type ConfigHandle = Arc<RwLock<Configuration>>;

pub fn config_handle(config: Configuration) -> ConfigHandle {
    Arc::new(RwLock::new(config))
}

/// Create every configured output directory
pub fn ensure_directories(config: &Configuration) -> std::io::Result<()> {
    for dir in config.paths.all() {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}
