//! Configuration Vault – reads/writes `~/.recall/config.toml`.

use recall_runtime::{AssemblyConfig, KeywordTables, PoolConfig};
use recall_types::UserId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Bearer token for the completion endpoint.  Wiped from memory on drop.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(if self.0.is_empty() { "<not set>" } else { "<redacted>" })
    }
}

/// Persisted user configuration stored in `~/.recall/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible completion endpoint.
    #[serde(default = "default_completion_url")]
    pub completion_url: String,

    /// Model name (e.g. "llama3", "gpt-4o").
    #[serde(default = "default_model")]
    pub model: String,

    /// Only needed for hosted endpoints.  Stored as plain text; the file is
    /// written owner-only.
    #[serde(default, skip_serializing_if = "ApiKey::is_empty")]
    pub api_key: ApiKey,

    /// SQLite file holding turns, semantic memory and sessions.
    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_completion_timeout_secs")]
    pub completion_timeout_secs: u64,

    /// Concurrent background distillation jobs.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// User the REPL talks as.
    #[serde(default = "default_user_id")]
    pub user_id: UserId,

    /// Emotion, topic and relevance keyword tables.
    #[serde(default, skip_serializing_if = "is_default_tables")]
    pub heuristics: KeywordTables,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("completion_url", &self.completion_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key)
            .field("database", &self.database)
            .field("completion_timeout_secs", &self.completion_timeout_secs)
            .field("workers", &self.workers)
            .field("user_id", &self.user_id)
            .field(
                "heuristics",
                if is_default_tables(&self.heuristics) { &"<built-in>" } else { &"<custom>" },
            )
            .finish()
    }
}

fn default_completion_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_database() -> String {
    config_dir_for_home(&home_dir()).join("memory.db").to_string_lossy().into_owned()
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_workers() -> usize {
    4
}
fn default_user_id() -> UserId {
    1
}
fn is_default_tables(tables: &KeywordTables) -> bool {
    *tables == KeywordTables::default()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            completion_url: default_completion_url(),
            model: default_model(),
            api_key: ApiKey::default(),
            database: default_database(),
            completion_timeout_secs: default_completion_timeout_secs(),
            workers: default_workers(),
            user_id: default_user_id(),
            heuristics: KeywordTables::default(),
        }
    }
}

impl Config {
    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs.max(1))
    }

    /// Runtime settings derived from this file; everything not configurable
    /// here keeps its built-in default.
    pub fn assembly_config(&self) -> AssemblyConfig {
        let defaults = AssemblyConfig::default();
        AssemblyConfig {
            pool: PoolConfig { workers: self.workers.max(1), ..defaults.pool.clone() },
            tables: self.heuristics.clone(),
            ..defaults
        }
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.recall/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".recall")
}

/// Build the config path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk and apply environment overrides.  Returns
/// `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    let mut cfg = load_from(&config_path())?;
    if let Some(cfg) = cfg.as_mut() {
        apply_env_overrides(cfg);
    }
    Ok(cfg)
}

/// The stored config, or the defaults when there is none.  Environment
/// overrides apply either way.
pub fn load_or_default() -> Result<Config, String> {
    match load()? {
        Some(cfg) => Ok(cfg),
        None => {
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            Ok(cfg)
        }
    }
}

/// Load the config from a specific path, exactly as stored.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `RECALL_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `RECALL_COMPLETION_URL` | `completion_url` |
/// | `RECALL_MODEL` | `model` |
/// | `RECALL_API_KEY` | `api_key` |
/// | `RECALL_DATABASE` | `database` |
/// | `RECALL_COMPLETION_TIMEOUT_SECS` | `completion_timeout_secs` |
/// | `RECALL_WORKERS` | `workers` |
///
/// Values that do not parse are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("RECALL_COMPLETION_URL") {
        cfg.completion_url = v;
    }
    if let Ok(v) = std::env::var("RECALL_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("RECALL_API_KEY") {
        cfg.api_key = ApiKey::new(v);
    }
    if let Ok(v) = std::env::var("RECALL_DATABASE") {
        cfg.database = v;
    }
    if let Ok(v) = std::env::var("RECALL_COMPLETION_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>() {
            cfg.completion_timeout_secs = secs;
        }
    if let Ok(v) = std::env::var("RECALL_WORKERS")
        && let Ok(n) = v.parse::<usize>()
        && n > 0 {
            cfg.workers = n;
        }
}

/// Save the config to disk, creating `~/.recall/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

/// Create `dir` (and parents) restricted to the owner (rwx------) on Unix.
/// Also used for the database directory, which holds conversation history.
pub fn ensure_private_dir(dir: &Path) -> Result<(), String> {
    if dir.as_os_str().is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)
        .map_err(|e| format!("Failed to create directory {}: {}", dir.display(), e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| format!("Failed to set permissions on {}: {}", dir.display(), e))?;
    }
    Ok(())
}
