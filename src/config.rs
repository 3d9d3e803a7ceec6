use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000/api".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}

/// What the client does when the API answers 401.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnauthorizedPolicy {
    /// Surface the error and keep the stored session.
    #[default]
    Ignore,
    /// Clear the stored session, then surface the error.
    Logout,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_path")]
    pub session_path: PathBuf,
    #[serde(default)]
    pub on_unauthorized: UnauthorizedPolicy,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_path: default_session_path(),
            on_unauthorized: UnauthorizedPolicy::Ignore,
        }
    }
}

fn default_session_path() -> PathBuf {
    PathBuf::from("./.chemreg/session.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ImportConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound on total polling time; `0` polls until a terminal status.
    #[serde(default = "default_max_poll_secs")]
    pub max_poll_secs: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_secs: default_max_poll_secs(),
        }
    }
}

impl ImportConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_poll_duration(&self) -> Option<Duration> {
        (self.max_poll_secs > 0).then(|| Duration::from_secs(self.max_poll_secs))
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_max_poll_secs() -> u64 {
    1800
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_ordering")]
    pub default_ordering: String,
    #[serde(default = "default_suggest_min_chars")]
    pub suggest_min_chars: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            default_ordering: default_ordering(),
            suggest_min_chars: default_suggest_min_chars(),
        }
    }
}

fn default_debounce_ms() -> u64 {
    400
}
fn default_ordering() -> String {
    "-updated_at".to_string()
}
fn default_suggest_min_chars() -> usize {
    2
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_columns_ttl")]
    pub columns_ttl_secs: u64,
    #[serde(default = "default_stats_ttl")]
    pub stats_ttl_secs: u64,
    #[serde(default = "default_profile_ttl")]
    pub profile_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            columns_ttl_secs: default_columns_ttl(),
            stats_ttl_secs: default_stats_ttl(),
            profile_ttl_secs: default_profile_ttl(),
        }
    }
}

fn default_columns_ttl() -> u64 {
    30 * 60
}
fn default_stats_ttl() -> u64 {
    15 * 60
}
fn default_profile_ttl() -> u64 {
    5 * 60
}

impl Config {
    /// Configuration used when no config file exists.
    pub fn minimal() -> Self {
        Self {
            api: ApiConfig::default(),
            auth: AuthConfig::default(),
            import: ImportConfig::default(),
            search: SearchConfig::default(),
            cache: CacheConfig::default(),
        }
    }

    /// Apply `CHEMREG_API_URL` if it is set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CHEMREG_API_URL") {
            if !url.trim().is_empty() {
                self.api.base_url = url.trim().to_string();
            }
        }
        self
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Load `path` when it exists, otherwise fall back to [`Config::minimal`].
pub fn load_or_minimal(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        load_config(path)?
    } else {
        Config::minimal()
    };
    let config = config.with_env_overrides();
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate api
    let url = reqwest::Url::parse(&config.api.base_url)
        .with_context(|| format!("api.base_url is not a valid URL: {}", config.api.base_url))?;
    match url.scheme() {
        "http" | "https" => {}
        other => anyhow::bail!("api.base_url must use http or https, got '{}'", other),
    }
    if config.api.timeout_secs == 0 {
        anyhow::bail!("api.timeout_secs must be > 0");
    }

    // Validate import
    if config.import.poll_interval_ms == 0 {
        anyhow::bail!("import.poll_interval_ms must be > 0");
    }

    // Validate search
    if config.search.default_ordering.trim().is_empty() {
        anyhow::bail!("search.default_ordering must not be empty");
    }

    Ok(())
}
