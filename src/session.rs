//! Session state: stored tokens and the application context.
//!
//! [`TokenStore`] persists the access/refresh pair to a JSON file so the CLI
//! stays logged in between runs. [`AppContext`] is built once at startup and
//! passed down; it owns the client, the token store, and the read caches
//! derived from the session. [`AppContext::logout`] clears all of them.
//!
//! Every change of the stored tokens bumps the store's session generation.
//! Cached values remember the generation they were read under and are
//! ignored once it moves on, so a session cleared by the client itself
//! (the `logout` policy for 401 responses) also drops the caches.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use crate::client::RegistryClient;
use crate::config::Config;
use crate::error::ApiError;
use crate::models::{Credentials, Profile, RegistryColumn, RegistryStats, TokenPair};

// ============ Token store ============

/// Access/refresh tokens, mirrored to a file.
#[derive(Debug)]
pub struct TokenStore {
    path: Option<PathBuf>,
    tokens: RwLock<Option<TokenPair>>,
    generation: AtomicU64,
}

impl TokenStore {
    /// Open the store at `path`, loading any saved session.
    ///
    /// An unreadable or corrupt session file is treated as logged out.
    pub fn open(path: &Path) -> Self {
        let tokens = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| serde_json::from_str::<TokenPair>(&s).ok());
        Self {
            path: Some(path.to_path_buf()),
            tokens: RwLock::new(tokens),
            generation: AtomicU64::new(0),
        }
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            tokens: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.tokens
            .read()
            .ok()
            .and_then(|t| t.as_ref().map(|p| p.access.clone()))
    }

    pub fn tokens(&self) -> Option<TokenPair> {
        self.tokens.read().ok().and_then(|t| t.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Bumped by every [`save`](Self::save) and [`clear`](Self::clear).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn save(&self, tokens: TokenPair) -> Result<()> {
        if let Some(path) = &self.path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&tokens)?;
            write_private(path, json.as_bytes())
                .with_context(|| format!("Failed to write session file: {}", path.display()))?;
        }
        if let Ok(mut guard) = self.tokens.write() {
            *guard = Some(tokens);
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if let Ok(mut guard) = self.tokens.write() {
            *guard = None;
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path).with_context(|| {
                    format!("Failed to remove session file: {}", path.display())
                })?;
            }
        }
        Ok(())
    }
}

/// Write a file readable by the owner only.
#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on create; tighten a file left by an older version.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

// ============ JWT claims ============

/// The claims of an access token we care about. The signature is not checked.
#[derive(Debug, Clone, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub user_id: Option<serde_json::Value>,
}

impl Claims {
    pub fn decode(token: &str) -> Option<Claims> {
        let payload = token.split('.').nth(1)?;
        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|ts| DateTime::from_timestamp(ts, 0))
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| at <= now).unwrap_or(false)
    }
}

// ============ Caches ============

/// A single cached value that expires after a fixed time or when the
/// session generation it was stored under is no longer current.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, u64, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    pub fn get(&self, generation: u64) -> Option<T> {
        let guard = self.slot.lock().ok()?;
        match guard.as_ref() {
            Some((at, stored, value)) if *stored == generation && at.elapsed() < self.ttl => {
                Some(value.clone())
            }
            _ => None,
        }
    }

    pub fn put(&self, generation: u64, value: T) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = Some((Instant::now(), generation, value));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.slot.lock() {
            *guard = None;
        }
    }
}

// ============ Application context ============

/// Everything a command needs, constructed once and passed down.
pub struct AppContext {
    pub config: Config,
    tokens: Arc<TokenStore>,
    client: RegistryClient,
    columns: TtlCache<Vec<RegistryColumn>>,
    stats: TtlCache<RegistryStats>,
    profile: TtlCache<Profile>,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let tokens = Arc::new(TokenStore::open(&config.auth.session_path));
        Self::with_tokens(config, tokens)
    }

    pub fn with_tokens(config: Config, tokens: Arc<TokenStore>) -> Result<Self> {
        let client = RegistryClient::new(&config, tokens.clone())?;
        Ok(Self {
            columns: TtlCache::new(Duration::from_secs(config.cache.columns_ttl_secs)),
            stats: TtlCache::new(Duration::from_secs(config.cache.stats_ttl_secs)),
            profile: TtlCache::new(Duration::from_secs(config.cache.profile_ttl_secs)),
            config,
            tokens,
            client,
        })
    }

    pub fn client(&self) -> &RegistryClient {
        &self.client
    }

    pub fn tokens(&self) -> &TokenStore {
        &self.tokens
    }

    /// Exchange credentials for tokens and store them.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair> {
        let tokens = self
            .client
            .login(&Credentials {
                username: username.to_string(),
                password: password.to_string(),
            })
            .await?;
        self.reset_caches();
        self.tokens.save(tokens.clone())?;
        tracing::debug!(username, "session stored");
        Ok(tokens)
    }

    /// Forget the session and everything derived from it.
    pub fn logout(&self) -> Result<()> {
        self.reset_caches();
        self.tokens.clear()
    }

    fn reset_caches(&self) {
        self.columns.clear();
        self.stats.clear();
        self.profile.clear();
    }

    pub async fn columns(&self) -> Result<Vec<RegistryColumn>, ApiError> {
        let generation = self.tokens.generation();
        if let Some(cols) = self.columns.get(generation) {
            return Ok(cols);
        }
        let cols = self.client.registry_columns().await?;
        self.columns.put(generation, cols.clone());
        Ok(cols)
    }

    pub async fn stats(&self) -> Result<RegistryStats, ApiError> {
        let generation = self.tokens.generation();
        if let Some(stats) = self.stats.get(generation) {
            return Ok(stats);
        }
        let stats = self.client.statistics().await?;
        self.stats.put(generation, stats.clone());
        Ok(stats)
    }

    pub async fn profile(&self) -> Result<Profile, ApiError> {
        let generation = self.tokens.generation();
        if let Some(profile) = self.profile.get(generation) {
            return Ok(profile);
        }
        let profile = self.client.profile().await?;
        self.profile.put(generation, profile.clone());
        Ok(profile)
    }

    /// Drop the cached profile after it was changed on the server.
    pub fn invalidate_profile(&self) {
        self.profile.clear();
    }
}
