/*
 * Responsibility
 * - Load settings from the environment (.env is honoured)
 * - Validate values and fail startup on bad input
 * - Hand plain settings structs to the cache / session / authority layers
 */
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::services::auth::{EvictionPolicy, LockMode, SessionPolicy};
use crate::services::cache::{BackendKind, BackendSettings, CacheSettings, CipherKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    pub fn from_env() -> Self {
        match std::env::var("APP_ENV")
            .unwrap_or_else(|_| "development".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "production" | "prod" => Self::Production,
            _ => Self::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing configuration: {}", key),
            ConfigError::Invalid(key) => write!(f, "invalid configuration: {}", key),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    pub app_env: AppEnv,

    pub backend: BackendSettings,
    pub cache_app_prefix: String,
    pub cache_space: String,
    pub cipher: Option<CipherKey>,

    pub max_tokens: usize,
    pub expiration: Duration,
    pub lock_mode: LockMode,
    pub eviction: EvictionPolicy,

    pub authority_url: Option<Url>,
    pub authority_web_key: Option<String>,
    pub authority_timeout: Duration,

    pub basic_user: String,
    pub basic_password: String,
    pub basic_namespace: String,
}

fn var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match var(key) {
        Some(v) => v.parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let port: u16 = parsed("PORT", 3000)?;
        let addr: SocketAddr = SocketAddr::from_str(&format!("0.0.0.0:{}", port))
            .map_err(|_| ConfigError::Invalid("PORT"))?;

        let app_env = AppEnv::from_env();

        let kind: BackendKind = parsed("CACHE_BACKEND", BackendKind::Memory)?;
        let mut backend = BackendSettings::new(kind);
        backend.redis_host = var("REDIS_HOST");
        backend.redis_port = match var("REDIS_PORT") {
            Some(p) => Some(p.parse().map_err(|_| ConfigError::Invalid("REDIS_PORT"))?),
            None => None,
        };
        backend.directory = var("CACHE_DIR").map(PathBuf::from);
        backend.database_url = var("DATABASE_URL");

        match kind {
            BackendKind::Directory if backend.directory.is_none() => {
                return Err(ConfigError::Missing("CACHE_DIR"));
            }
            BackendKind::Document if backend.database_url.is_none() => {
                return Err(ConfigError::Missing("DATABASE_URL"));
            }
            _ => {}
        }

        let cache_app_prefix =
            var("CACHE_APP_PREFIX").unwrap_or_else(|| env!("CARGO_PKG_NAME").replace('-', "_"));
        let cache_space = var("CACHE_SPACE").unwrap_or_else(|| "default".to_string());

        // Encryption needs both halves.
        let cipher = match (var("CACHE_SECRET_KEY"), var("CACHE_SECRET_IV")) {
            (Some(key), Some(iv)) => CipherKey::new(&key, &iv),
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::Missing("CACHE_SECRET_IV")),
            (None, Some(_)) => return Err(ConfigError::Missing("CACHE_SECRET_KEY")),
        };

        let defaults = SessionPolicy::default();
        let max_tokens: usize = parsed("AUTH_MAX_TOKENS", defaults.max_tokens)?;
        if max_tokens == 0 {
            return Err(ConfigError::Invalid("AUTH_MAX_TOKENS"));
        }
        let expiration =
            Duration::from_secs(parsed("AUTH_EXPIRATION_SECONDS", defaults.expiration.as_secs())?);
        let lock_mode: LockMode = parsed("AUTH_LOCK_MODE", defaults.lock_mode)?;
        let eviction: EvictionPolicy = parsed("AUTH_EVICTION", defaults.eviction)?;

        let authority_url = match var("AUTHORITY_URL") {
            Some(u) => Some(Url::parse(&u).map_err(|_| ConfigError::Invalid("AUTHORITY_URL"))?),
            None => None,
        };
        let authority_web_key = var("AUTHORITY_WEB_KEY");
        let authority_timeout = Duration::from_secs(parsed("AUTHORITY_TIMEOUT_SECONDS", 10)?);

        let basic_user = var("BASIC_USER").unwrap_or_else(|| "test".to_string());
        let basic_password = var("BASIC_PASSWORD").unwrap_or_else(|| "password".to_string());
        let basic_namespace = var("BASIC_NAMESPACE").unwrap_or_else(|| "_apis".to_string());

        Ok(Self {
            addr,
            app_env,
            backend,
            cache_app_prefix,
            cache_space,
            cipher,
            max_tokens,
            expiration,
            lock_mode,
            eviction,
            authority_url,
            authority_web_key,
            authority_timeout,
            basic_user,
            basic_password,
            basic_namespace,
        })
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings::new(&self.cache_space).with_app_prefix(&self.cache_app_prefix)
    }

    pub fn session_policy(&self) -> SessionPolicy {
        SessionPolicy {
            max_tokens: self.max_tokens,
            expiration: self.expiration,
            eviction: self.eviction,
            lock_mode: self.lock_mode,
            cipher: self.cipher.clone(),
        }
    }
}
