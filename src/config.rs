//! Process configuration, loaded once from the environment into a typed,
//! validated `CoreConfig`. Unknown environment keys are ignored; a
//! malformed or invariant-violating value is a `ConfigError`, never a
//! panic.

use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("CACHE_URL endpoint resolves to a loopback/local address, which is rejected at configuration load: {0}")]
    LoopbackEndpointRejected(String),

    #[error("tier limits must be non-decreasing: free={free}, pro={pro}, enterprise={enterprise}")]
    TierLimitsNotAscending { free: i64, pro: i64, enterprise: i64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertReqs {
    None,
    Optional,
    Required,
}

impl CertReqs {
    fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(CertReqs::None),
            "optional" => Ok(CertReqs::Optional),
            "required" => Ok(CertReqs::Required),
            other => Err(ConfigError::Invalid {
                key: "CACHE_SSL_CERT_REQS",
                value: other.to_string(),
                reason: "expected one of: none, optional, required".to_string(),
            }),
        }
    }
}

/// Cache-client connection settings, read from the `CACHE_*` variables.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub url: String,
    pub password: Option<String>,
    pub ssl: bool,
    pub ssl_cert_reqs: CertReqs,
    pub max_connections: usize,
    pub socket_timeout: Duration,
}

/// Default token caps for the three built-in tiers, read from
/// `TIER_*_LIMIT`.
#[derive(Debug, Clone, Copy)]
pub struct TierLimits {
    pub free: i64,
    pub pro: i64,
    pub enterprise: i64,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub cache: CacheConfig,
    pub default_tier: String,
    pub tier_limits: TierLimits,
    pub repo_fetch_token: Option<String>,
    pub storage_dir: String,
    /// When true, a regex miss on `estimated_tokens` during ingest is a
    /// validation failure outright rather than defaulting to 0.
    pub strict_token_extraction: bool,
}

fn env_var(key: &'static str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            value: raw,
            reason: "could not parse".to_string(),
        }),
    }
}

fn parse_bool_env(key: &'static str, default: bool) -> Result<bool> {
    match env_var(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                key,
                value: raw,
                reason: "expected a boolean".to_string(),
            }),
        },
    }
}

fn is_loopback_host(host: &str) -> bool {
    host == "localhost" || host == "127.0.0.1" || host == "::1" || host.starts_with("127.")
}

impl CoreConfig {
    /// Read every variable in the environment table once, apply stated
    /// defaults, and validate. Fails fast on a malformed value rather than
    /// deferring the problem to first use.
    pub fn from_env() -> Result<Self> {
        let url = env_var("CACHE_URL").ok_or(ConfigError::Missing("CACHE_URL"))?;

        let scheme_tls = url.starts_with("rediss://");
        if !scheme_tls && !url.starts_with("redis://") {
            return Err(ConfigError::Invalid {
                key: "CACHE_URL",
                value: url,
                reason: "expected a redis:// or rediss:// URL".to_string(),
            });
        }

        let after_scheme = url.splitn(2, "://").nth(1).unwrap_or("");
        let after_auth = after_scheme.rsplit_once('@').map(|(_, h)| h).unwrap_or(after_scheme);
        let host_port = after_auth.split('/').next().unwrap_or("");
        let host_only = host_port.rsplit_once(':').map(|(h, _)| h).unwrap_or(host_port);
        if is_loopback_host(host_only) {
            return Err(ConfigError::LoopbackEndpointRejected(url));
        }

        let ssl = parse_bool_env("CACHE_SSL", scheme_tls)?;
        let ssl_cert_reqs = match env_var("CACHE_SSL_CERT_REQS") {
            Some(raw) => CertReqs::parse(&raw)?,
            None => CertReqs::Required,
        };

        let max_connections: usize = parse_env("CACHE_MAX_CONNECTIONS", 20)?;
        let socket_timeout_secs: u64 = parse_env("CACHE_SOCKET_TIMEOUT", 5)?;

        let cache = CacheConfig {
            url,
            password: env_var("CACHE_PASSWORD"),
            ssl,
            ssl_cert_reqs,
            max_connections,
            socket_timeout: Duration::from_secs(socket_timeout_secs),
        };

        let default_tier = env_var("TIER_PLAN").unwrap_or_else(|| "free".to_string());

        let tier_limits = TierLimits {
            free: parse_env("TIER_FREE_LIMIT", 1_000_000)?,
            pro: parse_env("TIER_PRO_LIMIT", 10_000_000)?,
            enterprise: parse_env("TIER_ENTERPRISE_LIMIT", -1)?,
        };
        let effective = |v: i64| if v == -1 { i64::MAX } else { v };
        if effective(tier_limits.free) > effective(tier_limits.pro)
            || effective(tier_limits.pro) > effective(tier_limits.enterprise)
        {
            return Err(ConfigError::TierLimitsNotAscending {
                free: tier_limits.free,
                pro: tier_limits.pro,
                enterprise: tier_limits.enterprise,
            });
        }

        let strict_token_extraction = parse_bool_env("STRICT_TOKEN_EXTRACTION", false)?;

        Ok(Self {
            cache,
            default_tier,
            tier_limits,
            repo_fetch_token: env_var("REPO_FETCH_TOKEN"),
            storage_dir: env_var("STORAGE_DIR").unwrap_or_else(|| "/tmp/repo_storage".to_string()),
            strict_token_extraction,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "CACHE_URL",
            "CACHE_PASSWORD",
            "CACHE_SSL",
            "CACHE_SSL_CERT_REQS",
            "CACHE_MAX_CONNECTIONS",
            "CACHE_SOCKET_TIMEOUT",
            "TIER_PLAN",
            "TIER_FREE_LIMIT",
            "TIER_PRO_LIMIT",
            "TIER_ENTERPRISE_LIMIT",
            "REPO_FETCH_TOKEN",
            "STORAGE_DIR",
            "STRICT_TOKEN_EXTRACTION",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn missing_cache_url_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        assert!(matches!(CoreConfig::from_env(), Err(ConfigError::Missing("CACHE_URL"))));
    }

    #[test]
    fn loopback_endpoint_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("CACHE_URL", "redis://127.0.0.1:6379");
        assert!(matches!(
            CoreConfig::from_env(),
            Err(ConfigError::LoopbackEndpointRejected(_))
        ));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("CACHE_URL", "rediss://cache.internal.example:6380");
        let config = CoreConfig::from_env().unwrap();
        assert_eq!(config.cache.max_connections, 20);
        assert_eq!(config.cache.socket_timeout, Duration::from_secs(5));
        assert!(config.cache.ssl);
        assert_eq!(config.default_tier, "free");
        assert!(!config.strict_token_extraction);
        assert_eq!(config.storage_dir, "/tmp/repo_storage");
    }

    #[test]
    fn descending_tier_limits_are_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        env::set_var("CACHE_URL", "redis://cache.internal.example:6379");
        env::set_var("TIER_FREE_LIMIT", "10000000");
        env::set_var("TIER_PRO_LIMIT", "1000000");
        assert!(matches!(
            CoreConfig::from_env(),
            Err(ConfigError::TierLimitsNotAscending { .. })
        ));
    }
}
