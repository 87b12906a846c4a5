//! API Configuration Module
//!
//! CORS, rate limiting, store selection and deployment environment for the
//! HTTP layer. Loaded from environment variables with development defaults.

use linkage_core::ConfigError;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

// ============================================================================
// STORE BACKEND
// ============================================================================

/// Which `ContactStore` the server runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

impl fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            other => Err(ConfigError::InvalidValue {
                field: "LINKAGE_STORE".to_string(),
                value: other.to_string(),
                reason: "expected 'postgres' or 'memory'".to_string(),
            }),
        }
    }
}

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration for CORS, rate limiting and deployment.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    // ========================================================================
    // CORS Configuration
    // ========================================================================
    /// Allowed CORS origins (comma-separated in env var).
    /// Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,

    /// Whether to allow credentials in CORS requests.
    pub cors_allow_credentials: bool,

    /// Max age for CORS preflight cache in seconds.
    pub cors_max_age_secs: u64,

    // ========================================================================
    // Rate Limiting Configuration
    // ========================================================================
    /// Whether rate limiting is enabled.
    pub rate_limit_enabled: bool,

    /// Requests per minute allowed for one client IP.
    pub rate_limit_per_minute: u32,

    /// Requests a client may make back to back before the quota applies.
    pub rate_limit_burst: u32,

    /// Key clients on `X-Forwarded-For` / `X-Real-IP` instead of the peer
    /// address. Only safe behind a proxy that overwrites those headers.
    pub rate_limit_trust_proxy: bool,

    /// Upper bound on per-client limiters held in memory. Clients arriving
    /// while the table is full share one overflow limiter.
    pub rate_limit_max_clients: usize,

    // ========================================================================
    // Deployment
    // ========================================================================
    pub store_backend: StoreBackend,

    /// Deployment environment name ("development", "production", ...).
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age_secs: 86400,

            rate_limit_enabled: true,
            rate_limit_per_minute: 20,
            rate_limit_burst: 20,
            rate_limit_trust_proxy: false,
            rate_limit_max_clients: 10_000,

            store_backend: StoreBackend::Postgres,
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LINKAGE_CORS_ORIGINS`: Comma-separated allowed origins (empty = allow all)
    /// - `LINKAGE_CORS_ALLOW_CREDENTIALS`: "true" or "false" (default: false)
    /// - `LINKAGE_CORS_MAX_AGE_SECS`: Preflight cache duration (default: 86400)
    /// - `LINKAGE_RATE_LIMIT_ENABLED`: "true" or "false" (default: true)
    /// - `LINKAGE_RATE_LIMIT_PER_MINUTE`: Requests per minute per IP (default: 20)
    /// - `LINKAGE_RATE_LIMIT_BURST`: Burst capacity (default: 20)
    /// - `LINKAGE_TRUST_PROXY`: Key clients on forwarding headers (default: false)
    /// - `LINKAGE_RATE_LIMIT_MAX_CLIENTS`: Tracked client cap (default: 10000)
    /// - `LINKAGE_STORE`: "postgres" or "memory" (default: postgres)
    /// - `LINKAGE_ENVIRONMENT`: Deployment environment (default: development)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cors_origins = lookup("LINKAGE_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let cors_allow_credentials = lookup("LINKAGE_CORS_ALLOW_CREDENTIALS")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.cors_allow_credentials);

        let cors_max_age_secs = lookup("LINKAGE_CORS_MAX_AGE_SECS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.cors_max_age_secs);

        let rate_limit_enabled = lookup("LINKAGE_RATE_LIMIT_ENABLED")
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.rate_limit_enabled);

        let rate_limit_per_minute = lookup("LINKAGE_RATE_LIMIT_PER_MINUTE")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rate_limit_per_minute);

        let rate_limit_burst = lookup("LINKAGE_RATE_LIMIT_BURST")
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.rate_limit_burst);

        let rate_limit_trust_proxy = lookup("LINKAGE_TRUST_PROXY")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.rate_limit_trust_proxy);

        let rate_limit_max_clients = lookup("LINKAGE_RATE_LIMIT_MAX_CLIENTS")
            .and_then(|s| s.parse().ok())
            .filter(|max: &usize| *max > 0)
            .unwrap_or(defaults.rate_limit_max_clients);

        let store_backend = match lookup("LINKAGE_STORE") {
            Some(value) => value.parse()?,
            None => defaults.store_backend,
        };

        let environment = lookup("LINKAGE_ENVIRONMENT").unwrap_or(defaults.environment);

        Ok(Self {
            cors_origins,
            cors_allow_credentials,
            cors_max_age_secs,
            rate_limit_enabled,
            rate_limit_per_minute,
            rate_limit_burst,
            rate_limit_trust_proxy,
            rate_limit_max_clients,
            store_backend,
            environment,
        })
    }

    /// Whether the deployment environment is production.
    pub fn is_production(&self) -> bool {
        matches!(
            self.environment.to_lowercase().as_str(),
            "production" | "prod"
        )
    }

    /// Check if a given origin is allowed.
    pub fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.cors_origins.is_empty() {
            return true;
        }

        self.cors_origins.iter().any(|allowed| {
            if allowed == origin {
                return true;
            }
            // *.example.com
            if let Some(pattern) = allowed.strip_prefix("*.") {
                if let Some(origin_domain) = origin.strip_prefix("https://") {
                    return origin_domain.ends_with(&format!(".{}", pattern))
                        || origin_domain == pattern;
                }
            }
            false
        })
    }

    /// Reject settings that are only acceptable in development.
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if !self.is_production() {
            return Ok(());
        }
        if self.cors_origins.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "LINKAGE_CORS_ORIGINS".to_string(),
            });
        }
        if self.store_backend == StoreBackend::Memory {
            return Err(ConfigError::InvalidValue {
                field: "LINKAGE_STORE".to_string(),
                value: self.store_backend.to_string(),
                reason: "the in-memory store does not survive restarts".to_string(),
            });
        }
        if !self.rate_limit_enabled {
            tracing::warn!(
                "Rate limiting is disabled in production. \
                 Set LINKAGE_RATE_LIMIT_ENABLED=true to enable it."
            );
        }
        Ok(())
    }
}

// ============================================================================
// BIND ADDRESS
// ============================================================================

/// Listen address from `LINKAGE_API_BIND` (default `0.0.0.0`) and `PORT`,
/// falling back to `LINKAGE_API_PORT` (default 3000).
pub fn bind_addr_from_env() -> Result<SocketAddr, ConfigError> {
    bind_addr_from_lookup(|key| std::env::var(key).ok())
}

pub fn bind_addr_from_lookup<F>(lookup: F) -> Result<SocketAddr, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("LINKAGE_API_BIND").unwrap_or_else(|| "0.0.0.0".to_string());
    let (port_field, port_str) = match lookup("PORT") {
        Some(port) => ("PORT", port),
        None => (
            "LINKAGE_API_PORT",
            lookup("LINKAGE_API_PORT").unwrap_or_else(|| "3000".to_string()),
        ),
    };
    let port = port_str
        .trim()
        .parse::<u16>()
        .map_err(|e| ConfigError::InvalidValue {
            field: port_field.to_string(),
            value: port_str.clone(),
            reason: e.to_string(),
        })?;

    let addr = format!("{}:{}", host.trim(), port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ConfigError::InvalidValue {
            field: "LINKAGE_API_BIND".to_string(),
            value: host,
            reason: e.to_string(),
        })
}
