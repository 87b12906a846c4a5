//! Reconciliation configuration

use crate::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity of the serialization boundary around a reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockScope {
    /// One lock per submitted identifier
    Identifier,
    /// A single lock shared by every reconciliation
    Global,
}

impl LockScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockScope::Identifier => "identifier",
            LockScope::Global => "global",
        }
    }
}

impl fmt::Display for LockScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LockScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "identifier" => Ok(LockScope::Identifier),
            "global" => Ok(LockScope::Global),
            other => Err(ConfigError::InvalidValue {
                field: "LINKAGE_LOCK_SCOPE".to_string(),
                value: other.to_string(),
                reason: "expected 'identifier' or 'global'".to_string(),
            }),
        }
    }
}

/// Settings for the reconciliation pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Total pipeline runs allowed when the store reports a uniqueness
    /// conflict on primary creation. Must be at least 1.
    pub max_attempts: u32,
    pub lock_scope: LockScope,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            lock_scope: LockScope::Identifier,
        }
    }
}

impl ReconcileConfig {
    /// Create ReconcileConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LINKAGE_MAX_ATTEMPTS`: pipeline attempts on uniqueness conflict (default: 3)
    /// - `LINKAGE_LOCK_SCOPE`: "identifier" or "global" (default: identifier)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(raw) = std::env::var("LINKAGE_MAX_ATTEMPTS") {
            config.max_attempts = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "LINKAGE_MAX_ATTEMPTS".to_string(),
                value: raw.clone(),
                reason: "must be a positive integer".to_string(),
            })?;
        }

        if let Ok(raw) = std::env::var("LINKAGE_LOCK_SCOPE") {
            config.lock_scope = raw.parse()?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcileConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.lock_scope, LockScope::Identifier);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = ReconcileConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_lock_scope_parse() {
        assert_eq!("Global".parse::<LockScope>().unwrap(), LockScope::Global);
        assert_eq!(
            " identifier ".parse::<LockScope>().unwrap(),
            LockScope::Identifier
        );
        assert!("cluster".parse::<LockScope>().is_err());
    }
}
