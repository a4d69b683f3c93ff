//! Configuration types

use crate::{ConfigError, MemoirResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How long a cached method result lives in the shared backend.
///
/// The instance-local tier ignores this: it always holds a computed result
/// for the lifetime of the in-memory entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CacheTtl {
    /// Never written to the shared backend. Instance-local only.
    #[default]
    Disabled,
    /// Written to the shared backend with no expiry.
    Forever,
    /// Written to the shared backend, expiring after the duration.
    For(Duration),
}

impl CacheTtl {
    /// Build a TTL from whole seconds. Zero means [`CacheTtl::Disabled`];
    /// use [`CacheTtl::Forever`] for "no expiry".
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::Disabled
        } else {
            Self::For(Duration::from_secs(secs))
        }
    }

    /// Build a TTL from a duration. A zero duration is [`CacheTtl::Disabled`].
    pub fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            Self::Disabled
        } else {
            Self::For(duration)
        }
    }

    /// Whether results are written to the shared backend at all.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    /// The expiry to hand the backend, or `None` when backend caching is off.
    pub fn expiry(&self) -> Option<Expiry> {
        match self {
            Self::Disabled => None,
            Self::Forever => Some(Expiry::Never),
            Self::For(duration) => Some(Expiry::After(*duration)),
        }
    }
}

impl fmt::Display for CacheTtl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Forever => write!(f, "forever"),
            Self::For(duration) => write!(f, "{}", duration.as_secs()),
        }
    }
}

impl FromStr for CacheTtl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" | "off" => Ok(Self::Disabled),
            "forever" | "never" => Ok(Self::Forever),
            other => other
                .parse::<u64>()
                .map(Self::from_secs)
                .map_err(|_| ConfigError::InvalidValue {
                    field: "ttl".to_string(),
                    value: s.to_string(),
                    reason: "expected 'disabled', 'forever' or a number of seconds".to_string(),
                }),
        }
    }
}

/// Expiry passed to a cache backend on `set`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expiry {
    /// Keep until deleted.
    Never,
    /// Expire after the duration.
    After(Duration),
}

impl Expiry {
    /// The duration, if the entry expires.
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::Never => None,
            Self::After(duration) => Some(*duration),
        }
    }
}

// ============================================================================
// METHOD CACHE CONFIG
// ============================================================================

/// Settings shared by every cached method on a `MethodCache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodCacheConfig {
    /// Namespace prepended to every key, for backends shared between applications.
    pub key_prefix: Option<String>,
    /// The master key's list lives this many times longer than the entries it tracks.
    pub registry_ttl_multiplier: u32,
    /// Fold the entity's last-modified marker into method keys.
    pub track_last_modified: bool,
    /// TTL used by methods that do not set their own.
    pub default_ttl: CacheTtl,
}

impl Default for MethodCacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: None,
            registry_ttl_multiplier: 2,
            track_last_modified: true,
            default_ttl: CacheTtl::Disabled,
        }
    }
}

impl MethodCacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    /// Set the registry TTL multiplier.
    pub fn with_registry_ttl_multiplier(mut self, multiplier: u32) -> Self {
        self.registry_ttl_multiplier = multiplier;
        self
    }

    /// Enable or disable last-modified tracking in method keys.
    pub fn with_last_modified_tracking(mut self, enabled: bool) -> Self {
        self.track_last_modified = enabled;
        self
    }

    /// Set the default TTL.
    pub fn with_default_ttl(mut self, ttl: CacheTtl) -> Self {
        self.default_ttl = ttl;
        self
    }

    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `MEMOIR_KEY_PREFIX`: Key namespace (default: none)
    /// - `MEMOIR_REGISTRY_TTL_MULTIPLIER`: Registry lifetime multiplier (default: 2)
    /// - `MEMOIR_TRACK_LAST_MODIFIED`: `true`/`false` (default: true)
    /// - `MEMOIR_DEFAULT_TTL`: `disabled`, `forever` or seconds (default: disabled)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            key_prefix: std::env::var("MEMOIR_KEY_PREFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .or(defaults.key_prefix),
            registry_ttl_multiplier: std::env::var("MEMOIR_REGISTRY_TTL_MULTIPLIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.registry_ttl_multiplier),
            track_last_modified: std::env::var("MEMOIR_TRACK_LAST_MODIFIED")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.track_last_modified),
            default_ttl: std::env::var("MEMOIR_DEFAULT_TTL")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_ttl),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - registry_ttl_multiplier >= 1
    /// - key_prefix, when set, is non-empty and contains no ':'
    pub fn validate(&self) -> MemoirResult<()> {
        if self.registry_ttl_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "registry_ttl_multiplier".to_string(),
                value: self.registry_ttl_multiplier.to_string(),
                reason: "registry_ttl_multiplier must be at least 1".to_string(),
            }
            .into());
        }

        if let Some(prefix) = &self.key_prefix {
            if prefix.is_empty() || prefix.contains(':') {
                return Err(ConfigError::InvalidValue {
                    field: "key_prefix".to_string(),
                    value: prefix.clone(),
                    reason: "key_prefix must be non-empty and must not contain ':'".to_string(),
                }
                .into());
            }
        }

        Ok(())
    }
}
