//! Client configuration.
//!
//! [`ClientConfig`] is an explicit value handed to [`Client`](crate::Client)
//! construction. It can be deserialized from the application's own config
//! file, or seeded from the environment with [`ClientConfig::from_env`].
//! Requests never read the environment themselves.

use std::time::Duration;

use bon::Builder;
use serde::Deserialize;

/// The environment variable read by [`ClientConfig::from_env`].
pub const DRIVER_ENV: &str = "MULTIHTTP_DRIVER";

/// Default bound on the body excerpt attached to status errors.
pub const DEFAULT_ERROR_BODY_LIMIT: usize = 256;

/// Process-level client configuration.
#[derive(Debug, Clone, Default, Deserialize, Builder)]
#[serde(default)]
pub struct ClientConfig {
    /// Default driver name, used when neither the call nor the client names one.
    #[builder(into)]
    pub driver: Option<String>,
    /// `User-Agent` sent by every engine.
    #[builder(into)]
    pub user_agent: Option<String>,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: Option<usize>,
    /// How long an idle pooled connection is kept, in milliseconds.
    pub pool_idle_timeout_ms: Option<u64>,
    /// Connect timeout, in milliseconds.
    pub connect_timeout_ms: Option<u64>,
    /// Bound on the body excerpt included in status errors, in bytes.
    pub error_body_limit: Option<usize>,
}

impl ClientConfig {
    /// Reads the default driver from [`DRIVER_ENV`].
    ///
    /// An unset or empty variable leaves the driver unset.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            driver: lookup(DRIVER_ENV).filter(|value| !value.trim().is_empty()),
            ..Self::default()
        }
    }

    /// Returns the effective excerpt bound for status errors.
    #[must_use]
    pub fn error_body_limit(&self) -> usize {
        self.error_body_limit.unwrap_or(DEFAULT_ERROR_BODY_LIMIT)
    }

    pub(crate) fn engine_settings(&self, session: bool) -> EngineSettings {
        EngineSettings {
            session,
            user_agent: self.user_agent.clone(),
            pool_max_idle_per_host: self.pool_max_idle_per_host,
            pool_idle_timeout: self.pool_idle_timeout_ms.map(Duration::from_millis),
            connect_timeout: self.connect_timeout_ms.map(Duration::from_millis),
        }
    }
}

/// The subset of configuration each engine is built from.
#[derive(Debug, Clone, Default)]
#[cfg_attr(not(feature = "reqwest-driver"), allow(dead_code))]
pub(crate) struct EngineSettings {
    pub(crate) session: bool,
    pub(crate) user_agent: Option<String>,
    pub(crate) pool_max_idle_per_host: Option<usize>,
    pub(crate) pool_idle_timeout: Option<Duration>,
    pub(crate) connect_timeout: Option<Duration>,
}
