//! Drivers and the transport abstraction.
//!
//! Each engine is wrapped in a type implementing [`Transport`], which
//! decouples dispatch from any specific HTTP implementation. [`Driver`] is the
//! closed set of engines a [`Client`](crate::Client) can route to, and
//! [`DriverRegistry`] builds each engine once per client and hands out
//! borrowed handles.

#[cfg(feature = "curl-driver")]
mod curl;
#[cfg(feature = "reqwest-driver")]
mod reqwest_0_12;
#[cfg(feature = "ureq-driver")]
mod ureq_2;

use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::{
    config::EngineSettings,
    error::{ConfigurationSnafu, Error, TransportFailure},
    request::PreparedRequest,
};

#[cfg(feature = "curl-driver")]
pub use curl::CurlTransport;
#[cfg(feature = "reqwest-driver")]
pub use reqwest_0_12::ReqwestTransport;
#[cfg(feature = "ureq-driver")]
pub use ureq_2::UreqTransport;

/// Redirect hops every engine follows before returning the last response.
pub(crate) const MAX_REDIRECTS: u8 = 10;

/// The names of the supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverName {
    /// The async engine, backed by `reqwest`. Connection pooling is tracked
    /// for this engine only.
    Reqwest,
    /// The blocking engine, backed by `ureq`.
    Ureq,
    /// The raw libcurl engine.
    Curl,
}

impl DriverName {
    /// The driver used when no call, client, or configuration names one.
    pub const FALLBACK: Self = Self::Reqwest;

    /// All driver names, compiled in or not.
    pub const ALL: [Self; 3] = [Self::Reqwest, Self::Ureq, Self::Curl];

    /// Returns the canonical name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reqwest => "reqwest",
            Self::Ureq => "ureq",
            Self::Curl => "curl",
        }
    }

    /// Returns true if this engine was compiled in.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Reqwest => cfg!(feature = "reqwest-driver"),
            Self::Ureq => cfg!(feature = "ureq-driver"),
            Self::Curl => cfg!(feature = "curl-driver"),
        }
    }

    /// Resolves the effective driver from an explicit name and a configured
    /// default, falling back to [`DriverName::FALLBACK`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the chosen name is unknown or its
    /// engine was not compiled in. A bad explicit name is never skipped in
    /// favor of the configured one.
    pub fn resolve(explicit: Option<&str>, configured: Option<&str>) -> Result<Self, Error> {
        let name = match explicit.or(configured) {
            Some(name) => name.parse()?,
            None => Self::FALLBACK,
        };
        if !name.is_available() {
            return ConfigurationSnafu { name: name.as_str() }.fail();
        }
        Ok(name)
    }
}

impl fmt::Display for DriverName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DriverName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| Error::Configuration {
                name: wanted.to_string(),
            })
    }
}

/// A response as received by an engine, before classification.
#[derive(Debug)]
pub struct TransportResponse {
    response: http::Response<Bytes>,
    reason: Option<String>,
    elapsed: Option<Duration>,
}

impl TransportResponse {
    /// Wraps a fully read response.
    #[must_use]
    pub fn new(response: http::Response<Bytes>) -> Self {
        Self {
            response,
            reason: None,
            elapsed: None,
        }
    }

    /// Builds a response from its parts.
    #[must_use]
    pub fn from_parts(status: StatusCode, version: Version, headers: HeaderMap, body: Bytes) -> Self {
        let mut response = http::Response::new(body);
        *response.status_mut() = status;
        *response.version_mut() = version;
        *response.headers_mut() = headers;
        Self::new(response)
    }

    /// Records the reason phrase the server sent.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        self.reason = (!reason.is_empty()).then_some(reason);
        self
    }

    /// Records a duration measured by the engine itself.
    #[must_use]
    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Returns the response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    /// Returns the duration measured by the engine, if it reports one.
    #[must_use]
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    pub(crate) fn into_parts(self) -> (http::Response<Bytes>, Option<String>) {
        (self.response, self.reason)
    }
}

/// Defines the common interface of an HTTP engine.
pub trait Transport: Send + Sync {
    /// The driver name this engine answers to.
    fn name(&self) -> DriverName;

    /// Whether dispatch should keep pool bookkeeping for this engine.
    fn pools_connections(&self) -> bool {
        false
    }

    /// Sends a request and reads the full response.
    ///
    /// Engines translate the prepared request into their native call shape and
    /// run its before-send hooks. An engine that raises on error statuses
    /// returns a [`TransportFailure`] carrying the response.
    fn execute(
        &self,
        request: PreparedRequest,
    ) -> impl Future<Output = Result<TransportResponse, TransportFailure>> + Send;
}

/// A borrowed handle to one of the compiled-in engines.
#[derive(Debug, Clone, Copy)]
pub enum Driver<'a> {
    /// The async engine.
    #[cfg(feature = "reqwest-driver")]
    Reqwest(&'a ReqwestTransport),
    /// The blocking engine.
    #[cfg(feature = "ureq-driver")]
    Ureq(&'a UreqTransport),
    /// The raw libcurl engine.
    #[cfg(feature = "curl-driver")]
    Curl(&'a CurlTransport),
}

impl Transport for Driver<'_> {
    fn name(&self) -> DriverName {
        match self {
            #[cfg(feature = "reqwest-driver")]
            Self::Reqwest(t) => t.name(),
            #[cfg(feature = "ureq-driver")]
            Self::Ureq(t) => t.name(),
            #[cfg(feature = "curl-driver")]
            Self::Curl(t) => t.name(),
        }
    }

    fn pools_connections(&self) -> bool {
        match self {
            #[cfg(feature = "reqwest-driver")]
            Self::Reqwest(t) => t.pools_connections(),
            #[cfg(feature = "ureq-driver")]
            Self::Ureq(t) => t.pools_connections(),
            #[cfg(feature = "curl-driver")]
            Self::Curl(t) => t.pools_connections(),
        }
    }

    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse, TransportFailure> {
        match self {
            #[cfg(feature = "reqwest-driver")]
            Self::Reqwest(t) => t.execute(request).await,
            #[cfg(feature = "ureq-driver")]
            Self::Ureq(t) => t.execute(request).await,
            #[cfg(feature = "curl-driver")]
            Self::Curl(t) => t.execute(request).await,
        }
    }
}

/// Builds each engine at most once and reuses it for every call.
#[derive(Debug)]
pub struct DriverRegistry {
    settings: EngineSettings,
    #[cfg(feature = "reqwest-driver")]
    reqwest: OnceCell<ReqwestTransport>,
    #[cfg(feature = "ureq-driver")]
    ureq: OnceCell<UreqTransport>,
    #[cfg(feature = "curl-driver")]
    curl: OnceCell<CurlTransport>,
}

impl DriverRegistry {
    pub(crate) fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            #[cfg(feature = "reqwest-driver")]
            reqwest: OnceCell::new(),
            #[cfg(feature = "ureq-driver")]
            ureq: OnceCell::new(),
            #[cfg(feature = "curl-driver")]
            curl: OnceCell::new(),
        }
    }

    /// Returns the engine for `name`, constructing it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the engine was not compiled in, or
    /// [`Error::DriverInit`] if it could not be constructed.
    pub async fn resolve(&self, name: DriverName) -> Result<Driver<'_>, Error> {
        match name {
            #[cfg(feature = "reqwest-driver")]
            DriverName::Reqwest => {
                let transport = self
                    .reqwest
                    .get_or_try_init(|| async { ReqwestTransport::new(&self.settings) })
                    .await?;
                Ok(Driver::Reqwest(transport))
            }
            #[cfg(feature = "ureq-driver")]
            DriverName::Ureq => {
                let transport = self
                    .ureq
                    .get_or_init(|| async { UreqTransport::new(&self.settings) })
                    .await;
                Ok(Driver::Ureq(transport))
            }
            #[cfg(feature = "curl-driver")]
            DriverName::Curl => {
                let transport = self
                    .curl
                    .get_or_init(|| async { CurlTransport::new(&self.settings) })
                    .await;
                Ok(Driver::Curl(transport))
            }
            #[allow(unreachable_patterns)]
            other => ConfigurationSnafu { name: other.as_str() }.fail(),
        }
    }
}
