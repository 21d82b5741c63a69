use bon::bon;
use bytes::Bytes;
use http::Method;

use crate::{
    config::ClientConfig,
    dispatch::{StatusPolicy, dispatch},
    driver::{DriverName, DriverRegistry},
    error::Error,
    pool::{PoolRegistry, PoolStatus},
    request::{RequestOptions, normalize},
    response::Response,
    target::IntoTarget,
};

/// An HTTP client that routes each request to one of several engines.
///
/// Engines are built on first use and shared by every call made through the
/// client. The client is `Send + Sync`; wrap it in an `Arc` to share it
/// between tasks.
#[derive(Debug)]
pub struct Client {
    defaults: RequestOptions,
    driver: DriverName,
    drivers: DriverRegistry,
    pools: PoolRegistry,
    policy: StatusPolicy,
}

#[bon]
impl Client {
    /// Creates a client.
    ///
    /// The default driver is `driver` if given, else the `driver` in
    /// `defaults`, else the configured one, else [`DriverName::FALLBACK`].
    /// With `session` set, engines that support it keep cookies between
    /// calls.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if the default driver name is unknown
    /// or not compiled in.
    #[builder]
    pub fn new(
        #[builder(default)] defaults: RequestOptions,
        #[builder(into)] driver: Option<String>,
        #[builder(default)] session: bool,
        #[builder(default)] config: ClientConfig,
    ) -> Result<Self, Error> {
        let driver = DriverName::resolve(
            driver.as_deref().or(defaults.driver.as_deref()),
            config.driver.as_deref(),
        )?;

        Ok(Self {
            defaults,
            driver,
            drivers: DriverRegistry::new(config.engine_settings(session)),
            pools: PoolRegistry::new(config.pool_max_idle_per_host.unwrap_or(usize::MAX)),
            policy: StatusPolicy {
                error_body_limit: config.error_body_limit(),
            },
        })
    }

    /// Returns the driver used when a call names none.
    #[must_use]
    pub fn driver(&self) -> DriverName {
        self.driver
    }

    /// Returns the options every call is merged over.
    #[must_use]
    pub fn defaults(&self) -> &RequestOptions {
        &self.defaults
    }

    /// Sends a request described entirely by `options`.
    ///
    /// The driver named in `options` is resolved before anything else, so an
    /// unknown name fails without any network activity.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] for an unknown or unavailable driver.
    /// - [`Error::InvalidRequest`] if the options do not describe a request.
    /// - [`Error::Transport`] if the engine failed without a response.
    /// - [`Error::HttpStatus`] for a status of 400 or above.
    /// - [`Error::Download`] if the body could not be saved.
    pub async fn request(&self, options: RequestOptions) -> Result<Response, Error> {
        let name = DriverName::resolve(options.driver.as_deref(), Some(self.driver.as_str()))?;
        let transport = self.drivers.resolve(name).await?;
        let descriptor = normalize(&self.defaults, options)?;
        dispatch(&transport, descriptor, &self.pools, self.policy).await
    }

    /// Sends a ready-made `http::Request`.
    ///
    /// The request's own path and query are used as the request line. Its
    /// method, headers, body and version are sent as given; client defaults
    /// still apply to everything the request does not set.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn send(&self, request: http::Request<Bytes>) -> Result<Response, Error> {
        let (parts, body) = request.into_parts();
        let options = RequestOptions::builder()
            .method(parts.method)
            .uri(parts.uri.to_string())
            .maybe_headers((!parts.headers.is_empty()).then_some(parts.headers))
            .maybe_body((!body.is_empty()).then_some(body))
            .target(true)
            .version(parts.version)
            .build();
        self.request(options).await
    }

    async fn verb(
        &self,
        method: Method,
        target: impl IntoTarget,
        mut options: RequestOptions,
    ) -> Result<Response, Error> {
        options.method = Some(method);
        if let Some(uri) = target.into_target() {
            options.uri = Some(uri);
        }
        self.request(options).await
    }

    /// Sends a `GET` request. See [`Client::request`].
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn get(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::GET, target, options).await
    }

    /// Sends a `HEAD` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn head(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::HEAD, target, options).await
    }

    /// Sends a `PUT` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn put(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::PUT, target, options).await
    }

    /// Sends a `POST` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn post(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::POST, target, options).await
    }

    /// Sends a `PATCH` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn patch(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::PATCH, target, options).await
    }

    /// Sends a `DELETE` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn delete(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::DELETE, target, options).await
    }

    /// Sends an `OPTIONS` request.
    ///
    /// # Errors
    ///
    /// See [`Client::request`].
    pub async fn options(&self, target: impl IntoTarget, options: RequestOptions) -> Result<Response, Error> {
        self.verb(Method::OPTIONS, target, options).await
    }

    /// Returns the bookkeeping for a connection group, or `None` if no
    /// request has used that key.
    #[must_use]
    pub fn pool_status(&self, key: &str) -> Option<PoolStatus> {
        self.pools.status(key)
    }

    /// Forgets a connection group. Empty or unknown keys are ignored.
    pub fn release_pool(&self, key: &str) {
        self.pools.release(key);
    }
}
