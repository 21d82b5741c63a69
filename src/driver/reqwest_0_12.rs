use std::{
    collections::HashMap,
    fmt,
    sync::{Mutex, PoisonError},
    time::Instant,
};

use tracing::debug;

use super::{DriverName, MAX_REDIRECTS, Transport, TransportResponse};
use crate::{
    config::EngineSettings,
    error::{Error, FailureKind, TransportFailure},
    request::{PreparedRequest, ProxyUrl},
};

/// The async engine, backed by `reqwest`.
///
/// `reqwest` configures proxies per client, so one extra client is built per
/// distinct proxy and reused afterwards.
pub struct ReqwestTransport {
    settings: EngineSettings,
    client: reqwest::Client,
    proxied: Mutex<HashMap<String, reqwest::Client>>,
}

impl ReqwestTransport {
    pub(crate) fn new(settings: &EngineSettings) -> Result<Self, Error> {
        let client = build_client(settings, None).map_err(|e| Error::DriverInit {
            driver: DriverName::Reqwest,
            message: e.to_string(),
        })?;
        debug!(driver = %DriverName::Reqwest, session = settings.session, "constructed engine");
        Ok(Self {
            settings: settings.clone(),
            client,
            proxied: Mutex::new(HashMap::new()),
        })
    }

    fn client_for(&self, proxy: Option<&ProxyUrl>) -> Result<reqwest::Client, TransportFailure> {
        let Some(proxy) = proxy else {
            return Ok(self.client.clone());
        };

        let rendered = proxy.render(Some("http"));
        let mut proxied = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(client) = proxied.get(&rendered) {
            return Ok(client.clone());
        }

        let client = build_client(&self.settings, Some(&rendered)).map_err(|e| {
            TransportFailure::new(
                FailureKind::Other,
                format!("unusable proxy `{}`: {e}", proxy.host()),
            )
        })?;
        debug!(proxy = proxy.host(), "constructed proxied client");
        proxied.insert(rendered, client.clone());
        Ok(client)
    }
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("session", &self.settings.session)
            .finish_non_exhaustive()
    }
}

impl Transport for ReqwestTransport {
    fn name(&self) -> DriverName {
        DriverName::Reqwest
    }

    fn pools_connections(&self) -> bool {
        true
    }

    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse, TransportFailure> {
        let client = self.client_for(request.proxy())?;
        let timeout = request.timeout();
        let version = request.version();

        let (parts, body) = request.into_request().into_parts();
        let mut builder = client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(body);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(version) = version {
            builder = builder.version(version);
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(failure)?;
        let status = response.status();
        let version = response.version();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(failure)?;

        Ok(TransportResponse::from_parts(status, version, headers, body).with_elapsed(started.elapsed()))
    }
}

fn build_client(settings: &EngineSettings, proxy: Option<&str>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .cookie_store(settings.session)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS.into()));
    if let Some(user_agent) = &settings.user_agent {
        builder = builder.user_agent(user_agent.as_str());
    }
    if let Some(max_idle) = settings.pool_max_idle_per_host {
        builder = builder.pool_max_idle_per_host(max_idle);
    }
    if let Some(idle_timeout) = settings.pool_idle_timeout {
        builder = builder.pool_idle_timeout(idle_timeout);
    }
    if let Some(connect_timeout) = settings.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    if let Some(proxy) = proxy {
        builder = builder.proxy(reqwest::Proxy::all(proxy)?);
    }
    builder.build()
}

fn failure(error: reqwest::Error) -> TransportFailure {
    let kind = if error.is_timeout() {
        FailureKind::Timeout
    } else if error.is_connect() {
        FailureKind::Connect
    } else {
        FailureKind::Other
    };
    TransportFailure::new(kind, error.to_string())
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::request::{RequestOptions, normalize};

    fn prepared(uri: &str) -> PreparedRequest {
        let descriptor = normalize(
            &RequestOptions::default(),
            RequestOptions::builder().method(Method::GET).uri(uri).build(),
        )
        .unwrap();
        PreparedRequest::from_descriptor(descriptor).unwrap().0
    }

    #[test]
    fn proxied_clients_are_cached_per_proxy() {
        let transport = ReqwestTransport::new(&EngineSettings::default()).unwrap();
        let first = ProxyUrl::parse("user:pw@127.0.0.1:3128").unwrap();
        let second = ProxyUrl::parse("http://127.0.0.1:3129").unwrap();

        transport.client_for(Some(&first)).unwrap();
        transport.client_for(Some(&first)).unwrap();
        transport.client_for(Some(&second)).unwrap();
        transport.client_for(None).unwrap();

        let proxied = transport.proxied.lock().unwrap();
        assert_eq!(proxied.len(), 2);
        assert!(proxied.contains_key("http://user:pw@127.0.0.1:3128"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = ReqwestTransport::new(&EngineSettings::default()).unwrap();
        let err = transport
            .execute(prepared(&format!("http://{addr}/")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Connect);
    }
}
