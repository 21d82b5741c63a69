use std::{
    collections::HashMap,
    fmt,
    io::{self, Read as _},
    sync::{Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Version};
use tracing::debug;

use super::{DriverName, MAX_REDIRECTS, Transport, TransportResponse};
use crate::{
    config::EngineSettings,
    error::{FailureKind, TransportFailure},
    request::{PreparedRequest, ProxyUrl},
};

/// The blocking engine, backed by `ureq`.
///
/// Calls run on the blocking thread pool. Agents keep a cookie jar for their
/// whole lifetime. Like `reqwest`, `ureq` configures proxies per agent, so
/// one agent is kept per distinct proxy.
pub struct UreqTransport {
    settings: EngineSettings,
    agent: ureq::Agent,
    proxied: Mutex<HashMap<String, ureq::Agent>>,
}

impl UreqTransport {
    pub(crate) fn new(settings: &EngineSettings) -> Self {
        debug!(driver = %DriverName::Ureq, "constructed engine");
        Self {
            settings: settings.clone(),
            agent: build_agent(settings, None),
            proxied: Mutex::new(HashMap::new()),
        }
    }

    fn agent_for(&self, proxy: Option<&ProxyUrl>) -> Result<ureq::Agent, TransportFailure> {
        let Some(proxy) = proxy else {
            return Ok(self.agent.clone());
        };

        let rendered = proxy.render(Some("http"));
        let mut proxied = self.proxied.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(agent) = proxied.get(&rendered) {
            return Ok(agent.clone());
        }

        let native = ureq::Proxy::new(&rendered).map_err(|e| {
            TransportFailure::new(
                FailureKind::Other,
                format!("unusable proxy `{}`: {e}", proxy.host()),
            )
        })?;
        let agent = build_agent(&self.settings, Some(native));
        debug!(proxy = proxy.host(), "constructed proxied agent");
        proxied.insert(rendered, agent.clone());
        Ok(agent)
    }
}

impl fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}

impl Transport for UreqTransport {
    fn name(&self) -> DriverName {
        DriverName::Ureq
    }

    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse, TransportFailure> {
        let agent = self.agent_for(request.proxy())?;
        let timeout = request.timeout();
        let request = request.into_request();

        tokio::task::spawn_blocking(move || call(&agent, request, timeout))
            .await
            .map_err(|e| TransportFailure::new(FailureKind::Other, format!("ureq call did not complete: {e}")))?
    }
}

fn build_agent(settings: &EngineSettings, proxy: Option<ureq::Proxy>) -> ureq::Agent {
    let mut builder = ureq::AgentBuilder::new().redirects(MAX_REDIRECTS.into());
    if let Some(user_agent) = &settings.user_agent {
        builder = builder.user_agent(user_agent);
    }
    if let Some(max_idle) = settings.pool_max_idle_per_host {
        builder = builder.max_idle_connections_per_host(max_idle);
    }
    if let Some(connect_timeout) = settings.connect_timeout {
        builder = builder.timeout_connect(connect_timeout);
    }
    if let Some(proxy) = proxy {
        builder = builder.proxy(proxy);
    }
    builder.build()
}

fn call(
    agent: &ureq::Agent,
    request: http::Request<Bytes>,
    timeout: Option<Duration>,
) -> Result<TransportResponse, TransportFailure> {
    let (parts, body) = request.into_parts();
    let mut call = agent.request(parts.method.as_str(), &parts.uri.to_string());

    // `set` replaces earlier values, so repeated headers are folded first.
    for name in parts.headers.keys() {
        let values = parts
            .headers
            .get_all(name)
            .iter()
            .map(|value| {
                value.to_str().map_err(|_| {
                    TransportFailure::new(
                        FailureKind::Other,
                        format!("header `{name}` is not visible ASCII"),
                    )
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        call = call.set(name.as_str(), &values.join(", "));
    }
    if let Some(timeout) = timeout {
        call = call.timeout(timeout);
    }

    let result = if body.is_empty() {
        call.call()
    } else {
        call.send_bytes(&body)
    };

    match result {
        Ok(response) => read_response(response),
        Err(ureq::Error::Status(code, response)) => {
            let received = read_response(response)?;
            Err(TransportFailure::with_response(format!("HTTP status {code}"), received))
        }
        Err(ureq::Error::Transport(transport)) => Err(transport_failure(&transport)),
    }
}

fn read_response(response: ureq::Response) -> Result<TransportResponse, TransportFailure> {
    let status = StatusCode::from_u16(response.status()).map_err(|e| {
        TransportFailure::new(FailureKind::Other, format!("invalid status: {e}"))
    })?;
    let version = match response.http_version() {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/2" | "HTTP/2.0" => Version::HTTP_2,
        _ => Version::HTTP_11,
    };
    let reason = response.status_text().to_string();

    let mut headers = HeaderMap::new();
    for name in response.headers_names() {
        let Ok(header) = HeaderName::from_bytes(name.as_bytes()) else {
            continue;
        };
        for value in response.all(&name) {
            if let Ok(value) = HeaderValue::from_str(value) {
                headers.append(header.clone(), value);
            }
        }
    }

    let mut body = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut body)
        .map_err(|e| TransportFailure::new(FailureKind::Other, format!("failed to read body: {e}")))?;

    Ok(TransportResponse::from_parts(status, version, headers, Bytes::from(body)).with_reason(reason))
}

fn transport_failure(error: &ureq::Transport) -> TransportFailure {
    let kind = match error.kind() {
        ureq::ErrorKind::Dns | ureq::ErrorKind::ConnectionFailed | ureq::ErrorKind::ProxyConnect => {
            FailureKind::Connect
        }
        ureq::ErrorKind::Io if timed_out(error) => FailureKind::Timeout,
        _ => FailureKind::Other,
    };
    TransportFailure::new(kind, error.to_string())
}

fn timed_out(error: &ureq::Transport) -> bool {
    std::error::Error::source(error)
        .and_then(|source| source.downcast_ref::<io::Error>())
        .is_some_and(|e| matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock))
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;
    use crate::request::{RequestOptions, normalize};

    #[test]
    fn proxied_agents_are_cached_per_proxy() {
        let transport = UreqTransport::new(&EngineSettings::default());
        let proxy = ProxyUrl::parse("bob:pw@127.0.0.1:3128").unwrap();

        transport.agent_for(Some(&proxy)).unwrap();
        transport.agent_for(Some(&proxy)).unwrap();

        let proxied = transport.proxied.lock().unwrap();
        assert_eq!(proxied.len(), 1);
        assert!(proxied.contains_key("http://bob:pw@127.0.0.1:3128"));
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let descriptor = normalize(
            &RequestOptions::default(),
            RequestOptions::builder()
                .method(Method::GET)
                .uri(format!("http://{addr}/"))
                .build(),
        )
        .unwrap();
        let (prepared, _) = PreparedRequest::from_descriptor(descriptor).unwrap();

        let err = UreqTransport::new(&EngineSettings::default())
            .execute(prepared)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Connect);
    }
}
