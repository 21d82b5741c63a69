use std::{
    collections::BTreeMap,
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use curl::easy::{Easy, HttpVersion, List};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Version, header::EXPECT};
use tracing::debug;

use super::{DriverName, MAX_REDIRECTS, Transport, TransportResponse};
use crate::{
    config::EngineSettings,
    error::{FailureKind, TransportFailure},
    request::PreparedRequest,
};

/// The raw libcurl engine.
///
/// Transfers run on the blocking thread pool. Finished handles are reset and
/// kept on a free list, so their connection caches carry over to the next
/// transfer. Concurrent transfers use separate handles, so under `session`
/// cookies live in one jar owned by the engine and are loaded into each
/// handle before its transfer.
pub struct CurlTransport {
    settings: EngineSettings,
    handles: Mutex<Vec<Easy>>,
    jar: CookieJar,
}

impl CurlTransport {
    pub(crate) fn new(settings: &EngineSettings) -> Self {
        debug!(driver = %DriverName::Curl, version = curl::Version::get().version(), "constructed engine");
        Self {
            settings: settings.clone(),
            handles: Mutex::new(Vec::new()),
            jar: CookieJar::default(),
        }
    }

    fn check_out(&self) -> Easy {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(Easy::new)
    }

    fn check_in(&self, mut handle: Easy) {
        handle.reset();
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }
}

impl fmt::Debug for CurlTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let idle = self.handles.lock().map_or(0, |handles| handles.len());
        f.debug_struct("CurlTransport")
            .field("idle_handles", &idle)
            .finish_non_exhaustive()
    }
}

impl Transport for CurlTransport {
    fn name(&self) -> DriverName {
        DriverName::Curl
    }

    async fn execute(&self, request: PreparedRequest) -> Result<TransportResponse, TransportFailure> {
        let session = self.settings.session;
        let cookies = if session { self.jar.lines() } else { Vec::new() };
        let options = TransferOptions {
            settings: self.settings.clone(),
            proxy: request.proxy().map(|proxy| proxy.render(None)),
            timeout: request.timeout(),
            version: request.version(),
            cookies: cookies.clone(),
        };
        let request = request.into_request();
        let mut handle = self.check_out();

        let (handle, result, kept) = tokio::task::spawn_blocking(move || {
            let result = perform(&mut handle, &options, request);
            let kept = if session { cookie_lines(&mut handle) } else { None };
            (handle, result, kept)
        })
        .await
        .map_err(|e| TransportFailure::new(FailureKind::Other, format!("curl transfer did not complete: {e}")))?;

        if let Some(kept) = kept {
            self.jar.update(&cookies, kept);
        }
        self.check_in(handle);
        result
    }
}

struct TransferOptions {
    settings: EngineSettings,
    proxy: Option<String>,
    timeout: Option<Duration>,
    version: Option<Version>,
    cookies: Vec<String>,
}

/// Cookies shared by the handles of a session engine, held as Netscape
/// cookie-file lines keyed by domain, path and name.
#[derive(Debug, Default)]
struct CookieJar(Mutex<BTreeMap<(String, String, String), String>>);

impl CookieJar {
    fn lines(&self) -> Vec<String> {
        self.lock().values().cloned().collect()
    }

    /// Folds a handle's cookies back in. Cookies it was given but no longer
    /// holds were expired or deleted by the server.
    fn update(&self, given: &[String], kept: Vec<String>) {
        let mut cookies = self.lock();
        for line in given {
            if let Some(key) = cookie_key(line) {
                cookies.remove(&key);
            }
        }
        for line in kept {
            if let Some(key) = cookie_key(&line) {
                cookies.insert(key, line);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, String, String), String>> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn cookie_key(line: &str) -> Option<(String, String, String)> {
    let fields: Vec<&str> = line.split('\t').collect();
    let [domain, _, path, _, _, name, _] = fields.as_slice() else {
        return None;
    };
    Some(((*domain).to_string(), (*path).to_string(), (*name).to_string()))
}

fn cookie_lines(handle: &mut Easy) -> Option<Vec<String>> {
    let list = handle.cookies().ok()?;
    Some(
        list.iter()
            .map(|line| String::from_utf8_lossy(line).into_owned())
            .collect(),
    )
}

/// Response head as seen by the header callback. A new status line resets
/// it, so only the final response of a transfer is kept.
#[derive(Default)]
struct Head {
    version: Option<Version>,
    reason: String,
    headers: HeaderMap,
}

impl Head {
    fn accept(&mut self, line: &[u8]) {
        let Ok(line) = std::str::from_utf8(line) else {
            return;
        };
        let line = line.trim_end_matches(['\r', '\n']);

        if line.starts_with("HTTP/") {
            let mut fields = line.splitn(3, ' ');
            *self = Self {
                version: fields.next().map(parse_version),
                reason: fields.nth(1).unwrap_or_default().trim().to_string(),
                headers: HeaderMap::new(),
            };
            return;
        }

        if let Some((name, value)) = line.split_once(':')
            && let Ok(name) = HeaderName::from_bytes(name.trim().as_bytes())
            && let Ok(value) = HeaderValue::from_str(value.trim())
        {
            self.headers.append(name, value);
        }
    }
}

fn parse_version(token: &str) -> Version {
    match token {
        "HTTP/1.0" => Version::HTTP_10,
        "HTTP/2" | "HTTP/2.0" => Version::HTTP_2,
        "HTTP/3" => Version::HTTP_3,
        _ => Version::HTTP_11,
    }
}

fn perform(
    handle: &mut Easy,
    options: &TransferOptions,
    request: http::Request<Bytes>,
) -> Result<TransportResponse, TransportFailure> {
    let (parts, body) = request.into_parts();
    configure(handle, options, &parts, &body).map_err(failure)?;

    let mut head = Head::default();
    let mut received = Vec::new();
    {
        let mut transfer = handle.transfer();
        transfer
            .header_function(|line| {
                head.accept(line);
                true
            })
            .map_err(failure)?;
        transfer
            .write_function(|data| {
                received.extend_from_slice(data);
                Ok(data.len())
            })
            .map_err(failure)?;
        transfer.perform().map_err(failure)?;
    }

    let code = handle.response_code().map_err(failure)?;
    let status = u16::try_from(code)
        .ok()
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| TransportFailure::new(FailureKind::Other, format!("invalid status {code}")))?;

    let mut response = http::Response::new(Bytes::from(received));
    *response.status_mut() = status;
    *response.version_mut() = head.version.unwrap_or(Version::HTTP_11);
    *response.headers_mut() = head.headers;

    let mut response = TransportResponse::new(response).with_reason(head.reason);
    if let Ok(total) = handle.total_time() {
        response = response.with_elapsed(total);
    }
    Ok(response)
}

fn configure(
    handle: &mut Easy,
    options: &TransferOptions,
    parts: &http::request::Parts,
    body: &Bytes,
) -> Result<(), curl::Error> {
    handle.url(&parts.uri.to_string())?;

    // Posting fields switches libcurl to POST, so any other method carrying
    // a body is named explicitly.
    let method = &parts.method;
    match *method {
        Method::HEAD => handle.nobody(true)?,
        Method::GET if body.is_empty() => {}
        Method::POST => {
            handle.post(true)?;
            handle.post_fields_copy(body)?;
        }
        _ => {
            if !body.is_empty() {
                handle.post(true)?;
                handle.post_fields_copy(body)?;
            }
            handle.custom_request(method.as_str())?;
        }
    }
    handle.follow_location(true)?;
    handle.max_redirections(MAX_REDIRECTS.into())?;

    let mut headers = List::new();
    for (name, value) in &parts.headers {
        let mut line = format!("{name}: ").into_bytes();
        line.extend_from_slice(value.as_bytes());
        headers.append(&String::from_utf8_lossy(&line))?;
    }
    if !parts.headers.contains_key(EXPECT) {
        headers.append("Expect:")?;
    }
    handle.http_headers(headers)?;

    if let Some(version) = options.version {
        handle.http_version(match version {
            Version::HTTP_10 => HttpVersion::V10,
            Version::HTTP_11 => HttpVersion::V11,
            Version::HTTP_2 => HttpVersion::V2,
            Version::HTTP_3 => HttpVersion::V3,
            _ => HttpVersion::Any,
        })?;
    }
    if let Some(proxy) = &options.proxy {
        handle.proxy(proxy)?;
    }
    if let Some(timeout) = options.timeout {
        handle.timeout(timeout)?;
    }
    if let Some(connect_timeout) = options.settings.connect_timeout {
        handle.connect_timeout(connect_timeout)?;
    }
    if let Some(user_agent) = &options.settings.user_agent {
        handle.useragent(user_agent)?;
    }
    if options.settings.session {
        // An empty cookie file turns on the in-memory cookie engine.
        handle.cookie_file("")?;
        handle.cookie_list("ALL")?;
        for line in &options.cookies {
            handle.cookie_list(line)?;
        }
    }
    Ok(())
}

fn failure(error: curl::Error) -> TransportFailure {
    let kind = if error.is_operation_timedout() {
        FailureKind::Timeout
    } else if error.is_couldnt_connect()
        || error.is_couldnt_resolve_host()
        || error.is_couldnt_resolve_proxy()
    {
        FailureKind::Connect
    } else {
        FailureKind::Other
    };
    TransportFailure::new(kind, error.to_string())
}
