//! Request options and their normalization.
//!
//! [`RequestOptions`] is the option bag accepted by every call. Instance
//! defaults and call options are merged key by key, aliases are resolved, and
//! the result is a [`RequestDescriptor`]. Dispatch turns the descriptor into a
//! [`PreparedRequest`], the shape every engine consumes.

mod auth;
mod normalize;
mod prepared;
mod proxy;

use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use bon::Builder;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method, Version, header::CONTENT_TYPE};

use crate::error::Error;

pub use auth::{Auth, BasicAuth};
pub use normalize::{RequestDescriptor, normalize};
pub use prepared::PreparedRequest;
pub use proxy::{ProxyOption, ProxyUrl};

/// The option bag for a single request.
///
/// Every field is optional. Several concerns are accepted under two names:
///
/// | Concern          | Preferred     | Alias      |
/// |------------------|---------------|------------|
/// | query parameters | `uri_query`   | `query`    |
/// | body             | `data`        | `body`     |
/// | download path    | `download_dir`| `save_to`  |
///
/// When both names are set the preferred one wins and the other is dropped.
#[derive(Debug, Clone, Default, Builder)]
pub struct RequestOptions {
    /// Driver for this call. Parsed when the call is made.
    #[builder(into)]
    pub driver: Option<String>,
    /// The request method; lowercase names are uppercased.
    pub method: Option<Method>,
    /// Target URI, absolute or relative to `base_uri`.
    #[builder(into)]
    pub uri: Option<String>,
    /// Base URI that `uri` is resolved against.
    #[builder(into)]
    pub base_uri: Option<String>,
    /// Request headers. Replaced wholesale when overridden.
    pub headers: Option<HeaderMap>,
    /// Query parameters appended to the target.
    pub query: Option<Vec<(String, String)>>,
    /// Preferred alias of `query`.
    pub uri_query: Option<Vec<(String, String)>>,
    /// Request body.
    #[builder(into)]
    pub body: Option<RequestBody>,
    /// Preferred alias of `body`.
    #[builder(into)]
    pub data: Option<RequestBody>,
    /// Basic credentials, as a pair or as [`BasicAuth`].
    #[builder(into)]
    pub auth: Option<Auth>,
    /// A single proxy URL, or named proxies of which the first is used.
    #[builder(into)]
    pub proxy: Option<ProxyOption>,
    /// Hooks run by the engine just before the request is sent.
    pub before: Option<Vec<BeforeHook>>,
    /// Path the response body is written to on success.
    #[builder(into)]
    pub download_dir: Option<PathBuf>,
    /// Alias of `download_dir`.
    #[builder(into)]
    pub save_to: Option<PathBuf>,
    /// Send the URI's own path and query as the request line, ignoring the
    /// separately supplied query parameters.
    pub target: Option<bool>,
    /// Per-request timeout, passed through to the engine.
    pub timeout: Option<Duration>,
    /// HTTP version to request, passed through to the engine.
    pub version: Option<Version>,
}

impl RequestOptions {
    /// Overlays `overrides` on `self`.
    ///
    /// Each field set in `overrides` replaces the field in `self`; nothing is
    /// merged below the top level.
    #[must_use]
    pub fn merge(self, overrides: RequestOptions) -> RequestOptions {
        RequestOptions {
            driver: overrides.driver.or(self.driver),
            method: overrides.method.or(self.method),
            uri: overrides.uri.or(self.uri),
            base_uri: overrides.base_uri.or(self.base_uri),
            headers: overrides.headers.or(self.headers),
            query: overrides.query.or(self.query),
            uri_query: overrides.uri_query.or(self.uri_query),
            body: overrides.body.or(self.body),
            data: overrides.data.or(self.data),
            auth: overrides.auth.or(self.auth),
            proxy: overrides.proxy.or(self.proxy),
            before: overrides.before.or(self.before),
            download_dir: overrides.download_dir.or(self.download_dir),
            save_to: overrides.save_to.or(self.save_to),
            target: overrides.target.or(self.target),
            timeout: overrides.timeout.or(self.timeout),
            version: overrides.version.or(self.version),
        }
    }
}

/// A request payload.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Raw bytes, sent as is.
    Bytes(Bytes),
    /// Text, sent as UTF-8.
    Text(String),
    /// Key/value pairs, sent `application/x-www-form-urlencoded`.
    Form(Vec<(String, String)>),
    /// A JSON document, sent `application/json`.
    Json(serde_json::Value),
}

impl RequestBody {
    /// Encodes the payload, returning the content type it implies.
    pub(crate) fn encode(self) -> Result<(Option<HeaderValue>, Bytes), Error> {
        match self {
            Self::Bytes(bytes) => Ok((None, bytes)),
            Self::Text(text) => Ok((None, Bytes::from(text))),
            Self::Form(pairs) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(pairs)
                    .finish();
                Ok((
                    Some(HeaderValue::from_static("application/x-www-form-urlencoded")),
                    Bytes::from(encoded),
                ))
            }
            Self::Json(value) => {
                let encoded = serde_json::to_vec(&value)
                    .map_err(|e| Error::invalid_request(format!("unserializable JSON body: {e}")))?;
                Ok((
                    Some(HeaderValue::from_static("application/json")),
                    Bytes::from(encoded),
                ))
            }
        }
    }

    pub(crate) fn apply(self, headers: &mut HeaderMap) -> Result<Bytes, Error> {
        let (content_type, bytes) = self.encode()?;
        if let Some(content_type) = content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        Ok(bytes)
    }
}

impl From<Bytes> for RequestBody {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(value: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(value))
    }
}

impl From<String> for RequestBody {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for RequestBody {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<serde_json::Value> for RequestBody {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// A callback run by the engine on the outgoing request head.
#[derive(Clone)]
pub struct BeforeHook(Arc<dyn Fn(&mut http::request::Parts) + Send + Sync>);

impl BeforeHook {
    /// Wraps a callback.
    pub fn new(hook: impl Fn(&mut http::request::Parts) + Send + Sync + 'static) -> Self {
        Self(Arc::new(hook))
    }

    pub(crate) fn apply(&self, parts: &mut http::request::Parts) {
        (self.0)(parts);
    }
}

impl fmt::Debug for BeforeHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("BeforeHook")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_call_level_fields() {
        let defaults = RequestOptions::builder()
            .uri("http://defaults.example/")
            .timeout(Duration::from_secs(5))
            .build();
        let call = RequestOptions::builder().uri("http://call.example/").build();

        let merged = defaults.merge(call);
        assert_eq!(merged.uri.as_deref(), Some("http://call.example/"));
        assert_eq!(merged.timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn merge_replaces_headers_wholesale() {
        let mut default_headers = HeaderMap::new();
        default_headers.insert("x-a", HeaderValue::from_static("1"));
        let mut call_headers = HeaderMap::new();
        call_headers.insert("x-b", HeaderValue::from_static("2"));

        let merged = RequestOptions::builder()
            .headers(default_headers)
            .build()
            .merge(RequestOptions::builder().headers(call_headers).build());
        let headers = merged.headers.unwrap();
        assert!(!headers.contains_key("x-a"));
        assert_eq!(headers["x-b"], "2");
    }

    #[test]
    fn form_body_sets_content_type_unless_present() {
        let mut headers = HeaderMap::new();
        let body = RequestBody::Form(vec![("a b".into(), "c&d".into())])
            .apply(&mut headers)
            .unwrap();
        assert_eq!(body, Bytes::from_static(b"a+b=c%26d"));
        assert_eq!(headers[CONTENT_TYPE], "application/x-www-form-urlencoded");

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/vnd.api+json"));
        RequestBody::Json(serde_json::json!({"a": 1}))
            .apply(&mut headers)
            .unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/vnd.api+json");
    }
}
