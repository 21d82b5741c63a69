use std::{path::PathBuf, time::Duration};

use bytes::Bytes;
use http::{HeaderValue, Method, Request, Uri, Version, header::AUTHORIZATION};

use super::{BeforeHook, ProxyUrl, RequestDescriptor};
use crate::error::Error;

/// A request ready for an engine.
///
/// The head and body are final apart from the before-send hooks, which the
/// engine runs through [`PreparedRequest::into_request`] right before it
/// translates the request into its own call.
#[derive(Debug)]
pub struct PreparedRequest {
    request: Request<Bytes>,
    proxy: Option<ProxyUrl>,
    timeout: Option<Duration>,
    version: Option<Version>,
    before: Vec<BeforeHook>,
}

impl PreparedRequest {
    /// Builds the engine request from a descriptor.
    ///
    /// Returns the download path separately; writing it is not the engine's
    /// concern.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRequest`] if the descriptor has no method or
    /// URI, or if a header value cannot be rendered.
    pub fn from_descriptor(
        descriptor: RequestDescriptor,
    ) -> Result<(Self, Option<PathBuf>), Error> {
        let RequestDescriptor {
            method,
            uri,
            query,
            body,
            mut headers,
            auth,
            proxy,
            request_target,
            before,
            save_to,
            timeout,
            version,
        } = descriptor;

        let method = method.ok_or_else(|| Error::invalid_request("no method given"))?;
        let mut uri = uri.ok_or_else(|| Error::invalid_request("no uri or base_uri given"))?;

        match request_target {
            Some(target) => {
                uri.set_query(None);
                let (path, query) = match target.split_once('?') {
                    Some((path, query)) => (path, Some(query)),
                    None => (target.as_str(), None),
                };
                uri.set_path(path);
                uri.set_query(query);
            }
            None => {
                if let Some(query) = query.filter(|q| !q.is_empty()) {
                    uri.query_pairs_mut().extend_pairs(query);
                }
            }
        }
        uri.set_fragment(None);

        let uri: Uri = uri
            .as_str()
            .parse()
            .map_err(|e| Error::invalid_request(format!("unusable URI `{uri}`: {e}")))?;

        if let Some(auth) = auth
            && !headers.contains_key(AUTHORIZATION)
        {
            let value = auth
                .header_value()
                .map_err(|e| Error::invalid_request(format!("unusable credentials: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        let body = match body {
            Some(body) => body.apply(&mut headers)?,
            None => Bytes::new(),
        };

        let mut request = Request::new(body);
        *request.method_mut() = method;
        *request.uri_mut() = uri;
        *request.headers_mut() = headers;
        if let Some(version) = version {
            *request.version_mut() = version;
        }

        Ok((
            Self {
                request,
                proxy,
                timeout,
                version,
                before,
            },
            save_to,
        ))
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        self.request.method()
    }

    /// Returns the final URI.
    #[must_use]
    pub fn uri(&self) -> &Uri {
        self.request.uri()
    }

    /// Returns the proxy to send through.
    #[must_use]
    pub fn proxy(&self) -> Option<&ProxyUrl> {
        self.proxy.as_ref()
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns the HTTP version the caller asked for, if any.
    #[must_use]
    pub fn version(&self) -> Option<Version> {
        self.version
    }

    /// Returns the value of a header, if set and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request
            .headers()
            .get(name)
            .and_then(|v: &HeaderValue| v.to_str().ok())
    }

    /// Runs the before-send hooks and returns the final request.
    #[must_use]
    pub fn into_request(self) -> Request<Bytes> {
        let (mut parts, body) = self.request.into_parts();
        for hook in &self.before {
            hook.apply(&mut parts);
        }
        Request::from_parts(parts, body)
    }
}
