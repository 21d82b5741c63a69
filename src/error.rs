//! Error types.
//!
//! Every request path returns [`Error`]. The response decoders return
//! [`DecodeError`], which never reaches the network side.

use std::path::PathBuf;

use http::StatusCode;
use snafu::Snafu;

use crate::{
    driver::{DriverName, TransportResponse},
    response::Response,
};

/// Errors returned while resolving a driver, dispatching a request, or
/// classifying its status.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// The driver name is unknown, or names an engine that was not compiled in.
    #[snafu(display("unsupported HTTP driver `{name}`"))]
    Configuration {
        /// The rejected driver name.
        name: String,
    },
    /// The engine for a known driver could not be constructed.
    #[snafu(display("failed to construct the `{driver}` engine: {message}"))]
    DriverInit {
        /// The driver being constructed.
        driver: DriverName,
        /// The engine's own message.
        message: String,
    },
    /// The option bag could not be turned into a sendable request.
    #[snafu(display("invalid request: {reason}"))]
    InvalidRequest {
        /// What was wrong.
        reason: String,
    },
    /// The engine failed before any response was received.
    #[snafu(display("request via `{driver}` failed ({source})"))]
    Transport {
        /// The driver that served the request.
        driver: DriverName,
        /// The engine failure.
        source: TransportFailure,
    },
    /// The round trip succeeded but the status was 4xx or 5xx.
    #[snafu(display("HTTP {} {reason}: {excerpt}", status.as_u16()))]
    HttpStatus {
        /// The response status.
        status: StatusCode,
        /// The reason phrase sent by the server, or the canonical one.
        reason: String,
        /// The leading part of the body, bounded by the configured limit.
        excerpt: String,
        /// The full response.
        response: Box<Response>,
    },
    /// The body could not be written to the requested download path.
    #[snafu(display("failed to save response body to {}", path.display()))]
    Download {
        /// The target path.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}

impl Error {
    /// If true, a failed request may succeed if retried.
    ///
    /// Nothing in this crate retries; the flag is for callers.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { source, .. } => source.is_retryable(),
            Self::HttpStatus { status, .. } => status.is_server_error(),
            Self::Configuration { .. }
            | Self::DriverInit { .. }
            | Self::InvalidRequest { .. }
            | Self::Download { .. } => false,
        }
    }

    /// Returns the response status for [`Error::HttpStatus`].
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns an HTTP-equivalent failure code.
    ///
    /// Status errors report their own status. Transport failures report 500.
    /// Everything else is a local failure and reports 0.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::HttpStatus { status, .. } => status.as_u16(),
            Self::Transport { .. } => StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            _ => 0,
        }
    }

    /// Returns true for a 4xx [`Error::HttpStatus`].
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_client_error())
    }

    /// Returns true for a 5xx [`Error::HttpStatus`].
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status().is_some_and(|s| s.is_server_error())
    }

    /// Returns the response carried by an [`Error::HttpStatus`].
    #[must_use]
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::HttpStatus { response, .. } => Some(response),
            _ => None,
        }
    }

    pub(crate) fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// How an engine failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Could not connect (DNS, refused, TLS handshake).
    Connect,
    /// The engine's timeout elapsed.
    Timeout,
    /// Anything else.
    Other,
}

/// A failure reported by an engine.
///
/// Some engines raise on error statuses and attach the response they
/// received. Dispatch recovers such a response and classifies it by status
/// instead of treating it as a network failure.
#[derive(Debug, Snafu)]
#[snafu(display("{message}"))]
pub struct TransportFailure {
    kind: FailureKind,
    message: String,
    response: Option<TransportResponse>,
}

impl TransportFailure {
    /// Creates a failure without a response.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        TransportFailureSnafu {
            kind,
            message,
            response: None::<TransportResponse>,
        }
        .build()
    }

    /// Creates a failure that carries the response the engine received.
    pub fn with_response(message: impl Into<String>, response: TransportResponse) -> Self {
        TransportFailureSnafu {
            kind: FailureKind::Other,
            message,
            response: Some(response),
        }
        .build()
    }

    /// Returns the failure kind.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// Returns the engine message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn take_response(&mut self) -> Option<TransportResponse> {
        self.response.take()
    }

    fn is_retryable(&self) -> bool {
        matches!(self.kind, FailureKind::Connect | FailureKind::Timeout)
    }
}

/// Errors from the response decoders.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum DecodeError {
    /// The body is not valid UTF-8.
    #[snafu(display("response body is not valid UTF-8"))]
    Utf8 {
        /// The underlying error.
        source: std::str::Utf8Error,
    },
    /// The body is not valid JSON, or does not match the requested type.
    #[snafu(display("response body is not valid JSON"))]
    Json {
        /// The underlying error.
        source: serde_json::Error,
    },
    /// The body is JSON, but not an object.
    #[snafu(display("expected a JSON object, found {found}"))]
    NotAnObject {
        /// The JSON type that was found.
        found: &'static str,
    },
    /// The body is not well-formed XML.
    #[snafu(display("response body is not well-formed XML"))]
    Xml {
        /// The underlying error.
        source: quick_xml::Error,
    },
    /// An XML attribute could not be read.
    #[snafu(display("malformed XML attribute"))]
    XmlAttribute {
        /// The underlying error.
        source: quick_xml::events::attributes::AttrError,
    },
    /// The XML parsed but its element structure is unusable.
    #[snafu(display("malformed XML document: {reason}"))]
    XmlStructure {
        /// What was wrong.
        reason: String,
    },
    /// The XPath expression is outside the supported subset.
    #[snafu(display("unsupported XPath expression `{expression}`: {reason}"))]
    XPath {
        /// The expression.
        expression: String,
        /// What was wrong.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_failures_report_generic_code() {
        let err = Error::Transport {
            driver: DriverName::Ureq,
            source: TransportFailure::new(FailureKind::Connect, "connection refused"),
        };
        assert_eq!(err.code(), 500);
        assert_eq!(err.status(), None);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn transport_failure_displays_engine_message() {
        let failure = TransportFailure::new(FailureKind::Timeout, "operation timed out");
        assert_eq!(failure.to_string(), "operation timed out");
        assert_eq!(failure.message(), "operation timed out");
        assert!(std::error::Error::source(&failure).is_none());

        let mut failure = TransportFailure::with_response(
            "HTTP status 502",
            TransportResponse::new(http::Response::new(bytes::Bytes::new())),
        );
        assert_eq!(failure.kind(), FailureKind::Other);
        assert!(failure.take_response().is_some());
        assert!(failure.take_response().is_none());
    }

    #[test]
    fn configuration_errors_are_not_retryable() {
        let err = Error::Configuration {
            name: "acme".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(err.code(), 0);
        assert!(err.to_string().contains("acme"));
    }
}
