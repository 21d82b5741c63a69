//! The response envelope and its decoders.
//!
//! Every engine's response is wrapped in the same [`Response`]. Accessors read
//! straight from the wrapped `http::Response`; decoders re-parse the body on
//! every call and cache nothing.

mod xml;
mod xpath;

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use snafu::prelude::*;

use crate::{
    driver::TransportResponse,
    error::{DecodeError, JsonSnafu, NotAnObjectSnafu, Utf8Snafu},
};

pub use xml::{XmlDocument, XmlElement, XmlNode};
pub use xpath::{XPath, XPathMatch};

/// A completed HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    inner: http::Response<Bytes>,
    reason: String,
    duration_ms: i64,
}

impl Response {
    /// Wraps an engine response with the measured duration in milliseconds.
    #[must_use]
    pub fn new(response: TransportResponse, duration_ms: i64) -> Self {
        let (inner, reason) = response.into_parts();
        let reason = reason.unwrap_or_else(|| {
            inner
                .status()
                .canonical_reason()
                .unwrap_or_default()
                .to_string()
        });
        Self {
            inner,
            reason,
            duration_ms,
        }
    }

    /// Returns the status code.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.inner.status()
    }

    /// Returns the reason phrase sent by the server, or the canonical one.
    #[must_use]
    pub fn reason_phrase(&self) -> &str {
        &self.reason
    }

    /// Returns the protocol version.
    #[must_use]
    pub fn version(&self) -> Version {
        self.inner.version()
    }

    /// Returns the headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        self.inner.headers()
    }

    /// Returns true if the header is present.
    #[must_use]
    pub fn has_header(&self, name: &str) -> bool {
        self.inner.headers().contains_key(name)
    }

    /// Returns every value of a header, in order. Values that are not
    /// visible ASCII are skipped.
    #[must_use]
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.inner
            .headers()
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect()
    }

    /// Returns every value of a header joined with `, `.
    #[must_use]
    pub fn header_line(&self, name: &str) -> String {
        self.header_values(name).join(", ")
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &Bytes {
        self.inner.body()
    }

    /// Returns the body as text.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Utf8`] if the body is not UTF-8.
    pub fn text(&self) -> Result<&str, DecodeError> {
        std::str::from_utf8(self.inner.body()).context(Utf8Snafu)
    }

    /// Returns how long the request took, in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        self.duration_ms
    }

    /// Decodes the body as a JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] for malformed JSON and
    /// [`DecodeError::NotAnObject`] when the top-level value is not an object.
    pub fn json_map(&self) -> Result<Map<String, Value>, DecodeError> {
        match serde_json::from_slice(self.inner.body()).context(JsonSnafu)? {
            Value::Object(map) => Ok(map),
            other => NotAnObjectSnafu {
                found: json_type(&other),
            }
            .fail(),
        }
    }

    /// Decodes the body as JSON into `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] if the body does not deserialize into `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_slice(self.inner.body()).context(JsonSnafu)
    }

    /// Decodes the body as XML into a JSON-shaped object.
    ///
    /// The root element's name is dropped. Text directly inside an element
    /// that also has attributes goes under `"0"`. Attributes go under
    /// `@attributes`, repeated child elements become arrays, text-only
    /// elements become strings, and CDATA is folded into text.
    ///
    /// # Errors
    ///
    /// Returns an XML [`DecodeError`] if the body is not well-formed.
    pub fn xml_map(&self) -> Result<Map<String, Value>, DecodeError> {
        let document = xml::parse(self.text()?)?;
        Ok(xml::root_to_map(document.root()))
    }

    /// Decodes the body as XML and returns its root element.
    ///
    /// # Errors
    ///
    /// Returns an XML [`DecodeError`] if the body is not well-formed.
    pub fn xml_object(&self) -> Result<XmlElement, DecodeError> {
        Ok(xml::parse(self.text()?)?.into_root())
    }

    /// Decodes the body as an XML document.
    ///
    /// # Errors
    ///
    /// Returns an XML [`DecodeError`] if the body is not well-formed.
    pub fn dom_document(&self) -> Result<XmlDocument, DecodeError> {
        xml::parse(self.text()?)
    }

    /// Decodes the body as an XML document, normalizes it, and returns an
    /// XPath evaluator over it.
    ///
    /// # Errors
    ///
    /// Returns an XML [`DecodeError`] if the body is not well-formed.
    pub fn xpath(&self) -> Result<XPath, DecodeError> {
        let mut document = self.dom_document()?;
        document.normalize();
        Ok(XPath::new(document))
    }

    /// Returns the wrapped `http::Response`.
    #[must_use]
    pub fn into_inner(self) -> http::Response<Bytes> {
        self.inner
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    fn response(status: u16, body: &'static str) -> Response {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        let transport = TransportResponse::from_parts(
            StatusCode::from_u16(status).unwrap(),
            Version::HTTP_11,
            headers,
            Bytes::from_static(body.as_bytes()),
        );
        Response::new(transport, 12)
    }

    #[test]
    fn accessors_return_wrapped_values() {
        let response = response(201, "created");
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.reason_phrase(), "Created");
        assert_eq!(response.version(), Version::HTTP_11);
        assert_eq!(response.body().as_ref(), b"created");
        assert_eq!(response.duration_ms(), 12);
        assert_eq!(response.header_values("set-cookie"), vec!["a=1", "b=2"]);
        assert_eq!(response.header_line("Set-Cookie"), "a=1, b=2");
        assert!(!response.has_header("etag"));
    }

    #[test]
    fn server_reason_phrase_is_kept() {
        let transport = TransportResponse::from_parts(
            StatusCode::OK,
            Version::HTTP_11,
            HeaderMap::new(),
            Bytes::new(),
        )
        .with_reason("All Good");
        assert_eq!(Response::new(transport, 0).reason_phrase(), "All Good");
    }

    #[test]
    fn json_decoders_are_repeatable() {
        let response = response(200, r#"{"id": 7, "tags": ["a"]}"#);
        let first = response.json_map().unwrap();
        let second = response.json_map().unwrap();
        assert_eq!(first, second);
        assert_eq!(first["id"], json!(7));

        #[derive(Debug, Deserialize, PartialEq)]
        struct Item {
            id: u32,
            tags: Vec<String>,
        }
        assert_eq!(
            response.json::<Item>().unwrap(),
            Item {
                id: 7,
                tags: vec!["a".into()]
            }
        );
    }

    #[test]
    fn json_map_rejects_non_objects() {
        let err = response(200, "[1, 2]").json_map().unwrap_err();
        assert!(matches!(err, DecodeError::NotAnObject { found: "an array" }));
        assert!(matches!(
            response(200, "{oops").json_map().unwrap_err(),
            DecodeError::Json { .. }
        ));
    }

    #[test]
    fn xml_map_is_repeatable() {
        let response = response(
            200,
            r#"<feed version="2"><entry>one</entry><entry>two</entry><title><![CDATA[News]]></title></feed>"#,
        );
        let first = response.xml_map().unwrap();
        assert_eq!(first, response.xml_map().unwrap());
        assert_eq!(
            Value::Object(first),
            json!({
                "@attributes": {"version": "2"},
                "entry": ["one", "two"],
                "title": "News"
            })
        );
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(response(200, "<a><b></a>").xml_object().is_err());
        assert!(response(200, "plain text").dom_document().is_err());
    }

    #[test]
    fn xpath_queries_normalized_document() {
        let response = response(
            200,
            r#"<list><item id="1">a</item><item id="2">b</item></list>"#,
        );
        let xpath = response.xpath().unwrap();
        assert_eq!(xpath.select_text("//item[@id='2']").unwrap(), vec!["b"]);
    }
}
