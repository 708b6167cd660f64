//! # Event envelope carried from ingress, through the log, to subscribers.
//!
//! A [`Message`] is a set of attributes plus an opaque body. Over HTTP it uses
//! the CloudEvents binary mode:
//! ```text
//! ce-<attribute>: <value>      ──►  attributes["<attribute>"]
//! Content-Type: <value>        ──►  attributes["datacontenttype"]
//! body                         ──►  body (byte-for-byte)
//! ```
//! Structured mode (`application/cloudevents+json`) keeps the whole event in the
//! body; it is passed through unchanged.
//!
//! ## Rules
//! - The body is never re-encoded.
//! - Attribute names are lowercase (HTTP header names are case-insensitive).
//! - Headers that are not `ce-*` or `Content-Type` are not part of the message.

use std::collections::BTreeMap;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};

/// Prefix of binary-mode attribute headers.
pub const ATTRIBUTE_HEADER_PREFIX: &str = "ce-";
/// Attribute that maps onto the `Content-Type` header.
pub const CONTENT_TYPE_ATTRIBUTE: &str = "datacontenttype";
/// Attributes every binary-mode event must carry.
pub const REQUIRED_ATTRIBUTES: [&str; 4] = ["specversion", "id", "type", "source"];

const STRUCTURED_CONTENT_TYPE: &str = "application/cloudevents";

/// Event attributes and body.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub attributes: BTreeMap<String, String>,
    pub body: Bytes,
}

impl Message {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            attributes: BTreeMap::new(),
            body: body.into(),
        }
    }

    /// Adds or replaces an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes
            .insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Event id, if present.
    pub fn id(&self) -> Option<&str> {
        self.attribute("id")
    }

    /// True for structured-mode events (whole event in the body).
    pub fn is_structured(&self) -> bool {
        self.attribute(CONTENT_TYPE_ATTRIBUTE)
            .is_some_and(|ct| ct.starts_with(STRUCTURED_CONTENT_TYPE))
    }

    /// Builds a message from HTTP headers and body.
    ///
    /// Header values that are not visible ASCII are skipped.
    pub fn from_http(headers: &HeaderMap, body: Bytes) -> Self {
        let mut attributes = BTreeMap::new();
        for (name, value) in headers {
            let Ok(value) = value.to_str() else {
                tracing::debug!(header = %name, "skipping non-ascii header value");
                continue;
            };
            if name == CONTENT_TYPE {
                attributes.insert(CONTENT_TYPE_ATTRIBUTE.to_string(), value.to_string());
            } else if let Some(attr) = name.as_str().strip_prefix(ATTRIBUTE_HEADER_PREFIX) {
                if !attr.is_empty() {
                    attributes.insert(attr.to_string(), value.to_string());
                }
            }
        }
        Self { attributes, body }
    }

    /// Renders the attributes as HTTP headers.
    ///
    /// Attributes whose name or value cannot be expressed as a header are
    /// skipped.
    pub fn to_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.attributes.len());
        for (name, value) in &self.attributes {
            let Ok(value) = HeaderValue::from_str(value) else {
                tracing::debug!(attribute = %name, "skipping attribute with invalid header value");
                continue;
            };
            if name == CONTENT_TYPE_ATTRIBUTE {
                headers.insert(CONTENT_TYPE, value);
                continue;
            }
            match HeaderName::try_from(format!("{ATTRIBUTE_HEADER_PREFIX}{name}")) {
                Ok(header) => {
                    headers.insert(header, value);
                }
                Err(_) => {
                    tracing::debug!(attribute = %name, "skipping attribute with invalid header name");
                }
            }
        }
        headers
    }

    /// Returns the first required binary-mode attribute that is missing.
    ///
    /// Structured-mode messages are not inspected.
    pub fn missing_required_attribute(&self) -> Option<&'static str> {
        if self.is_structured() {
            return None;
        }
        REQUIRED_ATTRIBUTES
            .into_iter()
            .find(|attr| self.attribute(attr).is_none_or(str::is_empty))
    }
}
