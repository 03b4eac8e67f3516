//! Outbound request descriptions and response metadata.
//!
//! [`OutboundRequest`] is what processors mutate and what the transport
//! sends. [`ResponseMetadata`] is what the transport reports back, minus the
//! payload bytes which travel separately.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::header::{CONTENT_TYPE, DATE, HeaderName};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CallError, Result};

/// Content type applied to every assembled request.
pub const CONTENT_TYPE_CHARSET: &str = "charset=utf-8";

/// Execution priority of a request processor.
///
/// Processors run in descending priority; processors of equal priority run
/// in registration order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Priority {
    /// Runs last
    VeryLow,
    /// Runs after `Normal`
    Low,
    /// Default priority
    #[default]
    Normal,
    /// Runs before `Normal`
    High,
    /// Runs first
    VeryHigh,
}

/// Description of the request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundRequest {
    /// HTTP method
    pub method: Method,
    /// Target URL
    pub url: Url,
    /// Request headers
    pub headers: HeaderMap,
    /// Serialized parameters, if any
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    /// Create a bare request without headers or body
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    /// Assemble a request the way the pipeline does before processors run:
    /// method, URL, body, and the fixed UTF-8 charset content type.
    #[must_use]
    pub fn assemble(method: Method, url: Url, body: Option<Bytes>) -> Self {
        let mut request = Self::new(method, url);
        request
            .headers
            .insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_CHARSET));
        request.body = body;
        request
    }

    /// Set a header, replacing any previous value
    ///
    /// # Errors
    ///
    /// Returns [`CallError::ProcessorFailure`] if the name or value is not a
    /// legal HTTP header.
    pub fn set_header(&mut self, name: &str, value: &str) -> Result<()> {
        let name = HeaderName::from_bytes(name.as_bytes()).map_err(CallError::processor)?;
        let value = HeaderValue::from_str(value).map_err(CallError::processor)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Read a header as a string
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }
}

/// Response metadata reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseMetadata {
    /// Status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Final URL after redirects, when the transport knows it
    pub url: Option<Url>,
}

impl ResponseMetadata {
    /// Create metadata with the given status and no headers
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            url: None,
        }
    }

    /// Add a header, builder style
    ///
    /// Illegal names or values are skipped.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Read a header as a string
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Server timestamp from the standard `Date` header
    ///
    /// Returns `None` when the header is missing or not a valid HTTP date.
    #[must_use]
    pub fn server_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.headers.get(DATE)?.to_str().ok()?;
        DateTime::parse_from_rfc2822(raw.trim())
            .ok()
            .map(|date| date.with_timezone(&Utc))
    }
}
