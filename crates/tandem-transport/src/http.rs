//! Shared plumbing for the two HTTP transports.

use std::collections::HashMap;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tandem_types::Error;

/// Forced HTTP protocol version for a transport's client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpVersion {
    #[serde(rename = "1.1")]
    Http1,
    #[serde(rename = "2")]
    Http2,
}

/// Connection options common to the SSE and Streamable HTTP transports.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub http_version: Option<HttpVersion>,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl HttpOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: HashMap::new(),
            http_version: None,
            timeout_ms: 30_000,
        }
    }
}

pub(crate) fn build_client(version: Option<HttpVersion>) -> Result<reqwest::Client, Error> {
    let mut builder = reqwest::Client::builder();
    builder = match version {
        Some(HttpVersion::Http1) => builder.http1_only(),
        Some(HttpVersion::Http2) => builder.http2_prior_knowledge(),
        None => builder,
    };
    builder
        .build()
        .map_err(|e| Error::transport(format!("failed to build HTTP client: {e}")))
}

pub(crate) fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, Error> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| Error::transport(format!("invalid header name '{name}'")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| Error::transport(format!("invalid value for header '{name}'")))?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_map_converts_valid_headers() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer tok".to_string());
        let map = header_map(&headers).unwrap();
        assert_eq!(map.get("authorization").unwrap(), "Bearer tok");
    }

    #[test]
    fn header_map_rejects_invalid_names() {
        let mut headers = HashMap::new();
        headers.insert("bad header".to_string(), "x".to_string());
        assert!(header_map(&headers).is_err());
    }

    #[test]
    fn http_version_deserializes_from_config_strings() {
        let v: HttpVersion = serde_json::from_str("\"1.1\"").unwrap();
        assert_eq!(v, HttpVersion::Http1);
        let v: HttpVersion = serde_json::from_str("\"2\"").unwrap();
        assert_eq!(v, HttpVersion::Http2);
    }
}
