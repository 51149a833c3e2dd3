//! Wire-level request and response types shared by every layer.

use crate::error::{Result, SpRestError};
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use serde::de::{DeserializeOwned, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Ordered, case-insensitive header list.
///
/// Setting an existing name replaces its value in place, so emission order is
/// the order in which names were first seen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    /// Look up a header value by name.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|i| self.entries[i].1.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Set a header, replacing any existing value for the same name.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.entries[i] = (name, value),
            None => self.entries.push((name, value)),
        }
    }

    /// Set a header only when no value exists for that name yet.
    pub fn set_if_missing(&mut self, name: &str, value: &str) {
        if !self.contains(name) {
            self.entries.push((name.to_string(), value.to_string()));
        }
    }

    /// Remove a header, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.position(name).map(|i| self.entries.remove(i).1)
    }

    /// Merge `other` into this list; values in `other` win.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in &other.entries {
            self.set(name.clone(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.set(name, value);
        }
        headers
    }
}

impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Headers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = Headers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of header names to values")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Headers, A::Error> {
                let mut headers = Headers::new();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    headers.set(name, value);
                }
                Ok(headers)
            }
        }

        deserializer.deserialize_map(HeadersVisitor)
    }
}

/// Per-request headers and body supplied by a caller.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Headers,
    pub body: Option<String>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json<T: Serialize>(self, value: &T) -> Result<Self> {
        Ok(self.with_body(serde_json::to_string(value)?))
    }

    /// Ask the service to treat a POST as another verb (`MERGE`, `DELETE`, ...).
    pub fn with_method_override(self, method: &str) -> Self {
        self.with_header(crate::config::ODataConfig::HEADER_METHOD_OVERRIDE, method)
    }
}

/// A fully resolved request handed to the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Headers,
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }
}

/// A response with its body fully buffered.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    status: u16,
    status_text: String,
    headers: Headers,
    body: Bytes,
}

impl HttpResponse {
    /// Create an empty-bodied response.
    pub fn new(status: u16, status_text: impl Into<String>) -> Self {
        Self {
            status,
            status_text: status_text.into(),
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Create a response using the canonical reason phrase for `status`.
    pub fn from_status(status: u16) -> Self {
        let reason = StatusCode::from_u16(status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("");
        Self::new(status, reason)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// True for any 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True when there is nothing to parse: a 204 or a zero-length body.
    pub fn is_empty(&self) -> bool {
        self.status == 204 || self.body.is_empty()
    }

    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn into_bytes(self) -> Bytes {
        self.body
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| SpRestError::Parse {
            message: format!("Response body is not valid UTF-8: {}", e),
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Turn a non-2xx response into an [`SpRestError::Http`].
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SpRestError::from_response(self))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headers_case_insensitive_replace_keeps_position() {
        let mut headers = Headers::new();
        headers.set("Accept", "application/json");
        headers.set("X-Custom", "1");
        headers.set("accept", "text/plain");

        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("ACCEPT"), Some("text/plain"));
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["accept", "X-Custom"]);
    }

    #[test]
    fn test_headers_merge_and_set_if_missing() {
        let mut global: Headers = [("Authorization", "Bearer a"), ("X-One", "1")]
            .into_iter()
            .collect();
        let local: Headers = [("x-one", "override")].into_iter().collect();
        global.merge(&local);
        global.set_if_missing("Authorization", "Bearer b");
        global.set_if_missing("Accept", "application/json");

        assert_eq!(global.get("X-One"), Some("override"));
        assert_eq!(global.get("Authorization"), Some("Bearer a"));
        assert_eq!(global.get("Accept"), Some("application/json"));
        assert_eq!(global.remove("x-one").as_deref(), Some("override"));
        assert!(!global.contains("X-One"));
    }

    #[test]
    fn test_headers_serde_as_map() {
        let headers: Headers = serde_json::from_str(r#"{"B":"2","A":"1"}"#).unwrap();
        let names: Vec<&str> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["B", "A"]);
        assert_eq!(serde_json::to_string(&headers).unwrap(), r#"{"B":"2","A":"1"}"#);
    }

    #[test]
    fn test_response_helpers() {
        let response = HttpResponse::from_status(200)
            .with_header("Content-Type", "application/json")
            .with_body(r#"{"Title":"Dev"}"#);

        assert!(response.is_success());
        assert!(!response.is_empty());
        assert_eq!(response.status_text(), "OK");
        assert_eq!(response.header("content-type"), Some("application/json"));
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["Title"], "Dev");

        assert!(HttpResponse::from_status(204).is_empty());
    }

    #[test]
    fn test_error_for_status() {
        assert!(HttpResponse::from_status(201).error_for_status().is_ok());
        let err = HttpResponse::from_status(404).error_for_status().unwrap_err();
        assert_eq!(err.status(), Some(404));
    }
}
