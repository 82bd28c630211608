//! Request and response values passed between the router and handlers
//!
//! These are transport-neutral: the axum boundary in [`crate::server`]
//! builds a [`ProxyRequest`] from each HTTP request and turns the returned
//! [`ProxyResponse`] back into HTTP.

use http::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// How the inbound body was encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BodyKind {
    /// No body
    #[default]
    Empty,
    /// `application/json`
    Json,
    /// `application/x-www-form-urlencoded`
    Form,
    /// Anything else, kept as a string
    Text,
}

/// Normalized inbound request
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRequest {
    /// HTTP method
    pub method: Method,
    /// Path without query string
    pub path: String,
    /// Headers, names lower-cased
    pub headers: BTreeMap<String, String>,
    /// Query parameters in their original order
    pub query: Vec<(String, String)>,
    /// Parsed body; an object for JSON and form bodies, `Null` when empty
    pub body: Value,
    /// Encoding of the inbound body
    pub body_kind: BodyKind,
}

impl ProxyRequest {
    /// Create a request with no headers, query or body
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: BTreeMap::new(),
            query: Vec::new(),
            body: Value::Null,
            body_kind: BodyKind::Empty,
        }
    }

    /// Add a header (name is lower-cased)
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Append a query parameter
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    /// Set a JSON body
    pub fn with_json_body(mut self, body: Value) -> Self {
        self.body = body;
        self.body_kind = BodyKind::Json;
        self
    }

    /// Set a form body from ordered pairs
    pub fn with_form_body<K, V>(mut self, pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let map = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), Value::String(v.into())))
            .collect();
        self.body = Value::Object(map);
        self.body_kind = BodyKind::Form;
        self
    }

    /// Header value by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// First query value for `name`
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// String field of an object body
    pub fn body_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }
}

/// Uniform handler result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyResponse {
    /// HTTP status
    pub status_code: u16,
    /// Extra response headers
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    /// Body; strings are sent verbatim, `Null` as empty, anything else as JSON
    pub body: Value,
}

impl ProxyResponse {
    /// Create a response
    pub fn new(status_code: u16, body: Value) -> Self {
        Self {
            status_code,
            headers: BTreeMap::new(),
            body,
        }
    }

    /// 200 with `body`
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// Error body `{ "err": message }`
    pub fn err(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(status_code, json!({ "err": message.into() }))
    }

    /// Error body `{ "errMsg": message }`, the shape token-path errors use
    pub fn err_msg(status_code: u16, message: impl Into<String>) -> Self {
        Self::new(status_code, json!({ "errMsg": message.into() }))
    }

    /// 302 to `location`
    pub fn redirect(location: impl Into<String>) -> Self {
        Self::new(302, Value::Null).with_header("location", location)
    }

    /// Add a header (name is lower-cased)
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Header value by (case-insensitive) name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Body as it goes on the wire
    pub fn body_text(&self) -> String {
        match &self.body {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
