//! Relaying requests to the Gigya OIDC endpoints
//!
//! [`UpstreamClient`] is the network seam; [`ReqwestUpstream`] is the real
//! implementation. [`Forwarder`] adds the proxy behaviour around it: PKCE
//! enforcement on code grants, credential injection and status embedding.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::Method;
use secrecy::ExposeSecret;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use gigya_proxy_auth::PkceVerifier;

use crate::config::ProxyConfig;
use crate::error::{ProxyError, ProxyErrorExt, ProxyResult};
use crate::types::{BodyKind, ProxyRequest, ProxyResponse};

/// Headers never copied to the upstream request
const STRIPPED_HEADERS: &[&str] = &[
    "host",
    "content-length",
    "connection",
    "transfer-encoding",
    "accept-encoding",
];

/// Message returned when a code grant fails PKCE
pub const PKCE_FAILURE: &str = "PKCE verification failure";

/// Request sent to the IdP
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRequest {
    /// HTTP method
    pub method: Method,
    /// Absolute URL, query included
    pub url: String,
    /// Headers to send
    pub headers: BTreeMap<String, String>,
    /// Body to send
    pub body: Value,
    /// How to encode `body`
    pub body_kind: BodyKind,
}

/// What the IdP answered
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    /// HTTP status
    pub status_code: u16,
    /// Parsed JSON, or the raw text if it was not JSON, or `Null` if empty
    pub body: Value,
}

/// Transport to the IdP
#[async_trait]
pub trait UpstreamClient: Send + Sync + fmt::Debug {
    /// Send one request
    ///
    /// Any HTTP status is a successful send. Errors are transport failures.
    async fn send(&self, request: UpstreamRequest) -> ProxyResult<UpstreamResponse>;
}

/// [`UpstreamClient`] over reqwest
pub struct ReqwestUpstream {
    client: reqwest::Client,
}

impl fmt::Debug for ReqwestUpstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestUpstream")
            .field("client", &"<reqwest::Client>")
            .finish()
    }
}

impl ReqwestUpstream {
    /// Create a client with the given request timeout
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Upstream redirects are relayed to the caller, not followed
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ProxyError::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl UpstreamClient for ReqwestUpstream {
    async fn send(&self, request: UpstreamRequest) -> ProxyResult<UpstreamResponse> {
        let mut builder = self.client.request(request.method.clone(), &request.url);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match (request.body_kind, &request.body) {
            (_, Value::Null) | (BodyKind::Empty, _) => builder,
            (BodyKind::Form, Value::Object(fields)) => builder.form(&form_pairs(fields)),
            (BodyKind::Text, Value::String(text)) => builder.body(text.clone()),
            (_, body) => builder.json(body),
        };

        let target = format!("{} {}", request.method, request.url);
        let response = builder.send().await.upstream_context(&target)?;
        let status_code = response.status().as_u16();
        let bytes = response.bytes().await.upstream_context(&target)?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        Ok(UpstreamResponse { status_code, body })
    }
}

fn form_pairs(fields: &Map<String, Value>) -> Vec<(String, String)> {
    fields
        .iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

/// Whether a token request is an authorization-code exchange
pub fn is_code_grant(body: &Value) -> bool {
    body.get("response_type").and_then(Value::as_str) == Some("code")
        || body.get("grant_type").and_then(Value::as_str) == Some("authorization_code")
}

/// Relays requests to the IdP
#[derive(Debug, Clone)]
pub struct Forwarder {
    config: Arc<ProxyConfig>,
    verifier: PkceVerifier,
    upstream: Arc<dyn UpstreamClient>,
}

impl Forwarder {
    /// Create a forwarder
    pub fn new(
        config: Arc<ProxyConfig>,
        verifier: PkceVerifier,
        upstream: Arc<dyn UpstreamClient>,
    ) -> Self {
        Self {
            config,
            verifier,
            upstream,
        }
    }

    /// Forward `request` to the IdP `endpoint` (`token` or `userinfo`)
    pub async fn forward(&self, request: ProxyRequest, endpoint: &str) -> ProxyResponse {
        let endpoint = endpoint.trim_start_matches('/');

        if endpoint == "token" && is_code_grant(&request.body) {
            let verified = self
                .verifier
                .verify(request.body_str("code_verifier"))
                .await;
            if !verified {
                info!(path = %request.path, "PKCE check failed");
                return ProxyResponse::err_msg(403, PKCE_FAILURE);
            }
            debug!(path = %request.path, "PKCE check OK");
        }

        let upstream_request = self.upstream_request(request, endpoint);
        debug!(method = %upstream_request.method, url = %upstream_request.url, "Forwarding to IdP");

        match self.upstream.send(upstream_request).await {
            Ok(response) => self.relay(response),
            Err(e) => {
                warn!(endpoint, error = %e, "Upstream request failed");
                ProxyResponse::err_msg(502, e.sanitize())
            }
        }
    }

    fn upstream_request(&self, request: ProxyRequest, endpoint: &str) -> UpstreamRequest {
        let mut headers = request.headers;
        for name in STRIPPED_HEADERS {
            headers.remove(*name);
        }

        if !headers.contains_key("authorization")
            && let Some(secret) = &self.config.client_secret
        {
            let credentials = format!("{}:{}", self.config.client_id, secret.expose_secret());
            headers.insert(
                "authorization".to_string(),
                format!("Basic {}", STANDARD.encode(credentials)),
            );
        }

        let mut url = self.config.endpoint_url(endpoint);
        if !request.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&request.query)
                .finish();
            url = format!("{url}?{query}");
        }

        UpstreamRequest {
            method: request.method,
            url,
            headers,
            body: request.body,
            body_kind: request.body_kind,
        }
    }

    fn relay(&self, response: UpstreamResponse) -> ProxyResponse {
        let UpstreamResponse { status_code, body } = response;

        let has_body = match &body {
            Value::Null => false,
            Value::String(s) => !s.is_empty(),
            _ => true,
        };

        if !self.config.embed_status_code || status_code == 200 || !has_body {
            return ProxyResponse::new(status_code, body);
        }

        debug!(status_code, "Embedding upstream status in body");
        let body = match body {
            Value::Object(mut fields) => {
                fields.insert("proxyStatusCode".to_string(), json!(status_code));
                Value::Object(fields)
            }
            other => json!({ "proxyStatusCode": status_code, "body": other }),
        };
        ProxyResponse::ok(body)
    }
}
