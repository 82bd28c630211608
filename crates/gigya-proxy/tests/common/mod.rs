//! Common test utilities for integration tests
//!
//! A wiremock stand-in for the Gigya OIDC endpoints and helpers to drive
//! the axum app in-process with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use axum::body::{Body, to_bytes};
use axum::http::{Request, Response};
use gigya_proxy::{ProxyConfig, ProxyState, build_router, server};
use serde_json::{Value, json};
use tower::ServiceExt;
use wiremock::{
    Mock, MockBuilder, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const API_KEY: &str = "3_test-key";
pub const CLIENT_ID: &str = "rp-client";
pub const CLIENT_SECRET: &str = "rp-secret";
/// base64("partner-secret")
pub const PARTNER_SECRET: &str = "cGFydG5lci1zZWNyZXQ=";

/// Mock Gigya OIDC provider
pub struct MockGigya {
    pub server: MockServer,
}

impl MockGigya {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL to configure the proxy with
    pub fn base_url(&self) -> String {
        format!("{}/oidc/op/v1.0", self.server.uri())
    }

    /// Path of an endpoint under the test API key
    pub fn endpoint(endpoint: &str) -> String {
        format!("/oidc/op/v1.0/{API_KEY}/{endpoint}")
    }

    /// Upstream `/token` answers with tokens
    pub fn token_success() -> Mock {
        Self::token_request().respond_with(Self::token_success_response())
    }

    /// Matcher for upstream `/token` requests, open for further `.and(...)`
    pub fn token_request() -> MockBuilder {
        Mock::given(method("POST")).and(path(Self::endpoint("token")))
    }

    /// Successful upstream `/token` response body
    pub fn token_success_response() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "at-123",
            "id_token": "header.payload.sig",
            "token_type": "Bearer",
            "expires_in": 300,
        }))
    }

    /// Upstream `/token` answers with an OAuth error
    pub fn token_error(status: u16) -> Mock {
        Self::token_request().respond_with(Self::token_error_response(status))
    }

    /// OAuth error response from upstream `/token`
    pub fn token_error_response(status: u16) -> ResponseTemplate {
        ResponseTemplate::new(status).set_body_json(json!({
            "error": "invalid_grant",
            "error_description": "refresh token expired",
        }))
    }

    pub fn config(&self) -> ProxyConfig {
        ProxyConfig::new(API_KEY, CLIENT_ID)
            .with_client_secret(CLIENT_SECRET)
            .with_partner_secret(PARTNER_SECRET)
            .with_idp_base_url(self.base_url())
    }
}

/// Build the full axum app for a configuration
pub fn app(config: ProxyConfig) -> (axum::Router, ProxyState) {
    let state = ProxyState::new(config).expect("proxy state");
    let router = build_router(&state).expect("route table");
    (server::app(router, server::DEFAULT_BODY_LIMIT), state)
}

/// Send one request through the app
pub async fn send(app: &axum::Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.expect("infallible")
}

/// Read a response body as text
pub async fn body_text(response: Response<Body>) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    String::from_utf8(bytes.to_vec()).expect("utf-8 body")
}

/// Read a response body as JSON
pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_str(&body_text(response).await).expect("JSON body")
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

pub fn post_form(uri: &str, form: &str) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .expect("request")
}

pub fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}
