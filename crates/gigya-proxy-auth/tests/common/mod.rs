//! Common test utilities for integration tests
//!
//! A wiremock-backed issuer that publishes an HMAC JWK under
//! `/.well-known/jwks.json`, plus helpers to mint tokens for it.

#![allow(dead_code)]

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use std::time::{SystemTime, UNIX_EPOCH};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

pub const JWKS_PATH: &str = "/oidc/.well-known/jwks.json";

/// Mock issuer serving a key set
pub struct MockIssuer {
    pub server: MockServer,
    pub issuer: String,
}

impl MockIssuer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let issuer = format!("{}/oidc", server.uri());
        Self { server, issuer }
    }

    /// Publish one HS256 key; `expected_fetches` bounds how often it may be read
    pub async fn mock_jwks(&self, kid: &str, secret: &[u8], expected_fetches: impl Into<wiremock::Times>) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "keys": [hmac_jwk(kid, secret)]
            })))
            .expect(expected_fetches)
            .mount(&self.server)
            .await;
    }

    /// Key-set endpoint answers with an error status
    pub async fn mock_jwks_error(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Standard claims for this issuer
    pub fn claims(&self, sub: &str, expires_in: i64) -> Value {
        let now = now();
        json!({
            "iss": self.issuer,
            "sub": sub,
            "aud": "some-client",
            "iat": now,
            "exp": now + expires_in,
        })
    }
}

pub fn hmac_jwk(kid: &str, secret: &[u8]) -> Value {
    json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "k": URL_SAFE_NO_PAD.encode(secret),
    })
}

/// Sign `claims` with HS256 under `kid`
pub fn mint_token(claims: &Value, kid: &str, secret: &[u8]) -> String {
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(secret)).expect("token encoding")
}

pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs() as i64
}
