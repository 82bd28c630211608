//! Claims decoding for the decode endpoint
//!
//! Every token gets a structural decode. With `verify` set, the signature
//! and time claims are checked against the issuer's published key set.

use jsonwebtoken::{DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::DecodedToken;
use super::jwks::KeyResolver;
use crate::error::{AuthError, AuthResult};

/// Result of a decode request, ready to be turned into a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeOutcome {
    /// 200 on success, 500 on any failure
    pub status_code: u16,
    /// Decoded token, verified claims, or `{err, decoded}`
    pub body: Value,
    /// Whether the signature was checked and accepted
    pub verified: bool,
}

impl DecodeOutcome {
    fn ok(body: Value, verified: bool) -> Self {
        Self {
            status_code: 200,
            body,
            verified,
        }
    }

    fn failed(error: &AuthError, decoded: Option<&DecodedToken>) -> Self {
        let decoded = decoded
            .and_then(|d| serde_json::to_value(d).ok())
            .unwrap_or(Value::Null);
        Self {
            status_code: 500,
            body: json!({ "err": error.to_string(), "decoded": decoded }),
            verified: false,
        }
    }
}

/// Decodes and optionally verifies ID tokens
#[derive(Debug, Clone)]
pub struct ClaimsDecoder {
    resolver: Arc<KeyResolver>,
    leeway: Duration,
}

impl ClaimsDecoder {
    /// Default clock-skew allowance for `exp`/`nbf`
    pub const DEFAULT_LEEWAY: Duration = Duration::from_secs(60);

    /// Create a decoder resolving keys through `resolver`
    pub fn new(resolver: Arc<KeyResolver>) -> Self {
        Self {
            resolver,
            leeway: Self::DEFAULT_LEEWAY,
        }
    }

    /// Set the clock-skew allowance
    pub fn with_leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// The key resolver
    pub fn resolver(&self) -> &Arc<KeyResolver> {
        &self.resolver
    }

    /// Decode `token`, verifying it when `verify` is set.
    ///
    /// Never fails: errors become a 500 outcome carrying the message and
    /// whatever could be decoded without verification.
    pub async fn decode(&self, token: &str, verify: bool) -> DecodeOutcome {
        let decoded = match DecodedToken::parse(token) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(error = %e, "Token failed structural decode");
                return DecodeOutcome::failed(&e, None);
            }
        };

        if !verify {
            return match serde_json::to_value(&decoded) {
                Ok(body) => DecodeOutcome::ok(body, false),
                Err(e) => DecodeOutcome::failed(&e.into(), Some(&decoded)),
            };
        }

        match self.verify(token, &decoded).await {
            Ok(claims) => DecodeOutcome::ok(claims, true),
            Err(e) => {
                warn!(
                    issuer = decoded.issuer().unwrap_or("<none>"),
                    kid = decoded.key_id().unwrap_or("<none>"),
                    error = %e,
                    "Token verification failed"
                );
                DecodeOutcome::failed(&e, Some(&decoded))
            }
        }
    }

    /// Verify signature and time claims, returning the claim set
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if `iss` or `kid` is missing,
    /// [`AuthError::KeyResolution`] if the key cannot be found, and
    /// [`AuthError::Verification`] if the signature or claims are rejected.
    pub async fn verify(&self, token: &str, decoded: &DecodedToken) -> AuthResult<Value> {
        let issuer = decoded
            .issuer()
            .ok_or_else(|| AuthError::malformed("token has no 'iss' claim"))?;
        let kid = decoded
            .key_id()
            .ok_or_else(|| AuthError::malformed("token header has no 'kid'"))?;

        let header = decode_header(token)
            .map_err(|e| AuthError::malformed(format!("invalid token header: {e}")))?;

        let jwk = self.resolver.signing_key(issuer, kid).await?;
        let key = DecodingKey::from_jwk(&jwk)
            .map_err(|e| AuthError::key_resolution_for(format!("unusable key '{kid}': {e}"), issuer))?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway.as_secs();
        validation.validate_aud = false;
        validation.validate_nbf = true;
        // exp/nbf are checked when present, not required
        validation.set_required_spec_claims::<&str>(&[]);

        let data = decode::<Value>(token, &key, &validation)
            .map_err(|e| AuthError::verification(e.to_string()))?;

        debug!(issuer, kid, "Token verified");
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jwt::KeyResolverSettings;
    use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

    fn decoder() -> ClaimsDecoder {
        let resolver = KeyResolver::new(KeyResolverSettings::default()).unwrap();
        ClaimsDecoder::new(Arc::new(resolver))
    }

    fn unsigned(header: &Value, payload: &Value) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(header.to_string()),
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    #[tokio::test]
    async fn test_unverified_decode() {
        let token = unsigned(&json!({"alg": "RS256", "kid": "k"}), &json!({"sub": "u1"}));
        let outcome = decoder().decode(&token, false).await;

        assert_eq!(outcome.status_code, 200);
        assert!(!outcome.verified);
        assert_eq!(outcome.body["payload"]["sub"], "u1");
        assert_eq!(outcome.body["header"]["kid"], "k");
        assert_eq!(outcome.body["signature"], "sig");
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let outcome = decoder().decode("not-a-token", false).await;
        assert_eq!(outcome.status_code, 500);
        assert!(outcome.body["err"].as_str().unwrap().contains("Malformed"));
        assert_eq!(outcome.body["decoded"], Value::Null);
    }

    #[tokio::test]
    async fn test_verify_without_issuer() {
        let token = unsigned(&json!({"alg": "RS256", "kid": "k"}), &json!({"sub": "u1"}));
        let outcome = decoder().decode(&token, true).await;

        assert_eq!(outcome.status_code, 500);
        assert!(!outcome.verified);
        assert!(outcome.body["err"].as_str().unwrap().contains("iss"));
        assert_eq!(outcome.body["decoded"]["payload"]["sub"], "u1");
    }

    #[tokio::test]
    async fn test_verify_rejects_plain_http_issuer() {
        let token = unsigned(
            &json!({"alg": "RS256", "kid": "k"}),
            &json!({"iss": "http://idp.example"}),
        );
        let outcome = decoder().decode(&token, true).await;

        assert_eq!(outcome.status_code, 500);
        assert!(outcome.body["err"].as_str().unwrap().contains("HTTPS"));
    }

    #[test]
    fn test_default_leeway() {
        assert_eq!(decoder().leeway, Duration::from_secs(60));
        let d = decoder().with_leeway(Duration::ZERO);
        assert_eq!(d.leeway, Duration::ZERO);
    }
}
