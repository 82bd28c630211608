//! ID token decoding
//!
//! - [`DecodedToken`] - structural, unverified decode (no I/O)
//! - [`jwks`] - per-issuer key-set clients behind a bounded [`KeyResolver`]
//! - [`decoder`] - [`ClaimsDecoder`], the decode endpoint's backend

pub mod decoder;
pub mod jwks;

pub use decoder::{ClaimsDecoder, DecodeOutcome};
pub use jwks::{JwksClient, KeyResolver, KeyResolverSettings};

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AuthError, AuthResult};

/// base64url that tolerates padded segments
const SEGMENT_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A JWT split into its parts, signature unchecked
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedToken {
    /// JOSE header
    pub header: Value,
    /// Claims
    pub payload: Value,
    /// Raw base64url signature segment
    pub signature: String,
}

impl DecodedToken {
    /// Split and decode a compact JWS without verifying it
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MalformedToken`] if the token does not have three
    /// segments, a segment is not base64url, or the header/payload is not JSON.
    pub fn parse(token: &str) -> AuthResult<Self> {
        let mut parts = token.trim().split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::malformed("expected three dot-separated segments"));
        };

        let header: Value = decode_segment(header, "header")?;
        if !header.is_object() {
            return Err(AuthError::malformed("header is not a JSON object"));
        }
        let payload: Value = decode_segment(payload, "payload")?;

        Ok(Self {
            header,
            payload,
            signature: signature.to_string(),
        })
    }

    /// The `iss` claim, if present
    pub fn issuer(&self) -> Option<&str> {
        self.payload.get("iss").and_then(Value::as_str)
    }

    /// The `kid` header parameter, if present
    pub fn key_id(&self) -> Option<&str> {
        self.header.get("kid").and_then(Value::as_str)
    }

    /// The `alg` header parameter, if present
    pub fn algorithm(&self) -> Option<&str> {
        self.header.get("alg").and_then(Value::as_str)
    }
}

fn decode_segment(segment: &str, name: &str) -> AuthResult<Value> {
    let bytes = SEGMENT_ENGINE
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("{name} is not JSON: {e}")))
}
