//! PKCE (Proof Key for Code Exchange) enforcement in front of an IdP that
//! does not check it itself.
//!
//! The proxy never sees the authorization code (the IdP hands it straight to
//! the browser), so challenges cannot be tied to codes. Instead every
//! `code_challenge` seen on `/authorize` is stored, and a `/token` request
//! passes if its `code_verifier` maps onto *some* stored challenge, which is
//! then consumed.
//!
//! - [`store`] - challenge persistence ([`ChallengeBackend`]) and the
//!   failure-swallowing [`ChallengeStore`] facade
//! - [`verifier`] - [`PkceVerifier`], plain and S256 matching

pub mod store;
pub mod verifier;

pub use store::{ChallengeBackend, ChallengeStore, MemoryChallengeBackend};
pub use verifier::{PkceVerifier, VerificationMode};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Transform applied to the verifier to produce the challenge (RFC 7636 §4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChallengeMethod {
    /// `code_challenge = code_verifier`
    #[default]
    #[serde(rename = "plain")]
    Plain,
    /// `code_challenge = BASE64URL(SHA256(code_verifier))`
    #[serde(rename = "S256")]
    S256,
}

impl ChallengeMethod {
    /// Parse the `code_challenge_method` authorize parameter.
    ///
    /// Absent means `plain` per RFC 7636 §4.3. Unknown values are kept as
    /// `plain` so the authorize redirect still happens; the IdP will reject
    /// them on its side if it cares.
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("S256") => Self::S256,
            Some("plain") | None => Self::Plain,
            Some(other) => {
                tracing::warn!(method = other, "Unknown code_challenge_method, treating as plain");
                Self::Plain
            }
        }
    }

    /// Apply this transform to a verifier
    pub fn apply(self, code_verifier: &str) -> String {
        match self {
            Self::Plain => code_verifier.to_string(),
            Self::S256 => s256_challenge(code_verifier),
        }
    }

    /// Wire name of the method
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute the S256 code challenge from a verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`, no padding.
pub fn s256_challenge(code_verifier: &str) -> String {
    let hash = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// One stored `/authorize` challenge, keyed by `code_challenge`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeRecord {
    /// The challenge value (primary key)
    pub code_challenge: String,
    /// Method declared at authorize time
    pub code_challenge_method: ChallengeMethod,
    /// Relying party that started the flow
    pub client_id: String,
    /// Opaque RP state
    pub state: String,
    /// When the authorize request was seen
    pub created_at: DateTime<Utc>,
}

impl ChallengeRecord {
    /// Create a record stamped with the current time
    pub fn new(
        code_challenge: impl Into<String>,
        code_challenge_method: ChallengeMethod,
        client_id: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            code_challenge: code_challenge.into(),
            code_challenge_method,
            client_id: client_id.into(),
            state: state.into(),
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s256_matches_rfc7636_appendix_b() {
        // RFC 7636 Appendix B test vector
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            s256_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_s256_is_url_safe() {
        let challenge = s256_challenge("some-verifier");
        assert_eq!(challenge.len(), 43);
        assert!(
            challenge
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(ChallengeMethod::from_param(None), ChallengeMethod::Plain);
        assert_eq!(ChallengeMethod::from_param(Some("plain")), ChallengeMethod::Plain);
        assert_eq!(ChallengeMethod::from_param(Some("S256")), ChallengeMethod::S256);
        assert_eq!(ChallengeMethod::from_param(Some("s256")), ChallengeMethod::Plain);
    }

    #[test]
    fn test_method_serde_names() {
        let json = serde_json::to_string(&ChallengeMethod::S256).unwrap();
        assert_eq!(json, "\"S256\"");
        let json = serde_json::to_string(&ChallengeMethod::Plain).unwrap();
        assert_eq!(json, "\"plain\"");
    }

    #[test]
    fn test_apply() {
        assert_eq!(ChallengeMethod::Plain.apply("abc"), "abc");
        assert_eq!(ChallengeMethod::S256.apply("abc"), s256_challenge("abc"));
    }
}
