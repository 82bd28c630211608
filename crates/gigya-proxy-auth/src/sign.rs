//! Consent signing for Gigya screen-sets
//!
//! The signed string is the consent value JSON-encoded twice, e.g. the
//! consent `"accept"` is signed as the bytes `"\"accept\""`. Gigya checks the
//! signature with the same partner secret, so the encoding must not drift.

use base64::{
    Engine as _,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig, general_purpose::URL_SAFE_NO_PAD},
};
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::{AuthError, AuthResult};

/// Accepts standard or URL-safe alphabets, with or without padding
const SECRET_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::RequireNone)
        .with_decode_allow_trailing_bits(true),
);

/// Consent value used when the request carries none
pub const DEFAULT_CONSENT: &str = "default";

/// HMAC digest used for consent signatures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SignatureAlgorithm {
    /// HMAC-SHA1, what Gigya expects by default
    #[default]
    Sha1,
    /// HMAC-SHA256
    Sha256,
    /// HMAC-SHA384
    Sha384,
    /// HMAC-SHA512
    Sha512,
}

impl SignatureAlgorithm {
    fn hmac_algorithm(self) -> hmac::Algorithm {
        match self {
            Self::Sha1 => hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
            Self::Sha256 => hmac::HMAC_SHA256,
            Self::Sha384 => hmac::HMAC_SHA384,
            Self::Sha512 => hmac::HMAC_SHA512,
        }
    }

    /// Lower-case name
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha384 => "sha384",
            Self::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "").as_str() {
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            other => Err(AuthError::configuration_with_key(
                format!("unsupported signature algorithm '{other}'"),
                "GIGYA_SIGNATURE_ALGORITHM",
            )),
        }
    }
}

/// The exact string that gets signed for a consent value.
///
/// Missing, `null`, `false`, `0` and `""` count as absent and fall back to
/// [`DEFAULT_CONSENT`].
pub fn canonical_consent(consent: Option<&Value>) -> String {
    let consent = match consent {
        Some(value) if is_present(value) => value.clone(),
        _ => Value::String(DEFAULT_CONSENT.to_string()),
    };
    // Encoding a Value or a String cannot fail
    let once = serde_json::to_string(&consent).unwrap_or_default();
    serde_json::to_string(&once).unwrap_or_default()
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Signs consent payloads with the partner secret
pub struct ConsentSigner {
    key: hmac::Key,
    algorithm: SignatureAlgorithm,
}

impl fmt::Debug for ConsentSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsentSigner")
            .field("key", &"[REDACTED]")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl ConsentSigner {
    /// Build a signer from a base64-encoded partner secret
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Configuration`] if the secret is empty or not base64.
    pub fn new(partner_secret: &SecretString, algorithm: SignatureAlgorithm) -> AuthResult<Self> {
        let key = decode_partner_secret(partner_secret.expose_secret())?;
        Ok(Self::from_raw_key(&key, algorithm))
    }

    /// Build a signer from raw key bytes
    pub fn from_raw_key(key: &[u8], algorithm: SignatureAlgorithm) -> Self {
        Self {
            key: hmac::Key::new(algorithm.hmac_algorithm(), key),
            algorithm,
        }
    }

    /// The digest in use
    pub fn algorithm(&self) -> SignatureAlgorithm {
        self.algorithm
    }

    /// Sign a consent value, returning URL-safe base64 without padding
    pub fn sign(&self, consent: Option<&Value>) -> String {
        let message = canonical_consent(consent);
        let tag = hmac::sign(&self.key, message.as_bytes());
        URL_SAFE_NO_PAD.encode(tag.as_ref())
    }
}

fn decode_partner_secret(secret: &str) -> AuthResult<Vec<u8>> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .collect();
    let normalized = normalized.trim_end_matches('=');

    if normalized.is_empty() {
        return Err(AuthError::configuration_with_key(
            "partner secret is empty",
            "GIGYA_PARTNER_SECRET",
        ));
    }

    SECRET_ENGINE.decode(normalized).map_err(|e| {
        AuthError::configuration_with_key(
            format!("partner secret is not base64: {e}"),
            "GIGYA_PARTNER_SECRET",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_consent() {
        assert_eq!(canonical_consent(Some(&json!("accept"))), r#""\"accept\"""#);
        assert_eq!(canonical_consent(None), r#""\"default\"""#);
        assert_eq!(canonical_consent(Some(&json!(""))), r#""\"default\"""#);
        assert_eq!(canonical_consent(Some(&json!(null))), r#""\"default\"""#);
        assert_eq!(canonical_consent(Some(&json!(false))), r#""\"default\"""#);
        assert_eq!(canonical_consent(Some(&json!(0))), r#""\"default\"""#);
        assert_eq!(canonical_consent(Some(&json!(true))), r#""true""#);
        assert_eq!(canonical_consent(Some(&json!({"a": 1}))), r#""{\"a\":1}""#);
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("sha1".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha1);
        assert_eq!("SHA256".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha256);
        assert_eq!("sha-512".parse::<SignatureAlgorithm>().unwrap(), SignatureAlgorithm::Sha512);
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_secret_decoding_is_lenient() {
        assert_eq!(decode_partner_secret("c2VjcmV0").unwrap(), b"secret");
        assert_eq!(decode_partner_secret("c2VjcmV0==").unwrap(), b"secret");
        assert_eq!(decode_partner_secret("c2Vj cmV0\n").unwrap(), b"secret");
        // '+' and '/' vs '-' and '_'
        assert_eq!(decode_partner_secret("-_8").unwrap(), decode_partner_secret("+/8").unwrap());
        assert!(decode_partner_secret("").is_err());
        assert!(decode_partner_secret("***").is_err());
    }

    #[test]
    fn test_sign_known_vector() {
        // Reference HMAC-SHA1 digests of the double-encoded consent
        let signer = ConsentSigner::from_raw_key(b"partner-secret", SignatureAlgorithm::Sha1);
        assert_eq!(signer.sign(Some(&json!("accept"))), "GAf92zrdyGR5dYPAC3IkVJWDOLw");

        let signer = ConsentSigner::from_raw_key(b"key", SignatureAlgorithm::Sha1);
        assert_eq!(signer.sign(None), "as71eTyBXoi9RrDFzL5f57VXKhc");
    }

    #[test]
    fn test_sign_lengths_per_algorithm() {
        for (alg, len) in [
            (SignatureAlgorithm::Sha1, 27),
            (SignatureAlgorithm::Sha256, 43),
            (SignatureAlgorithm::Sha384, 64),
            (SignatureAlgorithm::Sha512, 86),
        ] {
            let signer = ConsentSigner::from_raw_key(b"k", alg);
            assert_eq!(signer.sign(Some(&json!("accept"))).len(), len, "{alg}");
        }
    }

    #[test]
    fn test_debug_redacts_key() {
        let signer = ConsentSigner::new(&SecretString::from("c2VjcmV0"), SignatureAlgorithm::Sha1).unwrap();
        let debug = format!("{signer:?}");
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("c2VjcmV0"));
    }
}
