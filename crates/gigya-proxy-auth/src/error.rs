//! Error types for gigya-proxy-auth
//!
//! Storage errors are soft failures: callers in [`crate::pkce`] log them and
//! degrade to "not verified". Token errors surface to the decode endpoint as
//! a 500 with the message embedded in the body.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Main error type for gigya-proxy-auth
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AuthError {
    /// Challenge backend unavailable or rejected the operation
    #[error("Storage error: {message}")]
    Storage {
        message: String,
        namespace: Option<String>,
    },

    /// Token could not be structurally decoded
    #[error("Malformed token: {message}")]
    MalformedToken { message: String },

    /// Signing key could not be resolved for the token
    #[error("Key resolution error: {message}")]
    KeyResolution {
        message: String,
        issuer: Option<String>,
    },

    /// Key-set endpoint refused by the outbound request policy
    #[error("Blocked key set endpoint {url}: {reason}")]
    BlockedEndpoint { url: String, reason: String },

    /// Signature or registered-claim validation failed
    #[error("Token verification failed: {message}")]
    Verification { message: String },

    /// Invalid auth configuration (bad secret, unknown algorithm, ...)
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    /// HTTP error while talking to a key-set endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            namespace: None,
        }
    }

    /// Create a storage error tagged with the store namespace
    pub fn storage_in(message: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Create a malformed token error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedToken {
            message: message.into(),
        }
    }

    /// Create a key resolution error
    pub fn key_resolution(message: impl Into<String>) -> Self {
        Self::KeyResolution {
            message: message.into(),
            issuer: None,
        }
    }

    /// Create a key resolution error with issuer context
    pub fn key_resolution_for(message: impl Into<String>, issuer: impl Into<String>) -> Self {
        Self::KeyResolution {
            message: message.into(),
            issuer: Some(issuer.into()),
        }
    }

    /// Create a blocked endpoint error
    pub fn blocked(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BlockedEndpoint {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Create a verification error
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: None,
        }
    }

    /// Create a configuration error with key context
    pub fn configuration_with_key(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Check if this is a storage error
    pub fn is_storage_error(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Check if an outbound fetch was refused by policy
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::BlockedEndpoint { .. })
    }

    /// Check if this error came from token content rather than infrastructure
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken { .. } | Self::Verification { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = AuthError::storage("table missing");
        assert!(err.is_storage_error());

        let err = AuthError::malformed("two segments");
        assert!(err.is_token_error());
        assert!(!err.is_storage_error());
    }

    #[test]
    fn test_error_with_context() {
        match AuthError::storage_in("throttled", "PKCE_VERIFIER") {
            AuthError::Storage { message, namespace } => {
                assert_eq!(message, "throttled");
                assert_eq!(namespace.as_deref(), Some("PKCE_VERIFIER"));
            }
            _ => panic!("Wrong error type"),
        }
    }

    #[test]
    fn test_blocked_error() {
        let err = AuthError::blocked("http://10.0.0.5/jwks", "private network");
        assert!(err.is_blocked());
        assert!(!err.is_token_error());
        assert!(err.to_string().contains("private network"));
    }

    #[test]
    fn test_error_display() {
        let err = AuthError::key_resolution_for("no key for kid 'abc'", "https://idp.example");
        assert!(err.to_string().contains("Key resolution error"));
        assert!(err.to_string().contains("abc"));
    }
}
