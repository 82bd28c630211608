//! Error types for gigya-proxy
//!
//! Request-path failures rarely become `Err`: the handlers turn them into
//! 4xx/5xx [`ProxyResponse`](crate::types::ProxyResponse)s. `ProxyError` is
//! for startup (configuration, binding) and for the upstream client seam.

use gigya_proxy_auth::AuthError;
use thiserror::Error;

/// Result type for proxy operations
pub type ProxyResult<T> = std::result::Result<T, ProxyError>;

/// Main error type for gigya-proxy
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ProxyError {
    /// Configuration error
    ///
    /// Missing or invalid settings, duplicate routes.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        key: Option<String>,
    },

    /// Upstream IdP could not be reached or answered unusably
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Auth component error
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProxyError {
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

    /// Create an upstream error
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// Sanitize error message for client responses
    ///
    /// Removes internal details to prevent information disclosure.
    pub fn sanitize(&self) -> String {
        match self {
            Self::Configuration { .. } => "Configuration error".to_string(),
            Self::Http(e) => match e.status() {
                Some(code) => format!("Upstream error {}", code.as_u16()),
                None => "Upstream request failed".to_string(),
            },
            Self::Upstream { .. } => "Upstream request failed".to_string(),
            Self::Auth(e) if e.is_token_error() => "Invalid token".to_string(),
            Self::Auth(_) => "Authentication backend error".to_string(),
            Self::Serialization(_) => "Data serialization error".to_string(),
            Self::Io(_) => "IO error occurred".to_string(),
        }
    }

    /// Check if this is a configuration error
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

/// Extension trait for Result types to add proxy error context
pub trait ProxyErrorExt<T> {
    /// Add upstream context to error
    fn upstream_context(self, context: impl Into<String>) -> ProxyResult<T>;
}

impl<T, E> ProxyErrorExt<T> for Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn upstream_context(self, context: impl Into<String>) -> ProxyResult<T> {
        self.map_err(|e| ProxyError::upstream(format!("{}: {e}", context.into())))
    }
}
