//! Configuration types for gigya-proxy

use gigya_proxy_auth::{KeyResolverSettings, SignatureAlgorithm, VerificationMode};
use secrecy::SecretString;
use std::time::Duration;
use url::Url;

use crate::error::{ProxyError, ProxyResult};

/// Gigya OIDC base for the EU1 data center
pub const DEFAULT_IDP_BASE_URL: &str = "https://fidm.eu1.gigya.com/oidc/op/v1.0";

/// Default challenge namespace (the original table name)
pub const DEFAULT_VERIFIER_TABLE: &str = "PKCE_VERIFIER";

/// Proxy configuration
///
/// Secrets are held as [`SecretString`] and never appear in `Debug` output.
#[derive(Debug)]
pub struct ProxyConfig {
    /// Gigya site API key, part of every upstream URL
    pub api_key: String,

    /// OIDC client id of the relying party
    pub client_id: String,

    /// OIDC client secret, used for injected Basic auth
    pub client_secret: Option<SecretString>,

    /// Base64 partner secret for consent signing
    pub partner_secret: Option<SecretString>,

    /// HMAC digest for consent signing
    pub signature_algorithm: SignatureAlgorithm,

    /// Report upstream non-200 statuses as 200 with `proxyStatusCode`
    pub embed_status_code: bool,

    /// Challenge store namespace
    pub verifier_table: String,

    /// IdP OIDC base URL; the API key and endpoint are appended
    pub idp_base_url: String,

    /// PKCE matching mode
    pub pkce_mode: VerificationMode,

    /// Timeout for upstream IdP requests
    pub upstream_timeout: Duration,

    /// Issuer key-set cache sizing
    pub key_resolver: KeyResolverSettings,

    /// Maximum age of a stored challenge; `None` keeps them until consumed
    pub challenge_max_age: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            client_id: String::new(),
            client_secret: None,
            partner_secret: None,
            signature_algorithm: SignatureAlgorithm::Sha1,
            embed_status_code: false,
            verifier_table: DEFAULT_VERIFIER_TABLE.to_string(),
            idp_base_url: DEFAULT_IDP_BASE_URL.to_string(),
            pkce_mode: VerificationMode::Lenient,
            upstream_timeout: Duration::from_secs(10),
            key_resolver: KeyResolverSettings::default(),
            challenge_max_age: Some(Duration::from_secs(600)),
        }
    }
}

impl ProxyConfig {
    /// Create a configuration for a Gigya site and client
    pub fn new(api_key: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            client_id: client_id.into(),
            ..Self::default()
        }
    }

    /// Set the client secret
    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Set the partner secret (base64)
    pub fn with_partner_secret(mut self, secret: impl Into<String>) -> Self {
        self.partner_secret = Some(SecretString::from(secret.into()));
        self
    }

    /// Set the consent signature digest
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    /// Enable or disable status-code embedding
    pub fn with_embed_status_code(mut self, embed: bool) -> Self {
        self.embed_status_code = embed;
        self
    }

    /// Set the challenge store namespace
    pub fn with_verifier_table(mut self, table: impl Into<String>) -> Self {
        self.verifier_table = table.into();
        self
    }

    /// Point at a different IdP base URL
    pub fn with_idp_base_url(mut self, url: impl Into<String>) -> Self {
        self.idp_base_url = url.into();
        self
    }

    /// Set the PKCE matching mode
    pub fn with_pkce_mode(mut self, mode: VerificationMode) -> Self {
        self.pkce_mode = mode;
        self
    }

    /// Set the upstream request timeout
    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    /// Set the key resolver settings
    pub fn with_key_resolver(mut self, settings: KeyResolverSettings) -> Self {
        self.key_resolver = settings;
        self
    }

    /// Set the maximum stored-challenge age
    pub fn with_challenge_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.challenge_max_age = max_age;
        self
    }

    /// Check the settings needed to serve requests
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the API key is empty or the
    /// IdP base URL is not an absolute http(s) URL.
    pub fn validate(&self) -> ProxyResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(ProxyError::configuration_with_key(
                "Gigya API key is required",
                "GIGYA_API_KEY",
            ));
        }

        let url = Url::parse(&self.idp_base_url).map_err(|e| {
            ProxyError::configuration_with_key(
                format!("invalid IdP base URL '{}': {e}", self.idp_base_url),
                "GIGYA_IDP_BASE_URL",
            )
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::configuration_with_key(
                format!("IdP base URL must be http(s), got '{}'", url.scheme()),
                "GIGYA_IDP_BASE_URL",
            ));
        }

        Ok(())
    }

    /// Upstream URL for an endpoint, e.g. `token` or `authorize`
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}/{}",
            self.idp_base_url.trim_end_matches('/'),
            self.api_key,
            endpoint.trim_start_matches('/')
        )
    }
}

/// Parse a boolean flag the lenient way environment flags are written
///
/// `true`, `1`, `yes`, `y` and `on` (any case) are true; everything else is
/// false.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "y" | "on"
    )
}

/// clap value parser wrapping [`is_truthy`]
///
/// # Errors
///
/// Never fails; the `Result` is what clap expects.
pub fn parse_truthy(value: &str) -> Result<bool, String> {
    Ok(is_truthy(value))
}
