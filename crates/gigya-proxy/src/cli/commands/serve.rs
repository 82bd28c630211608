//! Serve command implementation
//!
//! Every option can also come from the environment, so the proxy can be
//! configured the same way the hosted deployment is.

use clap::Args;
use gigya_proxy_auth::{KeyResolverSettings, SignatureAlgorithm, SsrfPolicy, VerificationMode};
use std::time::Duration;
use tracing::info;

use crate::config::{DEFAULT_IDP_BASE_URL, DEFAULT_VERIFIER_TABLE, ProxyConfig, parse_truthy};
use crate::error::ProxyResult;
use crate::handlers::ProxyState;
use crate::server::{self, DEFAULT_BIND, DEFAULT_BODY_LIMIT};

/// Run the proxy HTTP server
///
/// # Examples
///
///   GIGYA_API_KEY=3_abc GIGYA_CLIENT_ID=rp GIGYA_CLIENT_SECRET=... \
///     gigya-proxy serve --bind 0.0.0.0:8080
#[derive(Debug, Args)]
pub struct ServeCommand {
    /// Bind address.
    ///
    /// WARNING: Binding to 0.0.0.0 exposes the proxy to all network interfaces.
    #[arg(long, value_name = "ADDR", env = "GIGYA_PROXY_BIND", default_value = DEFAULT_BIND)]
    pub bind: String,

    /// Gigya site API key
    #[arg(long, env = "GIGYA_API_KEY")]
    pub api_key: String,

    /// OIDC client id
    #[arg(long, env = "GIGYA_CLIENT_ID", default_value = "")]
    pub client_id: String,

    /// OIDC client secret (sent as Basic auth when callers send none)
    #[arg(long, env = "GIGYA_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Base64 partner secret for /sign
    #[arg(long, env = "GIGYA_PARTNER_SECRET", hide_env_values = true)]
    pub partner_secret: Option<String>,

    /// HMAC digest for /sign (sha1, sha256, sha384, sha512)
    #[arg(long, env = "GIGYA_SIGNATURE_ALGORITHM", default_value = "sha1")]
    pub signature_algorithm: SignatureAlgorithm,

    /// Report upstream errors as 200 with `proxyStatusCode` in the body
    #[arg(
        long,
        env = "EMBED_STATUS_CODE",
        value_parser = parse_truthy,
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub embed_status_code: bool,

    /// Challenge store namespace
    #[arg(long, env = "VERIFIER_TABLE_NAME", default_value = DEFAULT_VERIFIER_TABLE)]
    pub verifier_table: String,

    /// IdP OIDC base URL
    #[arg(long, env = "GIGYA_IDP_BASE_URL", default_value = DEFAULT_IDP_BASE_URL)]
    pub idp_base_url: String,

    /// Only accept a verifier under the method recorded at /authorize
    #[arg(
        long,
        env = "GIGYA_PKCE_STRICT",
        value_parser = parse_truthy,
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub pkce_strict: bool,

    /// Seconds a stored challenge stays valid (0 = until used)
    #[arg(long, value_name = "SECS", env = "GIGYA_CHALLENGE_MAX_AGE", default_value_t = 600)]
    pub challenge_max_age: u64,

    /// Upstream request timeout in seconds
    #[arg(long, value_name = "SECS", default_value_t = 10)]
    pub upstream_timeout: u64,

    /// Most issuers whose key sets are cached
    #[arg(long, default_value_t = 64)]
    pub max_issuers: u64,

    /// Key set cache lifetime in seconds
    #[arg(long, value_name = "SECS", default_value_t = 600)]
    pub jwks_ttl: u64,

    /// Let /decode fetch key sets from loopback and private addresses over
    /// plain HTTP.
    ///
    /// WARNING: issuers come from unverified tokens. Only enable this for
    /// local development.
    #[arg(
        long,
        env = "GIGYA_ALLOW_LOCAL_ISSUERS",
        value_parser = parse_truthy,
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub allow_local_issuers: bool,

    /// Maximum request body size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit: usize,
}

impl ServeCommand {
    /// Translate the arguments into a [`ProxyConfig`]
    pub fn to_config(&self) -> ProxyConfig {
        let mut config = ProxyConfig::new(&self.api_key, &self.client_id)
            .with_signature_algorithm(self.signature_algorithm)
            .with_embed_status_code(self.embed_status_code)
            .with_verifier_table(&self.verifier_table)
            .with_idp_base_url(&self.idp_base_url)
            .with_pkce_mode(if self.pkce_strict {
                VerificationMode::Strict
            } else {
                VerificationMode::Lenient
            })
            .with_upstream_timeout(Duration::from_secs(self.upstream_timeout))
            .with_challenge_max_age(
                (self.challenge_max_age > 0).then(|| Duration::from_secs(self.challenge_max_age)),
            )
            .with_key_resolver(KeyResolverSettings {
                max_issuers: self.max_issuers,
                jwks_ttl: Duration::from_secs(self.jwks_ttl),
                ssrf: if self.allow_local_issuers {
                    SsrfPolicy::local_development()
                } else {
                    SsrfPolicy::default()
                },
                ..KeyResolverSettings::default()
            });

        if let Some(secret) = &self.client_secret {
            config = config.with_client_secret(secret);
        }
        if let Some(secret) = &self.partner_secret {
            config = config.with_partner_secret(secret);
        }
        config
    }

    /// Execute the serve command
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if the configuration is invalid or the server
    /// cannot bind.
    pub async fn execute(self, debug: bool) -> ProxyResult<()> {
        let config = self.to_config();
        let debug_flag = debug;
        info!(
            bind = %self.bind,
            client_id = %config.client_id,
            signature_algorithm = %config.signature_algorithm,
            allow_local_issuers = self.allow_local_issuers,
            debug = debug_flag,
            "Starting Gigya proxy"
        );

        let state = ProxyState::new(config)?;
        server::serve(state, &self.bind, self.body_limit).await
    }
}
