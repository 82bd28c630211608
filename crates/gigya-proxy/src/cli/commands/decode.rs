//! Decode command implementation
//!
//! Same decoding as the `/decode` endpoint, from the command line.

use clap::Args;
use gigya_proxy_auth::{AuthError, ClaimsDecoder, KeyResolver, KeyResolverSettings, SsrfPolicy};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{ProxyError, ProxyResult};

/// Decode an ID token, optionally verifying it against the issuer's JWKS
#[derive(Debug, Args)]
pub struct DecodeCommand {
    /// The compact JWT
    pub token: String,

    /// Verify signature and expiry against `<iss>/.well-known/jwks.json`
    #[arg(long)]
    pub verify: bool,

    /// Clock-skew allowance in seconds
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub leeway: u64,

    /// Print compact JSON
    #[arg(long)]
    pub compact: bool,

    /// Allow key sets on loopback and private addresses over plain HTTP
    #[arg(long)]
    pub allow_local_issuers: bool,
}

impl DecodeCommand {
    /// Execute the decode command
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Auth` if the token cannot be decoded or fails
    /// verification.
    pub async fn execute(self) -> ProxyResult<()> {
        let ssrf = if self.allow_local_issuers {
            SsrfPolicy::local_development()
        } else {
            SsrfPolicy::default()
        };
        let resolver = KeyResolver::new(KeyResolverSettings {
            ssrf,
            ..KeyResolverSettings::default()
        })?;
        let decoder = ClaimsDecoder::new(Arc::new(resolver))
            .with_leeway(Duration::from_secs(self.leeway));

        let outcome = decoder.decode(&self.token, self.verify).await;

        let rendered = if self.compact {
            serde_json::to_string(&outcome.body)?
        } else {
            serde_json::to_string_pretty(&outcome.body)?
        };
        println!("{rendered}");

        if outcome.status_code == 200 {
            Ok(())
        } else {
            let message = outcome.body["err"]
                .as_str()
                .unwrap_or("token could not be decoded")
                .to_string();
            Err(ProxyError::Auth(AuthError::verification(message)))
        }
    }
}
