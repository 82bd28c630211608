//! Outbound request policy for key-set fetches
//!
//! `/decode?verify=1` takes the issuer from a token that has not been
//! verified yet, so the key-set URL is attacker-controlled. Every fetch is
//! checked against an [`SsrfPolicy`] first:
//!
//! - **Scheme**: HTTPS only unless the policy relaxes it
//! - **Loopback**: 127.0.0.0/8, ::1 and `localhost` names
//! - **Private networks**: RFC 1918 and IPv6 unique-local (fc00::/7)
//! - **Link-local**: 169.254.0.0/16 and fe80::/10
//! - **Cloud metadata**: 169.254.169.254, blocked even when link-local is allowed
//! - **Never reachable**: unspecified, broadcast and documentation ranges
//!
//! Literal IP hosts are checked synchronously by
//! [`SsrfValidator::validate_url`]. Domain names are resolved and each
//! address checked by [`SsrfValidator::validate_resolved`] right before the
//! request.
//!
//! ```rust
//! use gigya_proxy_auth::ssrf::{SsrfPolicy, SsrfValidator};
//!
//! let validator = SsrfValidator::default();
//! assert!(validator.validate_url("https://idp.example/.well-known/jwks.json").is_ok());
//! assert!(validator.validate_url("https://169.254.169.254/latest/meta-data").is_err());
//!
//! let local = SsrfValidator::new(SsrfPolicy::local_development());
//! assert!(local.validate_url("http://127.0.0.1:8080/jwks").is_ok());
//! ```

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tracing::{debug, warn};
use url::{Host, Url};

use crate::error::{AuthError, AuthResult};

const CLOUD_METADATA: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

/// What outbound key-set requests may reach
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SsrfPolicy {
    /// Allow RFC 1918 and IPv6 unique-local addresses
    pub allow_private_networks: bool,
    /// Allow loopback addresses and `localhost`
    pub allow_localhost: bool,
    /// Allow link-local addresses
    pub allow_link_local: bool,
    /// Allow 169.254.169.254
    pub allow_cloud_metadata: bool,
    /// Reject anything but `https`
    pub require_https: bool,
}

impl Default for SsrfPolicy {
    fn default() -> Self {
        Self {
            allow_private_networks: false,
            allow_localhost: false,
            allow_link_local: false,
            allow_cloud_metadata: false,
            require_https: true,
        }
    }
}

impl SsrfPolicy {
    /// Policy for issuers running on the local machine or network
    ///
    /// Allows plain HTTP, loopback and private addresses. Link-local and
    /// cloud metadata stay blocked.
    pub fn local_development() -> Self {
        Self {
            allow_private_networks: true,
            allow_localhost: true,
            require_https: false,
            ..Self::default()
        }
    }

    /// Set whether loopback is reachable
    pub fn allow_localhost(mut self, allow: bool) -> Self {
        self.allow_localhost = allow;
        self
    }

    /// Set whether private networks are reachable
    pub fn allow_private_networks(mut self, allow: bool) -> Self {
        self.allow_private_networks = allow;
        self
    }

    /// Set whether only `https` is accepted
    pub fn require_https(mut self, require: bool) -> Self {
        self.require_https = require;
        self
    }
}

/// Applies an [`SsrfPolicy`] to URLs and resolved addresses
#[derive(Debug, Clone, Default)]
pub struct SsrfValidator {
    policy: SsrfPolicy,
}

impl SsrfValidator {
    /// Create a validator for `policy`
    pub fn new(policy: SsrfPolicy) -> Self {
        Self { policy }
    }

    /// The policy in force
    pub fn policy(&self) -> &SsrfPolicy {
        &self.policy
    }

    /// Check scheme and host of `url_str` without touching the network
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyResolution`] for unparsable URLs and
    /// [`AuthError::BlockedEndpoint`] when the scheme or a literal host is
    /// not allowed.
    pub fn validate_url(&self, url_str: &str) -> AuthResult<Url> {
        let url = Url::parse(url_str)
            .map_err(|e| AuthError::key_resolution(format!("invalid key set URL '{url_str}': {e}")))?;

        match url.scheme() {
            "https" => {}
            "http" if !self.policy.require_https => {}
            scheme => {
                return Err(AuthError::blocked(
                    url_str,
                    format!("scheme '{scheme}' not allowed, HTTPS required"),
                ));
            }
        }

        match url.host() {
            None => return Err(AuthError::blocked(url_str, "URL has no host")),
            Some(Host::Ipv4(ip)) => self.check_ip(&IpAddr::V4(ip)).map_err(|reason| {
                warn!(url = %url_str, %reason, "Blocked key set endpoint");
                AuthError::blocked(url_str, reason)
            })?,
            Some(Host::Ipv6(ip)) => self.check_ip(&IpAddr::V6(ip)).map_err(|reason| {
                warn!(url = %url_str, %reason, "Blocked key set endpoint");
                AuthError::blocked(url_str, reason)
            })?,
            Some(Host::Domain(domain)) => {
                if !self.policy.allow_localhost && is_localhost_name(domain) {
                    warn!(url = %url_str, "Blocked key set endpoint on localhost");
                    return Err(AuthError::blocked(url_str, "loopback"));
                }
            }
        }

        Ok(url)
    }

    /// Resolve the URL's host name and check every address it maps to
    ///
    /// Literal IP hosts were already checked by
    /// [`validate_url`](Self::validate_url) and pass straight through.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::KeyResolution`] if the name does not resolve and
    /// [`AuthError::BlockedEndpoint`] if any address is not allowed.
    pub async fn validate_resolved(&self, url: &Url) -> AuthResult<()> {
        let Some(Host::Domain(domain)) = url.host() else {
            return Ok(());
        };
        let port = url.port_or_known_default().unwrap_or(443);

        let addrs = tokio::net::lookup_host((domain, port))
            .await
            .map_err(|e| AuthError::key_resolution(format!("failed to resolve {domain}: {e}")))?;

        let mut resolved = 0usize;
        for addr in addrs {
            resolved += 1;
            let ip = addr.ip();
            if let Err(reason) = self.check_ip(&ip) {
                warn!(url = %url, %ip, %reason, "Key set host resolves to blocked address");
                return Err(AuthError::blocked(
                    url.as_str(),
                    format!("{domain} resolves to {ip} ({reason})"),
                ));
            }
        }

        if resolved == 0 {
            return Err(AuthError::key_resolution(format!(
                "no addresses resolved for {domain}"
            )));
        }

        debug!(%domain, addresses = resolved, "Key set host passed address policy");
        Ok(())
    }

    /// Check one address, returning the reason it is blocked
    ///
    /// # Errors
    ///
    /// Returns a short description of the blocked range.
    pub fn check_ip(&self, ip: &IpAddr) -> Result<(), &'static str> {
        match ip {
            IpAddr::V4(v4) => self.check_ipv4(v4),
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => self.check_ipv4(&v4),
                None => self.check_ipv6(v6),
            },
        }
    }

    fn check_ipv4(&self, ip: &Ipv4Addr) -> Result<(), &'static str> {
        if *ip == CLOUD_METADATA && !self.policy.allow_cloud_metadata {
            return Err("cloud metadata endpoint");
        }
        if ip.is_loopback() && !self.policy.allow_localhost {
            return Err("loopback");
        }
        if ip.is_private() && !self.policy.allow_private_networks {
            return Err("private network");
        }
        if ip.is_link_local() && *ip != CLOUD_METADATA && !self.policy.allow_link_local {
            return Err("link-local");
        }
        if ip.is_unspecified() || ip.is_broadcast() || ip.is_documentation() {
            return Err("non-routable address");
        }
        Ok(())
    }

    fn check_ipv6(&self, ip: &Ipv6Addr) -> Result<(), &'static str> {
        if ip.is_loopback() && !self.policy.allow_localhost {
            return Err("loopback");
        }
        if ip.is_unique_local() && !self.policy.allow_private_networks {
            return Err("private network");
        }
        if ip.is_unicast_link_local() && !self.policy.allow_link_local {
            return Err("link-local");
        }
        if ip.is_unspecified() {
            return Err("non-routable address");
        }
        Ok(())
    }
}

fn is_localhost_name(domain: &str) -> bool {
    let domain = domain.trim_end_matches('.').to_ascii_lowercase();
    domain == "localhost" || domain.ends_with(".localhost")
}
