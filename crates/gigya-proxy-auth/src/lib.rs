//! # gigya-proxy-auth
//!
//! The security pieces of the Gigya OIDC proxy, independent of any HTTP
//! server.
//!
//! ## Architecture
//!
//! - [`pkce`] - challenge capture on `/authorize` and verifier checks on
//!   `/token`, for an IdP that does not enforce PKCE itself
//! - [`jwt`] - structural and verified ID token decoding, with an
//!   issuer-keyed, bounded JWKS client cache
//! - [`sign`] - HMAC consent signatures keyed with the partner secret
//! - [`ssrf`] - outbound policy for key-set fetches driven by token issuers
//! - [`error`] - [`AuthError`] and [`AuthResult`]
//!
//! ## Quick Start
//!
//! ```rust
//! use gigya_proxy_auth::pkce::{ChallengeMethod, ChallengeRecord, ChallengeStore, PkceVerifier};
//!
//! # tokio_test::block_on(async {
//! let store = ChallengeStore::in_memory("PKCE_VERIFIER");
//! let verifier = PkceVerifier::new(store.clone());
//!
//! let challenge = ChallengeMethod::S256.apply("my-verifier");
//! store
//!     .save(ChallengeRecord::new(challenge, ChallengeMethod::S256, "client", "state"))
//!     .await;
//!
//! assert!(verifier.verify(Some("my-verifier")).await);
//! assert!(!verifier.verify(Some("my-verifier")).await);
//! # });
//! ```

pub mod error;
pub mod jwt;
pub mod pkce;
pub mod sign;
pub mod ssrf;

pub use error::{AuthError, AuthResult};
pub use jwt::{ClaimsDecoder, DecodeOutcome, DecodedToken, KeyResolver, KeyResolverSettings};
pub use pkce::{
    ChallengeBackend, ChallengeMethod, ChallengeRecord, ChallengeStore, MemoryChallengeBackend,
    PkceVerifier, VerificationMode,
};
pub use sign::{ConsentSigner, SignatureAlgorithm};
pub use ssrf::{SsrfPolicy, SsrfValidator};
