//! `code_verifier` checking against stored challenges

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChallengeMethod, ChallengeStore};

/// How a verifier is matched against stored challenges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Try the verifier as a plain challenge, then as S256, regardless of
    /// the method recorded at authorize time.
    ///
    /// A verifier that collides under either transform with an unrelated
    /// stored challenge passes. Not suitable for a hardened deployment.
    #[default]
    Lenient,
    /// Only consume a record whose recorded method matches the transform
    /// being tried.
    Strict,
}

/// Verifies `/token` requests against challenges captured on `/authorize`
#[derive(Debug, Clone)]
pub struct PkceVerifier {
    store: ChallengeStore,
    mode: VerificationMode,
}

impl PkceVerifier {
    /// Create a lenient verifier over `store`
    pub fn new(store: ChallengeStore) -> Self {
        Self {
            store,
            mode: VerificationMode::Lenient,
        }
    }

    /// Set the matching mode
    pub fn with_mode(mut self, mode: VerificationMode) -> Self {
        self.mode = mode;
        self
    }

    /// The configured matching mode
    pub fn mode(&self) -> VerificationMode {
        self.mode
    }

    /// The store this verifier consumes from
    pub fn store(&self) -> &ChallengeStore {
        &self.store
    }

    /// Check a presented `code_verifier`.
    ///
    /// Returns false without touching storage when no verifier was sent.
    /// On success the matching challenge is consumed, so a replay fails.
    pub async fn verify(&self, code_verifier: Option<&str>) -> bool {
        let Some(code_verifier) = code_verifier.filter(|v| !v.is_empty()) else {
            debug!("No code_verifier presented");
            return false;
        };

        for method in [ChallengeMethod::Plain, ChallengeMethod::S256] {
            let key = method.apply(code_verifier);
            let found = match self.mode {
                VerificationMode::Lenient => self.store.consume(&key).await,
                VerificationMode::Strict => {
                    self.store
                        .consume_if(&key, &|record| record.code_challenge_method == method)
                        .await
                }
            };
            if found {
                debug!(%method, mode = ?self.mode, "PKCE verifier matched");
                return true;
            }
        }

        debug!(mode = ?self.mode, "PKCE verifier matched no stored challenge");
        false
    }
}
