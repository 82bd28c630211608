//! Endpoint handlers and the route table
//!
//! | Method    | Path                  | Handler                           |
//! |-----------|-----------------------|-----------------------------------|
//! | POST      | `/token`              | [`ForwardHandler`] (PKCE-checked) |
//! | POST      | `/refresh`            | [`ForwardHandler`] to `token`     |
//! | GET, POST | `/userinfo`           | [`ForwardHandler`]                |
//! | GET       | `/authorize`          | [`AuthorizeHandler`]              |
//! | POST      | `/sign`               | [`SignHandler`]                   |
//! | GET       | `/config`, `/showConfig` | [`ShowConfigHandler`]          |
//! | POST      | `/decode`             | [`DecodeHandler`]                 |

use async_trait::async_trait;
use http::Method;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

use gigya_proxy_auth::{
    ChallengeBackend, ChallengeMethod, ChallengeRecord, ChallengeStore, ClaimsDecoder,
    ConsentSigner, KeyResolver, MemoryChallengeBackend, PkceVerifier,
};

use crate::config::{ProxyConfig, is_truthy};
use crate::error::ProxyResult;
use crate::forward::{Forwarder, ReqwestUpstream, UpstreamClient};
use crate::router::{Handler, Router, SharedHandler};
use crate::types::{ProxyRequest, ProxyResponse};

/// Header reporting whether `/decode` verified the signature
pub const JWT_VERIFIED_HEADER: &str = "x-jwt-verified";

/// Everything the handlers share
#[derive(Debug, Clone)]
pub struct ProxyState {
    /// Validated configuration
    pub config: Arc<ProxyConfig>,
    /// Challenge store used by `/authorize` and `/token`
    pub challenges: ChallengeStore,
    /// Upstream relay
    pub forwarder: Forwarder,
    /// `/decode` backend
    pub decoder: ClaimsDecoder,
    /// Consent signer, when a partner secret is configured
    pub signer: Option<Arc<ConsentSigner>>,
}

impl ProxyState {
    /// Build state talking to the real IdP
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`](crate::ProxyError::Configuration)
    /// for invalid settings or an unusable partner secret.
    pub fn new(config: ProxyConfig) -> ProxyResult<Self> {
        let upstream = Arc::new(ReqwestUpstream::new(config.upstream_timeout)?);
        Self::with_upstream(config, upstream)
    }

    /// Build state with a custom upstream client and the in-process
    /// challenge backend
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_upstream(
        config: ProxyConfig,
        upstream: Arc<dyn UpstreamClient>,
    ) -> ProxyResult<Self> {
        let mut backend = MemoryChallengeBackend::new(config.verifier_table.clone());
        if let Some(max_age) = config.challenge_max_age {
            backend = backend.with_max_age(max_age);
        }
        Self::from_parts(config, upstream, Arc::new(backend))
    }

    /// Build state from a custom upstream client and challenge backend
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn from_parts(
        config: ProxyConfig,
        upstream: Arc<dyn UpstreamClient>,
        challenge_backend: Arc<dyn ChallengeBackend>,
    ) -> ProxyResult<Self> {
        config.validate()?;

        let challenges = ChallengeStore::new(challenge_backend);

        let signer = config
            .partner_secret
            .as_ref()
            .map(|secret| ConsentSigner::new(secret, config.signature_algorithm))
            .transpose()?
            .map(Arc::new);

        let resolver = Arc::new(KeyResolver::new(config.key_resolver.clone())?);
        let decoder = ClaimsDecoder::new(resolver);

        let config = Arc::new(config);
        let verifier = PkceVerifier::new(challenges.clone()).with_mode(config.pkce_mode);
        let forwarder = Forwarder::new(Arc::clone(&config), verifier, upstream);

        Ok(Self {
            config,
            challenges,
            forwarder,
            decoder,
            signer,
        })
    }

    /// Drop expired challenges, returning how many were removed
    pub async fn purge_expired_challenges(&self) -> usize {
        self.challenges.purge_expired().await
    }
}

/// `POST /sign`: HMAC over the consent payload
#[derive(Debug)]
pub struct SignHandler {
    signer: Option<Arc<ConsentSigner>>,
}

#[async_trait]
impl Handler for SignHandler {
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        let Some(signer) = &self.signer else {
            return ProxyResponse::err(500, "partner secret is not configured");
        };
        let signature = signer.sign(request.body.get("consent"));
        ProxyResponse::ok(json!(signature))
    }
}

/// `GET /config`: the non-secret part of the configuration
#[derive(Debug)]
pub struct ShowConfigHandler {
    config: Arc<ProxyConfig>,
}

#[async_trait]
impl Handler for ShowConfigHandler {
    async fn handle(&self, _request: ProxyRequest) -> ProxyResponse {
        ProxyResponse::ok(json!({
            "API_KEY": self.config.api_key,
            "CLIENT_ID": self.config.client_id,
        }))
        .with_header("content-type", "application/json")
        .with_header("pragma", "no-cache")
        .with_header("cache-control", "no-store")
    }
}

/// `GET /authorize`: capture the PKCE challenge, then redirect to the IdP
#[derive(Debug)]
pub struct AuthorizeHandler {
    config: Arc<ProxyConfig>,
    challenges: ChallengeStore,
}

#[async_trait]
impl Handler for AuthorizeHandler {
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        if let Some(challenge) = request.query_param("code_challenge").filter(|c| !c.is_empty()) {
            let record = ChallengeRecord::new(
                challenge,
                ChallengeMethod::from_param(request.query_param("code_challenge_method")),
                request.query_param("client_id").unwrap_or_default(),
                request.query_param("state").unwrap_or_default(),
            );
            self.challenges.save(record).await;
        }

        let mut location = self.config.endpoint_url("authorize");
        if !request.query.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&request.query)
                .finish();
            location = format!("{location}?{query}");
        }

        info!(location = %location, "Redirecting to IdP authorize");
        ProxyResponse::redirect(location)
    }
}

/// Relays to one IdP endpoint
#[derive(Debug)]
pub struct ForwardHandler {
    forwarder: Forwarder,
    endpoint: &'static str,
}

#[async_trait]
impl Handler for ForwardHandler {
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        self.forwarder.forward(request, self.endpoint).await
    }
}

/// `POST /decode`: decode and optionally verify an ID token
#[derive(Debug)]
pub struct DecodeHandler {
    decoder: ClaimsDecoder,
}

#[async_trait]
impl Handler for DecodeHandler {
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        let token = request
            .body_str("token")
            .or_else(|| request.query_param("token"))
            .filter(|t| !t.is_empty());
        let Some(token) = token else {
            return ProxyResponse::err(400, "missing token")
                .with_header(JWT_VERIFIED_HEADER, "false");
        };

        let verify = request.query_param("verify").is_some_and(is_truthy);
        debug!(verify, "Decoding token");

        let outcome = self.decoder.decode(token, verify).await;
        ProxyResponse::new(outcome.status_code, outcome.body)
            .with_header(JWT_VERIFIED_HEADER, outcome.verified.to_string())
    }
}

/// Build the proxy's route table
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`](crate::ProxyError::Configuration)
/// if the table is inconsistent.
pub fn build_router(state: &ProxyState) -> ProxyResult<Router> {
    let forward_token: SharedHandler = Arc::new(ForwardHandler {
        forwarder: state.forwarder.clone(),
        endpoint: "token",
    });
    let forward_userinfo: SharedHandler = Arc::new(ForwardHandler {
        forwarder: state.forwarder.clone(),
        endpoint: "userinfo",
    });
    let authorize: SharedHandler = Arc::new(AuthorizeHandler {
        config: Arc::clone(&state.config),
        challenges: state.challenges.clone(),
    });
    let sign: SharedHandler = Arc::new(SignHandler {
        signer: state.signer.clone(),
    });
    let show_config: SharedHandler = Arc::new(ShowConfigHandler {
        config: Arc::clone(&state.config),
    });
    let decode: SharedHandler = Arc::new(DecodeHandler {
        decoder: state.decoder.clone(),
    });

    Router::with_default(forward_token)
        .route_default(Method::POST, "/token")?
        .route_default(Method::POST, "/refresh")?
        .get("/userinfo", Arc::clone(&forward_userinfo))?
        .post("/userinfo", forward_userinfo)?
        .get("/authorize", authorize)?
        .post("/sign", sign)?
        .get("/config", Arc::clone(&show_config))?
        .get("/showConfig", show_config)?
        .post("/decode", decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forward::tests::StubUpstream;
    use gigya_proxy_auth::pkce::s256_challenge;
    use gigya_proxy_auth::pkce::store::AcceptRecord;
    use gigya_proxy_auth::{AuthError, AuthResult};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn state(config: ProxyConfig, upstream: Arc<StubUpstream>) -> ProxyState {
        ProxyState::with_upstream(config, upstream).unwrap()
    }

    fn memory_state(upstream: Arc<StubUpstream>) -> (ProxyState, Arc<MemoryChallengeBackend>) {
        let backend = Arc::new(MemoryChallengeBackend::new("PKCE_VERIFIER"));
        let state = ProxyState::from_parts(config(), upstream, backend.clone()).unwrap();
        (state, backend)
    }

    /// Backend whose every operation fails, counting the attempts
    #[derive(Debug, Default)]
    struct UnavailableBackend {
        puts: AtomicUsize,
        takes: AtomicUsize,
    }

    #[async_trait]
    impl ChallengeBackend for UnavailableBackend {
        async fn put(&self, _record: ChallengeRecord) -> AuthResult<()> {
            self.puts.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::storage_in("table unavailable", "PKCE_VERIFIER"))
        }

        async fn take_if(
            &self,
            _code_challenge: &str,
            _accept: AcceptRecord<'_>,
        ) -> AuthResult<Option<ChallengeRecord>> {
            self.takes.fetch_add(1, Ordering::SeqCst);
            Err(AuthError::storage_in("table unavailable", "PKCE_VERIFIER"))
        }

        fn namespace(&self) -> &str {
            "PKCE_VERIFIER"
        }
    }

    fn config() -> ProxyConfig {
        ProxyConfig::new("3_key", "client-1")
            .with_client_secret("s3cret")
            .with_partner_secret("c2VjcmV0")
    }

    #[test]
    fn test_invalid_partner_secret_is_rejected() {
        let err = ProxyState::with_upstream(
            ProxyConfig::new("3_key", "c").with_partner_secret("***"),
            StubUpstream::unreachable(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("partner secret"));
    }

    #[tokio::test]
    async fn test_show_config() {
        let state = state(config(), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        for path in ["/config", "/showConfig"] {
            let resp = router.dispatch(ProxyRequest::new(Method::GET, path)).await;
            assert_eq!(resp.status_code, 200);
            assert_eq!(resp.body, json!({"API_KEY": "3_key", "CLIENT_ID": "client-1"}));
            assert_eq!(resp.header("pragma"), Some("no-cache"));
            assert_eq!(resp.header("cache-control"), Some("no-store"));
        }
    }

    #[tokio::test]
    async fn test_sign() {
        let state = state(config(), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let req = ProxyRequest::new(Method::POST, "/sign").with_json_body(json!({"consent": "accept"}));
        let resp = router.dispatch(req.clone()).await;
        assert_eq!(resp.status_code, 200);
        let sig = resp.body.as_str().unwrap().to_string();
        assert!(!sig.contains(['=', '/', '+']));
        assert_eq!(router.dispatch(req).await.body, json!(sig));
    }

    #[tokio::test]
    async fn test_sign_without_secret() {
        let state = state(ProxyConfig::new("3_key", "c"), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let resp = router.dispatch(ProxyRequest::new(Method::POST, "/sign")).await;
        assert_eq!(resp.status_code, 500);
    }

    #[tokio::test]
    async fn test_authorize_saves_challenge_and_redirects() {
        let (state, backend) = memory_state(StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let challenge = s256_challenge("V");
        let req = ProxyRequest::new(Method::GET, "/authorize")
            .with_query("client_id", "client-1")
            .with_query("code_challenge", challenge.clone())
            .with_query("code_challenge_method", "S256")
            .with_query("redirect_uri", "https://rp.example/cb")
            .with_query("state", "xyz");
        let resp = router.dispatch(req).await;

        assert_eq!(resp.status_code, 302);
        assert_eq!(
            resp.header("location"),
            Some(
                format!(
                    "https://fidm.eu1.gigya.com/oidc/op/v1.0/3_key/authorize?client_id=client-1\
                     &code_challenge={challenge}&code_challenge_method=S256\
                     &redirect_uri=https%3A%2F%2Frp.example%2Fcb&state=xyz"
                )
                .as_str()
            )
        );
        assert_eq!(backend.len(), 1);
        assert!(state.challenges.consume(&challenge).await);
    }

    #[tokio::test]
    async fn test_authorize_without_challenge() {
        let (state, backend) = memory_state(StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let resp = router
            .dispatch(ProxyRequest::new(Method::GET, "/authorize"))
            .await;
        assert_eq!(resp.status_code, 302);
        assert_eq!(
            resp.header("location"),
            Some("https://fidm.eu1.gigya.com/oidc/op/v1.0/3_key/authorize")
        );
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_storage_outage_keeps_authorize_and_blocks_token() {
        let backend = Arc::new(UnavailableBackend::default());
        let upstream = StubUpstream::answering(200, json!({"access_token": "a"}));
        let state = ProxyState::from_parts(config(), upstream.clone(), backend.clone()).unwrap();
        let router = build_router(&state).unwrap();

        let req = ProxyRequest::new(Method::GET, "/authorize")
            .with_query("client_id", "client-1")
            .with_query("code_challenge", "plain-verifier")
            .with_query("code_challenge_method", "plain")
            .with_query("state", "xyz");
        let resp = router.dispatch(req).await;

        assert_eq!(resp.status_code, 302);
        assert_eq!(
            resp.header("location"),
            Some(
                "https://fidm.eu1.gigya.com/oidc/op/v1.0/3_key/authorize?client_id=client-1\
                 &code_challenge=plain-verifier&code_challenge_method=plain&state=xyz"
            )
        );
        assert_eq!(backend.puts.load(Ordering::SeqCst), 1);

        let req = ProxyRequest::new(Method::POST, "/token").with_form_body([
            ("grant_type", "authorization_code"),
            ("code", "c"),
            ("code_verifier", "plain-verifier"),
        ]);
        let resp = router.dispatch(req).await;

        assert_eq!(resp.status_code, 403);
        assert_eq!(resp.body, json!({"errMsg": "PKCE verification failure"}));
        assert!(backend.takes.load(Ordering::SeqCst) >= 1);
        assert_eq!(upstream.calls(), 0);
        assert_eq!(state.purge_expired_challenges().await, 0);
    }

    #[tokio::test]
    async fn test_refresh_goes_to_token_endpoint() {
        let upstream = StubUpstream::answering(200, json!({"access_token": "a"}));
        let state = state(config(), upstream.clone());
        let router = build_router(&state).unwrap();

        let req = ProxyRequest::new(Method::POST, "/refresh")
            .with_form_body([("grant_type", "refresh_token"), ("refresh_token", "r")]);
        let resp = router.dispatch(req).await;
        assert_eq!(resp.status_code, 200);
        assert_eq!(upstream.last().url, "https://fidm.eu1.gigya.com/oidc/op/v1.0/3_key/token");
    }

    #[tokio::test]
    async fn test_userinfo_get_and_post() {
        let upstream = StubUpstream::answering(200, json!({"sub": "u"}));
        let state = state(config(), upstream.clone());
        let router = build_router(&state).unwrap();

        for method in [Method::GET, Method::POST] {
            let resp = router
                .dispatch(ProxyRequest::new(method.clone(), "/userinfo"))
                .await;
            assert_eq!(resp.status_code, 200);
            assert_eq!(upstream.last().method, method);
            assert!(upstream.last().url.ends_with("/3_key/userinfo"));
        }
    }

    #[tokio::test]
    async fn test_decode_missing_token() {
        let state = state(config(), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let resp = router.dispatch(ProxyRequest::new(Method::POST, "/decode")).await;
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.header(JWT_VERIFIED_HEADER), Some("false"));
    }

    #[tokio::test]
    async fn test_decode_unverified_from_query() {
        use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};

        let state = state(config(), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let token = format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(r#"{"sub":"u1"}"#)
        );
        let req = ProxyRequest::new(Method::POST, "/decode")
            .with_query("token", token)
            .with_query("verify", "false");
        let resp = router.dispatch(req).await;

        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["payload"]["sub"], "u1");
        assert_eq!(resp.header(JWT_VERIFIED_HEADER), Some("false"));
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let state = state(config(), StubUpstream::unreachable());
        let router = build_router(&state).unwrap();

        let resp = router.dispatch(ProxyRequest::new(Method::GET, "/nope")).await;
        assert_eq!(resp.status_code, 404);
        assert_eq!(resp.body["err"], Value::String("unknown GET endpoint /nope".into()));
    }
}
