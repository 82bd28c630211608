//! # gigya-proxy
//!
//! OpenID Connect proxy that sits between relying parties and SAP Gigya.
//! It keeps the IdP credentials server-side and adds the PKCE enforcement
//! Gigya does not perform.
//!
//! ## Architecture
//!
//! - [`types`] - transport-neutral [`ProxyRequest`] / [`ProxyResponse`]
//! - [`router`] - first-match method + path routing with a default handler
//! - [`forward`] - relaying to the IdP, PKCE gate, status embedding
//! - [`handlers`] - the endpoints and [`build_router`]
//! - [`server`] - axum boundary
//! - [`config`] - [`ProxyConfig`]
//! - [`cli`] - the `gigya-proxy` binary's commands
//!
//! ## Example
//!
//! ```rust,no_run
//! use gigya_proxy::{ProxyConfig, ProxyState, build_router};
//! use gigya_proxy::types::ProxyRequest;
//! use http::Method;
//!
//! # async fn example() -> gigya_proxy::ProxyResult<()> {
//! let config = ProxyConfig::new("3_site-key", "my-client").with_client_secret("secret");
//! let state = ProxyState::new(config)?;
//! let router = build_router(&state)?;
//!
//! let response = router
//!     .dispatch(ProxyRequest::new(Method::GET, "/config"))
//!     .await;
//! assert_eq!(response.status_code, 200);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod forward;
pub mod handlers;
pub mod router;
pub mod server;
pub mod types;

pub use config::ProxyConfig;
pub use error::{ProxyError, ProxyErrorExt, ProxyResult};
pub use forward::{Forwarder, ReqwestUpstream, UpstreamClient, UpstreamRequest, UpstreamResponse};
pub use handlers::{ProxyState, build_router};
pub use router::{Handler, MethodFilter, Router, SharedHandler, handler_fn};
pub use types::{ProxyRequest, ProxyResponse};
