//! Method + path routing
//!
//! Routes are matched in registration order; the first route whose method
//! filter and exact path match wins. Unmatched requests go to the fallback
//! handler, which by default answers 404.
//!
//! Routes may be registered without a handler ([`Router::route_default`]).
//! What they get depends on how the router was built:
//!
//! - [`Router::with_default`] - always the handler given at construction
//! - [`Router::sticky`] - the handler of the most recently registered route,
//!   or the seed handler when none has been registered yet
//! - [`Router::new`] - nothing; registering such a route is an error

use async_trait::async_trait;
use http::Method;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::types::{ProxyRequest, ProxyResponse};

/// Something that turns a request into a response
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse;
}

/// Handler shared between routes
pub type SharedHandler = Arc<dyn Handler>;

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(ProxyRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProxyResponse> + Send + 'static,
{
    async fn handle(&self, request: ProxyRequest) -> ProxyResponse {
        (self.0)(request).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(ProxyRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ProxyResponse> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Which methods a route accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodFilter {
    /// Any method
    Any,
    /// Exactly this method
    Only(Method),
}

impl MethodFilter {
    /// Whether `method` passes this filter
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(m) => m == method,
        }
    }
}

impl From<Method> for MethodFilter {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

impl fmt::Display for MethodFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Only(m) => f.write_str(m.as_str()),
        }
    }
}

/// A registered route
#[derive(Clone)]
pub struct Route {
    /// Method filter
    pub method: MethodFilter,
    /// Exact path
    pub path: String,
    handler: SharedHandler,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

#[derive(Clone)]
enum DefaultPolicy {
    None,
    Fixed(SharedHandler),
    Sticky,
}

/// Ordered route table
#[derive(Clone)]
pub struct Router {
    routes: Vec<Route>,
    policy: DefaultPolicy,
    last_handler: Option<SharedHandler>,
    fallback: Option<SharedHandler>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let policy = match self.policy {
            DefaultPolicy::None => "none",
            DefaultPolicy::Fixed(_) => "fixed",
            DefaultPolicy::Sticky => "sticky",
        };
        f.debug_struct("Router")
            .field("routes", &self.routes)
            .field("default", &policy)
            .field("custom_fallback", &self.fallback.is_some())
            .finish()
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    /// Router with no default handler
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            policy: DefaultPolicy::None,
            last_handler: None,
            fallback: None,
        }
    }

    /// Router whose handler-less routes use `handler`
    pub fn with_default(handler: SharedHandler) -> Self {
        Self {
            policy: DefaultPolicy::Fixed(handler),
            ..Self::new()
        }
    }

    /// Router whose handler-less routes reuse the last registered handler
    ///
    /// `initial` serves handler-less routes registered before any handler.
    pub fn sticky(initial: Option<SharedHandler>) -> Self {
        Self {
            policy: DefaultPolicy::Sticky,
            last_handler: initial,
            ..Self::new()
        }
    }

    /// Replace the 404 catch-all
    pub fn fallback(mut self, handler: SharedHandler) -> Self {
        self.fallback = Some(handler);
        self
    }

    /// Register a route
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] if the same method filter and
    /// path are already registered.
    pub fn route(
        mut self,
        method: impl Into<MethodFilter>,
        path: impl Into<String>,
        handler: SharedHandler,
    ) -> ProxyResult<Self> {
        let method = method.into();
        let path = path.into();

        if self
            .routes
            .iter()
            .any(|r| r.method == method && r.path == path)
        {
            return Err(ProxyError::configuration_with_key(
                format!("duplicate route {method} {path}"),
                "routes",
            ));
        }

        self.last_handler = Some(Arc::clone(&handler));
        self.routes.push(Route {
            method,
            path,
            handler,
        });
        Ok(self)
    }

    /// Register a route served by the router's default handler
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Configuration`] on a duplicate route, or when
    /// the router has no default to give it.
    pub fn route_default(
        self,
        method: impl Into<MethodFilter>,
        path: impl Into<String>,
    ) -> ProxyResult<Self> {
        let method = method.into();
        let path = path.into();

        let handler = match &self.policy {
            DefaultPolicy::Fixed(handler) => Arc::clone(handler),
            DefaultPolicy::Sticky => self.last_handler.clone().ok_or_else(|| {
                ProxyError::configuration_with_key(
                    format!("route {method} {path} has no handler and none was registered before it"),
                    "routes",
                )
            })?,
            DefaultPolicy::None => {
                return Err(ProxyError::configuration_with_key(
                    format!("route {method} {path} has no handler and the router has no default"),
                    "routes",
                ));
            }
        };

        self.route(method, path, handler)
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn get(self, path: impl Into<String>, handler: SharedHandler) -> ProxyResult<Self> {
        self.route(Method::GET, path, handler)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn post(self, path: impl Into<String>, handler: SharedHandler) -> ProxyResult<Self> {
        self.route(Method::POST, path, handler)
    }

    /// Register a route for any method
    ///
    /// # Errors
    ///
    /// See [`route`](Self::route).
    pub fn any(self, path: impl Into<String>, handler: SharedHandler) -> ProxyResult<Self> {
        self.route(MethodFilter::Any, path, handler)
    }

    /// Registered routes in match order
    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Dispatch a request to the first matching route
    pub async fn dispatch(&self, request: ProxyRequest) -> ProxyResponse {
        let matched = self
            .routes
            .iter()
            .find(|r| r.method.matches(&request.method) && r.path == request.path);

        match matched {
            Some(route) => {
                debug!(method = %request.method, path = %request.path, route = ?route, "Dispatching");
                route.handler.handle(request).await
            }
            None => match &self.fallback {
                Some(fallback) => fallback.handle(request).await,
                None => not_found(&request),
            },
        }
    }
}

/// The default catch-all response
pub fn not_found(request: &ProxyRequest) -> ProxyResponse {
    debug!(method = %request.method, path = %request.path, "No route matched");
    ProxyResponse::err(
        404,
        format!("unknown {} endpoint {}", request.method, request.path),
    )
}
