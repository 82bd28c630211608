//! HTTP boundary
//!
//! A single axum fallback handler turns every request into a
//! [`ProxyRequest`], runs it through the proxy [`Router`], and writes the
//! [`ProxyResponse`] back. Routing stays in [`crate::router`] so the same
//! table works without axum.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, ProxyResult};
use crate::handlers::{ProxyState, build_router};
use crate::router::Router;
use crate::types::{BodyKind, ProxyRequest, ProxyResponse};

/// Largest accepted request body
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:3000";

/// How often expired challenges are purged
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Build the axum application around a route table
pub fn app(router: Router, body_limit: usize) -> axum::Router {
    axum::Router::new()
        .fallback(dispatch)
        .with_state(Arc::new(router))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
}

async fn dispatch(
    State(router): State<Arc<Router>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match to_proxy_request(method, &uri, &headers, &body) {
        Ok(request) => request,
        Err(response) => return into_response(response),
    };
    into_response(router.dispatch(request).await)
}

/// Normalize an HTTP request
///
/// # Errors
///
/// Returns a 400 response if the body is declared JSON but does not parse.
pub fn to_proxy_request(
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ProxyRequest, ProxyResponse> {
    let mut request = ProxyRequest::new(method, uri.path());

    request.query = url::form_urlencoded::parse(uri.query().unwrap_or_default().as_bytes())
        .into_owned()
        .collect();

    for name in headers.keys() {
        let values: Vec<&str> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if !values.is_empty() {
            request
                .headers
                .insert(name.as_str().to_ascii_lowercase(), values.join(", "));
        }
    }

    if body.is_empty() {
        return Ok(request);
    }

    let content_type = request
        .header("content-type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let fields = url::form_urlencoded::parse(body)
            .into_owned()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        request.body = Value::Object(fields);
        request.body_kind = BodyKind::Form;
        return Ok(request);
    }

    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            request.body = value;
            request.body_kind = BodyKind::Json;
        }
        Err(e) if content_type.contains("json") => {
            debug!(error = %e, "Rejecting malformed JSON body");
            return Err(ProxyResponse::err(400, format!("invalid JSON body: {e}")));
        }
        Err(_) => {
            request.body = Value::String(String::from_utf8_lossy(body).into_owned());
            request.body_kind = BodyKind::Text;
        }
    }

    Ok(request)
}

/// Convert a handler result to HTTP
pub fn into_response(response: ProxyResponse) -> Response {
    let status = StatusCode::from_u16(response.status_code).unwrap_or_else(|_| {
        warn!(status = response.status_code, "Handler returned invalid status");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let body = response.body_text();
    let default_content_type = match &response.body {
        Value::Null => None,
        Value::String(_) => Some("text/plain; charset=utf-8"),
        _ => Some("application/json"),
    };

    let mut http_response = (status, Body::from(body)).into_response();
    let headers = http_response.headers_mut();

    for (name, value) in &response.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Dropping invalid response header"),
        }
    }

    if let Some(content_type) = default_content_type
        && !headers.contains_key(header::CONTENT_TYPE)
    {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    http_response
}

/// Periodically drop expired challenges
pub fn spawn_purge_task(state: ProxyState, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        // first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = state.purge_expired_challenges().await;
            if purged > 0 {
                info!(purged, "Purged expired PKCE challenges");
            }
        }
    })
}

/// Serve the proxy until Ctrl-C
///
/// # Errors
///
/// Returns [`ProxyError::Configuration`] if the route table is invalid and
/// [`ProxyError::Io`] if binding or serving fails.
pub async fn serve(state: ProxyState, bind: &str, body_limit: usize) -> ProxyResult<()> {
    let router = build_router(&state)?;
    for route in router.routes() {
        debug!(route = ?route, "Registered route");
    }

    let purge = state
        .config
        .challenge_max_age
        .map(|_| spawn_purge_task(state.clone(), DEFAULT_PURGE_INTERVAL));

    let listener = tokio::net::TcpListener::bind(bind).await.map_err(|e| {
        ProxyError::Io(std::io::Error::new(
            e.kind(),
            format!("Failed to bind to {bind}: {e}"),
        ))
    })?;

    info!(
        bind = %bind,
        idp = %state.config.idp_base_url,
        pkce_mode = ?state.config.pkce_mode,
        embed_status_code = state.config.embed_status_code,
        "Gigya proxy listening"
    );

    let result = axum::serve(listener, app(router, body_limit))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(purge) = purge {
        purge.abort();
    }

    result?;
    info!("Gigya proxy stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
