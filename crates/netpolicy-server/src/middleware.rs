// netpolicy-server/src/middleware.rs
// ============================================================================
// Module: HTTP Middleware
// Description: Version gating, deadlines, observation, and response headers.
// Purpose: Apply cross-cutting request behavior once for every route.
// Dependencies: axum, tokio, tracing
// ============================================================================

//! ## Overview
//! - [`check_version`] rejects unknown `/networking/{version}` segments with
//!   406 and hands the parsed [`ApiVersion`] to handlers as an extension.
//! - [`deadline`] bounds each request by the configured timeout.
//! - [`observe`] records metrics and the audit event after the response.
//! - [`security_headers`] stamps browser hardening and CORS headers on every
//!   response, including 404s for unmatched paths.
//! - [`preflight`] answers `OPTIONS` with the methods registered for the path.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::Extension;
use axum::extract::MatchedPath;
use axum::extract::Request;
use axum::extract::State;
use axum::http::HeaderValue;
use axum::http::StatusCode;
use axum::http::header;
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::response::Response;

use crate::audit::RequestAuditEvent;
use crate::audit::RequestAuditParams;
use crate::error::ApiError;
use crate::error::ApiErrorKind;
use crate::http::CorsTable;
use crate::http::SharedState;
use crate::telemetry::Listener;
use crate::telemetry::Outcome;
use crate::telemetry::RequestMetric;
use crate::wire::ApiVersion;

// ============================================================================
// SECTION: Version Gate
// ============================================================================

/// Returns the path segment following `networking`, if any.
fn version_segment(path: &str) -> Option<&str> {
    let mut segments = path.split('/').filter(|segment| !segment.is_empty());
    segments.find(|segment| *segment == "networking")?;
    segments.next()
}

/// Parses the API version from the path and rejects unknown versions.
pub async fn check_version(mut request: Request, next: Next) -> Response {
    if let Some(segment) = version_segment(request.uri().path()) {
        match ApiVersion::from_str(segment) {
            Ok(version) => {
                request.extensions_mut().insert(version);
            }
            Err(err) => return err.into_response(),
        }
    }
    next.run(request).await
}

// ============================================================================
// SECTION: Deadline
// ============================================================================

/// Fails requests that outlive the configured timeout.
pub async fn deadline(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    match tokio::time::timeout(state.options.request_timeout, next.run(request)).await {
        Ok(response) => response,
        Err(_) => ApiError::new(ApiErrorKind::Timeout, "request timed out").into_response(),
    }
}

// ============================================================================
// SECTION: Observation
// ============================================================================

/// State for [`observe`].
#[derive(Clone)]
pub struct Observer {
    /// Handler state carrying the sinks.
    state: SharedState,
    /// Listener label.
    listener: Listener,
}

impl Observer {
    /// Builds an observer for one listener.
    #[must_use]
    pub const fn new(state: SharedState, listener: Listener) -> Self {
        Self {
            state,
            listener,
        }
    }
}

/// Records the request metric, latency, and audit event.
pub async fn observe(State(observer): State<Observer>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().as_str().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path().to_string(), |path| path.as_str().to_string());
    let request_bytes = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0);
    let response = next.run(request).await;
    let elapsed = started.elapsed();
    let status = response.status().as_u16();
    let metric = RequestMetric {
        listener: observer.listener,
        method: method.clone(),
        route: route.clone(),
        status,
        outcome: Outcome::from_status(status),
    };
    let state = &observer.state;
    state.metrics.record_request(&metric);
    state.metrics.record_latency(&metric, elapsed);
    state.audit.record(&RequestAuditEvent::new(RequestAuditParams {
        listener: observer.listener,
        method,
        route,
        status,
        request_bytes,
        latency_ms: elapsed.as_millis(),
    }));
    tracing::debug!(
        listener = observer.listener.as_str(),
        route = %metric.route,
        status,
        "request served"
    );
    response
}

// ============================================================================
// SECTION: Response Headers
// ============================================================================

/// Header settings for one listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPolicy {
    /// Emit `Strict-Transport-Security`.
    hsts: bool,
    /// Origins echoed in `Access-Control-Allow-Origin`; `*` allows all.
    allowed_origins: Arc<[String]>,
}

impl HeaderPolicy {
    /// Builds a header policy.
    #[must_use]
    pub fn new(hsts: bool, allowed_origins: &[String]) -> Self {
        Self {
            hsts,
            allowed_origins: allowed_origins.into(),
        }
    }

    /// Returns the `Access-Control-Allow-Origin` value for a request origin.
    fn allow_origin(&self, origin: Option<&HeaderValue>) -> Option<HeaderValue> {
        if self.allowed_origins.iter().any(|allowed| allowed == "*") {
            return Some(HeaderValue::from_static("*"));
        }
        let origin = origin?;
        let text = origin.to_str().ok()?;
        self.allowed_origins.iter().any(|allowed| allowed == text).then(|| origin.clone())
    }
}

/// Adds hardening and CORS headers to every response.
pub async fn security_headers(
    State(policy): State<HeaderPolicy>,
    request: Request,
    next: Next,
) -> Response {
    let allow_origin = policy.allow_origin(request.headers().get(header::ORIGIN));
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("deny"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("frame-ancestors 'none'"),
    );
    headers.insert(header::X_XSS_PROTECTION, HeaderValue::from_static("1; mode=block"));
    if policy.hsts {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=31536000"),
        );
    }
    if let Some(value) = allow_origin {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    response
}

// ============================================================================
// SECTION: Preflight
// ============================================================================

/// Answers CORS preflight with the methods registered for the path.
pub async fn preflight(path: MatchedPath, Extension(table): Extension<Arc<CorsTable>>) -> Response {
    let methods = table.methods(path.as_str()).unwrap_or_default();
    let mut response = StatusCode::OK.into_response();
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(methods) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, value);
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static("authorization"));
    response
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::missing_docs_in_private_items, reason = "Test functions are self-describing.")]
mod tests {
    use super::HeaderPolicy;
    use super::version_segment;
    use axum::http::HeaderValue;

    #[test]
    fn version_segment_follows_networking() {
        assert_eq!(version_segment("/networking/v1/external/policies"), Some("v1"));
        assert_eq!(version_segment("/networking"), None);
        assert_eq!(version_segment("/health"), None);
    }

    #[test]
    fn wildcard_origin_allows_everyone() {
        let policy = HeaderPolicy::new(false, &["*".to_string()]);
        assert_eq!(policy.allow_origin(None), Some(HeaderValue::from_static("*")));
    }

    #[test]
    fn listed_origins_are_echoed() {
        let policy = HeaderPolicy::new(false, &["https://a.example".to_string()]);
        let origin = HeaderValue::from_static("https://a.example");
        assert_eq!(policy.allow_origin(Some(&origin)), Some(origin.clone()));
        let other = HeaderValue::from_static("https://b.example");
        assert_eq!(policy.allow_origin(Some(&other)), None);
    }
}
