// netpolicy-server/src/http.rs
// ============================================================================
// Module: HTTP Surface
// Description: Shared state, route tables, and routers for both listeners.
// Purpose: Assemble handlers and middleware into axum routers.
// Dependencies: axum, netpolicy-config, netpolicy-core, netpolicy-registry
// ============================================================================

//! ## Overview
//! Every route is registered through [`RouteTable`], which also records the
//! methods per path pattern so CORS preflight can list them. Layer order on
//! matched routes, outermost first: observation, version check, deadline.
//! Security headers wrap everything, unmatched paths included.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Extension;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use axum::middleware::from_fn;
use axum::middleware::from_fn_with_state;
use axum::routing::MethodRouter;
use axum::routing::delete;
use axum::routing::get;
use axum::routing::post;
use axum::routing::put;
use netpolicy_config::NetPolicyConfig;
use netpolicy_core::SharedDatastore;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::IdentityError;
use netpolicy_registry::TokenInfo;

use crate::audit::AuditSink;
use crate::authorizer::Authorizer;
use crate::cleanup::PolicyCleaner;
use crate::error::ApiError;
use crate::external;
use crate::internal;
use crate::middleware;
use crate::middleware::HeaderPolicy;
use crate::middleware::Observer;
use crate::telemetry::Listener;
use crate::telemetry::PolicyMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Message for tokens the identity server would not verify.
pub const TOKEN_CHECK_FAILED: &str = "failed to verify token with uaa";
/// Message for requests without a bearer token.
pub const MISSING_TOKEN: &str = "missing authorization header";

// ============================================================================
// SECTION: State
// ============================================================================

/// Listener options derived from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Per-request deadline.
    pub request_timeout: Duration,
    /// Body cap on authenticated routes.
    pub max_body_bytes: usize,
    /// External listener serves TLS.
    pub enable_tls: bool,
    /// Origins answered with `Access-Control-Allow-Origin`.
    pub allowed_cors_domains: Vec<String>,
    /// Include egress policies on the internal policies route.
    pub dynamic_egress: bool,
}

impl ServerOptions {
    /// Reads options from configuration.
    #[must_use]
    pub fn from_config(config: &NetPolicyConfig) -> Self {
        Self {
            request_timeout: config.server.request_timeout(),
            max_body_bytes: config.server.max_body_bytes,
            enable_tls: config.server.enable_tls,
            allowed_cors_domains: config.server.allowed_cors_domains.clone(),
            dynamic_egress: config.policy.enable_experimental_dynamic_egress_policies,
        }
    }
}

/// State shared by every handler.
pub struct AppState {
    /// Policy, ASG, and egress store.
    pub store: SharedDatastore,
    /// Bearer token verification.
    pub identity: Arc<dyn IdentityClient>,
    /// Scope, space, and quota checks.
    pub authorizer: Authorizer,
    /// On-demand cleanup.
    pub cleaner: Arc<PolicyCleaner>,
    /// Metrics sink.
    pub metrics: Arc<dyn PolicyMetrics>,
    /// Request audit sink.
    pub audit: Arc<dyn AuditSink>,
    /// Listener options.
    pub options: ServerOptions,
    /// Process start, for the uptime routes.
    pub started_at: Instant,
}

/// Shared handler state.
pub type SharedState = Arc<AppState>;

// ============================================================================
// SECTION: Authentication
// ============================================================================

/// Verifies the bearer token on a request.
///
/// # Errors
///
/// Returns 401 for a missing or rejected token and 500 when the identity
/// server cannot be reached.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<TokenInfo, ApiError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::unauthenticated(MISSING_TOKEN))?;
    let token = header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .unwrap_or(header)
        .trim();
    if token.is_empty() {
        return Err(ApiError::unauthenticated(MISSING_TOKEN));
    }
    state.identity.check_token(token).await.map_err(|err| match err {
        IdentityError::BadResponse {
            status: 400 | 401 | 403,
            ..
        } => {
            tracing::info!(error = %err, "bearer token rejected");
            ApiError::unauthenticated(TOKEN_CHECK_FAILED)
        }
        other => ApiError::transient(TOKEN_CHECK_FAILED, &other),
    })
}

// ============================================================================
// SECTION: Route Tables
// ============================================================================

/// Methods registered per path pattern, rendered for preflight replies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorsTable {
    /// `GET,POST`-style method lists by path pattern.
    methods: BTreeMap<String, String>,
}

impl CorsTable {
    /// Returns the method list for a path pattern.
    #[must_use]
    pub fn methods(&self, pattern: &str) -> Option<&str> {
        self.methods.get(pattern).map(String::as_str)
    }
}

/// Router under construction plus its method table.
pub struct RouteTable {
    /// Routes registered so far.
    router: Router<SharedState>,
    /// Methods per path pattern.
    cors: CorsTable,
}

impl RouteTable {
    /// Starts an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            cors: CorsTable::default(),
        }
    }

    /// Registers `handler` for `path` and answers preflight for it.
    #[must_use]
    pub fn route(
        mut self,
        path: &str,
        methods: &[&str],
        handler: MethodRouter<SharedState>,
    ) -> Self {
        self.cors.methods.insert(path.to_string(), methods.join(","));
        self.router = self.router.route(path, handler.options(middleware::preflight));
        self
    }

    /// Returns the router and its method table.
    #[must_use]
    pub fn finish(self) -> (Router<SharedState>, CorsTable) {
        (self.router, self.cors)
    }
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SECTION: Routers
// ============================================================================

/// Path prefix for external routes.
const EXTERNAL: &str = "/networking/{version}/external";
/// Path prefix for internal routes.
const INTERNAL: &str = "/networking/{version}/internal";

/// Builds the bearer-authenticated external router.
#[must_use]
pub fn external_router(state: SharedState) -> Router {
    let (authenticated, mut cors) = RouteTable::new()
        .route(
            &format!("{EXTERNAL}/policies"),
            &["GET", "POST"],
            get(external::index_policies).post(external::create_policies),
        )
        .route(&format!("{EXTERNAL}/policies/delete"), &["POST"], post(external::delete_policies))
        .route(&format!("{EXTERNAL}/policies/cleanup"), &["POST"], post(external::cleanup_policies))
        .route(&format!("{EXTERNAL}/tags"), &["GET"], get(external::index_tags))
        .route(&format!("{EXTERNAL}/whoami"), &["GET"], get(external::whoami))
        .route(
            &format!("{EXTERNAL}/destinations"),
            &["GET", "POST", "PUT"],
            get(external::index_destinations)
                .post(external::create_destinations)
                .put(external::update_destinations),
        )
        .route(
            &format!("{EXTERNAL}/destinations/{{guid}}"),
            &["DELETE"],
            delete(external::delete_destination),
        )
        .route(
            &format!("{EXTERNAL}/egress_policies"),
            &["GET", "POST"],
            get(external::index_egress_policies).post(external::create_egress_policies),
        )
        .route(
            &format!("{EXTERNAL}/egress_policies/{{guid}}"),
            &["DELETE"],
            delete(external::delete_egress_policy),
        )
        .finish();
    let authenticated = authenticated.layer(DefaultBodyLimit::max(state.options.max_body_bytes));
    let (open, open_cors) = RouteTable::new()
        .route("/", &["GET"], get(external::uptime))
        .route("/networking", &["GET"], get(external::uptime))
        .route("/health", &["GET"], get(external::health))
        .finish();
    cors.methods.extend(open_cors.methods);
    let headers = HeaderPolicy::new(state.options.enable_tls, &state.options.allowed_cors_domains);
    finish_router(authenticated.merge(open), cors, headers, Listener::External, state)
}

/// Builds the mTLS internal router.
#[must_use]
pub fn internal_router(state: SharedState) -> Router {
    let (router, cors) = RouteTable::new()
        .route(&format!("{INTERNAL}/policies"), &["GET"], get(internal::index_policies))
        .route(
            &format!("{INTERNAL}/policies_last_updated"),
            &["GET"],
            get(internal::policies_last_updated),
        )
        .route(&format!("{INTERNAL}/tags"), &["PUT"], put(internal::create_tag))
        .route(&format!("{INTERNAL}/security_groups"), &["GET"], get(internal::security_groups))
        .finish();
    let router = router.layer(DefaultBodyLimit::max(state.options.max_body_bytes));
    let headers = HeaderPolicy::new(true, &state.options.allowed_cors_domains);
    finish_router(router, cors, headers, Listener::Internal, state)
}

/// Applies the shared middleware stack and state.
fn finish_router(
    router: Router<SharedState>,
    cors: CorsTable,
    headers: HeaderPolicy,
    listener: Listener,
    state: SharedState,
) -> Router {
    let observer = Observer::new(Arc::clone(&state), listener);
    router
        .route_layer(from_fn_with_state(Arc::clone(&state), middleware::deadline))
        .route_layer(from_fn(middleware::check_version))
        .route_layer(from_fn_with_state(observer, middleware::observe))
        .layer(Extension(Arc::new(cors)))
        .layer(from_fn_with_state(headers, middleware::security_headers))
        .with_state(state)
}
