// netpolicy-server/src/external.rs
// ============================================================================
// Module: External API Handlers
// Description: Bearer-authenticated policy, tag, and egress routes.
// Purpose: Serve operators and space developers.
// Dependencies: axum, netpolicy-core, serde_json
// ============================================================================

//! ## Overview
//! Each handler authenticates, resolves the access level for its scope,
//! parses the body through [`crate::wire`], and runs store work on the
//! blocking pool. Index responses never carry tags. Destination and egress
//! policy routes exist only under v1; v0 answers them with 404.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use axum::Extension;
use axum::Json;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::Query;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use netpolicy_registry::TokenInfo;
use serde_json::Value;
use serde_json::json;

use crate::authorizer::Access;
use crate::authorizer::RequiredScope;
use crate::error::ApiError;
use crate::http::AppState;
use crate::http::SharedState;
use crate::http::authenticate;
use crate::tasks::run_blocking;
use crate::wire::ApiVersion;
use crate::wire::DestinationsRequest;
use crate::wire::DestinationsResponse;
use crate::wire::EgressPoliciesRequest;
use crate::wire::EgressPoliciesResponse;
use crate::wire::EgressPolicyWire;
use crate::wire::PoliciesRequest;
use crate::wire::PoliciesResponse;
use crate::wire::PolicyWire;
use crate::wire::TagWire;
use crate::wire::TagsResponse;
use crate::wire::parse_body;
use crate::wire::policy_app_ids;
use crate::wire::split_csv;

/// Query parameters as sent.
type QueryMap = BTreeMap<String, String>;

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Authenticates the request and resolves its access level.
async fn authorize(
    state: &AppState,
    headers: &HeaderMap,
    required: RequiredScope,
) -> Result<(TokenInfo, Access), ApiError> {
    let info = authenticate(state, headers).await?;
    let access = state.authorizer.access(&info, required)?;
    Ok((info, access))
}

/// Rejects v1-only routes on older versions.
fn require_v1(version: ApiVersion) -> Result<(), ApiError> {
    match version {
        ApiVersion::V1 => Ok(()),
        ApiVersion::V0 => Err(ApiError::not_found("not found")),
    }
}

/// Empty JSON object returned by write routes.
fn empty_object() -> Json<Value> {
    Json(json!({}))
}

// ============================================================================
// SECTION: C2C Policies
// ============================================================================

/// `POST policies`: creates policies, enforcing space access and quota.
///
/// # Errors
///
/// Returns [`ApiError`] for auth, validation, quota, or store failures.
pub async fn create_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let (info, access) = authorize(&state, &headers, RequiredScope::Write).await?;
    let policies = parse_body::<PoliciesRequest>(&body)?.into_policies(version)?;
    state.authorizer.authorize_write(access, &info, &policy_app_ids(&policies)).await?;
    if access == Access::Restricted {
        let sources: Vec<String> = policies
            .iter()
            .map(|policy| policy.source_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let existing = run_blocking(&state.store, move |store| store.count_by_source(&sources))
            .await
            .map_err(|err| ApiError::from_store(err, "database read failed"))?;
        state.authorizer.check_quota(access, &policies, &existing)?;
    }
    let created = policies.len();
    run_blocking(&state.store, move |store| store.create_policies(&policies))
        .await
        .map_err(|err| ApiError::from_store(err, "database create failed"))?;
    tracing::info!(count = created, "created policies");
    Ok(empty_object())
}

/// `POST policies/delete`: deletes matching policies; absent ones are ignored.
///
/// # Errors
///
/// Returns [`ApiError`] for auth, validation, or store failures.
pub async fn delete_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let (info, access) = authorize(&state, &headers, RequiredScope::Write).await?;
    let policies = parse_body::<PoliciesRequest>(&body)?.into_policies(version)?;
    state.authorizer.authorize_write(access, &info, &policy_app_ids(&policies)).await?;
    let requested = policies.len();
    run_blocking(&state.store, move |store| store.delete_policies(&policies))
        .await
        .map_err(|err| ApiError::from_store(err, "database delete failed"))?;
    tracing::info!(count = requested, "deleted policies");
    Ok(empty_object())
}

/// `GET policies`: lists policies visible to the caller, without tags.
///
/// `id` matches either endpoint. `source_id` and `dest_id` together require
/// both endpoints to match.
///
/// # Errors
///
/// Returns [`ApiError`] for auth or store failures.
pub async fn index_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    Query(query): Query<QueryMap>,
) -> Result<Json<PoliciesResponse>, ApiError> {
    let (info, access) = authorize(&state, &headers, RequiredScope::Write).await?;
    let ids = split_csv(query.get("id"));
    let sources = split_csv(query.get("source_id"));
    let destinations = split_csv(query.get("dest_id"));
    let policies = run_blocking(&state.store, move |store| {
        if !ids.is_empty() {
            store.by_guids(&ids, &ids, false)
        } else if !sources.is_empty() || !destinations.is_empty() {
            let both = !sources.is_empty() && !destinations.is_empty();
            store.by_guids(&sources, &destinations, both)
        } else {
            store.all()
        }
    })
    .await
    .map_err(|err| ApiError::from_store(err, "database read failed"))?;
    let visible = state.authorizer.filter_readable(access, &info, policies).await?;
    let wires =
        visible.iter().map(|tagged| PolicyWire::from_policy(&tagged.policy, version)).collect();
    Ok(Json(PoliciesResponse::new(wires)))
}

/// `POST policies/cleanup`: deletes policies whose apps are gone.
///
/// # Errors
///
/// Returns [`ApiError`] for auth failures or a failed cleanup cycle.
pub async fn cleanup_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
) -> Result<Json<PoliciesResponse>, ApiError> {
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let deleted = state
        .cleaner
        .delete_stale_policies()
        .await
        .map_err(|err| ApiError::transient("policies cleanup failed", &err))?;
    let wires = deleted.iter().map(|policy| PolicyWire::from_policy(policy, version)).collect();
    Ok(Json(PoliciesResponse::new(wires)))
}

// ============================================================================
// SECTION: Tags and Identity
// ============================================================================

/// `GET tags`: lists every allocated tag.
///
/// # Errors
///
/// Returns [`ApiError`] for auth or store failures.
pub async fn index_tags(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<TagsResponse>, ApiError> {
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let width = state.store.tag_width();
    let records = run_blocking(&state.store, |store| store.tags())
        .await
        .map_err(|err| ApiError::from_store(err, "database read failed"))?;
    Ok(Json(TagsResponse {
        tags: records.iter().map(|record| TagWire::from_record(record, width)).collect(),
    }))
}

/// `GET whoami`: echoes the token subject.
///
/// # Errors
///
/// Returns [`ApiError`] when the token does not verify.
pub async fn whoami(
    State(state): State<SharedState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let info = authenticate(&state, &headers).await?;
    let subject = if info.user_name.is_empty() { &info.client_id } else { &info.user_name };
    Ok(Json(json!({ "subject": subject })))
}

// ============================================================================
// SECTION: Egress Destinations
// ============================================================================

/// `GET destinations`: lists destinations, optionally filtered by `id`/`name`.
///
/// # Errors
///
/// Returns [`ApiError`] for auth or store failures.
pub async fn index_destinations(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    Query(query): Query<QueryMap>,
) -> Result<Json<DestinationsResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let guids = split_csv(query.get("id"));
    let names = split_csv(query.get("name"));
    let destinations = run_blocking(&state.store, move |store| store.destinations(&guids, &names))
        .await
        .map_err(|err| ApiError::from_store(err, "error getting egress destinations"))?;
    Ok(Json(DestinationsResponse::new(&destinations)))
}

/// `POST destinations`: creates destinations.
///
/// # Errors
///
/// Returns [`ApiError`] for auth, validation, name conflicts, or store failures.
pub async fn create_destinations(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DestinationsResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let destinations = parse_body::<DestinationsRequest>(&body)?.into_destinations(false)?;
    let created = run_blocking(&state.store, move |store| store.create_destinations(&destinations))
        .await
        .map_err(|err| ApiError::from_store(err, "error creating egress destinations"))?;
    Ok(Json(DestinationsResponse::new(&created)))
}

/// `PUT destinations`: replaces destinations by guid.
///
/// # Errors
///
/// Returns [`ApiError`] for auth, validation, unknown guids, or store failures.
pub async fn update_destinations(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DestinationsResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let destinations = parse_body::<DestinationsRequest>(&body)?.into_destinations(true)?;
    let updated = run_blocking(&state.store, move |store| store.update_destinations(&destinations))
        .await
        .map_err(|err| ApiError::from_store(err, "error updating egress destinations"))?;
    Ok(Json(DestinationsResponse::new(&updated)))
}

/// `DELETE destinations/{guid}`: deletes an unreferenced destination.
///
/// # Errors
///
/// Returns [`ApiError`] for auth failures, unknown or still-referenced
/// destinations, or store failures.
pub async fn delete_destination(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    Path((_, guid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<DestinationsResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let deleted = run_blocking(&state.store, move |store| store.delete_destination(&guid))
        .await
        .map_err(|err| ApiError::from_store(err, "error deleting egress destination"))?;
    Ok(Json(DestinationsResponse::new(std::slice::from_ref(&deleted))))
}

// ============================================================================
// SECTION: Egress Policies
// ============================================================================

/// `GET egress_policies`: lists every egress policy.
///
/// # Errors
///
/// Returns [`ApiError`] for auth or store failures.
pub async fn index_egress_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
) -> Result<Json<EgressPoliciesResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let resolved = run_blocking(&state.store, |store| store.egress_policies())
        .await
        .map_err(|err| ApiError::from_store(err, "error listing egress policies"))?;
    Ok(Json(EgressPoliciesResponse::new(
        resolved.iter().map(|entry| EgressPolicyWire::from_policy(&entry.policy)).collect(),
    )))
}

/// `POST egress_policies`: creates egress policies against existing destinations.
///
/// # Errors
///
/// Returns [`ApiError`] for auth, validation, unknown destinations, or store
/// failures.
pub async fn create_egress_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<EgressPoliciesResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let policies = parse_body::<EgressPoliciesRequest>(&body)?.into_policies()?;
    let created = run_blocking(&state.store, move |store| store.create_egress_policies(&policies))
        .await
        .map_err(|err| ApiError::from_store(err, "error creating egress policies"))?;
    Ok(Json(EgressPoliciesResponse::new(
        created.iter().map(EgressPolicyWire::from_policy).collect(),
    )))
}

/// `DELETE egress_policies/{guid}`: deletes one egress policy.
///
/// # Errors
///
/// Returns [`ApiError`] for auth failures, unknown guids, or store failures.
pub async fn delete_egress_policy(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    Path((_, guid)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<EgressPoliciesResponse>, ApiError> {
    require_v1(version)?;
    authorize(&state, &headers, RequiredScope::Admin).await?;
    let deleted = run_blocking(&state.store, move |store| store.delete_egress_policy(&guid))
        .await
        .map_err(|err| ApiError::from_store(err, "error deleting egress policy"))?;
    Ok(Json(EgressPoliciesResponse::new(vec![EgressPolicyWire::from_policy(&deleted)])))
}

// ============================================================================
// SECTION: Unauthenticated
// ============================================================================

/// `GET /` and `GET /networking`: reports uptime.
pub async fn uptime(State(state): State<SharedState>) -> String {
    format!("Network policy server, up for {}s", state.started_at.elapsed().as_secs())
}

/// `GET /health`: pings the database.
pub async fn health(State(state): State<SharedState>) -> Response {
    match run_blocking(&state.store, |store| store.check_database()).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "healthy": true }))).into_response(),
        Err(err) => ApiError::transient("health check failed", &err).into_response(),
    }
}
