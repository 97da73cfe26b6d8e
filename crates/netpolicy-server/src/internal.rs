// netpolicy-server/src/internal.rs
// ============================================================================
// Module: Internal API Handlers
// Description: mTLS routes consumed by host agents.
// Purpose: Serve tagged policies, tag allocation, and ASG pages.
// Dependencies: axum, netpolicy-core
// ============================================================================

//! ## Overview
//! Callers are authenticated by their client certificate at the TLS layer, so
//! these handlers carry no token checks. Responses include rendered tags.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;

use axum::Extension;
use axum::Json;
use axum::body::Bytes;
use axum::extract::Query;
use axum::extract::State;
use netpolicy_core::Page;

use crate::error::ApiError;
use crate::http::SharedState;
use crate::tasks::run_blocking;
use crate::wire::ApiVersion;
use crate::wire::EgressPolicyWire;
use crate::wire::PoliciesResponse;
use crate::wire::PolicyWire;
use crate::wire::SecurityGroupsResponse;
use crate::wire::TagRequest;
use crate::wire::TagWire;
use crate::wire::parse_body;
use crate::wire::split_csv;

// ============================================================================
// SECTION: Handlers
// ============================================================================

/// `GET policies`: tagged policies touching `id`, or all of them.
///
/// # Errors
///
/// Returns [`ApiError`] when the store read fails.
pub async fn index_policies(
    State(state): State<SharedState>,
    Extension(version): Extension<ApiVersion>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<Json<PoliciesResponse>, ApiError> {
    let ids = split_csv(query.get("id"));
    let with_egress = state.options.dynamic_egress;
    let (policies, egress) = run_blocking(&state.store, move |store| {
        let policies =
            if ids.is_empty() { store.all()? } else { store.by_guids(&ids, &ids, false)? };
        let egress = match (with_egress, ids.is_empty()) {
            (false, _) => None,
            (true, true) => Some(store.egress_policies()?),
            (true, false) => Some(store.egress_policies_by_source_and_defaults(&ids)?),
        };
        Ok((policies, egress))
    })
    .await
    .map_err(|err| ApiError::from_store(err, "database read failed"))?;
    let width = state.store.tag_width();
    let wires = policies
        .iter()
        .map(|tagged| PolicyWire::from_tagged(tagged, version, Some(width)))
        .collect();
    let response = PoliciesResponse::new(wires);
    Ok(Json(match egress {
        Some(egress) => response.with_egress(
            egress
                .iter()
                .map(|resolved| EgressPolicyWire::from_resolved(resolved, width))
                .collect(),
        ),
        None => response,
    }))
}

/// `GET policies_last_updated`: the store's version counter, bumped on every
/// policy or egress write.
///
/// # Errors
///
/// Returns [`ApiError`] when the store read fails.
pub async fn policies_last_updated(
    State(state): State<SharedState>,
) -> Result<Json<i64>, ApiError> {
    let updated = run_blocking(&state.store, |store| store.last_updated())
        .await
        .map_err(|err| ApiError::from_store(err, "database read failed"))?;
    Ok(Json(updated))
}

/// `PUT tags`: returns the tag for a group, allocating one if needed.
///
/// # Errors
///
/// Returns [`ApiError`] for a bad body, a type conflict, exhaustion, or a
/// store failure.
pub async fn create_tag(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<TagWire>, ApiError> {
    let group = parse_body::<TagRequest>(&body)?.into_group()?;
    let requested = group.clone();
    let tag = run_blocking(&state.store, move |store| store.create_tag(&requested))
        .await
        .map_err(|err| ApiError::from_store(err, "failed to create tag"))?;
    Ok(Json(TagWire::new(&group, tag, state.store.tag_width())))
}

/// `GET security_groups`: one page of ASGs for `space_guids`.
///
/// `from` and `limit` page through rows; `next` of zero marks the end.
///
/// # Errors
///
/// Returns [`ApiError`] for a bad cursor or a store failure.
pub async fn security_groups(
    State(state): State<SharedState>,
    Query(query): Query<BTreeMap<String, String>>,
) -> Result<Json<SecurityGroupsResponse>, ApiError> {
    let space_guids = split_csv(query.get("space_guids"));
    let page = Page {
        from: parse_number(query.get("from"), "from")?,
        limit: parse_number(query.get("limit"), "limit")?,
    };
    let (groups, pagination) =
        run_blocking(&state.store, move |store| store.by_space_guids(&space_guids, page))
            .await
            .map_err(|err| ApiError::from_store(err, "database read failed"))?;
    Ok(Json(SecurityGroupsResponse::new(&groups, pagination)))
}

/// Parses an optional non-negative numeric query value; absent means zero.
fn parse_number<T>(value: Option<&String>, name: &str) -> Result<T, ApiError>
where
    T: std::str::FromStr + Default + PartialOrd,
{
    let Some(text) = value.map(|text| text.trim()).filter(|text| !text.is_empty()) else {
        return Ok(T::default());
    };
    text.parse::<T>()
        .ok()
        .filter(|number| *number >= T::default())
        .ok_or_else(|| ApiError::validation(format!("invalid {name} parameter")))
}
