// netpolicy-server/src/authorizer/tests.rs
// ============================================================================
// Module: Authorizer Tests
// Description: Unit tests for scopes, space checks, and quotas.
// Purpose: Validate access levels and the messages clients compare against.
// Dependencies: netpolicy-server, netpolicy-registry, tokio
// ============================================================================

//! ## Overview
//! Uses a fixed app-to-space registry fake.

// ============================================================================
// SECTION: Lint Configuration
// ============================================================================

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions use unwrap/expect for clarity."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use netpolicy_core::Policy;
use netpolicy_core::PortRange;
use netpolicy_core::Protocol;
use netpolicy_core::SecurityGroup;
use netpolicy_core::TaggedPolicy;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::IdentityError;
use netpolicy_registry::RegistryClient;
use netpolicy_registry::RegistryError;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::TokenInfo;
use time::OffsetDateTime;

use super::Access;
use super::Authorizer;
use super::INACCESSIBLE_APPS;
use super::QUOTA_EXCEEDED;
use super::RequiredScope;
use crate::error::ApiErrorKind;

// ============================================================================
// SECTION: Fakes
// ============================================================================

struct StaticIdentity;

#[async_trait]
impl IdentityClient for StaticIdentity {
    async fn get_token(&self) -> Result<String, IdentityError> {
        Ok("machine".to_string())
    }

    async fn check_token(&self, _token: &str) -> Result<TokenInfo, IdentityError> {
        Ok(TokenInfo::default())
    }
}

/// Apps `a1` and `a2` live in `space-1`; `b1` lives in `space-2`.
/// User `dev` develops in `space-1` only.
struct SpacesRegistry;

#[async_trait]
impl RegistryClient for SpacesRegistry {
    async fn get_live_app_guids(
        &self,
        _token: &str,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        Ok(app_guids.iter().cloned().collect())
    }

    async fn get_live_space_guids(
        &self,
        _token: &str,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        Ok(space_guids.iter().cloned().collect())
    }

    async fn get_app_spaces(
        &self,
        _token: &str,
        app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        let known = [("a1", "space-1"), ("a2", "space-1"), ("b1", "space-2")];
        Ok(known
            .iter()
            .filter(|(app, _)| app_guids.iter().any(|id| id == app))
            .map(|(app, space)| ((*app).to_string(), (*space).to_string()))
            .collect())
    }

    async fn get_subject_spaces(
        &self,
        _token: &str,
        subject: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        if subject == "dev" {
            Ok(BTreeSet::from(["space-1".to_string()]))
        } else {
            Ok(BTreeSet::new())
        }
    }

    async fn get_all_security_groups(
        &self,
        _token: &str,
    ) -> Result<Vec<SecurityGroup>, RegistryError> {
        Ok(Vec::new())
    }

    async fn get_security_groups_last_update(
        &self,
        _token: &str,
    ) -> Result<Option<OffsetDateTime>, RegistryError> {
        Ok(None)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn authorizer(max: u32, self_service: bool) -> Authorizer {
    let gateway = RegistryGateway::new(Arc::new(SpacesRegistry), Arc::new(StaticIdentity));
    Authorizer::new(Arc::new(gateway), max, self_service)
}

fn token(scopes: &[&str]) -> TokenInfo {
    TokenInfo {
        scope: scopes.iter().map(ToString::to_string).collect(),
        user_id: "dev".to_string(),
        user_name: "developer".to_string(),
        ..TokenInfo::default()
    }
}

fn policy(source: &str, destination: &str) -> Policy {
    Policy::new(source, destination, Protocol::Tcp, PortRange::single(8080))
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(ToString::to_string).collect()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn admin_scope_grants_admin_access_everywhere() {
    let auth = authorizer(10, false);
    let info = token(&["network.admin"]);
    assert_eq!(auth.access(&info, RequiredScope::Admin).unwrap(), Access::Admin);
    assert_eq!(auth.access(&info, RequiredScope::Write).unwrap(), Access::Admin);
}

#[test]
fn write_scope_is_restricted_and_cannot_use_admin_routes() {
    let auth = authorizer(10, false);
    let info = token(&["network.write"]);
    assert_eq!(auth.access(&info, RequiredScope::Write).unwrap(), Access::Restricted);
    let err = auth.access(&info, RequiredScope::Admin).unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Forbidden);
}

#[test]
fn missing_scopes_are_named_in_the_error() {
    let auth = authorizer(10, false);
    let err = auth.access(&token(&["wrong.scope"]), RequiredScope::Write).unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Forbidden);
    assert_eq!(
        err.message(),
        "provided scopes [wrong.scope] do not include allowed scopes [network.admin network.write]"
    );
}

#[test]
fn self_service_admits_scopeless_subjects_as_restricted() {
    let auth = authorizer(10, true);
    assert_eq!(auth.access(&token(&[]), RequiredScope::Write).unwrap(), Access::Restricted);
    assert!(auth.access(&token(&[]), RequiredScope::Admin).is_err());
}

#[tokio::test]
async fn restricted_write_within_own_space_is_allowed() {
    let auth = authorizer(10, false);
    auth.authorize_write(Access::Restricted, &token(&["network.write"]), &ids(&["a1", "a2"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn restricted_write_outside_space_is_forbidden() {
    let auth = authorizer(10, false);
    let err = auth
        .authorize_write(Access::Restricted, &token(&["network.write"]), &ids(&["a1", "b1"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::Forbidden);
    assert_eq!(err.message(), INACCESSIBLE_APPS);
}

#[tokio::test]
async fn restricted_write_to_unknown_app_is_forbidden() {
    let auth = authorizer(10, false);
    let err = auth
        .authorize_write(Access::Restricted, &token(&["network.write"]), &ids(&["a1", "ghost"]))
        .await
        .unwrap_err();
    assert_eq!(err.message(), INACCESSIBLE_APPS);
}

#[tokio::test]
async fn admin_write_skips_space_checks() {
    let auth = authorizer(10, false);
    auth.authorize_write(Access::Admin, &token(&["network.admin"]), &ids(&["ghost"]))
        .await
        .unwrap();
}

#[tokio::test]
async fn restricted_reads_keep_only_policies_inside_own_spaces() {
    let auth = authorizer(10, false);
    let policies = vec![
        TaggedPolicy {
            policy: policy("a1", "a2"),
            source_tag: None,
            destination_tag: None,
        },
        TaggedPolicy {
            policy: policy("a1", "b1"),
            source_tag: None,
            destination_tag: None,
        },
    ];
    let visible = auth
        .filter_readable(Access::Restricted, &token(&["network.write"]), policies.clone())
        .await
        .unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].policy, policy("a1", "a2"));

    let all = auth.filter_readable(Access::Admin, &token(&[]), policies).await.unwrap();
    assert_eq!(all.len(), 2);
}

#[test]
fn quota_counts_existing_plus_requested_per_source() {
    let auth = authorizer(3, false);
    let existing = BTreeMap::from([("a1".to_string(), 2_u64)]);
    auth.check_quota(Access::Restricted, &[policy("a1", "a2")], &existing).unwrap();

    let err = auth
        .check_quota(Access::Restricted, &[policy("a1", "a2"), policy("a1", "b1")], &existing)
        .unwrap_err();
    assert_eq!(err.kind(), ApiErrorKind::QuotaExceeded);
    assert_eq!(err.message(), QUOTA_EXCEEDED);
}

#[test]
fn admins_bypass_the_quota() {
    let auth = authorizer(1, false);
    let existing = BTreeMap::from([("a1".to_string(), 5_u64)]);
    auth.check_quota(Access::Admin, &[policy("a1", "a2")], &existing).unwrap();
}
