// netpolicy-server/src/authorizer.rs
// ============================================================================
// Module: Policy Authorizer
// Description: Scope checks, space-based access, and per-source quotas.
// Purpose: Decide whether a subject may read or write the given policies.
// Dependencies: netpolicy-core, netpolicy-registry
// ============================================================================

//! ## Overview
//! `network.admin` is unrestricted. `network.write` subjects, and any
//! authenticated subject when space-developer self service is on, are
//! restricted to apps in spaces they develop in. Space lookups go through the
//! registry gateway on every call.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use netpolicy_core::Policy;
use netpolicy_core::TaggedPolicy;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::TokenInfo;

use crate::error::ApiError;
use crate::error::ApiErrorKind;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Unrestricted scope.
pub const ADMIN_SCOPE: &str = "network.admin";
/// Space-restricted write scope.
pub const WRITE_SCOPE: &str = "network.write";
/// Message returned when an app is unknown or outside the subject's spaces.
pub const INACCESSIBLE_APPS: &str = "one or more applications cannot be found or accessed";
/// Message returned when a source would exceed its quota.
pub const QUOTA_EXCEEDED: &str = "policy quota exceeded";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Access level granted to an authenticated subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Every policy.
    Admin,
    /// Policies between apps in the subject's spaces.
    Restricted,
}

/// Scope a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredScope {
    /// `network.admin` only.
    Admin,
    /// `network.admin` or `network.write`.
    Write,
}

/// Space-aware authorizer.
pub struct Authorizer {
    /// Registry access for space lookups.
    gateway: Arc<RegistryGateway>,
    /// Per-source policy cap for restricted subjects.
    max_policies_per_source: u32,
    /// Treat scope-less subjects as restricted writers.
    self_service: bool,
}

impl Authorizer {
    /// Builds an authorizer.
    #[must_use]
    pub fn new(
        gateway: Arc<RegistryGateway>,
        max_policies_per_source: u32,
        self_service: bool,
    ) -> Self {
        Self {
            gateway,
            max_policies_per_source,
            self_service,
        }
    }

    /// Resolves the access level for a route.
    ///
    /// # Errors
    ///
    /// Returns a forbidden [`ApiError`] naming the missing scopes.
    pub fn access(&self, info: &TokenInfo, required: RequiredScope) -> Result<Access, ApiError> {
        if info.has_scope(ADMIN_SCOPE) {
            return Ok(Access::Admin);
        }
        match required {
            RequiredScope::Admin => Err(scope_error(info, &[ADMIN_SCOPE])),
            RequiredScope::Write if info.has_scope(WRITE_SCOPE) || self.self_service => {
                Ok(Access::Restricted)
            }
            RequiredScope::Write => Err(scope_error(info, &[ADMIN_SCOPE, WRITE_SCOPE])),
        }
    }

    /// Checks that a restricted subject can reach every app in `app_ids`.
    ///
    /// # Errors
    ///
    /// Returns a forbidden [`ApiError`] when an app is unknown or outside the
    /// subject's spaces, or a transient one when the registry fails.
    pub async fn authorize_write(
        &self,
        access: Access,
        info: &TokenInfo,
        app_ids: &[String],
    ) -> Result<(), ApiError> {
        if access == Access::Admin {
            return Ok(());
        }
        let ids: Vec<String> =
            app_ids.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect();
        let (app_spaces, subject_spaces) = self.spaces(info, &ids).await?;
        let reachable = ids.iter().all(|id| {
            app_spaces.get(id).is_some_and(|space| subject_spaces.contains(space))
        });
        if reachable { Ok(()) } else { Err(ApiError::forbidden(INACCESSIBLE_APPS)) }
    }

    /// Drops policies a restricted subject cannot see.
    ///
    /// # Errors
    ///
    /// Returns a transient [`ApiError`] when the registry fails.
    pub async fn filter_readable(
        &self,
        access: Access,
        info: &TokenInfo,
        policies: Vec<TaggedPolicy>,
    ) -> Result<Vec<TaggedPolicy>, ApiError> {
        if access == Access::Admin || policies.is_empty() {
            return Ok(policies);
        }
        let ids: Vec<String> = policies
            .iter()
            .flat_map(|tagged| {
                [tagged.policy.source_id.clone(), tagged.policy.destination_id.clone()]
            })
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let (app_spaces, subject_spaces) = self.spaces(info, &ids).await?;
        let visible = |id: &str| {
            app_spaces.get(id).is_some_and(|space| subject_spaces.contains(space))
        };
        Ok(policies
            .into_iter()
            .filter(|tagged| {
                visible(&tagged.policy.source_id) && visible(&tagged.policy.destination_id)
            })
            .collect())
    }

    /// Rejects a create that would push a source past its quota.
    ///
    /// `existing` holds the stored policy count for each requested source.
    ///
    /// # Errors
    ///
    /// Returns a quota [`ApiError`] naming no particular source.
    pub fn check_quota(
        &self,
        access: Access,
        policies: &[Policy],
        existing: &BTreeMap<String, u64>,
    ) -> Result<(), ApiError> {
        if access == Access::Admin {
            return Ok(());
        }
        let requested = requested_by_source(policies);
        let cap = u64::from(self.max_policies_per_source);
        for (source, count) in &requested {
            let stored = existing.get(source).copied().unwrap_or(0);
            if stored + count > cap {
                tracing::info!(
                    source = %source,
                    stored,
                    requested = count,
                    cap,
                    "policy quota exceeded"
                );
                return Err(ApiError::new(ApiErrorKind::QuotaExceeded, QUOTA_EXCEEDED));
            }
        }
        Ok(())
    }

    /// Resolves app spaces and the subject's spaces.
    async fn spaces(
        &self,
        info: &TokenInfo,
        app_ids: &[String],
    ) -> Result<(BTreeMap<String, String>, BTreeSet<String>), ApiError> {
        let app_spaces = self
            .gateway
            .app_spaces(app_ids)
            .await
            .map_err(|err| ApiError::transient("failed to get apps", &err))?;
        let subject_spaces = self
            .gateway
            .subject_spaces(subject_of(info))
            .await
            .map_err(|err| ApiError::transient("failed to get spaces", &err))?;
        Ok((app_spaces, subject_spaces))
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the registry subject for a token: the user id, else the token subject.
#[must_use]
pub fn subject_of(info: &TokenInfo) -> &str {
    if info.user_id.is_empty() { &info.sub } else { &info.user_id }
}

/// Counts requested policies per source.
fn requested_by_source(policies: &[Policy]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for policy in policies {
        *counts.entry(policy.source_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// Builds the forbidden error for a token missing every allowed scope.
fn scope_error(info: &TokenInfo, allowed: &[&str]) -> ApiError {
    ApiError::forbidden(format!(
        "provided scopes [{}] do not include allowed scopes [{}]",
        info.scope.join(" "),
        allowed.join(" ")
    ))
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
