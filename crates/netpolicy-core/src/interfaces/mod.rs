// netpolicy-core/src/interfaces/mod.rs
// ============================================================================
// Module: Netpolicy Store Interfaces
// Description: Backend-agnostic traits for the policy, ASG, and egress stores.
// Purpose: Decouple the HTTP surface and background loops from storage.
// Dependencies: crate::model, thiserror
// ============================================================================

//! ## Overview
//! Store traits are synchronous; async callers run them on blocking threads.
//! Every mutating call is a single transaction: it either fully applies or
//! leaves the store untouched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;

use crate::model::ModelError;
use crate::model::egress::EgressDestination;
use crate::model::egress::EgressPolicy;
use crate::model::egress::ResolvedEgressPolicy;
use crate::model::groups::GroupRef;
use crate::model::groups::Tag;
use crate::model::groups::TagRecord;
use crate::model::groups::TagWidth;
use crate::model::policy::Policy;
use crate::model::policy::TaggedPolicy;
use crate::model::security_group::Page;
use crate::model::security_group::Pagination;
use crate::model::security_group::SecurityGroup;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Store failures shared by every backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Input failed validation.
    #[error("{0}")]
    Validation(String),
    /// Referenced entity does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Write conflicts with existing state.
    #[error("{0}")]
    Conflict(String),
    /// No tag value is available at the configured width.
    #[error("tag space exhausted: {0}")]
    TagExhausted(String),
    /// Group id already owns a tag under another type.
    #[error("group type conflict: {0}")]
    TypeConflict(String),
    /// Backend engine error.
    #[error("store db error: {0}")]
    Db(String),
    /// Backend I/O error.
    #[error("store io error: {0}")]
    Io(String),
    /// Backend schema version is incompatible.
    #[error("store version mismatch: {0}")]
    VersionMismatch(String),
}

impl From<ModelError> for StoreError {
    fn from(error: ModelError) -> Self {
        match error {
            ModelError::Invalid(message) => Self::Validation(message),
        }
    }
}

// ============================================================================
// SECTION: Policy Store
// ============================================================================

/// C2C policy and tag persistence.
pub trait PolicyStore: Send + Sync {
    /// Persists policies, skipping tuples that already exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when validation or persistence fails; nothing is written.
    fn create_policies(&self, policies: &[Policy]) -> Result<(), StoreError>;

    /// Deletes exact policy tuples, ignoring missing ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn delete_policies(&self, policies: &[Policy]) -> Result<(), StoreError>;

    /// Returns policies touching the given ids.
    ///
    /// When `in_source_and_dest` is set, both endpoints must match; otherwise
    /// either endpoint may match.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn by_guids(
        &self,
        source_ids: &[String],
        destination_ids: &[String],
        in_source_and_dest: bool,
    ) -> Result<Vec<TaggedPolicy>, StoreError>;

    /// Returns every policy in canonical order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn all(&self) -> Result<Vec<TaggedPolicy>, StoreError>;

    /// Returns the mutation version counter.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn last_updated(&self) -> Result<i64, StoreError>;

    /// Returns existing policy counts per source id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn count_by_source(&self, source_ids: &[String]) -> Result<BTreeMap<String, u64>, StoreError>;

    /// Deletes policies whose endpoints were checked and found dead.
    ///
    /// An id is stale when it is in `checked_ids` but not in `live_ids`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn cleanup_with_live_set(
        &self,
        checked_ids: &BTreeSet<String>,
        live_ids: &BTreeSet<String>,
    ) -> Result<Vec<Policy>, StoreError>;

    /// Liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the backend is unreachable.
    fn check_database(&self) -> Result<(), StoreError>;

    /// Lists every live tagged group.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn tags(&self) -> Result<Vec<TagRecord>, StoreError>;

    /// Returns the tag for a group, issuing one when needed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when allocation fails.
    fn create_tag(&self, group: &GroupRef) -> Result<Tag, StoreError>;

    /// Returns the configured tag width.
    fn tag_width(&self) -> TagWidth;
}

// ============================================================================
// SECTION: Security Group Store
// ============================================================================

/// ASG persistence.
pub trait SecurityGroupStore: Send + Sync {
    /// Replaces the stored catalog with `groups`.
    ///
    /// Existing guids keep their row id; absent guids are removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails; nothing is written.
    fn bulk_upsert_asgs(&self, groups: &[SecurityGroup]) -> Result<(), StoreError>;

    /// Returns ASGs bound to any of the spaces plus every global ASG.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn by_space_guids(
        &self,
        space_guids: &[String],
        page: Page,
    ) -> Result<(Vec<SecurityGroup>, Pagination), StoreError>;

    /// Returns the catalog update marker (unix millis) of the last applied sync.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn asg_sync_marker(&self) -> Result<Option<i64>, StoreError>;

    /// Records the catalog update marker of the applied sync.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when persistence fails.
    fn set_asg_sync_marker(&self, marker_ms: i64) -> Result<(), StoreError>;
}

// ============================================================================
// SECTION: Egress Store
// ============================================================================

/// Egress destination and egress policy persistence.
pub trait EgressStore: Send + Sync {
    /// Creates destinations and returns them with guids assigned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] on duplicate names.
    fn create_destinations(
        &self,
        destinations: &[EgressDestination],
    ) -> Result<Vec<EgressDestination>, StoreError>;

    /// Replaces destinations identified by guid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown guids.
    fn update_destinations(
        &self,
        destinations: &[EgressDestination],
    ) -> Result<Vec<EgressDestination>, StoreError>;

    /// Deletes a destination that no policy references.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Conflict`] when still referenced.
    fn delete_destination(&self, guid: &str) -> Result<EgressDestination, StoreError>;

    /// Lists destinations, optionally filtered by guid or name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn destinations(
        &self,
        guids: &[String],
        names: &[String],
    ) -> Result<Vec<EgressDestination>, StoreError>;

    /// Creates egress policies and returns them with guids assigned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when a destination does not exist.
    fn create_egress_policies(
        &self,
        policies: &[EgressPolicy],
    ) -> Result<Vec<EgressPolicy>, StoreError>;

    /// Deletes an egress policy by guid.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for unknown guids.
    fn delete_egress_policy(&self, guid: &str) -> Result<EgressPolicy, StoreError>;

    /// Lists every egress policy with its destination.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn egress_policies(&self) -> Result<Vec<ResolvedEgressPolicy>, StoreError>;

    /// Lists egress policies for the given sources plus defaulted ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the read fails.
    fn egress_policies_by_source_and_defaults(
        &self,
        source_ids: &[String],
    ) -> Result<Vec<ResolvedEgressPolicy>, StoreError>;
}

// ============================================================================
// SECTION: Combined Store
// ============================================================================

/// Full datastore capability set consumed by the server.
pub trait PolicyDatastore: PolicyStore + SecurityGroupStore + EgressStore {}

impl<T> PolicyDatastore for T where T: PolicyStore + SecurityGroupStore + EgressStore {}

/// Shared datastore handle.
pub type SharedDatastore = Arc<dyn PolicyDatastore>;
