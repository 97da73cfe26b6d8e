// netpolicy-core/src/model/security_group.rs
// ============================================================================
// Module: Application Security Groups
// Description: ASG records mirrored from the registry catalog.
// Purpose: Carry opaque rule blobs and space bindings through the store.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! An ASG is copied from the platform registry. Its `rules_json` payload is
//! opaque to the store and is only decoded by the rule renderer. Pagination
//! uses the store row id so concurrent inserts never shift an open cursor.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Application security group.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityGroup {
    /// Registry guid.
    pub guid: String,
    /// Display name.
    pub name: String,
    /// Opaque JSON array of rule descriptors.
    pub rules_json: String,
    /// Applies to every staging workload.
    pub staging_default: bool,
    /// Applies to every running workload.
    pub running_default: bool,
    /// Spaces bound for staging workloads.
    pub staging_space_guids: BTreeSet<String>,
    /// Spaces bound for running workloads.
    pub running_space_guids: BTreeSet<String>,
}

impl SecurityGroup {
    /// Returns true when the group applies globally.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.staging_default || self.running_default
    }

    /// Returns true when the group is bound to at least one space.
    #[must_use]
    pub fn is_bound(&self) -> bool {
        !self.staging_space_guids.is_empty() || !self.running_space_guids.is_empty()
    }
}

/// Forward-only page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Page {
    /// First row id to include; zero starts from the beginning.
    pub from: i64,
    /// Maximum rows to return; zero means unlimited.
    pub limit: u32,
}

/// Cursor returned alongside a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Row id to pass as `from` for the next page; zero marks the end.
    pub next: i64,
}
