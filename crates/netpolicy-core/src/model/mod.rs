// netpolicy-core/src/model/mod.rs
// ============================================================================
// Module: Netpolicy Domain Model
// Description: Closed domain types for groups, policies, ASGs, and egress.
// Purpose: Group the model submodules and their shared validation error.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Every string crossing the wire is mapped onto one of these types exactly
//! once. Validation messages are client-facing and stable.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod egress;
pub mod groups;
pub mod policy;
pub mod security_group;

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Domain validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Input violates a model invariant.
    #[error("{0}")]
    Invalid(String),
}
