// netpolicy-core/src/lib.rs
// ============================================================================
// Module: Netpolicy Core Library
// Description: Public API surface for the netpolicy domain model.
// Purpose: Expose domain types and store interfaces to every other crate.
// Dependencies: crate::{interfaces, model}
// ============================================================================

//! ## Overview
//! Netpolicy core defines the container-to-container policy model, workload
//! group tags, application security groups, and egress entities, plus the
//! store traits the control plane programs against. It performs no I/O.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod interfaces;
pub mod model;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use interfaces::EgressStore;
pub use interfaces::PolicyDatastore;
pub use interfaces::PolicyStore;
pub use interfaces::SecurityGroupStore;
pub use interfaces::SharedDatastore;
pub use interfaces::StoreError;
pub use model::ModelError;
pub use model::egress::AppLifecycle;
pub use model::egress::EgressDestination;
pub use model::egress::EgressPolicy;
pub use model::egress::EgressProtocol;
pub use model::egress::EgressRule;
pub use model::egress::EgressRuleInput;
pub use model::egress::EgressSource;
pub use model::egress::IpRange;
pub use model::egress::ResolvedEgressPolicy;
pub use model::egress::validate_destinations;
pub use model::egress::validate_egress_policies;
pub use model::groups::GroupRef;
pub use model::groups::GroupType;
pub use model::groups::Tag;
pub use model::groups::TagRecord;
pub use model::groups::TagWidth;
pub use model::policy::Policy;
pub use model::policy::PortRange;
pub use model::policy::Protocol;
pub use model::policy::TaggedPolicy;
pub use model::policy::validate_policies;
pub use model::security_group::Page;
pub use model::security_group::Pagination;
pub use model::security_group::SecurityGroup;
