// netpolicy-rules/src/lib.rs
// ============================================================================
// Module: Netpolicy Rules Library
// Description: Chain rendering and iptables application for one container.
// Purpose: Turn policy and ASG state into ordered packet-filter chains.
// Dependencies: netpolicy-core, serde, tracing
// ============================================================================

//! ## Overview
//! Rendering is pure: a [`ContainerContext`] goes in and a [`ChainSet`] comes
//! out, with every chain's table, parent, jump conditions, and rules fixed.
//! Applying is the only side-effecting step and goes through the
//! [`IptablesAdapter`] trait, implemented for real hosts by
//! [`LockedIptables`].

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod applier;
pub mod asg;
pub mod iptables;
pub mod naming;
pub mod renderer;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use applier::ChainApplier;
pub use applier::MultiError;
pub use asg::AsgRule;
pub use asg::parse_rules;
pub use iptables::ApplyError;
pub use iptables::CommandOutput;
pub use iptables::CommandRunner;
pub use iptables::IptablesAdapter;
pub use iptables::LockedIptables;
pub use iptables::SystemCommandRunner;
pub use naming::ChainNamer;
pub use renderer::C2cAllow;
pub use renderer::ChainRole;
pub use renderer::ChainSet;
pub use renderer::ChainSpec;
pub use renderer::ContainerContext;
pub use renderer::IptablesRule;
pub use renderer::JumpRule;
pub use renderer::PortMapping;
pub use renderer::RenderError;
pub use renderer::RenderOptions;
pub use renderer::Table;
pub use renderer::render;
