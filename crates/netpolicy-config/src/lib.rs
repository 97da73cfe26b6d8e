// netpolicy-config/src/lib.rs
// ============================================================================
// Module: Netpolicy Config Library
// Description: Canonical config model and validation.
// Purpose: Single source of truth for netpolicy.toml semantics.
// Dependencies: netpolicy-core, netpolicy-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `netpolicy-config` defines the configuration shared by the policy server,
//! the ASG syncer, and the offline CLI commands. Loading is strict and
//! fail-closed: unknown database backends, out-of-range tag widths, and
//! incomplete TLS material are rejected before any listener starts.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
