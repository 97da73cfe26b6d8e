// netpolicy-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Policy Store
// Description: Durable policy, tag, ASG, and egress store using SQLite.
// Purpose: Provide production persistence for the netpolicy control plane.
// Dependencies: netpolicy-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides [`SqlitePolicyStore`], a SQLite-backed implementation
//! of every netpolicy store trait. Writes run in `BEGIN IMMEDIATE`
//! transactions over a small connection pool, so concurrent writers serialize
//! while readers proceed. Workload group tags are allocated inside the same
//! transaction as the policy rows that reference them.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod egress;
pub mod security_groups;
pub mod store;
pub mod tags;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SqlitePolicyStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
