// netpolicy-registry/src/lib.rs
// ============================================================================
// Module: Netpolicy Registry Library
// Description: Clients for the platform registry, identity server, and locks.
// Purpose: Keep every outbound HTTP collaborator behind a trait.
// Dependencies: reqwest, async-trait, serde, time
// ============================================================================

//! ## Overview
//! The policy server talks to three external services: the platform registry
//! (apps, spaces, security groups), the identity server (machine tokens and
//! token introspection), and a lock service for leader election. Each is an
//! async trait with a reqwest implementation so the server and syncer can be
//! exercised against fakes.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod client;
pub mod gateway;
pub mod identity;
pub mod lock;
pub mod registry;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use client::HttpClientConfig;
pub use client::HttpClientError;
pub use gateway::GatewayError;
pub use gateway::RegistryGateway;
pub use identity::IdentityClient;
pub use identity::IdentityError;
pub use identity::TokenInfo;
pub use identity::UaaClient;
pub use lock::HttpLockService;
pub use lock::LeaseOutcome;
pub use lock::LocalLockService;
pub use lock::LockError;
pub use lock::LockService;
pub use registry::CloudControllerClient;
pub use registry::RegistryClient;
pub use registry::RegistryError;
pub use registry::last_update_millis;
