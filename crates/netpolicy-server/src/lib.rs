// netpolicy-server/src/lib.rs
// ============================================================================
// Module: Netpolicy Server Library
// Description: HTTP APIs, authorization, cleanup, and ASG sync.
// Purpose: Host the control plane processes behind a small entry surface.
// Dependencies: axum, axum-server, rustls, tokio, netpolicy-*
// ============================================================================

//! ## Overview
//! The external listener serves operators and space developers with bearer
//! tokens; the internal listener serves host agents over mutual TLS. The
//! cleanup loop runs beside the listeners. The ASG syncer is a separate
//! process body that only acts while holding the shared lease.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod audit;
pub mod authorizer;
pub mod bootstrap;
pub mod cleanup;
pub mod error;
pub mod external;
pub mod http;
pub mod internal;
pub mod middleware;
pub mod server;
pub mod syncer;
pub mod tasks;
pub mod telemetry;
pub mod tls;
pub mod wire;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use audit::AuditSink;
pub use audit::FileAuditSink;
pub use audit::NoopAuditSink;
pub use audit::RequestAuditEvent;
pub use audit::StderrAuditSink;
pub use authorizer::Access;
pub use authorizer::Authorizer;
pub use authorizer::RequiredScope;
pub use cleanup::CleanupError;
pub use cleanup::CleanupLoop;
pub use cleanup::PolicyCleaner;
pub use error::ApiError;
pub use error::ApiErrorKind;
pub use http::AppState;
pub use http::ServerOptions;
pub use http::SharedState;
pub use http::external_router;
pub use http::internal_router;
pub use server::PolicyServer;
pub use server::RunningListener;
pub use server::ServerError;
pub use server::run_asg_syncer;
pub use server::spawn_plain;
pub use server::spawn_tls;
pub use syncer::AsgSyncer;
pub use syncer::CycleOutcome;
pub use syncer::SyncError;
pub use syncer::SyncerSettings;
pub use syncer::SyncerState;
pub use tasks::shutdown_channel;
pub use telemetry::NoopMetrics;
pub use telemetry::PolicyMetrics;
pub use tls::TlsError;
