// netpolicy-server/src/audit.rs
// ============================================================================
// Module: Request Audit Logging
// Description: Structured audit events for HTTP request handling.
// Purpose: Emit one JSON line per request to a configurable sink.
// Dependencies: serde, serde_json
// ============================================================================

//! ## Overview
//! Audit events carry only request metadata: listener, method, matched route,
//! status, and timing. Bodies, tokens, and query strings are never recorded.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Serialize;

use crate::telemetry::Listener;
use crate::telemetry::Outcome;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Request audit event payload.
#[derive(Debug, Clone, Serialize)]
pub struct RequestAuditEvent {
    /// Event identifier.
    pub event: &'static str,
    /// Event timestamp (milliseconds since epoch).
    pub timestamp_ms: u128,
    /// Listener the request arrived on.
    pub listener: Listener,
    /// HTTP method.
    pub method: String,
    /// Matched route pattern.
    pub route: String,
    /// Response status code.
    pub status: u16,
    /// Request outcome.
    pub outcome: Outcome,
    /// Declared request body size in bytes.
    pub request_bytes: u64,
    /// Handling time in milliseconds.
    pub latency_ms: u128,
}

/// Inputs required to construct an audit event.
pub struct RequestAuditParams {
    /// Listener the request arrived on.
    pub listener: Listener,
    /// HTTP method.
    pub method: String,
    /// Matched route pattern.
    pub route: String,
    /// Response status code.
    pub status: u16,
    /// Declared request body size in bytes.
    pub request_bytes: u64,
    /// Handling time in milliseconds.
    pub latency_ms: u128,
}

impl RequestAuditEvent {
    /// Creates a new audit event stamped with the current time.
    #[must_use]
    pub fn new(params: RequestAuditParams) -> Self {
        let timestamp_ms =
            SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis();
        Self {
            event: "policy_request",
            timestamp_ms,
            listener: params.listener,
            method: params.method,
            route: params.route,
            status: params.status,
            outcome: Outcome::from_status(params.status),
            request_bytes: params.request_bytes,
            latency_ms: params.latency_ms,
        }
    }
}

// ============================================================================
// SECTION: Sinks
// ============================================================================

/// Audit sink for request events.
pub trait AuditSink: Send + Sync {
    /// Records an audit event.
    fn record(&self, event: &RequestAuditEvent);
}

/// Audit sink that logs JSON lines to stderr.
pub struct StderrAuditSink;

impl AuditSink for StderrAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event) {
            let _ = writeln!(io::stderr(), "{payload}");
        }
    }
}

/// Audit sink that appends JSON lines to a file.
pub struct FileAuditSink {
    /// File handle used for append-only logging.
    file: Mutex<std::fs::File>,
}

impl FileAuditSink {
    /// Opens the audit log file in append mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened.
    pub fn new(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: &RequestAuditEvent) {
        if let Ok(payload) = serde_json::to_string(event)
            && let Ok(mut file) = self.file.lock()
        {
            let _ = writeln!(file, "{payload}");
            let _ = file.flush();
        }
    }
}

/// No-op audit sink.
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: &RequestAuditEvent) {}
}
