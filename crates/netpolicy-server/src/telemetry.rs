// netpolicy-server/src/telemetry.rs
// ============================================================================
// Module: Policy Server Telemetry
// Description: Metric hooks for requests, ASG sync cycles, and cleanup runs.
// Purpose: Provide metric events and latency buckets without hard deps.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A thin metrics interface so deployments can plug in their own exporter.
//! Labels are stable strings; raw request data never becomes a label.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Serialize;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Latency buckets in milliseconds for request and sync histograms.
pub const LATENCY_BUCKETS_MS: &[u64] =
    &[1, 2, 5, 10, 25, 50, 100, 250, 500, 1_000, 2_500, 5_000, 10_000, 30_000];

// ============================================================================
// SECTION: Labels
// ============================================================================

/// Listener a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Listener {
    /// Bearer-authenticated external API.
    External,
    /// mTLS internal API.
    Internal,
}

impl Listener {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Internal => "internal",
        }
    }
}

/// Request outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// 1xx through 3xx.
    Ok,
    /// 4xx or 5xx.
    Error,
}

impl Outcome {
    /// Classifies an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        if status >= 400 { Self::Error } else { Self::Ok }
    }

    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// Request metric payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetric {
    /// Listener.
    pub listener: Listener,
    /// HTTP method.
    pub method: String,
    /// Matched route pattern, or `unmatched`.
    pub route: String,
    /// Response status code.
    pub status: u16,
    /// Outcome derived from the status.
    pub outcome: Outcome,
}

/// Outcome of one ASG sync tick, labelled `asg_sync_total{outcome}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Another owner holds the lease.
    NotLeader,
    /// The catalog has not changed since the last applied sync.
    Skipped,
    /// The catalog was applied.
    Success,
    /// The cycle failed.
    Error,
}

impl SyncOutcome {
    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotLeader => "not_leader",
            Self::Skipped => "skipped",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Sync cycle metric payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMetric {
    /// Cycle outcome.
    pub outcome: SyncOutcome,
    /// Time spent fetching the catalog, when a fetch ran.
    pub fetch_latency: Option<Duration>,
    /// Time spent on the whole tick.
    pub total_latency: Duration,
}

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Metrics sink.
pub trait PolicyMetrics: Send + Sync {
    /// Records a request counter event.
    fn record_request(&self, event: &RequestMetric);
    /// Records a request latency observation.
    fn record_latency(&self, event: &RequestMetric, latency: Duration);
    /// Records one ASG sync tick.
    fn record_sync(&self, event: &SyncMetric);
    /// Records one cleanup cycle and the number of deleted policies.
    fn record_cleanup(&self, deleted: usize);
}

/// No-op metrics sink.
pub struct NoopMetrics;

impl PolicyMetrics for NoopMetrics {
    fn record_request(&self, _event: &RequestMetric) {}

    fn record_latency(&self, _event: &RequestMetric, _latency: Duration) {}

    fn record_sync(&self, _event: &SyncMetric) {}

    fn record_cleanup(&self, _deleted: usize) {}
}
