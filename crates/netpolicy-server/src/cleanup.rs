// netpolicy-server/src/cleanup.rs
// ============================================================================
// Module: Policy Cleanup
// Description: Removes policies whose apps no longer exist in the registry.
// Purpose: One-shot cleanup cycles and the periodic cleanup loop.
// Dependencies: netpolicy-core, netpolicy-registry, tokio, tracing
// ============================================================================

//! ## Overview
//! A cycle reads every policy, asks the registry which of the referenced apps
//! are still live, and deletes policies that touch a dead app. The delete
//! predicate only uses ids checked within the cycle, so concurrent cycles on
//! several processes are safe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use netpolicy_core::Policy;
use netpolicy_core::SharedDatastore;
use netpolicy_registry::GatewayError;
use netpolicy_registry::RegistryGateway;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::tasks::run_blocking;
use crate::tasks::shutdown_signalled;
use crate::telemetry::PolicyMetrics;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Chunk size used when the configured one is below 1.
pub const DEFAULT_CHUNK_SIZE: usize = 100;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Cleanup cycle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CleanupError {
    /// The policy read failed.
    #[error("database read failed for c2c policies: {0}")]
    Read(String),
    /// The registry lookup failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The delete failed.
    #[error("database write failed: {0}")]
    Write(String),
}

// ============================================================================
// SECTION: Cleaner
// ============================================================================

/// Runs cleanup cycles.
pub struct PolicyCleaner {
    /// Policy store.
    store: SharedDatastore,
    /// Registry access.
    gateway: Arc<RegistryGateway>,
    /// App ids per registry request.
    chunk_size: usize,
    /// Metrics sink.
    metrics: Arc<dyn PolicyMetrics>,
}

impl PolicyCleaner {
    /// Builds a cleaner; `chunk_size` below 1 falls back to [`DEFAULT_CHUNK_SIZE`].
    #[must_use]
    pub fn new(
        store: SharedDatastore,
        gateway: Arc<RegistryGateway>,
        chunk_size: i64,
        metrics: Arc<dyn PolicyMetrics>,
    ) -> Self {
        let chunk_size = usize::try_from(chunk_size)
            .ok()
            .filter(|size| *size >= 1)
            .unwrap_or(DEFAULT_CHUNK_SIZE);
        Self {
            store,
            gateway,
            chunk_size,
            metrics,
        }
    }

    /// Returns the effective chunk size.
    #[must_use]
    pub const fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Runs one cycle and returns the deleted policies.
    ///
    /// # Errors
    ///
    /// Returns [`CleanupError`] when the read, the registry lookup, or the
    /// delete fails. Nothing is deleted unless every lookup succeeded.
    pub async fn delete_stale_policies(&self) -> Result<Vec<Policy>, CleanupError> {
        let policies = run_blocking(&self.store, |store| store.all())
            .await
            .map_err(|err| CleanupError::Read(err.to_string()))?;
        let checked: BTreeSet<String> = policies
            .iter()
            .flat_map(|tagged| {
                [tagged.policy.source_id.clone(), tagged.policy.destination_id.clone()]
            })
            .collect();
        if checked.is_empty() {
            self.metrics.record_cleanup(0);
            return Ok(Vec::new());
        }
        let ordered: Vec<String> = checked.iter().cloned().collect();
        let mut live = BTreeSet::new();
        for chunk in ordered.chunks(self.chunk_size) {
            live.extend(self.gateway.live_app_guids(chunk).await?);
        }
        let deleted =
            run_blocking(&self.store, move |store| store.cleanup_with_live_set(&checked, &live))
                .await
                .map_err(|err| CleanupError::Write(err.to_string()))?;
        if !deleted.is_empty() {
            tracing::info!(deleted = deleted.len(), "deleted policies for missing apps");
        }
        self.metrics.record_cleanup(deleted.len());
        Ok(deleted)
    }
}

// ============================================================================
// SECTION: Loop
// ============================================================================

/// Periodic cleanup driver.
pub struct CleanupLoop {
    /// Cycle runner.
    cleaner: Arc<PolicyCleaner>,
    /// Time between cycles.
    interval: Duration,
}

impl CleanupLoop {
    /// Builds a loop running `cleaner` every `interval`.
    #[must_use]
    pub const fn new(cleaner: Arc<PolicyCleaner>, interval: Duration) -> Self {
        Self {
            cleaner,
            interval,
        }
    }

    /// Runs cycles until shutdown; failures are logged and the loop continues.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_seconds = self.interval.as_secs(), "policy cleanup loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.cleaner.delete_stale_policies().await {
                        tracing::error!(error = %err, "policy cleanup cycle failed");
                    }
                }
                () = shutdown_signalled(&mut shutdown) => break,
            }
        }
        tracing::info!("policy cleanup loop stopped");
    }
}
