// netpolicy-server/src/syncer.rs
// ============================================================================
// Module: ASG Syncer
// Description: Leader-elected copy of the registry's security group catalog.
// Purpose: Keep the stored ASG set equal to the registry's effective set.
// Dependencies: netpolicy-core, netpolicy-registry, thiserror, tokio, tracing
// ============================================================================

//! ## Overview
//! Only the lease holder syncs. Each tick acquires or renews the lease, then
//! fetches the catalog under the cycle deadline while a renewal task keeps
//! the lease alive. A timeout or a failed renewal drops the fetch before any
//! store write starts. The lease is checked once more before the apply, which
//! then runs to completion: it is a single `bulk_upsert_asgs` transaction, so
//! the stored set is never partly overwritten and the reported outcome always
//! matches what was committed.
//!
//! State moves `Idle → Acquiring → Leader(Fetching) → Leader(Applying) →
//! Idle`; errors and lease loss return to `Idle`. The current state is
//! published on a watch channel.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use netpolicy_config::NetPolicyConfig;
use netpolicy_core::SecurityGroup;
use netpolicy_core::SharedDatastore;
use netpolicy_core::StoreError;
use netpolicy_registry::GatewayError;
use netpolicy_registry::LeaseOutcome;
use netpolicy_registry::LockError;
use netpolicy_registry::LockService;
use netpolicy_registry::RegistryError;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::last_update_millis;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::tasks::run_blocking;
use crate::tasks::shutdown_signalled;
use crate::telemetry::PolicyMetrics;
use crate::telemetry::SyncMetric;
use crate::telemetry::SyncOutcome;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Lease key shared by every syncer instance.
pub const LOCK_KEY: &str = "policy-server-asg-syncer";
/// Pause between attempts when the catalog changes mid-listing.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Shortest renewal period.
const MIN_RENEW_PERIOD: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: State
// ============================================================================

/// Phase of a leading syncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderPhase {
    /// Reading the catalog.
    Fetching,
    /// Writing the target set.
    Applying,
}

/// Observable syncer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncerState {
    /// Waiting for the next tick.
    Idle,
    /// Acquiring or renewing the lease.
    Acquiring,
    /// Holding the lease.
    Leader(LeaderPhase),
}

/// Catalog read by the fetch phase.
enum Fetched {
    /// The catalog is not newer than the stored marker.
    Unchanged,
    /// The target set and the marker to store with it.
    Changed {
        /// Global and bound groups.
        target: Vec<SecurityGroup>,
        /// Remote catalog update marker.
        marker: Option<i64>,
    },
}

/// Result of a completed tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Another owner holds the lease.
    NotLeader,
    /// The catalog is not newer than the last applied sync.
    Skipped,
    /// The target set was applied; carries its size.
    Synced(usize),
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Sync cycle failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// The lock service failed.
    #[error("lock service error: {0}")]
    Lock(String),
    /// The lease moved to another owner during the cycle.
    #[error("lease lost to {0}")]
    LeaseLost(String),
    /// The fetch exceeded the cycle deadline.
    #[error("sync cycle timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    /// The catalog kept changing past the retry deadline.
    #[error("security group catalog unstable past retry deadline: {0}")]
    Unstable(String),
    /// A registry call failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// A store call failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<LockError> for SyncError {
    fn from(error: LockError) -> Self {
        Self::Lock(error.to_string())
    }
}

// ============================================================================
// SECTION: Settings
// ============================================================================

/// Syncer timing and identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerSettings {
    /// Lease owner id.
    pub owner: String,
    /// Time between ticks.
    pub interval: Duration,
    /// Deadline for one cycle.
    pub timeout: Duration,
    /// How long unstable listings are retried after the last success.
    pub retry_deadline: Duration,
    /// Pause between unstable-listing retries.
    pub retry_delay: Duration,
    /// Lease ttl.
    pub lock_ttl: Duration,
}

impl SyncerSettings {
    /// Reads settings from configuration.
    #[must_use]
    pub fn from_config(config: &NetPolicyConfig) -> Self {
        let sync = &config.asg_sync;
        Self {
            owner: config.uuid.clone(),
            interval: Duration::from_secs(sync.interval_seconds),
            timeout: Duration::from_secs(sync.timeout_seconds),
            retry_deadline: Duration::from_secs(sync.retry_deadline_seconds),
            retry_delay: DEFAULT_RETRY_DELAY,
            lock_ttl: Duration::from_secs(sync.lock_ttl_seconds),
        }
    }
}

// ============================================================================
// SECTION: Syncer
// ============================================================================

/// Leader-elected ASG syncer.
pub struct AsgSyncer {
    /// ASG store.
    store: SharedDatastore,
    /// Registry access.
    gateway: Arc<RegistryGateway>,
    /// Lease provider.
    locks: Arc<dyn LockService>,
    /// Metrics sink.
    metrics: Arc<dyn PolicyMetrics>,
    /// Timing and identity.
    settings: SyncerSettings,
    /// Published state.
    state: watch::Sender<SyncerState>,
    /// Start of the current unstable-retry window.
    last_success: Instant,
}

impl AsgSyncer {
    /// Builds an idle syncer.
    #[must_use]
    pub fn new(
        store: SharedDatastore,
        gateway: Arc<RegistryGateway>,
        locks: Arc<dyn LockService>,
        metrics: Arc<dyn PolicyMetrics>,
        settings: SyncerSettings,
    ) -> Self {
        let (state, _) = watch::channel(SyncerState::Idle);
        Self {
            store,
            gateway,
            locks,
            metrics,
            settings,
            state,
            last_success: Instant::now(),
        }
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SyncerState> {
        self.state.subscribe()
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> SyncerState {
        *self.state.borrow()
    }

    /// Runs ticks every interval until shutdown, then releases the lease.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(owner = %self.settings.owner, "asg syncer started");
        loop {
            tokio::select! {
                _ = self.tick() => {}
                () = shutdown_signalled(&mut shutdown) => break,
            }
            tokio::select! {
                () = tokio::time::sleep(self.settings.interval) => {}
                () = shutdown_signalled(&mut shutdown) => break,
            }
        }
        self.release().await;
        tracing::info!("asg syncer stopped");
    }

    /// Runs one tick and records its metrics.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the cycle fails; stored ASGs are unchanged.
    pub async fn tick(&mut self) -> Result<CycleOutcome, SyncError> {
        let started = Instant::now();
        let result = self.lead().await;
        self.set_state(SyncerState::Idle);
        let (outcome, fetch_latency) = match &result {
            Ok((CycleOutcome::NotLeader, fetch)) => (SyncOutcome::NotLeader, *fetch),
            Ok((CycleOutcome::Skipped, fetch)) => (SyncOutcome::Skipped, *fetch),
            Ok((CycleOutcome::Synced(count), fetch)) => {
                self.last_success = Instant::now();
                tracing::info!(security_groups = count, "asg sync applied");
                (SyncOutcome::Success, *fetch)
            }
            Err(err) => {
                tracing::error!(error = %err, "asg sync cycle failed");
                (SyncOutcome::Error, None)
            }
        };
        self.metrics.record_sync(&SyncMetric {
            outcome,
            fetch_latency,
            total_latency: started.elapsed(),
        });
        result.map(|(outcome, _)| outcome)
    }

    /// Acquires the lease, fetches under the deadline, then applies.
    async fn lead(&self) -> Result<(CycleOutcome, Option<Duration>), SyncError> {
        self.set_state(SyncerState::Acquiring);
        if let LeaseOutcome::HeldBy(holder) = self.acquire().await? {
            tracing::debug!(holder = %holder, "asg sync lease held by another owner");
            return Ok((CycleOutcome::NotLeader, None));
        }
        let fetch_started = Instant::now();
        let timeout = self.settings.timeout;
        let fetched = tokio::select! {
            result = tokio::time::timeout(timeout, self.fetch()) => {
                result.unwrap_or(Err(SyncError::Timeout(timeout)))
            }
            lost = self.renew_until_lost() => Err(lost),
        }?;
        let fetch_latency = Some(fetch_started.elapsed());
        match fetched {
            Fetched::Unchanged => Ok((CycleOutcome::Skipped, fetch_latency)),
            Fetched::Changed {
                target,
                marker,
            } => {
                let count = self.apply(target, marker).await?;
                Ok((CycleOutcome::Synced(count), fetch_latency))
            }
        }
    }

    /// Reads the catalog marker and, when it moved, the target set.
    async fn fetch(&self) -> Result<Fetched, SyncError> {
        self.set_state(SyncerState::Leader(LeaderPhase::Fetching));
        let remote = self.gateway.security_groups_last_update().await?.map(last_update_millis);
        let stored = run_blocking(&self.store, |store| store.asg_sync_marker()).await?;
        if let (Some(remote), Some(stored)) = (remote, stored)
            && remote <= stored
        {
            tracing::debug!(remote, stored, "asg catalog unchanged since last sync");
            return Ok(Fetched::Unchanged);
        }
        let target = self
            .fetch_catalog()
            .await?
            .into_iter()
            .filter(|group| group.is_global() || group.is_bound())
            .collect();
        Ok(Fetched::Changed {
            target,
            marker: remote,
        })
    }

    /// Confirms the lease, then writes the target set and marker.
    ///
    /// The store write is awaited to completion once started.
    async fn apply(
        &self,
        target: Vec<SecurityGroup>,
        marker: Option<i64>,
    ) -> Result<usize, SyncError> {
        self.set_state(SyncerState::Leader(LeaderPhase::Applying));
        if let LeaseOutcome::HeldBy(holder) = self.acquire().await? {
            return Err(SyncError::LeaseLost(holder));
        }
        let count = target.len();
        run_blocking(&self.store, move |store| {
            store.bulk_upsert_asgs(&target)?;
            if let Some(marker) = marker {
                store.set_asg_sync_marker(marker)?;
            }
            Ok(())
        })
        .await?;
        Ok(count)
    }

    /// Lists the catalog, retrying unstable listings until the retry deadline.
    async fn fetch_catalog(&self) -> Result<Vec<SecurityGroup>, SyncError> {
        loop {
            match self.gateway.security_groups().await {
                Err(GatewayError::Registry(RegistryError::UnstableCatalog(message))) => {
                    if self.last_success.elapsed() >= self.settings.retry_deadline {
                        return Err(SyncError::Unstable(message));
                    }
                    tracing::warn!(
                        error = %message,
                        "asg catalog changed during listing, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                other => return other.map_err(SyncError::from),
            }
        }
    }

    /// Renews the lease every half ttl; resolves only when renewal fails.
    async fn renew_until_lost(&self) -> SyncError {
        let period = (self.settings.lock_ttl / 2).max(MIN_RENEW_PERIOD);
        loop {
            tokio::time::sleep(period).await;
            match self.acquire().await {
                Ok(LeaseOutcome::Acquired) => {}
                Ok(LeaseOutcome::HeldBy(holder)) => return SyncError::LeaseLost(holder),
                Err(err) => return err,
            }
        }
    }

    /// Acquires or renews the lease.
    async fn acquire(&self) -> Result<LeaseOutcome, SyncError> {
        Ok(self.locks.acquire(LOCK_KEY, &self.settings.owner, self.settings.lock_ttl).await?)
    }

    /// Releases the lease and returns to idle.
    async fn release(&self) {
        if let Err(err) = self.locks.release(LOCK_KEY, &self.settings.owner).await {
            tracing::warn!(error = %err, "failed to release asg sync lease");
        }
        self.set_state(SyncerState::Idle);
    }

    /// Publishes a state change.
    fn set_state(&self, next: SyncerState) {
        self.state.send_replace(next);
    }
}
