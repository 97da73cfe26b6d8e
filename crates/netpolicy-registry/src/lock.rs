// netpolicy-registry/src/lock.rs
// ============================================================================
// Module: Lock Service
// Description: Lease-based leader election clients.
// Purpose: Let exactly one syncer instance write the ASG catalog at a time.
// Dependencies: reqwest, serde, tokio
// ============================================================================

//! ## Overview
//! A lease is identified by a key and held by an owner for a ttl. Acquiring a
//! lease the caller already holds renews it. [`HttpLockService`] talks JSON to
//! a remote lock service over mutual TLS; [`LocalLockService`] keeps leases
//! in process for single-node deployments and tests.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::client::HttpClientConfig;

// ============================================================================
// SECTION: Trait
// ============================================================================

/// Result of an acquire or renew attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// The caller holds the lease.
    Acquired,
    /// Another owner holds the lease.
    HeldBy(String),
}

/// Lease operations.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquires or renews the lease on `key` for `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the lock service cannot be reached.
    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, LockError>;

    /// Releases the lease on `key` when `owner` holds it.
    ///
    /// # Errors
    ///
    /// Returns [`LockError`] when the lock service cannot be reached.
    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError>;
}

// ============================================================================
// SECTION: Local Lock Service
// ============================================================================

/// Held lease.
#[derive(Debug, Clone)]
struct Lease {
    /// Current holder.
    owner: String,
    /// Instant the lease lapses.
    expires_at: Instant,
}

/// In-process lease table.
#[derive(Debug, Default)]
pub struct LocalLockService {
    /// Leases by key.
    leases: Mutex<HashMap<String, Lease>>,
}

impl LocalLockService {
    /// Builds an empty lease table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockService for LocalLockService {
    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, LockError> {
        let now = Instant::now();
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LockError::Transport("lease table poisoned".to_string()))?;
        if let Some(lease) = leases.get(key)
            && lease.owner != owner
            && lease.expires_at > now
        {
            return Ok(LeaseOutcome::HeldBy(lease.owner.clone()));
        }
        leases.insert(key.to_string(), Lease {
            owner: owner.to_string(),
            expires_at: now + ttl,
        });
        Ok(LeaseOutcome::Acquired)
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let mut leases = self
            .leases
            .lock()
            .map_err(|_| LockError::Transport("lease table poisoned".to_string()))?;
        if leases.get(key).is_some_and(|lease| lease.owner == owner) {
            leases.remove(key);
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: HTTP Lock Service
// ============================================================================

/// Lease request body.
#[derive(Debug, Serialize)]
struct LockRequest<'a> {
    /// Lease key.
    key: &'a str,
    /// Requesting owner.
    owner: &'a str,
    /// Lease ttl in seconds; zero on release.
    ttl_seconds: u64,
}

/// Conflict reply naming the holder.
#[derive(Debug, Deserialize)]
struct LockHolder {
    /// Current holder.
    #[serde(default)]
    owner: String,
}

/// Remote lock service client.
pub struct HttpLockService {
    /// Base URL without trailing slash.
    base_url: String,
    /// HTTP client with the mutual TLS identity.
    client: Client,
}

impl HttpLockService {
    /// Builds a client for the lock service at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`LockError::Transport`] when the HTTP client cannot be built.
    pub fn new(base_url: &str, http: &HttpClientConfig) -> Result<Self, LockError> {
        let client = http.build().map_err(|err| LockError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl LockService for HttpLockService {
    async fn acquire(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> Result<LeaseOutcome, LockError> {
        let response = self
            .client
            .post(format!("{}/v1/locks", self.base_url))
            .json(&LockRequest {
                key,
                owner,
                ttl_seconds: ttl.as_secs().max(1),
            })
            .send()
            .await
            .map_err(|err| LockError::Transport(err.to_string()))?;
        match response.status() {
            status if status.is_success() => Ok(LeaseOutcome::Acquired),
            StatusCode::CONFLICT => {
                let holder: LockHolder =
                    response.json().await.map_err(|err| LockError::BadResponse(err.to_string()))?;
                Ok(LeaseOutcome::HeldBy(holder.owner))
            }
            status => Err(LockError::BadResponse(format!("acquire returned {}", status.as_u16()))),
        }
    }

    async fn release(&self, key: &str, owner: &str) -> Result<(), LockError> {
        let response = self
            .client
            .post(format!("{}/v1/locks/release", self.base_url))
            .json(&LockRequest {
                key,
                owner,
                ttl_seconds: 0,
            })
            .send()
            .await
            .map_err(|err| LockError::Transport(err.to_string()))?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(LockError::BadResponse(format!("release returned {}", status.as_u16())))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Lock service failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The lock service could not be reached.
    #[error("lock transport error: {0}")]
    Transport(String),
    /// The lock service answered unexpectedly.
    #[error("lock bad response: {0}")]
    BadResponse(String),
}
