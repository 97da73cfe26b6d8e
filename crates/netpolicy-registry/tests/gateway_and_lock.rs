// netpolicy-registry/tests/gateway_and_lock.rs
// ============================================================================
// Module: Gateway and Lease Tests
// Description: Token refresh behavior and in-process leases.
// Purpose: Validate the single retry on rejected tokens and lease expiry.
// Dependencies: netpolicy-registry, tokio
// ============================================================================

//! ## Overview
//! Uses in-memory registry and identity fakes, and paused tokio time for
//! lease expiry.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use netpolicy_core::SecurityGroup;
use netpolicy_registry::GatewayError;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::IdentityError;
use netpolicy_registry::LeaseOutcome;
use netpolicy_registry::LocalLockService;
use netpolicy_registry::LockService;
use netpolicy_registry::RegistryClient;
use netpolicy_registry::RegistryError;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::TokenInfo;
use time::OffsetDateTime;

// ============================================================================
// SECTION: Fakes
// ============================================================================

/// Issues numbered tokens.
#[derive(Default)]
struct CountingIdentity {
    issued: AtomicUsize,
}

#[async_trait]
impl IdentityClient for CountingIdentity {
    async fn get_token(&self) -> Result<String, IdentityError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }

    async fn check_token(&self, _token: &str) -> Result<TokenInfo, IdentityError> {
        Ok(TokenInfo::default())
    }
}

/// Accepts only the listed tokens and records what it saw.
struct PickyRegistry {
    accepted: Vec<String>,
    seen: Mutex<Vec<String>>,
}

impl PickyRegistry {
    fn accepting(tokens: &[&str]) -> Self {
        Self {
            accepted: tokens.iter().map(ToString::to_string).collect(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn check(&self, token: &str) -> Result<(), RegistryError> {
        self.seen.lock().unwrap().push(token.to_string());
        if self.accepted.iter().any(|accepted| accepted == token) {
            Ok(())
        } else {
            Err(RegistryError::Unauthorized("expired".to_string()))
        }
    }
}

#[async_trait]
impl RegistryClient for PickyRegistry {
    async fn get_live_app_guids(
        &self,
        token: &str,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        self.check(token)?;
        Ok(app_guids.iter().cloned().collect())
    }

    async fn get_live_space_guids(
        &self,
        token: &str,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, RegistryError> {
        self.check(token)?;
        Ok(space_guids.iter().cloned().collect())
    }

    async fn get_app_spaces(
        &self,
        token: &str,
        _app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        self.check(token)?;
        Ok(BTreeMap::new())
    }

    async fn get_subject_spaces(
        &self,
        token: &str,
        _subject: &str,
    ) -> Result<BTreeSet<String>, RegistryError> {
        self.check(token)?;
        Ok(BTreeSet::new())
    }

    async fn get_all_security_groups(
        &self,
        token: &str,
    ) -> Result<Vec<SecurityGroup>, RegistryError> {
        self.check(token)?;
        Ok(Vec::new())
    }

    async fn get_security_groups_last_update(
        &self,
        token: &str,
    ) -> Result<Option<OffsetDateTime>, RegistryError> {
        self.check(token)?;
        Ok(None)
    }
}

fn apps() -> Vec<String> {
    vec!["app-a".to_string()]
}

// ============================================================================
// SECTION: Gateway
// ============================================================================

#[tokio::test]
async fn cached_token_is_reused() {
    let identity = Arc::new(CountingIdentity::default());
    let registry = Arc::new(PickyRegistry::accepting(&["token-1"]));
    let gateway = RegistryGateway::new(registry.clone(), identity.clone());

    gateway.live_app_guids(&apps()).await.unwrap();
    gateway.live_space_guids(&apps()).await.unwrap();
    assert_eq!(identity.issued.load(Ordering::SeqCst), 1);
    assert_eq!(*registry.seen.lock().unwrap(), vec!["token-1", "token-1"]);
}

#[tokio::test]
async fn rejected_token_is_refreshed_once() {
    let identity = Arc::new(CountingIdentity::default());
    let registry = Arc::new(PickyRegistry::accepting(&["token-2"]));
    let gateway = RegistryGateway::new(registry.clone(), identity.clone());

    let live = gateway.live_app_guids(&apps()).await.unwrap();
    assert!(live.contains("app-a"));
    assert_eq!(identity.issued.load(Ordering::SeqCst), 2);
    assert_eq!(*registry.seen.lock().unwrap(), vec!["token-1", "token-2"]);

    gateway.security_groups().await.unwrap();
    assert_eq!(identity.issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn second_rejection_is_returned() {
    let identity = Arc::new(CountingIdentity::default());
    let registry = Arc::new(PickyRegistry::accepting(&[]));
    let gateway = RegistryGateway::new(registry.clone(), identity.clone());

    let err = gateway.subject_spaces("user-1").await.unwrap_err();
    assert!(matches!(err, GatewayError::Registry(RegistryError::Unauthorized(_))));
    assert_eq!(registry.seen.lock().unwrap().len(), 2);
}

/// Identity server that always fails.
struct BrokenIdentity;

#[async_trait]
impl IdentityClient for BrokenIdentity {
    async fn get_token(&self) -> Result<String, IdentityError> {
        Err(IdentityError::Transport("connection refused".to_string()))
    }

    async fn check_token(&self, _token: &str) -> Result<TokenInfo, IdentityError> {
        Err(IdentityError::Transport("connection refused".to_string()))
    }
}

#[tokio::test]
async fn token_failure_is_prefixed() {
    let registry = Arc::new(PickyRegistry::accepting(&[]));
    let gateway = RegistryGateway::new(registry, Arc::new(BrokenIdentity));
    let err = gateway.security_groups_last_update().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "get UAA token failed: identity transport error: connection refused"
    );
}

// ============================================================================
// SECTION: Local Leases
// ============================================================================

#[tokio::test(start_paused = true)]
async fn lease_excludes_other_owners_until_expiry() {
    let locks = LocalLockService::new();
    let ttl = Duration::from_secs(15);

    assert_eq!(locks.acquire("asg-syncer", "a", ttl).await.unwrap(), LeaseOutcome::Acquired);
    assert_eq!(
        locks.acquire("asg-syncer", "b", ttl).await.unwrap(),
        LeaseOutcome::HeldBy("a".to_string())
    );

    tokio::time::advance(Duration::from_secs(16)).await;
    assert_eq!(locks.acquire("asg-syncer", "b", ttl).await.unwrap(), LeaseOutcome::Acquired);
}

#[tokio::test(start_paused = true)]
async fn renewal_extends_the_lease() {
    let locks = LocalLockService::new();
    let ttl = Duration::from_secs(15);

    locks.acquire("asg-syncer", "a", ttl).await.unwrap();
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(locks.acquire("asg-syncer", "a", ttl).await.unwrap(), LeaseOutcome::Acquired);
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(
        locks.acquire("asg-syncer", "b", ttl).await.unwrap(),
        LeaseOutcome::HeldBy("a".to_string())
    );
}

#[tokio::test]
async fn release_only_by_holder() {
    let locks = LocalLockService::new();
    let ttl = Duration::from_secs(15);

    locks.acquire("asg-syncer", "a", ttl).await.unwrap();
    locks.release("asg-syncer", "b").await.unwrap();
    assert_eq!(
        locks.acquire("asg-syncer", "b", ttl).await.unwrap(),
        LeaseOutcome::HeldBy("a".to_string())
    );
    locks.release("asg-syncer", "a").await.unwrap();
    assert_eq!(locks.acquire("asg-syncer", "b", ttl).await.unwrap(), LeaseOutcome::Acquired);
}
