// netpolicy-server/src/bootstrap.rs
// ============================================================================
// Module: Bootstrap
// Description: Builds the store, registry clients, locks, and sinks from config.
// Purpose: Keep construction out of the serve and sync entry points.
// Dependencies: netpolicy-config, netpolicy-registry, netpolicy-store-sqlite
// ============================================================================

//! ## Overview
//! Opening the store retries with doubling backoff until the configured
//! migration timeout, since the database file may sit on storage that is
//! still being mounted when the process starts.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use netpolicy_config::NetPolicyConfig;
use netpolicy_core::SharedDatastore;
use netpolicy_registry::CloudControllerClient;
use netpolicy_registry::HttpClientConfig;
use netpolicy_registry::HttpLockService;
use netpolicy_registry::IdentityClient;
use netpolicy_registry::LocalLockService;
use netpolicy_registry::LockService;
use netpolicy_registry::RegistryGateway;
use netpolicy_registry::UaaClient;
use netpolicy_store_sqlite::SqlitePolicyStore;
use tokio::time::Instant;

use crate::audit::AuditSink;
use crate::audit::FileAuditSink;
use crate::audit::NoopAuditSink;
use crate::audit::StderrAuditSink;
use crate::server::ServerError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// First delay between store open attempts.
const INITIAL_OPEN_BACKOFF: Duration = Duration::from_millis(250);
/// Longest delay between store open attempts.
const MAX_OPEN_BACKOFF: Duration = Duration::from_secs(5);

// ============================================================================
// SECTION: Store
// ============================================================================

/// Opens the `SQLite` store, retrying until the migration timeout elapses.
///
/// # Errors
///
/// Returns [`ServerError::Init`] with the last failure once the budget is spent.
pub async fn open_store(config: &NetPolicyConfig) -> Result<SharedDatastore, ServerError> {
    let store_config = config.store_config();
    let deadline = Instant::now() + config.database.migration_timeout();
    let mut backoff = INITIAL_OPEN_BACKOFF;
    let mut attempt = 1_u32;
    loop {
        let attempt_config = store_config.clone();
        let result = tokio::task::spawn_blocking(move || SqlitePolicyStore::new(&attempt_config))
            .await
            .map_err(|err| ServerError::Init(format!("store open task failed: {err}")))?;
        match result {
            Ok(store) => {
                tracing::info!(path = %store_config.path.display(), attempt, "store opened");
                let shared: SharedDatastore = Arc::new(store);
                return Ok(shared);
            }
            Err(err) if Instant::now() + backoff < deadline => {
                tracing::warn!(error = %err, attempt, "store open failed, retrying");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_OPEN_BACKOFF);
                attempt += 1;
            }
            Err(err) => {
                return Err(ServerError::Init(format!(
                    "store open failed after {attempt} attempts: {err}"
                )));
            }
        }
    }
}

// ============================================================================
// SECTION: Registry and Identity
// ============================================================================

/// Registry gateway plus the identity client it shares with authentication.
pub struct Clients {
    /// Token-caching registry facade.
    pub gateway: Arc<RegistryGateway>,
    /// Identity client for bearer verification.
    pub identity: Arc<dyn IdentityClient>,
}

/// Builds the registry and identity clients.
///
/// # Errors
///
/// Returns [`ServerError::Init`] when an HTTP client cannot be built.
pub fn build_clients(config: &NetPolicyConfig) -> Result<Clients, ServerError> {
    let uaa_http = HttpClientConfig {
        ca_file: config.uaa.ca_file.clone(),
        skip_tls_verify: config.uaa.skip_ssl_validation,
        ..HttpClientConfig::default()
    };
    let identity: Arc<dyn IdentityClient> = Arc::new(
        UaaClient::new(
            &config.uaa.base_url(),
            config.uaa.client.clone(),
            config.uaa.client_secret.clone(),
            &uaa_http,
        )
        .map_err(|err| ServerError::Init(err.to_string()))?,
    );
    let cc_http = HttpClientConfig {
        ca_file: config.cc.ca_file.clone(),
        ..HttpClientConfig::default()
    };
    let registry = CloudControllerClient::new(&config.cc.url, &cc_http)
        .map_err(|err| ServerError::Init(err.to_string()))?;
    let gateway = Arc::new(RegistryGateway::new(Arc::new(registry), Arc::clone(&identity)));
    Ok(Clients {
        gateway,
        identity,
    })
}

// ============================================================================
// SECTION: Locks and Audit
// ============================================================================

/// Builds the lock service: the remote one when an address is configured.
///
/// # Errors
///
/// Returns [`ServerError::Init`] when the lock client cannot be built.
pub fn build_lock_service(config: &NetPolicyConfig) -> Result<Arc<dyn LockService>, ServerError> {
    let Some(address) = config.locket.address.as_deref() else {
        tracing::info!("no lock address configured, using in-process leases");
        return Ok(Arc::new(LocalLockService::new()));
    };
    let http = HttpClientConfig {
        ca_file: config.locket.ca_file.clone(),
        client_cert_file: config.locket.client_cert_file.clone(),
        client_key_file: config.locket.client_key_file.clone(),
        ..HttpClientConfig::default()
    };
    let service =
        HttpLockService::new(address, &http).map_err(|err| ServerError::Init(err.to_string()))?;
    Ok(Arc::new(service))
}

/// Builds the request audit sink.
///
/// # Errors
///
/// Returns [`ServerError::Init`] when the audit file cannot be opened.
pub fn build_audit_sink(config: &NetPolicyConfig) -> Result<Arc<dyn AuditSink>, ServerError> {
    let audit = &config.server.audit;
    if !audit.enabled {
        return Ok(Arc::new(NoopAuditSink));
    }
    match &audit.path {
        Some(path) => {
            let sink = FileAuditSink::new(path).map_err(|err| {
                ServerError::Init(format!("audit log {}: {err}", path.display()))
            })?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(StderrAuditSink)),
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
