// netpolicy-server/src/server.rs
// ============================================================================
// Module: Server Entry Points
// Description: Listener spawning and the serve and sync process bodies.
// Purpose: Wire configuration, state, routers, and loops together.
// Dependencies: axum, axum-server, rustls, tokio
// ============================================================================

//! ## Overview
//! [`PolicyServer`] owns the external and internal listeners and the cleanup
//! loop; [`run_asg_syncer`] owns the syncer. Both stop when the shared
//! shutdown channel flips, letting in-flight requests drain for
//! [`SHUTDOWN_GRACE`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use axum::Router;
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use netpolicy_config::NetPolicyConfig;
use rustls::ServerConfig;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::authorizer::Authorizer;
use crate::bootstrap;
use crate::cleanup::CleanupLoop;
use crate::cleanup::PolicyCleaner;
use crate::http::AppState;
use crate::http::ServerOptions;
use crate::http::SharedState;
use crate::http::external_router;
use crate::http::internal_router;
use crate::syncer::AsgSyncer;
use crate::syncer::SyncerSettings;
use crate::tasks::shutdown_signalled;
use crate::telemetry::NoopMetrics;
use crate::telemetry::PolicyMetrics;
use crate::tls;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Time in-flight requests get to finish after shutdown.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Server process errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServerError {
    /// Configuration errors.
    #[error("config error: {0}")]
    Config(String),
    /// Initialization errors.
    #[error("init error: {0}")]
    Init(String),
    /// Transport errors.
    #[error("transport error: {0}")]
    Transport(String),
}

// ============================================================================
// SECTION: Listeners
// ============================================================================

/// A bound listener serving on a background task.
pub struct RunningListener {
    /// Bound address.
    addr: SocketAddr,
    /// Serving task.
    task: JoinHandle<Result<(), ServerError>>,
}

impl RunningListener {
    /// Returns the bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Waits for the listener to stop.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Transport`] when serving failed.
    pub async fn wait(self) -> Result<(), ServerError> {
        self.task
            .await
            .map_err(|err| ServerError::Transport(format!("listener task failed: {err}")))?
    }
}

/// Serves `router` over plain TCP until shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Transport`] when the address cannot be bound.
pub async fn spawn_plain(
    router: Router,
    addr: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunningListener, ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|err| ServerError::Transport(format!("bind {addr} failed: {err}")))?;
    let addr = listener
        .local_addr()
        .map_err(|err| ServerError::Transport(format!("local address unavailable: {err}")))?;
    let task = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service())
            .with_graceful_shutdown(async move { shutdown_signalled(&mut shutdown).await })
            .await
            .map_err(|err| ServerError::Transport(format!("http server failed: {err}")))
    });
    Ok(RunningListener {
        addr,
        task,
    })
}

/// Serves `router` over TLS with `tls` until shutdown.
///
/// # Errors
///
/// Returns [`ServerError::Transport`] when the address cannot be bound.
pub async fn spawn_tls(
    router: Router,
    addr: SocketAddr,
    tls: Arc<ServerConfig>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<RunningListener, ServerError> {
    let handle = Handle::new();
    let server =
        axum_server::bind_rustls(addr, RustlsConfig::from_config(tls)).handle(handle.clone());
    let task = tokio::spawn(async move {
        server
            .serve(router.into_make_service())
            .await
            .map_err(|err| ServerError::Transport(format!("https server failed: {err}")))
    });
    let Some(bound) = handle.listening().await else {
        let detail = match task.await {
            Ok(Err(err)) => err.to_string(),
            Ok(Ok(())) => "listener exited before binding".to_string(),
            Err(err) => err.to_string(),
        };
        return Err(ServerError::Transport(format!("bind {addr} failed: {detail}")));
    };
    tokio::spawn(async move {
        shutdown_signalled(&mut shutdown).await;
        handle.graceful_shutdown(Some(SHUTDOWN_GRACE));
    });
    Ok(RunningListener {
        addr: bound,
        task,
    })
}

// ============================================================================
// SECTION: Policy Server
// ============================================================================

/// The policy server process: both listeners plus the cleanup loop.
pub struct PolicyServer {
    /// Validated configuration.
    config: NetPolicyConfig,
    /// Shared handler state.
    state: SharedState,
    /// Background cleanup.
    cleanup: CleanupLoop,
}

impl PolicyServer {
    /// Builds the server from configuration, opening the store.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when configuration is invalid or a
    /// collaborator cannot be built.
    pub async fn from_config(config: NetPolicyConfig) -> Result<Self, ServerError> {
        config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
        let store = bootstrap::open_store(&config).await?;
        let clients = bootstrap::build_clients(&config)?;
        let audit = bootstrap::build_audit_sink(&config)?;
        let metrics: Arc<dyn PolicyMetrics> = Arc::new(NoopMetrics);
        let cleaner = Arc::new(PolicyCleaner::new(
            Arc::clone(&store),
            Arc::clone(&clients.gateway),
            config.cleanup.cc_app_request_chunk_size,
            Arc::clone(&metrics),
        ));
        let authorizer = Authorizer::new(
            clients.gateway,
            config.policy.max_policies_per_source,
            config.policy.enable_space_developer_self_service,
        );
        let state = Arc::new(AppState {
            store,
            identity: clients.identity,
            authorizer,
            cleaner: Arc::clone(&cleaner),
            metrics,
            audit,
            options: ServerOptions::from_config(&config),
            started_at: Instant::now(),
        });
        let cleanup = CleanupLoop::new(cleaner, config.cleanup.interval());
        Ok(Self {
            config,
            state,
            cleanup,
        })
    }

    /// Serves until shutdown and waits for both listeners to drain.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError`] when TLS material is unusable, a listener
    /// cannot bind, or serving fails.
    pub async fn serve(self, shutdown: watch::Receiver<bool>) -> Result<(), ServerError> {
        let server = &self.config.server;
        let (Some(cert), Some(key), Some(ca)) =
            (&server.tls_cert_file, &server.tls_key_file, &server.tls_ca_file)
        else {
            return Err(ServerError::Config("tls files must be set".to_string()));
        };
        let external_addr =
            server.external_addr().map_err(|err| ServerError::Config(err.to_string()))?;
        let internal_addr =
            server.internal_addr().map_err(|err| ServerError::Config(err.to_string()))?;

        let external = external_router(Arc::clone(&self.state));
        let external = if server.enable_tls {
            let tls = tls::server_config(cert, key)
                .map_err(|err| ServerError::Init(err.to_string()))?;
            spawn_tls(external, external_addr, tls, shutdown.clone()).await?
        } else {
            spawn_plain(external, external_addr, shutdown.clone()).await?
        };
        tracing::info!(addr = %external.addr(), tls = server.enable_tls, "external api listening");

        let mtls = tls::mutual_tls_config(cert, key, ca)
            .map_err(|err| ServerError::Init(err.to_string()))?;
        let internal = internal_router(Arc::clone(&self.state));
        let internal = spawn_tls(internal, internal_addr, mtls, shutdown.clone()).await?;
        tracing::info!(addr = %internal.addr(), "internal api listening");

        let cleanup = tokio::spawn(self.cleanup.run(shutdown));
        let (external_result, internal_result) = tokio::join!(external.wait(), internal.wait());
        if let Err(err) = cleanup.await {
            tracing::error!(error = %err, "cleanup loop task failed");
        }
        tracing::info!("policy server stopped");
        external_result.and(internal_result)
    }
}

// ============================================================================
// SECTION: ASG Syncer Process
// ============================================================================

/// Runs the leader-elected ASG syncer until shutdown.
///
/// # Errors
///
/// Returns [`ServerError`] when configuration is invalid or a collaborator
/// cannot be built.
pub async fn run_asg_syncer(
    config: NetPolicyConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    config.validate().map_err(|err| ServerError::Config(err.to_string()))?;
    let store = bootstrap::open_store(&config).await?;
    let clients = bootstrap::build_clients(&config)?;
    let locks = bootstrap::build_lock_service(&config)?;
    let syncer = AsgSyncer::new(
        store,
        clients.gateway,
        locks,
        Arc::new(NoopMetrics),
        SyncerSettings::from_config(&config),
    );
    syncer.run(shutdown).await;
    Ok(())
}
