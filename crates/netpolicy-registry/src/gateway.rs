// netpolicy-registry/src/gateway.rs
// ============================================================================
// Module: Registry Gateway
// Description: Token-caching facade over the registry client.
// Purpose: Give callers registry access without handling machine tokens.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! The gateway fetches a client-credentials token on first use and caches
//! it. When the registry rejects the cached token, the gateway fetches a new
//! one and retries the call exactly once; a second rejection is returned to
//! the caller.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;

use netpolicy_core::SecurityGroup;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::identity::IdentityClient;
use crate::registry::RegistryClient;
use crate::registry::RegistryError;

// ============================================================================
// SECTION: Gateway
// ============================================================================

/// Registry access with a cached machine token.
pub struct RegistryGateway {
    /// Underlying registry client.
    registry: Arc<dyn RegistryClient>,
    /// Identity client issuing machine tokens.
    identity: Arc<dyn IdentityClient>,
    /// Cached machine token.
    token: Mutex<Option<String>>,
}

impl RegistryGateway {
    /// Builds a gateway over the given clients.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryClient>, identity: Arc<dyn IdentityClient>) -> Self {
        Self {
            registry,
            identity,
            token: Mutex::new(None),
        }
    }

    /// Returns live app guids among `app_guids`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn live_app_guids(
        &self,
        app_guids: &[String],
    ) -> Result<BTreeSet<String>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(|token| async move { registry.get_live_app_guids(&token, app_guids).await })
            .await
    }

    /// Returns live space guids among `space_guids`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn live_space_guids(
        &self,
        space_guids: &[String],
    ) -> Result<BTreeSet<String>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(
            |token| async move { registry.get_live_space_guids(&token, space_guids).await },
        )
        .await
    }

    /// Maps apps to their spaces.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn app_spaces(
        &self,
        app_guids: &[String],
    ) -> Result<BTreeMap<String, String>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(|token| async move { registry.get_app_spaces(&token, app_guids).await })
            .await
    }

    /// Returns the spaces a subject develops in.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn subject_spaces(&self, subject: &str) -> Result<BTreeSet<String>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(|token| async move { registry.get_subject_spaces(&token, subject).await })
            .await
    }

    /// Lists the ASG catalog.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn security_groups(&self) -> Result<Vec<SecurityGroup>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(|token| async move { registry.get_all_security_groups(&token).await }).await
    }

    /// Returns the catalog's last update stamp.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError`] when the token or registry call fails.
    pub async fn security_groups_last_update(
        &self,
    ) -> Result<Option<OffsetDateTime>, GatewayError> {
        let registry = &*self.registry;
        self.with_token(
            |token| async move { registry.get_security_groups_last_update(&token).await },
        )
        .await
    }

    /// Runs `call` with the cached token, refreshing once on rejection.
    async fn with_token<T, F, Fut>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, RegistryError>>,
    {
        let token = self.token(false).await?;
        match call(token).await {
            Err(RegistryError::Unauthorized(message)) => {
                tracing::info!(error = %message, "registry rejected cached token, refreshing");
                let token = self.token(true).await?;
                call(token).await.map_err(GatewayError::Registry)
            }
            other => other.map_err(GatewayError::Registry),
        }
    }

    /// Returns the cached token, fetching a new one when empty or forced.
    async fn token(&self, refresh: bool) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        if !refresh && let Some(token) = cached.as_ref() {
            return Ok(token.clone());
        }
        let token =
            self.identity.get_token().await.map_err(|err| GatewayError::Token(err.to_string()))?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Gateway failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The machine token could not be obtained.
    #[error("get UAA token failed: {0}")]
    Token(String),
    /// The registry call failed.
    #[error(transparent)]
    Registry(RegistryError),
}
