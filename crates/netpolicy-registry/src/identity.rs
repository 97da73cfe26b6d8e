// netpolicy-registry/src/identity.rs
// ============================================================================
// Module: Identity Client
// Description: Machine tokens and bearer token introspection.
// Purpose: Authenticate the server to the registry and verify callers.
// Dependencies: reqwest, serde, url
// ============================================================================

//! ## Overview
//! The identity server issues the client-credentials token the policy server
//! uses against the registry, and introspects bearer tokens presented by
//! external callers. Both calls use HTTP basic auth with the configured
//! client id and secret and a form-encoded body.

// ============================================================================
// SECTION: Imports
// ============================================================================

use async_trait::async_trait;
use reqwest::Client;
use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::form_urlencoded;

use crate::client::HttpClientConfig;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Introspected bearer token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    /// OAuth client that obtained the token.
    #[serde(default)]
    pub client_id: String,
    /// Granted scopes.
    #[serde(default)]
    pub scope: Vec<String>,
    /// Token subject.
    #[serde(default)]
    pub sub: String,
    /// User id for user tokens.
    #[serde(default)]
    pub user_id: String,
    /// User name for user tokens.
    #[serde(default)]
    pub user_name: String,
}

impl TokenInfo {
    /// Returns true when the token carries `scope`.
    #[must_use]
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scope.iter().any(|granted| granted == scope)
    }
}

/// Identity server operations.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// Obtains a client-credentials token for the server itself.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the identity server rejects the grant.
    async fn get_token(&self) -> Result<String, IdentityError>;

    /// Introspects a caller's bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the token is invalid or the server fails.
    async fn check_token(&self, token: &str) -> Result<TokenInfo, IdentityError>;
}

// ============================================================================
// SECTION: UAA Client
// ============================================================================

/// Reqwest-backed identity client.
pub struct UaaClient {
    /// Base URL including port, without trailing slash.
    base_url: String,
    /// OAuth client id.
    client_id: String,
    /// OAuth client secret.
    client_secret: String,
    /// HTTP client configured with TLS and timeouts.
    client: Client,
}

impl UaaClient {
    /// Builds a client for the identity server at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Transport`] when the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        http: &HttpClientConfig,
    ) -> Result<Self, IdentityError> {
        let client = http.build().map_err(|err| IdentityError::Transport(err.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            client,
        })
    }

    /// Posts a form body and decodes a JSON reply.
    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        body: String,
    ) -> Result<T, IdentityError> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|err| IdentityError::Transport(err.to_string()))?;
        let status = response.status();
        let bytes =
            response.bytes().await.map_err(|err| IdentityError::Transport(err.to_string()))?;
        if status != StatusCode::OK {
            return Err(IdentityError::BadResponse {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|err| IdentityError::Decode(err.to_string()))
    }
}

/// Token grant reply.
#[derive(Deserialize)]
struct TokenGrant {
    /// Issued access token.
    access_token: String,
}

#[async_trait]
impl IdentityClient for UaaClient {
    async fn get_token(&self) -> Result<String, IdentityError> {
        let body = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("grant_type", "client_credentials")
            .finish();
        tracing::debug!(url = %self.base_url, "requesting client credentials token");
        let grant: TokenGrant = self.post_form("/oauth/token", body).await?;
        Ok(grant.access_token)
    }

    async fn check_token(&self, token: &str) -> Result<TokenInfo, IdentityError> {
        let body =
            form_urlencoded::Serializer::new(String::new()).append_pair("token", token).finish();
        self.post_form("/check_token", body).await
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Identity client failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The request never produced a response.
    #[error("identity transport error: {0}")]
    Transport(String),
    /// The identity server answered with a non-200 status.
    #[error("bad uaa response: {status}: {body}")]
    BadResponse {
        /// HTTP status code.
        status: u16,
        /// Response body.
        body: String,
    },
    /// The reply was not the expected JSON.
    #[error("identity decode error: {0}")]
    Decode(String),
}
