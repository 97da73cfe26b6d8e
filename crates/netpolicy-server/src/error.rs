// netpolicy-server/src/error.rs
// ============================================================================
// Module: API Errors
// Description: Single error responder for both HTTP listeners.
// Purpose: Map domain failures onto status codes and `{"error": msg}` bodies.
// Dependencies: axum, netpolicy-core, serde_json, tracing
// ============================================================================

//! ## Overview
//! Handlers return [`ApiError`] and nothing else. Store failures that carry a
//! client-facing message (validation, conflicts, unknown guids) keep it;
//! backend failures collapse to a fixed phrase chosen by the caller so
//! database details never reach clients. Every error response writes one
//! structured log line; the observation middleware records its metric.

// ============================================================================
// SECTION: Imports
// ============================================================================

use axum::Json;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use netpolicy_core::ModelError;
use netpolicy_core::StoreError;
use serde_json::json;
use thiserror::Error;

// ============================================================================
// SECTION: Error Kinds
// ============================================================================

/// Error classification.
///
/// # Invariants
/// - Variants are stable for metric and log labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    /// Malformed or invalid payload.
    Validation,
    /// Duplicate name or a still-referenced destination.
    Conflict,
    /// Missing or unverifiable bearer token.
    Unauthenticated,
    /// Insufficient scopes or inaccessible apps.
    Forbidden,
    /// Per-source policy quota exceeded.
    QuotaExceeded,
    /// Unknown guid.
    NotFound,
    /// Unknown API version.
    UnsupportedVersion,
    /// Backend failure.
    Transient,
    /// Request deadline elapsed.
    Timeout,
}

impl ApiErrorKind {
    /// Returns the HTTP status for the kind.
    #[must_use]
    pub const fn status(self) -> StatusCode {
        match self {
            Self::Validation | Self::Conflict => StatusCode::BAD_REQUEST,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::QuotaExceeded => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::UnsupportedVersion => StatusCode::NOT_ACCEPTABLE,
            Self::Transient | Self::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns a stable label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Unauthenticated => "unauthenticated",
            Self::Forbidden => "forbidden",
            Self::QuotaExceeded => "quota_exceeded",
            Self::NotFound => "not_found",
            Self::UnsupportedVersion => "unsupported_version",
            Self::Transient => "transient",
            Self::Timeout => "timeout",
        }
    }
}

// ============================================================================
// SECTION: API Error
// ============================================================================

/// Error returned by every handler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ApiError {
    /// Classification.
    kind: ApiErrorKind,
    /// Client-facing message.
    message: String,
}

impl ApiError {
    /// Builds an error of `kind`.
    #[must_use]
    pub fn new(kind: ApiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Validation, message)
    }

    /// Builds an authentication error.
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Unauthenticated, message)
    }

    /// Builds an authorization error.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::Forbidden, message)
    }

    /// Builds a not-found error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ApiErrorKind::NotFound, message)
    }

    /// Builds a backend error, logging `detail` and returning only `message`.
    #[must_use]
    pub fn transient(message: &str, detail: &impl std::fmt::Display) -> Self {
        tracing::error!(error = %detail, "{message}");
        Self::new(ApiErrorKind::Transient, message)
    }

    /// Maps a store failure, using `context` for backend failures.
    #[must_use]
    pub fn from_store(error: StoreError, context: &str) -> Self {
        match error {
            StoreError::Validation(message) => Self::validation(message),
            StoreError::NotFound(message) => Self::not_found(message),
            StoreError::Conflict(message) => Self::new(ApiErrorKind::Conflict, message),
            other => Self::transient(context, &other),
        }
    }

    /// Returns the classification.
    #[must_use]
    pub const fn kind(&self) -> ApiErrorKind {
        self.kind
    }

    /// Returns the client-facing message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<ModelError> for ApiError {
    fn from(error: ModelError) -> Self {
        Self::validation(error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        tracing::warn!(
            status = status.as_u16(),
            kind = self.kind.as_str(),
            error = %self.message,
            "request failed"
        );
        (status, Json(json!({ "error": self.message }))).into_response()
    }
}
