// netpolicy-cli/src/render.rs
// ============================================================================
// Module: Dry-Run Rendering
// Description: Container context file to `iptables-restore` plan.
// Purpose: Let operators inspect the chains a host agent would install.
// Dependencies: netpolicy-rules, serde_json
// ============================================================================

//! ## Overview
//! Context files are untrusted input: reads are bounded and the handle is
//! validated by the renderer before any chain name is built. Nothing is
//! applied to the host.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fs::File;
use std::io::Read;
use std::path::Path;

use netpolicy_rules::ContainerContext;
use netpolicy_rules::RenderError;
use netpolicy_rules::RenderOptions;
use netpolicy_rules::render;
use thiserror::Error;

// ============================================================================
// SECTION: Limits
// ============================================================================

/// Maximum size of a container context file.
pub const MAX_CONTEXT_BYTES: usize = 1024 * 1024;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Dry-run failures.
#[derive(Debug, Error)]
pub enum RenderCommandError {
    /// The context file could not be read.
    #[error("failed to read {path}: {error}")]
    Read {
        /// Offending path.
        path: String,
        /// Underlying error.
        error: String,
    },
    /// The context file exceeds [`MAX_CONTEXT_BYTES`].
    #[error("{path} exceeds size limit ({size} > {limit} bytes)")]
    TooLarge {
        /// Offending path.
        path: String,
        /// Observed size.
        size: u64,
        /// Enforced limit.
        limit: usize,
    },
    /// The context is not valid JSON for [`ContainerContext`].
    #[error("invalid container context: {0}")]
    Parse(String),
    /// The renderer rejected the context.
    #[error(transparent)]
    Render(#[from] RenderError),
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Reads and parses a container context file.
///
/// # Errors
///
/// Returns [`RenderCommandError`] when the file is unreadable, too large, or
/// not a valid context.
pub fn read_context(path: &Path) -> Result<ContainerContext, RenderCommandError> {
    let bytes = read_bounded(path, MAX_CONTEXT_BYTES)?;
    serde_json::from_slice(&bytes).map_err(|err| RenderCommandError::Parse(err.to_string()))
}

/// Renders the context at `path` as an `iptables-restore --noflush` plan.
///
/// # Errors
///
/// Returns [`RenderCommandError`] when reading or rendering fails.
pub fn render_plan(path: &Path, options: &RenderOptions) -> Result<String, RenderCommandError> {
    let context = read_context(path)?;
    Ok(render(&context, options)?.restore_plan())
}

/// Reads at most `max_bytes` from `path`.
fn read_bounded(path: &Path, max_bytes: usize) -> Result<Vec<u8>, RenderCommandError> {
    let display = path.display().to_string();
    let read_error = |err: std::io::Error| RenderCommandError::Read {
        path: display.clone(),
        error: err.to_string(),
    };
    let file = File::open(path).map_err(read_error)?;
    let size = file.metadata().map_err(read_error)?.len();
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if size > limit {
        return Err(RenderCommandError::TooLarge {
            path: display.clone(),
            size,
            limit: max_bytes,
        });
    }
    let mut bytes = Vec::new();
    file.take(limit.saturating_add(1)).read_to_end(&mut bytes).map_err(read_error)?;
    if bytes.len() > max_bytes {
        return Err(RenderCommandError::TooLarge {
            path: display.clone(),
            size: u64::try_from(bytes.len()).unwrap_or(u64::MAX),
            limit: max_bytes,
        });
    }
    Ok(bytes)
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
