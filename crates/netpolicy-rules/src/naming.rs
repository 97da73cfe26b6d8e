// netpolicy-rules/src/naming.rs
// ============================================================================
// Module: Chain Naming
// Description: Length-bounded per-container chain names.
// Purpose: Derive deterministic chain names from container handles.
// Dependencies: none
// ============================================================================

//! ## Overview
//! iptables chain names are limited in length, while container handles are
//! not. Names are built as `prefix--handle` and cut at the configured
//! maximum, so the same handle always maps to the same chain name.

// ============================================================================
// SECTION: Imports
// ============================================================================

use crate::renderer::RenderError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default maximum chain name length.
pub const DEFAULT_MAX_NAME_LENGTH: usize = 28;

/// Separator between name parts.
const SEPARATOR: &str = "--";

// ============================================================================
// SECTION: Namer
// ============================================================================

/// Builds chain names bounded by `max_length` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainNamer {
    /// Maximum name length in bytes.
    max_length: usize,
}

impl ChainNamer {
    /// Creates a namer with the given bound.
    #[must_use]
    pub const fn new(max_length: usize) -> Self {
        Self {
            max_length,
        }
    }

    /// Returns the name bound.
    #[must_use]
    pub const fn max_length(self) -> usize {
        self.max_length
    }

    /// Returns `prefix--handle`, truncated to the bound.
    #[must_use]
    pub fn prefix(self, prefix: &str, handle: &str) -> String {
        truncate(&format!("{prefix}{SEPARATOR}{handle}"), self.max_length).to_string()
    }

    /// Returns `body--suffix`, truncating `body` so the result fits.
    ///
    /// # Errors
    ///
    /// Returns [`RenderError::NameTooLong`] when the suffix leaves no room
    /// for any part of `body`.
    pub fn postfix(self, body: &str, suffix: &str) -> Result<String, RenderError> {
        let room = self
            .max_length
            .checked_sub(suffix.len() + SEPARATOR.len())
            .filter(|room| *room > 0)
            .ok_or_else(|| {
                RenderError::NameTooLong(format!(
                    "suffix '{suffix}' leaves no room within {} bytes",
                    self.max_length
                ))
            })?;
        Ok(format!("{}{SEPARATOR}{suffix}", truncate(body, room)))
    }
}

impl Default for ChainNamer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_NAME_LENGTH)
    }
}

/// Cuts `value` to at most `max` bytes on a char boundary.
pub(crate) fn truncate(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[.. end]
}

// ============================================================================
// SECTION: Tests
// ============================================================================
