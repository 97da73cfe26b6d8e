// netpolicy-rules/src/applier.rs
// ============================================================================
// Module: Chain Applier
// Description: Drives an iptables adapter through a rendered chain set.
// Purpose: Create, populate, and tear down a container's chains.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! Setup is split in two: [`ChainApplier::initialize`] creates every chain and
//! its jump before [`ChainApplier::apply`] appends any rule, so rules that
//! `-g` into the log chain always find it. Both stop at the first failure.
//! [`ChainApplier::cleanup`] instead runs every step and reports all failures
//! together, so a partly created container is removed as far as possible.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use crate::iptables::ApplyError;
use crate::iptables::IptablesAdapter;
use crate::renderer::ChainRole;
use crate::renderer::ChainSet;
use crate::renderer::ChainSpec;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Teardown order: chains that reference the log chain go first.
const CLEANUP_ORDER: [ChainRole; 6] = [
    ChainRole::Overlay,
    ChainRole::NetOut,
    ChainRole::Input,
    ChainRole::NetOutLog,
    ChainRole::NetInNat,
    ChainRole::NetInMangle,
];

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Every failure from a cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    /// Failures in the order they happened.
    errors: Vec<String>,
}

impl MultiError {
    /// Returns the collected failure messages.
    #[must_use]
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Records a failure with its step.
    fn push(&mut self, step: &str, error: &ApplyError) {
        self.errors.push(format!("{step}: {error}"));
    }

    /// Converts into a result.
    fn into_result(self) -> Result<(), Self> {
        if self.errors.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for error in &self.errors {
            write!(f, "\n\t* {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

// ============================================================================
// SECTION: Applier
// ============================================================================

/// Applies chain sets through an adapter.
pub struct ChainApplier<A> {
    /// Packet filter adapter.
    adapter: A,
}

impl<A: IptablesAdapter> ChainApplier<A> {
    /// Builds an applier over `adapter`.
    #[must_use]
    pub const fn new(adapter: A) -> Self {
        Self {
            adapter,
        }
    }

    /// Returns the adapter.
    #[must_use]
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Creates every chain and inserts its jump at the top of the parent.
    ///
    /// # Errors
    ///
    /// Returns the first [`ApplyError`].
    pub fn initialize(&self, set: &ChainSet) -> Result<(), ApplyError> {
        for chain in set.chains() {
            self.adapter.new_chain(chain.table, &chain.name)?;
            if let Some(jump) = chain.jump() {
                self.adapter.bulk_insert(jump.table, &jump.parent, jump.position, &[jump.rule])?;
            }
        }
        Ok(())
    }

    /// Appends the rules of every chain.
    ///
    /// # Errors
    ///
    /// Returns the first [`ApplyError`].
    pub fn apply(&self, set: &ChainSet) -> Result<(), ApplyError> {
        for chain in set.chains().iter().filter(|chain| !chain.rules.is_empty()) {
            self.adapter.bulk_append(chain.table, &chain.name, &chain.rules)?;
        }
        tracing::debug!(chains = set.chains().len(), "applied container chains");
        Ok(())
    }

    /// Removes jumps, rules, and chains of `set`.
    ///
    /// # Errors
    ///
    /// Returns [`MultiError`] listing every failed step.
    pub fn cleanup(&self, set: &ChainSet) -> Result<(), MultiError> {
        let mut errors = MultiError::default();
        for chain in CLEANUP_ORDER.iter().filter_map(|role| set.get(*role)) {
            self.cleanup_chain(chain, &mut errors);
        }
        errors.into_result()
    }

    /// Deletes the jump, flushes, and deletes one chain.
    fn cleanup_chain(&self, chain: &ChainSpec, errors: &mut MultiError) {
        if let Some(jump) = chain.jump()
            && let Err(err) = self.adapter.delete_rule(jump.table, &jump.parent, &jump.rule)
        {
            errors.push("delete rule", &err);
        }
        if let Err(err) = self.adapter.clear_chain(chain.table, &chain.name) {
            errors.push("clear chain", &err);
        }
        if let Err(err) = self.adapter.delete_chain(chain.table, &chain.name) {
            errors.push("delete chain", &err);
        }
    }
}
