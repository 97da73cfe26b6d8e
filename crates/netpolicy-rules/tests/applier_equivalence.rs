// netpolicy-rules/tests/applier_equivalence.rs
// ============================================================================
// Module: Applier Lifecycle Tests
// Description: Applies, cleans up, and reapplies chain sets in memory.
// Purpose: Check teardown leaves the host as it found it.
// Dependencies: netpolicy-rules
// ============================================================================

//! ## Overview
//! Runs the chain applier against an in-memory packet filter that refuses the
//! same operations the kernel does: duplicate chains, deleting a non-empty or
//! referenced chain, and removing a rule that is not there.

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

mod common;

use netpolicy_rules::ChainApplier;
use netpolicy_rules::ChainRole;
use netpolicy_rules::IptablesAdapter;
use netpolicy_rules::RenderOptions;
use netpolicy_rules::Table;
use netpolicy_rules::render;

use crate::common::SimulatedIptables;
use crate::common::busy_context;

#[test]
fn apply_places_jumps_first_and_rules_in_order() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let applier = ChainApplier::new(SimulatedIptables::new());
    applier.initialize(&set).unwrap();
    applier.apply(&set).unwrap();

    let state = applier.adapter().snapshot();
    let forward = &state[&(Table::Filter, "FORWARD".to_string())];
    assert_eq!(forward.len(), 2);
    assert!(forward[0].ends_with("--jump overlay--h1"));
    assert!(forward[1].ends_with("--jump netout--h1"));

    let netout = set.get(ChainRole::NetOut).unwrap();
    let applied: Vec<String> = netout.rules.iter().map(ToString::to_string).collect();
    assert_eq!(state[&(Table::Filter, "netout--h1".to_string())], applied);
}

#[test]
fn cleanup_restores_builtin_state() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let pristine = SimulatedIptables::new().snapshot();
    let applier = ChainApplier::new(SimulatedIptables::new());
    applier.initialize(&set).unwrap();
    applier.apply(&set).unwrap();

    applier.cleanup(&set).unwrap();

    assert_eq!(applier.adapter().snapshot(), pristine);
    assert!(!applier.adapter().chain_exists(Table::Filter, "netout--h1--log").unwrap());
}

#[test]
fn cleanup_after_reapply_matches_single_apply() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let once = ChainApplier::new(SimulatedIptables::new());
    once.initialize(&set).unwrap();
    once.apply(&set).unwrap();

    let twice = ChainApplier::new(SimulatedIptables::new());
    twice.initialize(&set).unwrap();
    twice.apply(&set).unwrap();
    twice.cleanup(&set).unwrap();
    twice.initialize(&set).unwrap();
    twice.apply(&set).unwrap();

    assert_eq!(once.adapter().snapshot(), twice.adapter().snapshot());
}

#[test]
fn cleanup_on_fresh_host_collects_every_failure() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let applier = ChainApplier::new(SimulatedIptables::new());

    let err = applier.cleanup(&set).unwrap_err();

    assert_eq!(err.errors().len(), 17);
    assert!(err.errors()[0].starts_with("delete rule: "));
    assert!(err.to_string().starts_with("17 errors occurred:\n\t* "));
}

#[test]
fn cleanup_of_initialized_chains_succeeds() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let applier = ChainApplier::new(SimulatedIptables::new());
    applier.initialize(&set).unwrap();

    applier.cleanup(&set).unwrap();

    assert_eq!(applier.adapter().snapshot(), SimulatedIptables::new().snapshot());
}

#[test]
fn initialize_stops_at_first_failure() {
    let set = render(&busy_context("h1"), &RenderOptions::default()).unwrap();
    let adapter = SimulatedIptables::new();
    adapter.seed_chain(Table::Filter, "input--h1");
    let applier = ChainApplier::new(adapter);

    let err = applier.initialize(&set).unwrap_err();

    assert!(err.to_string().contains("Chain already exists."));
    assert!(applier.adapter().chain_exists(Table::Nat, "netin--h1").unwrap());
    assert!(!applier.adapter().chain_exists(Table::Filter, "netout--h1").unwrap());
}
