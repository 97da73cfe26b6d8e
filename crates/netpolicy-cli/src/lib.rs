// netpolicy-cli/src/lib.rs
// ============================================================================
// Module: Netpolicy CLI Library
// Description: Shared helpers for the `netpolicy` binary.
// Purpose: Keep logging setup and dry-run rendering testable outside `main`.
// Dependencies: netpolicy-rules, tracing-subscriber
// ============================================================================

//! ## Overview
//! `logging` installs the process-wide subscriber from the configured level;
//! `render` turns a container context file into an `iptables-restore` plan.

pub mod logging;
pub mod render;
