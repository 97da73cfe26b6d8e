// netpolicy-rules/src/iptables.rs
// ============================================================================
// Module: iptables Adapter
// Description: Serialized access to the host packet filter.
// Purpose: Run chain and rule commands one at a time in a predictable order.
// Dependencies: thiserror, tracing
// ============================================================================

//! ## Overview
//! The packet filter is a process-wide mutable resource. [`LockedIptables`]
//! holds a mutex for the duration of every call, so rules from concurrent
//! callers never interleave. Single-rule commands run `iptables -w`; bulk
//! inserts and appends go through one `iptables-restore --noflush`
//! transaction per call. Commands are executed through a [`CommandRunner`]
//! so the command lines can be checked without touching the host.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::process::Command;
use std::process::Stdio;
use std::sync::Mutex;

use thiserror::Error;

use crate::renderer::IptablesRule;
use crate::renderer::Table;

// ============================================================================
// SECTION: Adapter Trait
// ============================================================================

/// Packet filter operations used by the chain applier.
pub trait IptablesAdapter: Send + Sync {
    /// Returns true when `chain` exists in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the filter cannot be queried.
    fn chain_exists(&self, table: Table, chain: &str) -> Result<bool, ApplyError>;

    /// Creates `chain` in `table`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the chain cannot be created.
    fn new_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError>;

    /// Flushes every rule from `chain`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the chain cannot be flushed.
    fn clear_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError>;

    /// Deletes the empty `chain`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the chain cannot be deleted.
    fn delete_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError>;

    /// Inserts `rules` into `chain` starting at `position`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the transaction is rejected.
    fn bulk_insert(
        &self,
        table: Table,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError>;

    /// Appends `rules` to `chain`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when the transaction is rejected.
    fn bulk_append(&self, table: Table, chain: &str, rules: &[IptablesRule])
    -> Result<(), ApplyError>;

    /// Deletes the first rule in `chain` matching `rule`.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError`] when no such rule exists or deletion fails.
    fn delete_rule(&self, table: Table, chain: &str, rule: &IptablesRule) -> Result<(), ApplyError>;
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Packet filter failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// The adapter lock was poisoned by a panicking caller.
    #[error("iptables lock poisoned")]
    Lock,
    /// The command could not be started.
    #[error("failed to run {program}: {reason}")]
    Spawn {
        /// Program name.
        program: String,
        /// Failure reason.
        reason: String,
    },
    /// The command exited unsuccessfully.
    #[error("{command} failed: {output}")]
    Command {
        /// Command line.
        command: String,
        /// Combined output.
        output: String,
    },
}

// ============================================================================
// SECTION: Command Runner
// ============================================================================

/// Result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the command exited with status zero.
    pub success: bool,
    /// Combined stdout and stderr.
    pub output: String,
}

/// Executes host commands.
pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args`, feeding `stdin` when given.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::Spawn`] when the program cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ApplyError>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[String],
        stdin: Option<&str>,
    ) -> Result<CommandOutput, ApplyError> {
        let spawn_error = |reason: String| ApplyError::Spawn {
            program: program.to_string(),
            reason,
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() });
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|err| spawn_error(err.to_string()))?;
        if let Some(input) = stdin {
            let mut pipe =
                child.stdin.take().ok_or_else(|| spawn_error("stdin unavailable".to_string()))?;
            pipe.write_all(input.as_bytes()).map_err(|err| spawn_error(err.to_string()))?;
        }
        let finished = child.wait_with_output().map_err(|err| spawn_error(err.to_string()))?;
        let mut output = String::from_utf8_lossy(&finished.stdout).into_owned();
        output.push_str(&String::from_utf8_lossy(&finished.stderr));
        Ok(CommandOutput {
            success: finished.status.success(),
            output,
        })
    }
}

// ============================================================================
// SECTION: Locked iptables
// ============================================================================

/// `iptables` binary.
const IPTABLES: &str = "iptables";
/// `iptables-restore` binary.
const IPTABLES_RESTORE: &str = "iptables-restore";

/// Mutex-serialized iptables adapter.
pub struct LockedIptables<R = SystemCommandRunner> {
    /// Command executor.
    runner: R,
    /// Held for the duration of every call.
    lock: Mutex<()>,
}

impl LockedIptables<SystemCommandRunner> {
    /// Builds an adapter that runs the host binaries.
    #[must_use]
    pub fn system() -> Self {
        Self::new(SystemCommandRunner)
    }
}

impl<R: CommandRunner> LockedIptables<R> {
    /// Builds an adapter over `runner`.
    #[must_use]
    pub const fn new(runner: R) -> Self {
        Self {
            runner,
            lock: Mutex::new(()),
        }
    }

    /// Runs `iptables -w -t <table>` with `args` under the lock.
    fn iptables(&self, table: Table, args: &[&str]) -> Result<CommandOutput, ApplyError> {
        let _guard = self.lock.lock().map_err(|_| ApplyError::Lock)?;
        let mut full = vec!["-w".to_string(), "-t".to_string(), table.as_str().to_string()];
        full.extend(args.iter().map(ToString::to_string));
        tracing::debug!(command = %full.join(" "), "iptables");
        self.runner.run(IPTABLES, &full, None)
    }

    /// Runs an iptables command that must succeed.
    fn checked(&self, table: Table, args: &[&str]) -> Result<(), ApplyError> {
        let output = self.iptables(table, args)?;
        if output.success {
            return Ok(());
        }
        Err(ApplyError::Command {
            command: format!("{IPTABLES} -t {table} {}", args.join(" ")),
            output: output.output,
        })
    }

    /// Applies `rules` with `prefix` in one restore transaction.
    fn restore(
        &self,
        table: Table,
        prefix: &str,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError> {
        let mut input = format!("*{table}\n");
        for rule in rules {
            input.push_str(prefix);
            input.push(' ');
            input.push_str(&rule.to_string());
            input.push('\n');
        }
        input.push_str("COMMIT\n");
        let _guard = self.lock.lock().map_err(|_| ApplyError::Lock)?;
        let output = self.runner.run(IPTABLES_RESTORE, &["--noflush".to_string()], Some(&input))?;
        if output.success {
            return Ok(());
        }
        Err(ApplyError::Command {
            command: format!("{IPTABLES_RESTORE} --noflush"),
            output: output.output,
        })
    }
}

impl<R: CommandRunner> IptablesAdapter for LockedIptables<R> {
    fn chain_exists(&self, table: Table, chain: &str) -> Result<bool, ApplyError> {
        Ok(self.iptables(table, &["-S", chain])?.success)
    }

    fn new_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        self.checked(table, &["-N", chain])
    }

    fn clear_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        self.checked(table, &["-F", chain])
    }

    fn delete_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        self.checked(table, &["-X", chain])
    }

    fn bulk_insert(
        &self,
        table: Table,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError> {
        self.restore(table, &format!("-I {chain} {position}"), rules)
    }

    fn bulk_append(
        &self,
        table: Table,
        chain: &str,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError> {
        self.restore(table, &format!("-A {chain}"), rules)
    }

    fn delete_rule(
        &self,
        table: Table,
        chain: &str,
        rule: &IptablesRule,
    ) -> Result<(), ApplyError> {
        let mut args = vec!["-D", chain];
        args.extend(rule.args().iter().map(String::as_str));
        self.checked(table, &args)
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
