// netpolicy-rules/tests/common/mod.rs
// ============================================================================
// Module: Rules Test Helpers
// Description: In-memory packet filter and sample contexts.
// Purpose: Exercise the applier without touching the host.
// Dependencies: netpolicy-rules
// ============================================================================

#![allow(dead_code, reason = "Test helpers are selectively used across suites.")]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    reason = "Test-only helpers may unwrap."
)]

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

use netpolicy_rules::ApplyError;
use netpolicy_rules::AsgRule;
use netpolicy_rules::ContainerContext;
use netpolicy_rules::IptablesAdapter;
use netpolicy_rules::IptablesRule;
use netpolicy_rules::PortMapping;
use netpolicy_rules::Table;

/// Chains and their rules, keyed by table and name.
pub type FilterState = BTreeMap<(Table, String), Vec<String>>;

/// In-memory iptables with the kernel's chain rules enforced.
pub struct SimulatedIptables {
    /// Current chains.
    state: Mutex<FilterState>,
}

impl SimulatedIptables {
    /// Starts with only the built-in chains.
    pub fn new() -> Self {
        let mut state = FilterState::new();
        let builtins: [(Table, &[&str]); 3] = [
            (Table::Filter, &["INPUT", "FORWARD", "OUTPUT"]),
            (Table::Nat, &["PREROUTING", "INPUT", "OUTPUT", "POSTROUTING"]),
            (Table::Mangle, &["PREROUTING", "INPUT", "FORWARD", "OUTPUT", "POSTROUTING"]),
        ];
        for (table, chains) in builtins {
            for chain in chains {
                state.insert((table, (*chain).to_string()), Vec::new());
            }
        }
        Self {
            state: Mutex::new(state),
        }
    }

    /// Returns a snapshot of every chain.
    pub fn snapshot(&self) -> FilterState {
        self.state.lock().unwrap().clone()
    }

    /// Adds a chain directly.
    pub fn seed_chain(&self, table: Table, chain: &str) {
        self.state.lock().unwrap().insert((table, chain.to_string()), Vec::new());
    }
}

/// Builds a command failure.
fn failure(command: String, output: &str) -> ApplyError {
    ApplyError::Command {
        command,
        output: output.to_string(),
    }
}

/// Returns true when `rule` jumps or goes to `chain`.
fn references(rule: &str, chain: &str) -> bool {
    let tokens: Vec<&str> = rule.split(' ').collect();
    tokens.windows(2).any(|pair| (pair[0] == "--jump" || pair[0] == "-g") && pair[1] == chain)
}

impl IptablesAdapter for SimulatedIptables {
    fn chain_exists(&self, table: Table, chain: &str) -> Result<bool, ApplyError> {
        Ok(self.state.lock().unwrap().contains_key(&(table, chain.to_string())))
    }

    fn new_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let key = (table, chain.to_string());
        if state.contains_key(&key) {
            return Err(failure(format!("-N {chain}"), "Chain already exists."));
        }
        state.insert(key, Vec::new());
        Ok(())
    }

    fn clear_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let rules = state
            .get_mut(&(table, chain.to_string()))
            .ok_or_else(|| failure(format!("-F {chain}"), "No chain/target/match by that name."))?;
        rules.clear();
        Ok(())
    }

    fn delete_chain(&self, table: Table, chain: &str) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let key = (table, chain.to_string());
        let rules = state
            .get(&key)
            .ok_or_else(|| failure(format!("-X {chain}"), "No chain/target/match by that name."))?;
        if !rules.is_empty() {
            return Err(failure(format!("-X {chain}"), "Directory not empty."));
        }
        let referenced = state
            .iter()
            .filter(|((rule_table, _), _)| *rule_table == table)
            .any(|(_, rules)| rules.iter().any(|rule| references(rule, chain)));
        if referenced {
            return Err(failure(format!("-X {chain}"), "Too many links."));
        }
        state.remove(&key);
        Ok(())
    }

    fn bulk_insert(
        &self,
        table: Table,
        chain: &str,
        position: u32,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .get_mut(&(table, chain.to_string()))
            .ok_or_else(|| failure(format!("-I {chain}"), "No chain/target/match by that name."))?;
        let index = usize::try_from(position).unwrap() - 1;
        if index > existing.len() {
            return Err(failure(format!("-I {chain} {position}"), "Index of insertion too big."));
        }
        for rule in rules {
            existing.insert(index, rule.to_string());
        }
        Ok(())
    }

    fn bulk_append(
        &self,
        table: Table,
        chain: &str,
        rules: &[IptablesRule],
    ) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .get_mut(&(table, chain.to_string()))
            .ok_or_else(|| failure(format!("-A {chain}"), "No chain/target/match by that name."))?;
        existing.extend(rules.iter().map(ToString::to_string));
        Ok(())
    }

    fn delete_rule(
        &self,
        table: Table,
        chain: &str,
        rule: &IptablesRule,
    ) -> Result<(), ApplyError> {
        let mut state = self.state.lock().unwrap();
        let existing = state
            .get_mut(&(table, chain.to_string()))
            .ok_or_else(|| failure(format!("-D {chain}"), "No chain/target/match by that name."))?;
        let text = rule.to_string();
        let index = existing
            .iter()
            .position(|candidate| *candidate == text)
            .ok_or_else(|| failure(format!("-D {chain} {text}"), "Bad rule."))?;
        existing.remove(index);
        Ok(())
    }
}

/// Context exercising every chain, including the log chain target.
pub fn busy_context(handle: &str) -> ContainerContext {
    ContainerContext {
        handle: handle.to_string(),
        overlay_ip: Ipv4Addr::new(10, 255, 0, 5),
        host_interface: "eth0".to_string(),
        overlay_cidr: "10.255.0.0/16".to_string(),
        host_port_mappings: vec![PortMapping {
            host_ip: Ipv4Addr::new(1, 2, 3, 4),
            host_port: 1111,
            container_ip: Ipv4Addr::new(10, 255, 0, 5),
            container_port: 2222,
        }],
        c2c_policies: Vec::new(),
        asg_rules: vec![AsgRule {
            protocol: "tcp".to_string(),
            destination: "10.0.0.0/8".to_string(),
            ports: "443".to_string(),
            log: true,
            ..AsgRule::default()
        }],
        ingress_tag: 0xFEED_BEEF,
        asg_logging: true,
        c2c_logging: true,
        denied_logs_per_sec: 1,
        accepted_udp_logs_per_sec: 100,
        dns_servers: vec![Ipv4Addr::new(169, 254, 0, 2)],
    }
}
