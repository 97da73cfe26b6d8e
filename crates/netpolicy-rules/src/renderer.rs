// netpolicy-rules/src/renderer.rs
// ============================================================================
// Module: Chain Renderer
// Description: Renders the per-container chain set from a container context.
// Purpose: Produce every chain, jump, and rule a container needs, in order.
// Dependencies: netpolicy-core, serde
// ============================================================================

//! ## Overview
//! [`render`] is a pure function of a [`ContainerContext`]. It yields six
//! chains in initialization order:
//!
//! 1. `nat/netin--h` for host port DNAT;
//! 2. `mangle/netin--h` marking inbound host port traffic with the ingress tag;
//! 3. `filter/input--h` for traffic from the container to the host;
//! 4. `filter/netout--h` for egress, carrying the converted ASG rules;
//! 5. `filter/overlay--h` for container-to-container traffic;
//! 6. `filter/netout--h--log` with no parent, the target of logged matches.
//!
//! Every chain with a parent is entered through a single jump inserted at
//! position 1 of the parent.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::fmt::Write as _;
use std::net::Ipv4Addr;

use netpolicy_core::PortRange;
use netpolicy_core::Protocol;
use netpolicy_core::Tag;
use netpolicy_core::TaggedPolicy;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::asg::AsgRule;
use crate::asg::bulk_convert;
use crate::naming::ChainNamer;
use crate::naming::DEFAULT_MAX_NAME_LENGTH;
use crate::naming::truncate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name prefix of the port-forwarding chains.
const PREFIX_NETIN: &str = "netin";
/// Name prefix of the host input chain.
const PREFIX_INPUT: &str = "input";
/// Name prefix of the egress chain.
const PREFIX_NETOUT: &str = "netout";
/// Name prefix of the overlay chain.
const PREFIX_OVERLAY: &str = "overlay";
/// Name suffix of the egress log chain.
const SUFFIX_LOG: &str = "log";
/// Maximum iptables log prefix length.
const MAX_LOG_PREFIX_LENGTH: usize = 28;
/// Position jumps are inserted at.
const JUMP_POSITION: u32 = 1;

// ============================================================================
// SECTION: Rule Types
// ============================================================================

/// iptables table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    /// `filter` table.
    Filter,
    /// `nat` table.
    Nat,
    /// `mangle` table.
    Mangle,
}

impl Table {
    /// Returns the iptables table name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Filter => "filter",
            Self::Nat => "nat",
            Self::Mangle => "mangle",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rule specification as iptables arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IptablesRule(Vec<String>);

impl IptablesRule {
    /// Builds a rule from its arguments.
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    /// Returns the rule arguments.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.0
    }

    /// Returns a copy with `extra` appended.
    #[must_use]
    fn with<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut args = self.0.clone();
        args.extend(extra.into_iter().map(Into::into));
        Self(args)
    }
}

impl fmt::Display for IptablesRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Purpose of a chain within the set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChainRole {
    /// `nat` port forwarding.
    NetInNat,
    /// `mangle` ingress marking.
    NetInMangle,
    /// Container to host.
    Input,
    /// Container egress.
    NetOut,
    /// Container to container.
    Overlay,
    /// Logged egress matches.
    NetOutLog,
}

/// Jump from a parent chain into a container chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JumpRule {
    /// Table of both chains.
    pub table: Table,
    /// Parent chain.
    pub parent: String,
    /// Insert position in the parent.
    pub position: u32,
    /// Jump rule specification.
    pub rule: IptablesRule,
}

/// One container chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSpec {
    /// Purpose of the chain.
    pub role: ChainRole,
    /// Table the chain lives in.
    pub table: Table,
    /// Chain name.
    pub name: String,
    /// Built-in chain jumping here, if any.
    pub parent: Option<String>,
    /// Matches guarding the jump.
    pub jump_conditions: Vec<String>,
    /// Rules appended to the chain, in order.
    pub rules: Vec<IptablesRule>,
}

impl ChainSpec {
    /// Returns the jump rule from the parent, if the chain has one.
    #[must_use]
    pub fn jump(&self) -> Option<JumpRule> {
        let parent = self.parent.as_ref()?;
        let rule = IptablesRule::new(self.jump_conditions.iter().map(String::as_str))
            .with(["--jump", self.name.as_str()]);
        Some(JumpRule {
            table: self.table,
            parent: parent.clone(),
            position: JUMP_POSITION,
            rule,
        })
    }
}

/// Rendered chains for one container, in initialization order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainSet {
    /// Chains in initialization order.
    chains: Vec<ChainSpec>,
}

impl ChainSet {
    /// Returns the chains in initialization order.
    #[must_use]
    pub fn chains(&self) -> &[ChainSpec] {
        &self.chains
    }

    /// Returns the chain with the given role.
    #[must_use]
    pub fn get(&self, role: ChainRole) -> Option<&ChainSpec> {
        self.chains.iter().find(|chain| chain.role == role)
    }

    /// Returns the chain with the given table and name.
    #[must_use]
    pub fn find(&self, table: Table, name: &str) -> Option<&ChainSpec> {
        self.chains.iter().find(|chain| chain.table == table && chain.name == name)
    }

    /// Renders the set as `iptables-restore --noflush` input.
    #[must_use]
    pub fn restore_plan(&self) -> String {
        let mut plan = String::new();
        for table in [Table::Nat, Table::Mangle, Table::Filter] {
            let chains: Vec<&ChainSpec> =
                self.chains.iter().filter(|chain| chain.table == table).collect();
            if chains.is_empty() {
                continue;
            }
            let _ = writeln!(plan, "*{table}");
            for chain in &chains {
                let _ = writeln!(plan, ":{} - [0:0]", chain.name);
            }
            for jump in chains.iter().filter_map(|chain| chain.jump()) {
                let _ = writeln!(plan, "-I {} {} {}", jump.parent, jump.position, jump.rule);
            }
            for chain in &chains {
                for rule in &chain.rules {
                    let _ = writeln!(plan, "-A {} {rule}", chain.name);
                }
            }
            plan.push_str("COMMIT\n");
        }
        plan
    }
}

// ============================================================================
// SECTION: Context
// ============================================================================

/// Host port forwarded into the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Host address.
    pub host_ip: Ipv4Addr,
    /// Host port.
    pub host_port: u16,
    /// Container address.
    pub container_ip: Ipv4Addr,
    /// Container port.
    pub container_port: u16,
}

/// Inbound C2C allowance for the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct C2cAllow {
    /// Tag of the allowed source group.
    pub source_tag: Tag,
    /// Allowed protocol.
    pub protocol: Protocol,
    /// Allowed destination ports.
    pub ports: PortRange,
}

impl C2cAllow {
    /// Builds an allowance from a tagged policy; `None` when untagged.
    #[must_use]
    pub fn from_tagged(policy: &TaggedPolicy) -> Option<Self> {
        Some(Self {
            source_tag: policy.source_tag?,
            protocol: policy.policy.protocol,
            ports: policy.policy.ports,
        })
    }
}

/// Everything needed to render one container's chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerContext {
    /// Container handle.
    pub handle: String,
    /// Container overlay address.
    pub overlay_ip: Ipv4Addr,
    /// Host interface leading off the overlay.
    pub host_interface: String,
    /// Overlay network CIDR.
    pub overlay_cidr: String,
    /// Host port forwards.
    #[serde(default)]
    pub host_port_mappings: Vec<PortMapping>,
    /// Inbound C2C allowances.
    #[serde(default)]
    pub c2c_policies: Vec<C2cAllow>,
    /// Applicable ASG rules, in order.
    #[serde(default)]
    pub asg_rules: Vec<AsgRule>,
    /// Mark for traffic entering through host ports.
    pub ingress_tag: u32,
    /// Log all ASG matches and denials.
    #[serde(default)]
    pub asg_logging: bool,
    /// Log denied C2C traffic.
    #[serde(default)]
    pub c2c_logging: bool,
    /// Rate limit for denied packet logs.
    #[serde(default = "default_denied_logs_per_sec")]
    pub denied_logs_per_sec: u32,
    /// Rate limit for accepted UDP logs.
    #[serde(default = "default_accepted_udp_logs_per_sec")]
    pub accepted_udp_logs_per_sec: u32,
    /// DNS servers the container may reach on the host.
    #[serde(default)]
    pub dns_servers: Vec<Ipv4Addr>,
}

/// Default denied log rate.
const fn default_denied_logs_per_sec() -> u32 {
    1
}

/// Default accepted UDP log rate.
const fn default_accepted_udp_logs_per_sec() -> u32 {
    100
}

/// Render options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Maximum chain name length.
    pub max_name_length: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            max_name_length: DEFAULT_MAX_NAME_LENGTH,
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Rendering failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// The container handle cannot name a chain.
    #[error("invalid handle: {0}")]
    InvalidHandle(String),
    /// A chain name cannot fit the length bound.
    #[error("chain name too long: {0}")]
    NameTooLong(String),
    /// ASG rules could not be parsed.
    #[error("invalid asg rules: {0}")]
    InvalidAsgRules(String),
}

// ============================================================================
// SECTION: Rendering
// ============================================================================

/// Renders the chain set for one container.
///
/// # Errors
///
/// Returns [`RenderError`] when the handle is unusable or a name cannot fit.
pub fn render(ctx: &ContainerContext, options: &RenderOptions) -> Result<ChainSet, RenderError> {
    if ctx.handle.is_empty() || ctx.handle.chars().any(char::is_whitespace) {
        return Err(RenderError::InvalidHandle(format!("'{}'", ctx.handle)));
    }
    let namer = ChainNamer::new(options.max_name_length);
    let netin = namer.prefix(PREFIX_NETIN, &ctx.handle);
    let netout = namer.prefix(PREFIX_NETOUT, &ctx.handle);
    let log = namer.postfix(&netout, SUFFIX_LOG)?;
    let ip = ctx.overlay_ip.to_string();

    let chains = vec![
        ChainSpec {
            role: ChainRole::NetInNat,
            table: Table::Nat,
            name: netin.clone(),
            parent: Some("PREROUTING".to_string()),
            jump_conditions: Vec::new(),
            rules: ctx.host_port_mappings.iter().map(dnat_rule).collect(),
        },
        ChainSpec {
            role: ChainRole::NetInMangle,
            table: Table::Mangle,
            name: netin,
            parent: Some("PREROUTING".to_string()),
            jump_conditions: Vec::new(),
            rules: ctx
                .host_port_mappings
                .iter()
                .map(|mapping| ingress_mark_rule(mapping, ctx.ingress_tag))
                .collect(),
        },
        ChainSpec {
            role: ChainRole::Input,
            table: Table::Filter,
            name: namer.prefix(PREFIX_INPUT, &ctx.handle),
            parent: Some("INPUT".to_string()),
            jump_conditions: vec!["-s".to_string(), ip.clone()],
            rules: input_rules(ctx, &ip),
        },
        ChainSpec {
            role: ChainRole::NetOut,
            table: Table::Filter,
            name: netout,
            parent: Some("FORWARD".to_string()),
            jump_conditions: netout_conditions(ctx, &ip).args().to_vec(),
            rules: netout_rules(ctx, &ip, &log),
        },
        ChainSpec {
            role: ChainRole::Overlay,
            table: Table::Filter,
            name: namer.prefix(PREFIX_OVERLAY, &ctx.handle),
            parent: Some("FORWARD".to_string()),
            jump_conditions: Vec::new(),
            rules: overlay_rules(ctx, &ip),
        },
        ChainSpec {
            role: ChainRole::NetOutLog,
            table: Table::Filter,
            name: log,
            parent: None,
            jump_conditions: Vec::new(),
            rules: log_rules(ctx),
        },
    ];
    Ok(ChainSet {
        chains,
    })
}

/// DNAT for one host port mapping.
fn dnat_rule(mapping: &PortMapping) -> IptablesRule {
    IptablesRule::new([
        "-d".to_string(),
        mapping.host_ip.to_string(),
        "-p".to_string(),
        "tcp".to_string(),
        "-m".to_string(),
        "tcp".to_string(),
        "--dport".to_string(),
        mapping.host_port.to_string(),
        "--jump".to_string(),
        "DNAT".to_string(),
        "--to-destination".to_string(),
        format!("{}:{}", mapping.container_ip, mapping.container_port),
    ])
}

/// Ingress mark for one host port mapping.
fn ingress_mark_rule(mapping: &PortMapping, ingress_tag: u32) -> IptablesRule {
    IptablesRule::new([
        "-d".to_string(),
        mapping.host_ip.to_string(),
        "-p".to_string(),
        "tcp".to_string(),
        "-m".to_string(),
        "tcp".to_string(),
        "--dport".to_string(),
        mapping.host_port.to_string(),
        "--jump".to_string(),
        "MARK".to_string(),
        "--set-xmark".to_string(),
        mark(ingress_tag),
    ])
}

/// Container to host rules.
fn input_rules(ctx: &ContainerContext, ip: &str) -> Vec<IptablesRule> {
    let source = IptablesRule::new(["-s", ip]);
    let mut rules = vec![source.with(related_established("ACCEPT"))];
    for server in &ctx.dns_servers {
        let server = server.to_string();
        for protocol in ["tcp", "udp"] {
            rules.push(source.with([
                "-p",
                protocol,
                "-d",
                server.as_str(),
                "--destination-port",
                "53",
                "--jump",
                "ACCEPT",
            ]));
        }
    }
    rules.push(source.with(reject()));
    rules
}

/// Matches selecting the container's egress off the overlay.
fn netout_conditions(ctx: &ContainerContext, ip: &str) -> IptablesRule {
    IptablesRule::new(["-s", ip, "!", "-o", ctx.host_interface.as_str()])
}

/// Egress rules.
fn netout_rules(ctx: &ContainerContext, ip: &str, log_chain: &str) -> Vec<IptablesRule> {
    let guard = netout_conditions(ctx, ip);
    let mut rules = vec![guard.with(related_established("ACCEPT"))];
    rules.extend(bulk_convert(&ctx.asg_rules, ip, log_chain, ctx.asg_logging));
    if ctx.asg_logging {
        rules.push(guard.with(rate_limited_log(
            ctx.denied_logs_per_sec,
            &log_prefix("DENY_", &ctx.handle),
        )));
    }
    rules.push(guard.with(reject()));
    rules
}

/// Container to container rules.
fn overlay_rules(ctx: &ContainerContext, ip: &str) -> Vec<IptablesRule> {
    let to_container = IptablesRule::new(["-d", ip]);
    let ingress_mark = mark(ctx.ingress_tag);
    let mut rules = vec![
        IptablesRule::new(["-s", ip, "-o", ctx.host_interface.as_str(), "--jump", "ACCEPT"]),
        to_container.with(related_established("ACCEPT")),
        to_container.with(["-m", "mark", "--mark", ingress_mark.as_str(), "--jump", "ACCEPT"]),
    ];
    for policy in &ctx.c2c_policies {
        rules.push(to_container.with([
            "-p".to_string(),
            policy.protocol.as_str().to_string(),
            "--dport".to_string(),
            format!("{}:{}", policy.ports.start, policy.ports.end),
            "-m".to_string(),
            "mark".to_string(),
            "--mark".to_string(),
            mark(policy.source_tag.get()),
            "--jump".to_string(),
            "ACCEPT".to_string(),
        ]));
    }
    let from_overlay = IptablesRule::new(["-s", ctx.overlay_cidr.as_str(), "-d", ip]);
    if ctx.c2c_logging {
        rules.push(from_overlay.with(rate_limited_log(
            ctx.denied_logs_per_sec,
            &log_prefix("DENY_C2C_", &ctx.handle),
        )));
    }
    rules.push(from_overlay.with(reject()));
    rules
}

/// Log chain rules.
fn log_rules(ctx: &ContainerContext) -> Vec<IptablesRule> {
    let prefix = log_prefix("OK_", &ctx.handle);
    vec![
        IptablesRule::new([
            "!",
            "-p",
            "udp",
            "-m",
            "conntrack",
            "--ctstate",
            "INVALID,NEW,UNTRACKED",
            "--jump",
            "LOG",
            "--log-prefix",
            prefix.as_str(),
        ]),
        IptablesRule::new(["-p", "udp"])
            .with(rate_limited_log(ctx.accepted_udp_logs_per_sec, &prefix)),
        IptablesRule::new(["--jump", "ACCEPT"]),
    ]
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Related/established match ending in `target`.
fn related_established(target: &str) -> [&str; 6] {
    ["-m", "state", "--state", "RELATED,ESTABLISHED", "--jump", target]
}

/// Port-unreachable reject.
const fn reject() -> [&'static str; 4] {
    ["--jump", "REJECT", "--reject-with", "icmp-port-unreachable"]
}

/// Rate-limited LOG target.
fn rate_limited_log(per_sec: u32, prefix: &str) -> Vec<String> {
    vec![
        "-m".to_string(),
        "limit".to_string(),
        "--limit".to_string(),
        format!("{per_sec}/s"),
        "--limit-burst".to_string(),
        per_sec.to_string(),
        "--jump".to_string(),
        "LOG".to_string(),
        "--log-prefix".to_string(),
        prefix.to_string(),
    ]
}

/// Log prefix bounded to the kernel limit.
fn log_prefix(kind: &str, handle: &str) -> String {
    truncate(&format!("{kind}{handle}"), MAX_LOG_PREFIX_LENGTH).to_string()
}

/// Packet mark literal.
fn mark(tag: u32) -> String {
    format!("0x{tag:X}")
}

// ============================================================================
// SECTION: Tests
// ============================================================================
