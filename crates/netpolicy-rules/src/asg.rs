// netpolicy-rules/src/asg.rs
// ============================================================================
// Module: ASG Rule Conversion
// Description: Converts security group rule blobs into netout rules.
// Purpose: Expand each ASG rule into one iptables rule per network and port.
// Dependencies: netpolicy-core, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! ASG rules arrive as the registry's JSON rule list, stored verbatim. Each
//! rule names a protocol, one or more destinations (an address, a CIDR, or a
//! range, comma separated), and for TCP and UDP one or more port ranges.
//! Every emitted rule matches `--source` on the container's overlay IP. A
//! rule whose fields do not fit its protocol is skipped with a warning rather
//! than rejected, so one bad rule never blocks the rest of a container's
//! egress rules.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::Ipv4Addr;
use std::str::FromStr;

use netpolicy_core::IpRange;
use netpolicy_core::PortRange;
use serde::Deserialize;
use serde::Serialize;

use crate::renderer::IptablesRule;
use crate::renderer::RenderError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// One rule of an ASG rule list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgRule {
    /// `tcp`, `udp`, `icmp`, or `all`.
    pub protocol: String,
    /// Comma-separated addresses, CIDRs, or `a-b` ranges.
    pub destination: String,
    /// Comma-separated ports or `a-b` ranges.
    #[serde(default)]
    pub ports: String,
    /// ICMP type; `-1` matches any type.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i32>,
    /// ICMP code; `-1` matches any code.
    #[serde(default, rename = "code", skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<i32>,
    /// Route matches through the log chain.
    #[serde(default)]
    pub log: bool,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
}

// ============================================================================
// SECTION: Parsing
// ============================================================================

/// Parses a stored rule list.
///
/// # Errors
///
/// Returns [`RenderError::InvalidAsgRules`] when the JSON is not a rule list.
pub fn parse_rules(rules_json: &str) -> Result<Vec<AsgRule>, RenderError> {
    serde_json::from_str(rules_json).map_err(|err| RenderError::InvalidAsgRules(err.to_string()))
}

/// Parses comma-separated destinations into address ranges.
fn parse_networks(destination: &str) -> Result<Vec<IpRange>, String> {
    destination
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if let Some((address, prefix)) = entry.split_once('/') {
                cidr_range(address, prefix)
            } else {
                IpRange::from_str(entry).map_err(|err| err.to_string())
            }
        })
        .collect()
}

/// Expands a CIDR into its first and last address.
fn cidr_range(address: &str, prefix: &str) -> Result<IpRange, String> {
    let address: Ipv4Addr =
        address.parse().map_err(|_| format!("invalid CIDR address '{address}'"))?;
    let bits: u32 = prefix
        .parse()
        .ok()
        .filter(|bits| *bits <= 32)
        .ok_or_else(|| format!("invalid CIDR prefix '{prefix}'"))?;
    let mask = u32::MAX.checked_shl(32 - bits).unwrap_or(0);
    let network = u32::from(address) & mask;
    Ok(IpRange {
        start: Ipv4Addr::from(network),
        end: Ipv4Addr::from(network | !mask),
    })
}

/// Parses comma-separated ports and `a-b` ranges.
fn parse_ports(ports: &str) -> Result<Vec<PortRange>, String> {
    ports
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (start, end) = entry.split_once('-').unwrap_or((entry, entry));
            let start: i64 = start.trim().parse().map_err(|_| format!("invalid port '{entry}'"))?;
            let end: i64 = end.trim().parse().map_err(|_| format!("invalid port '{entry}'"))?;
            PortRange::from_wire(start, end).map_err(|err| err.to_string())
        })
        .collect()
}

/// Maps an ICMP type or code onto the iptables byte, `-1` meaning any.
fn icmp_byte(value: i32) -> Option<u8> {
    if value == -1 {
        return Some(u8::MAX);
    }
    u8::try_from(value).ok()
}

// ============================================================================
// SECTION: Conversion
// ============================================================================

/// Converts every rule in order for the container at `container_ip`.
#[must_use]
pub fn bulk_convert(
    rules: &[AsgRule],
    container_ip: &str,
    log_chain: &str,
    global_logging: bool,
) -> Vec<IptablesRule> {
    rules
        .iter()
        .flat_map(|rule| convert(rule, container_ip, log_chain, global_logging))
        .collect()
}

/// Converts one ASG rule into netout chain rules.
///
/// Logged matches jump to `log_chain` with `-g`; others `RETURN`.
#[must_use]
pub fn convert(
    rule: &AsgRule,
    container_ip: &str,
    log_chain: &str,
    global_logging: bool,
) -> Vec<IptablesRule> {
    let networks = match parse_networks(&rule.destination) {
        Ok(networks) => networks,
        Err(reason) => {
            tracing::warn!(destination = %rule.destination, %reason, "skipping asg rule");
            return Vec::new();
        }
    };
    let ports = match parse_ports(&rule.ports) {
        Ok(ports) => ports,
        Err(reason) => {
            tracing::warn!(ports = %rule.ports, %reason, "skipping asg rule");
            return Vec::new();
        }
    };
    let target: [&str; 2] =
        if rule.log || global_logging { ["-g", log_chain] } else { ["--jump", "RETURN"] };

    match rule.protocol.as_str() {
        protocol @ ("tcp" | "udp") => {
            if ports.is_empty() {
                tracing::warn!(
                    protocol,
                    destination = %rule.destination,
                    "UDP/TCP rule must specify ports"
                );
                return Vec::new();
            }
            networks
                .iter()
                .flat_map(|network| {
                    ports.iter().map(move |range| {
                        let mut args = vec![
                            "--source".to_string(),
                            container_ip.to_string(),
                            "-m".to_string(),
                            "iprange".to_string(),
                            "-p".to_string(),
                            protocol.to_string(),
                            "--dst-range".to_string(),
                            network.to_string(),
                            "-m".to_string(),
                            protocol.to_string(),
                            "--destination-port".to_string(),
                            format!("{}:{}", range.start, range.end),
                        ];
                        args.extend(target.iter().map(ToString::to_string));
                        IptablesRule::new(args)
                    })
                })
                .collect()
        }
        "icmp" => {
            let Some((icmp_type, icmp_code)) = rule
                .icmp_type
                .and_then(icmp_byte)
                .zip(rule.icmp_code.and_then(icmp_byte))
            else {
                tracing::warn!(
                    destination = %rule.destination,
                    "ICMP rule must specify ICMP type/code"
                );
                return Vec::new();
            };
            if !ports.is_empty() {
                tracing::warn!(destination = %rule.destination, "ICMP rule must not specify ports");
                return Vec::new();
            }
            networks
                .iter()
                .map(|network| {
                    let mut args = vec![
                        "--source".to_string(),
                        container_ip.to_string(),
                        "-m".to_string(),
                        "iprange".to_string(),
                        "-p".to_string(),
                        "icmp".to_string(),
                        "--dst-range".to_string(),
                        network.to_string(),
                        "-m".to_string(),
                        "icmp".to_string(),
                        "--icmp-type".to_string(),
                        format!("{icmp_type}/{icmp_code}"),
                    ];
                    args.extend(target.iter().map(ToString::to_string));
                    IptablesRule::new(args)
                })
                .collect()
        }
        "all" => {
            if !ports.is_empty() {
                tracing::warn!(
                    destination = %rule.destination,
                    "Rule for all protocols (TCP/UDP/ICMP) must not specify ports"
                );
                return Vec::new();
            }
            networks
                .iter()
                .map(|network| {
                    let mut args = vec![
                        "--source".to_string(),
                        container_ip.to_string(),
                        "-m".to_string(),
                        "iprange".to_string(),
                        "--dst-range".to_string(),
                        network.to_string(),
                    ];
                    args.extend(target.iter().map(ToString::to_string));
                    IptablesRule::new(args)
                })
                .collect()
        }
        other => {
            tracing::warn!(protocol = other, "skipping asg rule with unknown protocol");
            Vec::new()
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests;
