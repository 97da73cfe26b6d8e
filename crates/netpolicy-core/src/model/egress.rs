// netpolicy-core/src/model/egress.rs
// ============================================================================
// Module: Egress Destinations and Policies
// Description: Named egress destinations and the policies that reference them.
// Purpose: Parse and validate egress wire fields into closed types.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Egress destinations describe external address ranges reachable from
//! workloads. Egress policies bind a source group to a destination for a
//! given app lifecycle. Wire strings such as `"10.0.0.1-10.0.0.9"` and
//! `"80-443"` are parsed once here so internal layers only see typed values.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::model::ModelError;
use crate::model::groups::GroupType;
use crate::model::groups::Tag;
use crate::model::policy::PortRange;

// ============================================================================
// SECTION: Protocol
// ============================================================================

/// Protocol permitted by an egress destination rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EgressProtocol {
    /// TCP traffic.
    Tcp,
    /// UDP traffic.
    Udp,
    /// ICMP traffic.
    Icmp,
    /// Any protocol.
    All,
}

impl EgressProtocol {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Icmp => "icmp",
            Self::All => "all",
        }
    }

    /// Returns true when ICMP type and code may be set.
    #[must_use]
    pub const fn includes_icmp(self) -> bool {
        matches!(self, Self::Icmp | Self::All)
    }
}

impl fmt::Display for EgressProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EgressProtocol {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "icmp" => Ok(Self::Icmp),
            "all" => Ok(Self::All),
            other => Err(ModelError::Invalid(format!(
                "invalid destination protocol '{other}', specify either tcp, udp, or icmp"
            ))),
        }
    }
}

// ============================================================================
// SECTION: Destinations
// ============================================================================

/// Inclusive IPv4 address range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IpRange {
    /// First address.
    pub start: Ipv4Addr,
    /// Last address.
    pub end: Ipv4Addr,
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl FromStr for IpRange {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.is_empty() {
            return Err(ModelError::Invalid("missing destination IP range".to_string()));
        }
        if value.contains(',') {
            return Err(ModelError::Invalid("only one IP range is currently supported".to_string()));
        }
        let (start_text, end_text) = value.split_once('-').unwrap_or((value, value));
        let start = parse_ipv4(start_text)?;
        let end = parse_ipv4(end_text)?;
        if start > end {
            return Err(ModelError::Invalid(format!(
                "invalid IP range {start_text}-{end_text}, start must be less than or equal to end"
            )));
        }
        Ok(Self {
            start,
            end,
        })
    }
}

/// Single rule inside an egress destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EgressRule {
    /// Permitted protocol.
    pub protocol: EgressProtocol,
    /// Destination address range.
    pub ips: IpRange,
    /// Destination ports for tcp and udp.
    pub ports: Option<PortRange>,
    /// ICMP type for icmp rules.
    pub icmp_type: Option<i32>,
    /// ICMP code for icmp rules.
    pub icmp_code: Option<i32>,
    /// Free-form description.
    pub description: String,
}

/// Raw wire fields of a destination rule before validation.
#[derive(Debug, Clone, Default)]
pub struct EgressRuleInput<'a> {
    /// Protocol label.
    pub protocol: &'a str,
    /// Address range text.
    pub ips: &'a str,
    /// Port range text; empty when absent.
    pub ports: &'a str,
    /// ICMP type when provided.
    pub icmp_type: Option<i32>,
    /// ICMP code when provided.
    pub icmp_code: Option<i32>,
    /// Rule description.
    pub description: &'a str,
}

impl EgressRule {
    /// Parses and validates a rule from wire fields.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] with a client-facing message.
    pub fn from_wire(input: &EgressRuleInput<'_>) -> Result<Self, ModelError> {
        if input.protocol.is_empty() {
            return Err(ModelError::Invalid("missing destination protocol".to_string()));
        }
        let protocol: EgressProtocol = input.protocol.parse()?;
        let ports_text = input.ports.trim();
        if protocol == EgressProtocol::Icmp && !ports_text.is_empty() {
            return Err(ModelError::Invalid(
                "ports are not supported for icmp protocol".to_string(),
            ));
        }
        if matches!(protocol, EgressProtocol::Tcp | EgressProtocol::Udp) && ports_text.is_empty() {
            return Err(ModelError::Invalid("missing destination ports".to_string()));
        }
        let ports = if ports_text.is_empty() { None } else { Some(parse_port_range(ports_text)?) };
        if !protocol.includes_icmp() && input.icmp_code.is_some() {
            return Err(ModelError::Invalid(format!(
                "invalid destination: cannot set icmp_code property for destination with \
                 protocol '{protocol}'"
            )));
        }
        if !protocol.includes_icmp() && input.icmp_type.is_some() {
            return Err(ModelError::Invalid(format!(
                "invalid destination: cannot set icmp_type property for destination with \
                 protocol '{protocol}'"
            )));
        }
        let ips: IpRange = input.ips.trim().parse()?;
        let (icmp_type, icmp_code) = if protocol == EgressProtocol::Icmp {
            (Some(input.icmp_type.unwrap_or(-1)), Some(input.icmp_code.unwrap_or(-1)))
        } else {
            (input.icmp_type, input.icmp_code)
        };
        Ok(Self {
            protocol,
            ips,
            ports,
            icmp_type,
            icmp_code,
            description: input.description.to_string(),
        })
    }
}

/// Named egress destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressDestination {
    /// Store-assigned guid; empty before creation.
    pub guid: String,
    /// Unique display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Destination rules.
    pub rules: Vec<EgressRule>,
}

impl EgressDestination {
    /// Returns true when two destinations carry the same content.
    #[must_use]
    pub fn same_content(&self, other: &Self) -> bool {
        self.name == other.name
            && self.description == other.description
            && self.rules == other.rules
    }
}

/// Validates a batch of destinations submitted in one request.
///
/// # Errors
///
/// Returns [`ModelError::Invalid`] for an empty batch, a missing name, or missing rules.
pub fn validate_destinations(destinations: &[EgressDestination]) -> Result<(), ModelError> {
    if destinations.is_empty() {
        return Err(ModelError::Invalid("missing destinations".to_string()));
    }
    for destination in destinations {
        if destination.name.trim().is_empty() {
            return Err(ModelError::Invalid("missing destination name".to_string()));
        }
        if destination.rules.is_empty() {
            return Err(ModelError::Invalid("missing rules".to_string()));
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: Egress Policies
// ============================================================================

/// Workload lifecycle phase an egress policy applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppLifecycle {
    /// Running workloads only.
    Running,
    /// Staging workloads only.
    Staging,
    /// Both phases.
    #[default]
    All,
}

impl AppLifecycle {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Staging => "staging",
            Self::All => "all",
        }
    }
}

impl FromStr for AppLifecycle {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "running" => Ok(Self::Running),
            "staging" => Ok(Self::Staging),
            "all" => Ok(Self::All),
            _ => Err(ModelError::Invalid(
                "app lifecycle must be 'running', 'staging', or 'all'".to_string(),
            )),
        }
    }
}

/// Source of an egress policy.
///
/// # Invariants
/// - `group_type` is `App`, `Space`, or `Default`.
/// - `id` is empty exactly when `group_type` is `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EgressSource {
    /// Source group id.
    pub id: String,
    /// Source group kind.
    pub group_type: GroupType,
}

impl EgressSource {
    /// Parses and validates a source from wire fields.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] with a client-facing message.
    pub fn from_wire(id: &str, source_type: &str) -> Result<Self, ModelError> {
        let group_type = match source_type {
            "" | "app" => GroupType::App,
            "space" => GroupType::Space,
            "default" => GroupType::Default,
            _ => return Err(ModelError::Invalid("source type must be app or space".to_string())),
        };
        if id.is_empty() && group_type != GroupType::Default {
            return Err(ModelError::Invalid("missing egress source ID".to_string()));
        }
        if !id.is_empty() && group_type == GroupType::Default {
            return Err(ModelError::Invalid(
                "cannot set source ID with type 'default'".to_string(),
            ));
        }
        Ok(Self {
            id: id.to_string(),
            group_type,
        })
    }
}

/// Egress policy binding a source to a destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressPolicy {
    /// Store-assigned guid; empty before creation.
    pub guid: String,
    /// Source group.
    pub source: EgressSource,
    /// Referenced destination guid.
    pub destination_guid: String,
    /// Lifecycle phase filter.
    pub app_lifecycle: AppLifecycle,
}

/// Validates a batch of egress policies submitted in one request.
///
/// # Errors
///
/// Returns [`ModelError::Invalid`] for an empty batch or a missing destination id.
pub fn validate_egress_policies(policies: &[EgressPolicy]) -> Result<(), ModelError> {
    if policies.is_empty() {
        return Err(ModelError::Invalid("missing egress policies".to_string()));
    }
    if policies.iter().any(|policy| policy.destination_guid.trim().is_empty()) {
        return Err(ModelError::Invalid("missing egress destination id".to_string()));
    }
    Ok(())
}

/// Egress policy joined with its destination and source tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEgressPolicy {
    /// Stored policy.
    pub policy: EgressPolicy,
    /// Referenced destination.
    pub destination: EgressDestination,
    /// Tag of the source group when one is issued.
    pub source_tag: Option<Tag>,
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Parses a dotted IPv4 address with the client-facing error message.
fn parse_ipv4(text: &str) -> Result<Ipv4Addr, ModelError> {
    text.trim().parse::<Ipv4Addr>().map_err(|_| {
        ModelError::Invalid(format!("invalid ip address '{text}', must be a valid IPv4 address"))
    })
}

/// Parses `"start-end"` or `"port"` into a validated range.
fn parse_port_range(text: &str) -> Result<PortRange, ModelError> {
    if text.contains(',') {
        return Err(ModelError::Invalid("only one port range is currently supported".to_string()));
    }
    let (start_text, end_text) = text.split_once('-').unwrap_or((text, text));
    let start = parse_port(start_text)?;
    let end = parse_port(end_text)?;
    if start > end {
        return Err(ModelError::Invalid(format!(
            "invalid port range {start}-{end}, start must be less than or equal to end"
        )));
    }
    if end > 65_535 {
        return Err(ModelError::Invalid(format!(
            "invalid end port {end}, must be in range 1-65535"
        )));
    }
    if start <= 0 {
        return Err(ModelError::Invalid(format!(
            "invalid start port {start}, must be in range 1-65535"
        )));
    }
    PortRange::from_wire(start, end)
}

/// Parses a single port token.
fn parse_port(text: &str) -> Result<i64, ModelError> {
    text.trim().parse::<i64>().map_err(|_| {
        ModelError::Invalid(format!("invalid port {text}, could not convert to an integer"))
    })
}
