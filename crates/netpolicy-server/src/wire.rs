// netpolicy-server/src/wire.rs
// ============================================================================
// Module: Wire Formats
// Description: JSON request and response shapes for both HTTP listeners.
// Purpose: Map wire strings to model types once, at the edge.
// Dependencies: netpolicy-core, serde, serde_json
// ============================================================================

//! ## Overview
//! Requests deserialize into loose wire structs (strings and wide integers)
//! and convert into validated model values, so clients get the model's
//! validation messages rather than serde's. Responses are built from model
//! values; tags are rendered only when a [`TagWidth`] is supplied, which the
//! internal listener does and the external one does not.
//!
//! Policy ports differ by [`ApiVersion`]: v0 carries a single `port`; v1
//! carries `ports {start, end}` and also echoes `port` for single-port
//! ranges.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeSet;
use std::str::FromStr;

use netpolicy_core::AppLifecycle;
use netpolicy_core::EgressDestination;
use netpolicy_core::EgressPolicy;
use netpolicy_core::EgressRule;
use netpolicy_core::EgressRuleInput;
use netpolicy_core::EgressSource;
use netpolicy_core::GroupRef;
use netpolicy_core::GroupType;
use netpolicy_core::Pagination;
use netpolicy_core::Policy;
use netpolicy_core::PortRange;
use netpolicy_core::Protocol;
use netpolicy_core::ResolvedEgressPolicy;
use netpolicy_core::SecurityGroup;
use netpolicy_core::Tag;
use netpolicy_core::TagRecord;
use netpolicy_core::TagWidth;
use netpolicy_core::TaggedPolicy;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ApiError;
use crate::error::ApiErrorKind;

// ============================================================================
// SECTION: Versions
// ============================================================================

/// Supported API versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    /// Single-port policy wire.
    V0,
    /// Port-range policy wire plus egress routes.
    V1,
}

impl ApiVersion {
    /// Returns the path label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::V0 => "v0",
            Self::V1 => "v1",
        }
    }
}

impl FromStr for ApiVersion {
    type Err = ApiError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "v0" => Ok(Self::V0),
            "v1" => Ok(Self::V1),
            _ => Err(ApiError::new(
                ApiErrorKind::UnsupportedVersion,
                format!("api version {value} is not supported"),
            )),
        }
    }
}

// ============================================================================
// SECTION: Body Parsing
// ============================================================================

/// Parses a JSON request body.
///
/// # Errors
///
/// Returns a validation [`ApiError`] for malformed JSON.
pub fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(bytes).map_err(|err| {
        tracing::debug!(error = %err, "request body did not parse");
        ApiError::validation("invalid values passed to API")
    })
}

// ============================================================================
// SECTION: C2C Policies
// ============================================================================

/// `{"policies": [...]}` request body.
#[derive(Debug, Default, Deserialize)]
pub struct PoliciesRequest {
    /// Submitted policies.
    #[serde(default)]
    pub policies: Vec<PolicyWire>,
}

impl PoliciesRequest {
    /// Converts into validated policies.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for an empty list or a bad policy.
    pub fn into_policies(self, version: ApiVersion) -> Result<Vec<Policy>, ApiError> {
        let policies = self
            .policies
            .iter()
            .map(|wire| wire.to_policy(version))
            .collect::<Result<Vec<_>, _>>()?;
        netpolicy_core::validate_policies(&policies)?;
        Ok(policies)
    }
}

/// Policy source endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWire {
    /// App guid.
    #[serde(default)]
    pub id: String,
    /// Rendered tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Port range on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortsWire {
    /// First port.
    #[serde(default)]
    pub start: i64,
    /// Last port.
    #[serde(default)]
    pub end: i64,
}

/// Policy destination endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationWire {
    /// App guid.
    #[serde(default)]
    pub id: String,
    /// Rendered tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Protocol label.
    #[serde(default)]
    pub protocol: String,
    /// Single port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<i64>,
    /// Port range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ports: Option<PortsWire>,
}

/// Policy on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyWire {
    /// Source endpoint.
    #[serde(default)]
    pub source: SourceWire,
    /// Destination endpoint.
    #[serde(default)]
    pub destination: DestinationWire,
}

impl PolicyWire {
    /// Converts into a validated policy.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for a bad protocol, bad ports, or a
    /// missing id.
    pub fn to_policy(&self, version: ApiVersion) -> Result<Policy, ApiError> {
        let protocol = Protocol::from_str(&self.destination.protocol)?;
        let port = self.destination.port.unwrap_or(0);
        let ports = match (version, self.destination.ports) {
            (ApiVersion::V1, Some(range)) if range.start != 0 || range.end != 0 => {
                PortRange::from_wire(range.start, range.end)?
            }
            _ => PortRange::from_wire(port, port)?,
        };
        let policy = Policy::new(
            self.source.id.clone(),
            self.destination.id.clone(),
            protocol,
            ports,
        );
        policy.validate()?;
        Ok(policy)
    }

    /// Builds the wire form, rendering tags when `width` is given.
    #[must_use]
    pub fn from_tagged(
        tagged: &TaggedPolicy,
        version: ApiVersion,
        width: Option<TagWidth>,
    ) -> Self {
        let render = |tag: Option<Tag>| width.zip(tag).map(|(width, tag)| width.render(tag));
        let ports = tagged.policy.ports;
        let (port, range) = match version {
            ApiVersion::V0 => (Some(i64::from(ports.start)), None),
            ApiVersion::V1 => {
                let single = (ports.start == ports.end).then_some(i64::from(ports.start));
                (single, Some(PortsWire {
                    start: i64::from(ports.start),
                    end: i64::from(ports.end),
                }))
            }
        };
        Self {
            source: SourceWire {
                id: tagged.policy.source_id.clone(),
                tag: render(tagged.source_tag),
            },
            destination: DestinationWire {
                id: tagged.policy.destination_id.clone(),
                tag: render(tagged.destination_tag),
                protocol: tagged.policy.protocol.as_str().to_string(),
                port,
                ports: range,
            },
        }
    }

    /// Builds the wire form of an untagged policy.
    #[must_use]
    pub fn from_policy(policy: &Policy, version: ApiVersion) -> Self {
        let tagged = TaggedPolicy {
            policy: policy.clone(),
            source_tag: None,
            destination_tag: None,
        };
        Self::from_tagged(&tagged, version, None)
    }
}

/// `{"total_policies": n, "policies": [...]}` response body.
#[derive(Debug, Clone, Serialize)]
pub struct PoliciesResponse {
    /// Number of policies listed.
    pub total_policies: usize,
    /// Listed policies.
    pub policies: Vec<PolicyWire>,
    /// Number of egress policies listed, when included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_egress_policies: Option<usize>,
    /// Egress policies with their destinations, when included.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_policies: Option<Vec<EgressPolicyWire>>,
}

impl PoliciesResponse {
    /// Builds a response without egress policies.
    #[must_use]
    pub fn new(policies: Vec<PolicyWire>) -> Self {
        Self {
            total_policies: policies.len(),
            policies,
            total_egress_policies: None,
            egress_policies: None,
        }
    }

    /// Attaches egress policies.
    #[must_use]
    pub fn with_egress(mut self, egress: Vec<EgressPolicyWire>) -> Self {
        self.total_egress_policies = Some(egress.len());
        self.egress_policies = Some(egress);
        self
    }
}

/// Splits a comma-separated query value, dropping empty items.
#[must_use]
pub fn split_csv(value: Option<&String>) -> Vec<String> {
    value
        .map(|text| {
            text.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Returns the distinct app ids referenced by `policies`.
#[must_use]
pub fn policy_app_ids(policies: &[Policy]) -> Vec<String> {
    policies
        .iter()
        .flat_map(|policy| [policy.source_id.clone(), policy.destination_id.clone()])
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

// ============================================================================
// SECTION: Tags
// ============================================================================

/// Tagged group on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagWire {
    /// Group id.
    pub id: String,
    /// Group type label.
    #[serde(rename = "type")]
    pub group_type: String,
    /// Rendered tag.
    pub tag: String,
}

impl TagWire {
    /// Renders a tag record.
    #[must_use]
    pub fn new(group: &GroupRef, tag: Tag, width: TagWidth) -> Self {
        Self {
            id: group.id.clone(),
            group_type: group.group_type.as_str().to_string(),
            tag: width.render(tag),
        }
    }

    /// Renders a stored tag record.
    #[must_use]
    pub fn from_record(record: &TagRecord, width: TagWidth) -> Self {
        Self::new(&record.group, record.tag, width)
    }
}

/// `{"tags": [...]}` response body.
#[derive(Debug, Clone, Serialize)]
pub struct TagsResponse {
    /// Listed tags.
    pub tags: Vec<TagWire>,
}

/// `{"id": .., "type": ..}` tag request body.
#[derive(Debug, Default, Deserialize)]
pub struct TagRequest {
    /// Group id.
    #[serde(default)]
    pub id: String,
    /// Group type label.
    #[serde(default, rename = "type")]
    pub group_type: String,
}

impl TagRequest {
    /// Converts into a validated group reference.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for a missing id or unknown type.
    pub fn into_group(self) -> Result<GroupRef, ApiError> {
        if self.id.trim().is_empty() {
            return Err(ApiError::validation("missing id"));
        }
        let group_type = GroupType::from_str(&self.group_type)?;
        Ok(GroupRef::new(self.id, group_type))
    }
}

// ============================================================================
// SECTION: Security Groups
// ============================================================================

/// ASG on the internal wire; `rules` stays an opaque JSON string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityGroupWire {
    /// Registry guid.
    pub guid: String,
    /// Display name.
    pub name: String,
    /// Rule descriptors as JSON text.
    pub rules: String,
    /// Global for staging.
    pub staging_default: bool,
    /// Global for running.
    pub running_default: bool,
    /// Spaces bound for staging.
    pub staging_space_guids: Vec<String>,
    /// Spaces bound for running.
    pub running_space_guids: Vec<String>,
}

impl From<&SecurityGroup> for SecurityGroupWire {
    fn from(group: &SecurityGroup) -> Self {
        Self {
            guid: group.guid.clone(),
            name: group.name.clone(),
            rules: group.rules_json.clone(),
            staging_default: group.staging_default,
            running_default: group.running_default,
            staging_space_guids: group.staging_space_guids.iter().cloned().collect(),
            running_space_guids: group.running_space_guids.iter().cloned().collect(),
        }
    }
}

/// `{"next": n, "security_groups": [...]}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityGroupsResponse {
    /// Cursor for the next page; zero at the end.
    pub next: i64,
    /// Page of groups.
    pub security_groups: Vec<SecurityGroupWire>,
}

impl SecurityGroupsResponse {
    /// Builds a response from a store page.
    #[must_use]
    pub fn new(groups: &[SecurityGroup], pagination: Pagination) -> Self {
        Self {
            next: pagination.next,
            security_groups: groups.iter().map(SecurityGroupWire::from).collect(),
        }
    }
}

// ============================================================================
// SECTION: Egress Destinations
// ============================================================================

/// Destination rule on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressRuleWire {
    /// Protocol label.
    #[serde(default)]
    pub protocol: String,
    /// Address range `a-b`.
    #[serde(default)]
    pub ips: String,
    /// Port range `s-e`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ports: String,
    /// ICMP type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<i32>,
    /// ICMP code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<i32>,
    /// Rule description.
    #[serde(default)]
    pub description: String,
}

impl EgressRuleWire {
    /// Converts into a validated rule.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] with the rule validator's message.
    pub fn to_rule(&self) -> Result<EgressRule, ApiError> {
        Ok(EgressRule::from_wire(&EgressRuleInput {
            protocol: &self.protocol,
            ips: &self.ips,
            ports: &self.ports,
            icmp_type: self.icmp_type,
            icmp_code: self.icmp_code,
            description: &self.description,
        })?)
    }
}

impl From<&EgressRule> for EgressRuleWire {
    fn from(rule: &EgressRule) -> Self {
        Self {
            protocol: rule.protocol.as_str().to_string(),
            ips: rule.ips.to_string(),
            ports: rule
                .ports
                .map(|ports| format!("{}-{}", ports.start, ports.end))
                .unwrap_or_default(),
            icmp_type: rule.icmp_type,
            icmp_code: rule.icmp_code,
            description: rule.description.clone(),
        }
    }
}

/// Destination on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationWireEntry {
    /// Guid; empty on create.
    #[serde(default)]
    pub id: String,
    /// Unique name.
    #[serde(default)]
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Rules.
    #[serde(default)]
    pub rules: Vec<EgressRuleWire>,
}

impl DestinationWireEntry {
    /// Converts into a destination with validated rules.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for a bad rule.
    pub fn to_destination(&self) -> Result<EgressDestination, ApiError> {
        let rules = self.rules.iter().map(EgressRuleWire::to_rule).collect::<Result<Vec<_>, _>>()?;
        Ok(EgressDestination {
            guid: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            rules,
        })
    }
}

impl From<&EgressDestination> for DestinationWireEntry {
    fn from(destination: &EgressDestination) -> Self {
        Self {
            id: destination.guid.clone(),
            name: destination.name.clone(),
            description: destination.description.clone(),
            rules: destination.rules.iter().map(EgressRuleWire::from).collect(),
        }
    }
}

/// `{"destinations": [...]}` request body.
#[derive(Debug, Default, Deserialize)]
pub struct DestinationsRequest {
    /// Submitted destinations.
    #[serde(default)]
    pub destinations: Vec<DestinationWireEntry>,
}

impl DestinationsRequest {
    /// Converts into validated destinations.
    ///
    /// When `require_ids` is set every entry must carry a guid.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for an empty list, a missing name or
    /// id, or a bad rule.
    pub fn into_destinations(self, require_ids: bool) -> Result<Vec<EgressDestination>, ApiError> {
        let destinations = self
            .destinations
            .iter()
            .map(DestinationWireEntry::to_destination)
            .collect::<Result<Vec<_>, _>>()?;
        netpolicy_core::validate_destinations(&destinations)?;
        if require_ids && destinations.iter().any(|destination| destination.guid.is_empty()) {
            return Err(ApiError::validation("missing destination id"));
        }
        Ok(destinations)
    }
}

/// `{"total_destinations": n, "destinations": [...]}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationsResponse {
    /// Number of destinations listed.
    pub total_destinations: usize,
    /// Listed destinations.
    pub destinations: Vec<DestinationWireEntry>,
}

impl DestinationsResponse {
    /// Builds a response from model values.
    #[must_use]
    pub fn new(destinations: &[EgressDestination]) -> Self {
        Self {
            total_destinations: destinations.len(),
            destinations: destinations.iter().map(DestinationWireEntry::from).collect(),
        }
    }
}

// ============================================================================
// SECTION: Egress Policies
// ============================================================================

/// Egress source on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressSourceWire {
    /// Group id; empty for `default`.
    #[serde(default)]
    pub id: String,
    /// Group type label; empty means `app`.
    #[serde(default, rename = "type")]
    pub source_type: String,
    /// Rendered tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// Egress destination reference on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressDestinationRef {
    /// Destination guid.
    #[serde(default)]
    pub id: String,
    /// Destination name, on expanded responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Destination description, on expanded responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Destination rules, on expanded responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<EgressRuleWire>>,
}

/// Egress policy on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressPolicyWire {
    /// Guid; empty on create.
    #[serde(default)]
    pub id: String,
    /// Source group.
    #[serde(default)]
    pub source: EgressSourceWire,
    /// Destination reference.
    #[serde(default)]
    pub destination: EgressDestinationRef,
    /// Lifecycle label; empty means `all`.
    #[serde(default)]
    pub app_lifecycle: String,
}

impl EgressPolicyWire {
    /// Converts into an unsaved egress policy.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for a bad source or lifecycle.
    pub fn to_policy(&self) -> Result<EgressPolicy, ApiError> {
        let source = EgressSource::from_wire(&self.source.id, &self.source.source_type)?;
        let app_lifecycle = if self.app_lifecycle.is_empty() {
            AppLifecycle::default()
        } else {
            AppLifecycle::from_str(&self.app_lifecycle)?
        };
        Ok(EgressPolicy {
            guid: self.id.clone(),
            source,
            destination_guid: self.destination.id.clone(),
            app_lifecycle,
        })
    }

    /// Builds the short wire form of a stored policy.
    #[must_use]
    pub fn from_policy(policy: &EgressPolicy) -> Self {
        Self {
            id: policy.guid.clone(),
            source: EgressSourceWire {
                id: policy.source.id.clone(),
                source_type: policy.source.group_type.as_str().to_string(),
                tag: None,
            },
            destination: EgressDestinationRef {
                id: policy.destination_guid.clone(),
                ..EgressDestinationRef::default()
            },
            app_lifecycle: policy.app_lifecycle.as_str().to_string(),
        }
    }

    /// Builds the expanded wire form with destination rules and source tag.
    #[must_use]
    pub fn from_resolved(resolved: &ResolvedEgressPolicy, width: TagWidth) -> Self {
        let mut wire = Self::from_policy(&resolved.policy);
        wire.source.tag = resolved.source_tag.map(|tag| width.render(tag));
        let destination = &resolved.destination;
        wire.destination = EgressDestinationRef {
            id: destination.guid.clone(),
            name: Some(destination.name.clone()),
            description: Some(destination.description.clone()),
            rules: Some(destination.rules.iter().map(EgressRuleWire::from).collect()),
        };
        wire
    }
}

/// `{"egress_policies": [...]}` request body.
#[derive(Debug, Default, Deserialize)]
pub struct EgressPoliciesRequest {
    /// Submitted egress policies.
    #[serde(default)]
    pub egress_policies: Vec<EgressPolicyWire>,
}

impl EgressPoliciesRequest {
    /// Converts into validated unsaved egress policies.
    ///
    /// # Errors
    ///
    /// Returns a validation [`ApiError`] for an empty list or a bad entry.
    pub fn into_policies(self) -> Result<Vec<EgressPolicy>, ApiError> {
        let policies = self
            .egress_policies
            .iter()
            .map(EgressPolicyWire::to_policy)
            .collect::<Result<Vec<_>, _>>()?;
        netpolicy_core::validate_egress_policies(&policies)?;
        Ok(policies)
    }
}

/// `{"total_egress_policies": n, "egress_policies": [...]}` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressPoliciesResponse {
    /// Number of egress policies listed.
    pub total_egress_policies: usize,
    /// Listed egress policies.
    pub egress_policies: Vec<EgressPolicyWire>,
}

impl EgressPoliciesResponse {
    /// Builds a response from wire entries.
    #[must_use]
    pub fn new(egress_policies: Vec<EgressPolicyWire>) -> Self {
        Self {
            total_egress_policies: egress_policies.len(),
            egress_policies,
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
