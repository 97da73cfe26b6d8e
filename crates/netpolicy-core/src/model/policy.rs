// netpolicy-core/src/model/policy.rs
// ============================================================================
// Module: C2C Policies
// Description: Container-to-container allow policies and their validation.
// Purpose: Define the canonical policy tuple used by the store and APIs.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A [`Policy`] allows traffic from a source workload group to a destination
//! workload group on a protocol and port range. The derived ordering follows
//! the tuple `(source, destination, protocol, start, end)` so sorted lists are
//! deterministic across the store and the HTTP surface.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::model::ModelError;
use crate::model::groups::Tag;

// ============================================================================
// SECTION: Protocol
// ============================================================================

/// Transport protocol permitted by a C2C policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP traffic.
    Tcp,
    /// UDP traffic.
    Udp,
}

impl Protocol {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            _ => Err(ModelError::Invalid(
                "invalid destination protocol, specify either udp or tcp".to_string(),
            )),
        }
    }
}

// ============================================================================
// SECTION: Port Range
// ============================================================================

/// Inclusive destination port range.
///
/// # Invariants
/// - `1 <= start <= end <= 65535` once validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortRange {
    /// First port in the range.
    pub start: u16,
    /// Last port in the range.
    pub end: u16,
}

impl PortRange {
    /// Builds a validated range from wire integers.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when either bound is out of range or
    /// the range is inverted.
    pub fn from_wire(start: i64, end: i64) -> Result<Self, ModelError> {
        let start_port = u16::try_from(start)
            .ok()
            .filter(|port| *port >= 1)
            .ok_or_else(|| {
                ModelError::Invalid(format!("invalid start port {start}, must be in range 1-65535"))
            })?;
        let end_port = u16::try_from(end).ok().filter(|port| *port >= 1).ok_or_else(|| {
            ModelError::Invalid(format!("invalid end port {end}, must be in range 1-65535"))
        })?;
        let range = Self {
            start: start_port,
            end: end_port,
        };
        range.validate()?;
        Ok(range)
    }

    /// Builds a single-port range.
    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Validates range bounds.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the range is empty or inverted.
    pub fn validate(self) -> Result<(), ModelError> {
        if self.start == 0 {
            return Err(ModelError::Invalid(format!(
                "invalid start port {}, must be in range 1-65535",
                self.start
            )));
        }
        if self.start > self.end {
            return Err(ModelError::Invalid(format!(
                "invalid port range {}-{}, start must be less than or equal to end",
                self.start, self.end
            )));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Policy
// ============================================================================

/// Container-to-container allow policy.
///
/// # Invariants
/// - Field order defines the canonical sort order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Policy {
    /// Source application group id.
    pub source_id: String,
    /// Destination application group id.
    pub destination_id: String,
    /// Permitted protocol.
    pub protocol: Protocol,
    /// Permitted destination ports.
    pub ports: PortRange,
}

impl Policy {
    /// Creates a policy from its parts.
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        destination_id: impl Into<String>,
        protocol: Protocol,
        ports: PortRange,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            destination_id: destination_id.into(),
            protocol,
            ports,
        }
    }

    /// Validates the policy tuple.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] with a client-facing message.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.source_id.trim().is_empty() {
            return Err(ModelError::Invalid("missing source id".to_string()));
        }
        if self.destination_id.trim().is_empty() {
            return Err(ModelError::Invalid("missing destination id".to_string()));
        }
        self.ports.validate()
    }
}

/// Validates a batch of policies submitted in one request.
///
/// # Errors
///
/// Returns [`ModelError::Invalid`] for an empty batch or the first invalid policy.
pub fn validate_policies(policies: &[Policy]) -> Result<(), ModelError> {
    if policies.is_empty() {
        return Err(ModelError::Invalid("missing policies".to_string()));
    }
    policies.iter().try_for_each(Policy::validate)
}

/// Policy with tags resolved for both endpoints.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TaggedPolicy {
    /// Underlying policy tuple.
    pub policy: Policy,
    /// Tag issued to the source group.
    pub source_tag: Option<Tag>,
    /// Tag issued to the destination group.
    pub destination_tag: Option<Tag>,
}
