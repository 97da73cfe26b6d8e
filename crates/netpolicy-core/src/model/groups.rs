// netpolicy-core/src/model/groups.rs
// ============================================================================
// Module: Workload Groups and Tags
// Description: Workload group identities and fixed-width numeric tags.
// Purpose: Provide closed group types and tag rendering shared by all layers.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! A workload group is an opaque identifier paired with a [`GroupType`]. Each
//! group that is referenced by a policy owns exactly one [`Tag`], a short
//! unsigned integer embedded in packet marks. Tags are rendered as zero-padded
//! uppercase hex whose width is fixed by the configured [`TagWidth`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::model::ModelError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Smallest supported tag width in bytes.
pub const MIN_TAG_LENGTH: u8 = 1;
/// Largest supported tag width in bytes.
pub const MAX_TAG_LENGTH: u8 = 4;

// ============================================================================
// SECTION: Group Types
// ============================================================================

/// Workload group kind.
///
/// # Invariants
/// - Wire strings are lowercase and stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupType {
    /// Application instance group.
    App,
    /// Registry space group.
    Space,
    /// Platform router group.
    Router,
    /// Catch-all group used by defaulted egress policies.
    Default,
}

impl GroupType {
    /// Returns the stable wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::App => "app",
            Self::Space => "space",
            Self::Router => "router",
            Self::Default => "default",
        }
    }
}

impl fmt::Display for GroupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupType {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "app" => Ok(Self::App),
            "space" => Ok(Self::Space),
            "router" => Ok(Self::Router),
            "default" => Ok(Self::Default),
            other => Err(ModelError::Invalid(format!("unknown group type '{other}'"))),
        }
    }
}

/// Workload group reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    /// Opaque group identifier.
    pub id: String,
    /// Group kind.
    #[serde(rename = "type")]
    pub group_type: GroupType,
}

impl GroupRef {
    /// Creates a new group reference.
    #[must_use]
    pub fn new(id: impl Into<String>, group_type: GroupType) -> Self {
        Self {
            id: id.into(),
            group_type,
        }
    }

    /// Creates an application group reference.
    #[must_use]
    pub fn app(id: impl Into<String>) -> Self {
        Self::new(id, GroupType::App)
    }
}

// ============================================================================
// SECTION: Tags
// ============================================================================

/// Byte width of issued tags.
///
/// # Invariants
/// - Width is within `MIN_TAG_LENGTH..=MAX_TAG_LENGTH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagWidth(u8);

impl TagWidth {
    /// Validates and wraps a tag width.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the width is outside 1..=4.
    pub fn new(bytes: u8) -> Result<Self, ModelError> {
        if !(MIN_TAG_LENGTH..=MAX_TAG_LENGTH).contains(&bytes) {
            return Err(ModelError::Invalid(format!(
                "tag length {bytes} must be between {MIN_TAG_LENGTH} and {MAX_TAG_LENGTH}"
            )));
        }
        Ok(Self(bytes))
    }

    /// Returns the width in bytes.
    #[must_use]
    pub const fn bytes(self) -> u8 {
        self.0
    }

    /// Returns the largest tag value representable at this width.
    #[must_use]
    pub const fn max_tag(self) -> u32 {
        match self.0 {
            1 => 0xFF,
            2 => 0xFFFF,
            3 => 0x00FF_FFFF,
            _ => u32::MAX,
        }
    }

    /// Renders a tag as zero-padded uppercase hex.
    #[must_use]
    pub fn render(self, tag: Tag) -> String {
        let digits = usize::from(self.0) * 2;
        format!("{:0digits$X}", tag.get())
    }

    /// Parses a rendered tag back into its numeric value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] when the text is not hex of the right width.
    pub fn parse(self, text: &str) -> Result<Tag, ModelError> {
        let digits = usize::from(self.0) * 2;
        if text.len() != digits {
            return Err(ModelError::Invalid(format!("tag '{text}' must be {digits} hex digits")));
        }
        let value = u32::from_str_radix(text, 16)
            .map_err(|_| ModelError::Invalid(format!("tag '{text}' is not hex")))?;
        Tag::new(value)
    }
}

impl Default for TagWidth {
    fn default() -> Self {
        Self(2)
    }
}

/// Issued workload group tag.
///
/// # Invariants
/// - Value is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(u32);

impl Tag {
    /// Wraps a non-zero tag value.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Invalid`] for the reserved value zero.
    pub fn new(value: u32) -> Result<Self, ModelError> {
        if value == 0 {
            return Err(ModelError::Invalid("tag 0 is reserved".to_string()));
        }
        Ok(Self(value))
    }

    /// Returns the numeric value.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

/// Group with its issued tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRecord {
    /// Tagged group.
    pub group: GroupRef,
    /// Issued tag.
    pub tag: Tag,
}
