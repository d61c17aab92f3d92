//! Mutation types for expressing local state edits.
//!
//! State changes are expressed as operations against named attributes and
//! tag groups, not direct mutations. This enables offline-first behavior
//! with durable queueing and collapse before any network exchange.

use crate::{AttributeName, TagGroup, Timestamp};
use serde::{Deserialize, Serialize};

/// A single typed operation against an attribute or a tag group.
///
/// Attributes and tag groups are independent namespaces: an attribute named
/// `"vip"` and a tag group named `"vip"` never interact during collapse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MutationOp {
    /// Set a named attribute to a JSON value.
    #[serde(rename_all = "camelCase")]
    SetAttribute {
        name: AttributeName,
        value: serde_json::Value,
    },
    /// Remove a named attribute.
    #[serde(rename_all = "camelCase")]
    RemoveAttribute { name: AttributeName },
    /// Add the owning identifier to a tag group.
    #[serde(rename_all = "camelCase")]
    AddToGroup { group: TagGroup },
    /// Remove the owning identifier from a tag group.
    #[serde(rename_all = "camelCase")]
    RemoveFromGroup { group: TagGroup },
}

impl MutationOp {
    /// The key this operation targets, namespaced so attributes and tag
    /// groups never collide during collapse.
    pub fn target_key(&self) -> TargetKey {
        match self {
            MutationOp::SetAttribute { name, .. } | MutationOp::RemoveAttribute { name } => {
                TargetKey::Attribute(name.clone())
            }
            MutationOp::AddToGroup { group } | MutationOp::RemoveFromGroup { group } => {
                TargetKey::Group(group.clone())
            }
        }
    }

    /// Whether this operation targets an attribute (as opposed to a group).
    pub fn is_attribute(&self) -> bool {
        matches!(
            self,
            MutationOp::SetAttribute { .. } | MutationOp::RemoveAttribute { .. }
        )
    }
}

/// Namespaced collapse key for a [`MutationOp`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TargetKey {
    Attribute(AttributeName),
    Group(TagGroup),
}

/// An ordered sequence of operations recorded at one point in time.
///
/// Immutable once constructed. The store may replace its pending mutation
/// with a newly collapsed one, but never edits a `Mutation` in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mutation {
    /// Operations in arrival order
    pub ops: Vec<MutationOp>,
    /// When this mutation was recorded
    pub created_at: Timestamp,
}

impl Mutation {
    /// Create an empty mutation recorded at `created_at`.
    pub fn new(created_at: Timestamp) -> Self {
        Self {
            ops: Vec::new(),
            created_at,
        }
    }

    /// Append a set-attribute operation.
    pub fn set_attribute(mut self, name: impl Into<AttributeName>, value: serde_json::Value) -> Self {
        self.ops.push(MutationOp::SetAttribute {
            name: name.into(),
            value,
        });
        self
    }

    /// Append a remove-attribute operation.
    pub fn remove_attribute(mut self, name: impl Into<AttributeName>) -> Self {
        self.ops.push(MutationOp::RemoveAttribute { name: name.into() });
        self
    }

    /// Append an add-to-group operation.
    pub fn add_to_group(mut self, group: impl Into<TagGroup>) -> Self {
        self.ops.push(MutationOp::AddToGroup {
            group: group.into(),
        });
        self
    }

    /// Append a remove-from-group operation.
    pub fn remove_from_group(mut self, group: impl Into<TagGroup>) -> Self {
        self.ops.push(MutationOp::RemoveFromGroup {
            group: group.into(),
        });
        self
    }

    /// Whether the mutation carries no operations.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
