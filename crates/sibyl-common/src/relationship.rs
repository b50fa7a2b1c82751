//! Relationships between two entity ids (§3, §9).
//!
//! Per the design note: relationships are never owned by entities in
//! memory — they live only as rows in the graph store and are fetched
//! per-query. This type is the wire/row shape, not a pointer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationshipType {
    BelongsTo,
    DependsOn,
    DerivedFrom,
    References,
    Requires,
    PartOf,
    RelatedTo,
    /// An entity was mentioned/extracted from a document chunk.
    DocumentedIn,
    /// A task/epic/entity is a member of a detected community.
    BelongsToCommunity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    pub from_id: String,
    pub to_id: String,
    pub relationship_type: RelationshipType,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Tenant id — every edge carries this (§3 invariant).
    pub group_id: String,
}

fn default_weight() -> f64 {
    1.0
}

impl Relationship {
    pub fn new(
        from_id: impl Into<String>,
        to_id: impl Into<String>,
        relationship_type: RelationshipType,
        group_id: impl Into<String>,
    ) -> Self {
        Self {
            from_id: from_id.into(),
            to_id: to_id.into(),
            relationship_type,
            weight: default_weight(),
            metadata: HashMap::new(),
            group_id: group_id.into(),
        }
    }

    pub fn id(&self) -> String {
        crate::ids::relationship_id(
            &self.from_id,
            &self.to_id,
            &self.relationship_type.to_string(),
            &self.group_id,
        )
    }

    pub fn auto_linked(mut self) -> Self {
        self.metadata.insert("auto_linked".to_string(), "true".to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relationship_id_is_deterministic() {
        let a = Relationship::new("task_1", "task_2", RelationshipType::DependsOn, "org_1");
        let b = Relationship::new("task_1", "task_2", RelationshipType::DependsOn, "org_1");
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn auto_linked_sets_metadata_flag() {
        let rel = Relationship::new("a", "b", RelationshipType::RelatedTo, "org_1").auto_linked();
        assert_eq!(rel.metadata.get("auto_linked").map(String::as_str), Some("true"));
    }

    #[test]
    fn relationship_type_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&RelationshipType::DependsOn).unwrap();
        assert_eq!(json, "\"DEPENDS_ON\"");
    }
}
