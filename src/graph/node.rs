//! Entity representation and the per-run node index

use super::builder::RetrievalError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Placeholder partner identifier meaning "no partner".
///
/// Appears in persisted partner lists and is never treated as a real pairing.
pub const NO_PARTNER: &str = "0";

/// A participant with an embedding and its pairing history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier within the similarity store
    pub id: String,
    /// Embedding vector; every entity in a run has the same dimensionality
    pub embedding: Vec<f32>,
    /// Identifiers of everyone this entity has previously been matched with
    #[serde(rename = "pastPairings", default)]
    pub partners: BTreeSet<String>,
}

impl Entity {
    /// Create an entity with no pairing history
    pub fn new(id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: id.into(),
            embedding,
            partners: BTreeSet::new(),
        }
    }

    /// Add a past partner
    pub fn with_partner(mut self, partner: impl Into<String>) -> Self {
        self.partners.insert(partner.into());
        self
    }

    /// Add several past partners
    pub fn with_partners<I, S>(mut self, partners: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.partners.extend(partners.into_iter().map(Into::into));
        self
    }

    /// Past partners excluding the "no partner" placeholder and self references
    pub fn real_partners(&self) -> impl Iterator<Item = &str> {
        self.partners
            .iter()
            .map(String::as_str)
            .filter(move |p| *p != NO_PARTNER && *p != self.id)
    }
}

/// Bijection between entity identifiers and dense node indices `[0, N)`.
///
/// Built once per run from the entity snapshot and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct NodeIndex {
    ids: Vec<String>,
    positions: HashMap<String, usize>,
}

impl NodeIndex {
    /// Assign indices in snapshot order.
    ///
    /// Fails if the snapshot contains the same identifier twice, since the
    /// mapping would no longer be injective.
    pub fn from_entities(entities: &[Entity]) -> Result<Self, RetrievalError> {
        let mut ids = Vec::with_capacity(entities.len());
        let mut positions = HashMap::with_capacity(entities.len());
        for (idx, entity) in entities.iter().enumerate() {
            if positions.insert(entity.id.clone(), idx).is_some() {
                return Err(RetrievalError::DuplicateEntity(entity.id.clone()));
            }
            ids.push(entity.id.clone());
        }
        Ok(Self { ids, positions })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Index assigned to an identifier, if it is part of this run
    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.positions.get(id).copied()
    }

    /// Identifier behind an index
    pub fn id_of(&self, idx: usize) -> Option<&str> {
        self.ids.get(idx).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_a_bijection_in_snapshot_order() {
        let entities = vec![
            Entity::new("venus", vec![1.0]),
            Entity::new("earth", vec![0.5]),
            Entity::new("mars", vec![0.2]),
        ];
        let index = NodeIndex::from_entities(&entities).unwrap();

        assert_eq!(index.len(), 3);
        for (idx, entity) in entities.iter().enumerate() {
            assert_eq!(index.index_of(&entity.id), Some(idx));
            assert_eq!(index.id_of(idx), Some(entity.id.as_str()));
        }
        assert_eq!(index.index_of("pluto"), None);
        assert_eq!(index.id_of(3), None);
    }

    #[test]
    fn duplicate_identifier_is_rejected() {
        let entities = vec![Entity::new("a", vec![1.0]), Entity::new("a", vec![0.0])];
        let err = NodeIndex::from_entities(&entities).unwrap_err();
        assert!(matches!(err, RetrievalError::DuplicateEntity(id) if id == "a"));
    }

    #[test]
    fn real_partners_skip_placeholder_and_self() {
        let entity = Entity::new("alice", vec![1.0]).with_partners(["0", "alice", "bob"]);
        let partners: Vec<_> = entity.real_partners().collect();
        assert_eq!(partners, vec!["bob"]);
    }

    #[test]
    fn partners_deserialize_from_past_pairings_key() {
        let json = r#"{"id":"mercury","embedding":[0.1,0.2],"pastPairings":["venus"]}"#;
        let entity: Entity = serde_json::from_str(json).unwrap();
        assert!(entity.partners.contains("venus"));

        let bare = r#"{"id":"eris","embedding":[0.3]}"#;
        let entity: Entity = serde_json::from_str(bare).unwrap();
        assert!(entity.partners.is_empty());
    }
}
