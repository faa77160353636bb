//! Canonical identifier pairs and the forbidden-pair set

use super::node::{Entity, NodeIndex, NO_PARTNER};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;

/// An unordered pair of identifiers stored in lexicographic order.
///
/// Serializes as a two-element array `[lower, upper]`. Deserializing a
/// reversed array yields the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[String; 2]", into = "[String; 2]")]
pub struct CanonicalPair {
    lower: String,
    upper: String,
}

impl CanonicalPair {
    pub fn new(a: impl Into<String>, b: impl Into<String>) -> Self {
        let a = a.into();
        let b = b.into();
        if a <= b {
            Self { lower: a, upper: b }
        } else {
            Self { lower: b, upper: a }
        }
    }

    pub fn lower(&self) -> &str {
        &self.lower
    }

    pub fn upper(&self) -> &str {
        &self.upper
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lower == id || self.upper == id
    }

    /// The other member of the pair, if `id` is a member
    pub fn partner_of(&self, id: &str) -> Option<&str> {
        if self.lower == id {
            Some(&self.upper)
        } else if self.upper == id {
            Some(&self.lower)
        } else {
            None
        }
    }
}

impl From<[String; 2]> for CanonicalPair {
    fn from([a, b]: [String; 2]) -> Self {
        Self::new(a, b)
    }
}

impl From<CanonicalPair> for [String; 2] {
    fn from(pair: CanonicalPair) -> Self {
        [pair.lower, pair.upper]
    }
}

impl fmt::Display for CanonicalPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lower, self.upper)
    }
}

/// Pairs that must never be proposed again.
///
/// Pairings are permanent history, so nothing ever removes from this set.
#[derive(Debug, Clone, Default)]
pub struct ForbiddenSet {
    pairs: BTreeSet<CanonicalPair>,
}

impl ForbiddenSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive the set from every entity's past-partner list.
    ///
    /// The "no partner" placeholder and self references are skipped. A pair
    /// recorded on only one side still counts.
    pub fn from_entities(entities: &[Entity]) -> Self {
        let mut set = Self::new();
        for entity in entities {
            for partner in entity.real_partners() {
                set.insert(&entity.id, partner);
            }
        }
        set
    }

    /// Add a pair; returns false if it was already present or is not a real pair
    pub fn insert(&mut self, a: &str, b: &str) -> bool {
        if a == NO_PARTNER || b == NO_PARTNER || a == b {
            return false;
        }
        self.pairs.insert(CanonicalPair::new(a, b))
    }

    pub fn contains(&self, a: &str, b: &str) -> bool {
        self.pairs.contains(&CanonicalPair::new(a, b))
    }

    pub fn contains_pair(&self, pair: &CanonicalPair) -> bool {
        self.pairs.contains(pair)
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalPair> {
        self.pairs.iter()
    }

    /// Translate to `(min, max)` index pairs through the run's bijection.
    ///
    /// Pairs with an identifier outside the index are dropped; they cannot
    /// be matched in this run anyway.
    pub fn index_pairs(&self, index: &NodeIndex) -> HashSet<(usize, usize)> {
        self.pairs
            .iter()
            .filter_map(|pair| {
                let i = index.index_of(pair.lower())?;
                let j = index.index_of(pair.upper())?;
                Some((i.min(j), i.max(j)))
            })
            .collect()
    }
}

impl FromIterator<CanonicalPair> for ForbiddenSet {
    fn from_iter<T: IntoIterator<Item = CanonicalPair>>(iter: T) -> Self {
        let mut set = Self::new();
        for pair in iter {
            set.insert(pair.lower(), pair.upper());
        }
        set
    }
}
