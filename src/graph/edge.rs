//! Weighted candidate edges between node indices

use serde::{Deserialize, Serialize};

/// An undirected candidate edge with its similarity score.
///
/// Built through [`Edge::new`] the endpoints always satisfy `a < b` unless
/// `i == j`, which the matching engine rejects as a self-loop.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Lower node index
    pub a: usize,
    /// Higher node index
    pub b: usize,
    /// Similarity score
    pub weight: f64,
}

impl Edge {
    /// Create an edge, ordering the endpoints
    pub fn new(i: usize, j: usize, weight: f64) -> Self {
        Self {
            a: i.min(j),
            b: i.max(j),
            weight,
        }
    }

    /// Unordered endpoint key `(min, max)`
    pub fn key(&self) -> (usize, usize) {
        (self.a.min(self.b), self.a.max(self.b))
    }

    pub fn is_self_loop(&self) -> bool {
        self.a == self.b
    }
}
