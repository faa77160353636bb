//! GraphBuilder: entity snapshot to weighted candidate graph
//!
//! Each entity queries the similarity store with its own embedding. Hits that
//! map to another known node become undirected edges, except self hits and
//! forbidden pairs. Queries run on a bounded pool of scoped worker threads;
//! edges are assembled afterwards in index order, so the result does not
//! depend on which query finished first.

use super::edge::Edge;
use super::node::{Entity, NodeIndex};
use super::pair::ForbiddenSet;
use crate::cancel::CancellationToken;
use crate::config::{DiscoveryMode, GraphConfig};
use crate::error::{MatchmakerResult, RunStage};
use crate::storage::{Neighbor, SimilarityStore, StorageError};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use thiserror::Error;
use tracing::debug;

/// Neighbors requested per entity when `top_k` is not configured (capped at N-1)
pub const DEFAULT_TOP_K: usize = 50;

/// Errors from reading the entity snapshot or querying neighbors
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("failed to fetch entities: {0}")]
    Fetch(#[source] StorageError),

    #[error("nearest-neighbor query for '{entity_id}' failed: {source}")]
    Query {
        entity_id: String,
        #[source]
        source: StorageError,
    },

    #[error("snapshot holds {found} entities, more than the limit of {limit}")]
    TooManyEntities { limit: usize, found: usize },

    #[error("entity '{0}' appears more than once in the snapshot")]
    DuplicateEntity(String),

    #[error("entity '{entity_id}' has {found} dimensions, expected {expected}")]
    DimensionMismatch {
        entity_id: String,
        expected: usize,
        found: usize,
    },

    #[error("query for '{entity_id}' returned a non-finite score for '{candidate_id}'")]
    NonFiniteScore {
        entity_id: String,
        candidate_id: String,
    },
}

/// The per-run candidate graph
#[derive(Debug, Clone, Default)]
pub struct CandidateGraph {
    pub index: NodeIndex,
    /// Deduplicated edges sorted by `(a, b)`
    pub edges: Vec<Edge>,
}

impl CandidateGraph {
    pub fn node_count(&self) -> usize {
        self.index.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }
}

/// Builds candidate graphs from a similarity store
pub struct GraphBuilder<'a> {
    store: &'a dyn SimilarityStore,
    config: GraphConfig,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(store: &'a dyn SimilarityStore, config: GraphConfig) -> Self {
        Self { store, config }
    }

    /// Neighbors considered per entity for a snapshot of `n` entities
    pub fn effective_top_k(&self, n: usize) -> usize {
        self.config
            .top_k
            .unwrap_or(DEFAULT_TOP_K)
            .min(n.saturating_sub(1))
    }

    /// Build the index bijection and the candidate edge list.
    ///
    /// Any failed query fails the whole build; no partial graph is returned.
    pub fn build(
        &self,
        entities: &[Entity],
        forbidden: &ForbiddenSet,
        cancel: &CancellationToken,
    ) -> MatchmakerResult<CandidateGraph> {
        let index = NodeIndex::from_entities(entities)?;
        check_dimensions(entities)?;

        let top_k = self.effective_top_k(entities.len());
        if top_k == 0 {
            debug!(entities = entities.len(), "too few entities for candidate edges");
            return Ok(CandidateGraph {
                index,
                edges: Vec::new(),
            });
        }

        // One extra slot for the self hit every query is expected to return
        let hits = self.query_all(entities, top_k + 1, cancel)?;
        let forbidden_idx = forbidden.index_pairs(&index);

        let mut best: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        let mut skipped_forbidden = 0usize;
        let mut skipped_unknown = 0usize;

        for (i, (entity, neighbors)) in entities.iter().zip(hits.iter()).enumerate() {
            let mut considered = 0usize;
            for hit in neighbors {
                if hit.id == entity.id {
                    continue;
                }
                if considered == top_k {
                    break;
                }
                considered += 1;

                if !hit.score.is_finite() {
                    return Err(RetrievalError::NonFiniteScore {
                        entity_id: entity.id.clone(),
                        candidate_id: hit.id.clone(),
                    }
                    .into());
                }
                let Some(j) = index.index_of(&hit.id) else {
                    skipped_unknown += 1;
                    debug!(entity = %entity.id, candidate = %hit.id, "candidate not in snapshot");
                    continue;
                };
                if self.config.discovery == DiscoveryMode::LowerIndex && i > j {
                    continue;
                }
                let key = (i.min(j), i.max(j));
                if forbidden_idx.contains(&key) {
                    skipped_forbidden += 1;
                    continue;
                }

                let score = f64::from(hit.score);
                best.entry(key)
                    .and_modify(|w| *w = w.max(score))
                    .or_insert(score);
            }
        }

        let edges: Vec<Edge> = best
            .into_iter()
            .map(|((a, b), weight)| Edge { a, b, weight })
            .collect();

        debug!(
            entities = entities.len(),
            edges = edges.len(),
            top_k,
            skipped_forbidden,
            skipped_unknown,
            "candidate graph built"
        );

        Ok(CandidateGraph { index, edges })
    }

    /// Issue one nearest-neighbor query per entity; results come back in index order
    fn query_all(
        &self,
        entities: &[Entity],
        k: usize,
        cancel: &CancellationToken,
    ) -> MatchmakerResult<Vec<Vec<Neighbor>>> {
        let workers = self.config.query_workers.clamp(1, entities.len().max(1));
        let next = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let (next, abort) = (&next, &abort);

        let outcomes: Vec<MatchmakerResult<Vec<(usize, Vec<Neighbor>)>>> = thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(|_| {
                    scope.spawn(move || {
                        let mut done = Vec::new();
                        while !abort.load(Ordering::Relaxed) {
                            if let Err(cancelled) = cancel.checkpoint(RunStage::GraphConstruction) {
                                abort.store(true, Ordering::Relaxed);
                                return Err(cancelled);
                            }
                            let i = next.fetch_add(1, Ordering::Relaxed);
                            let Some(entity) = entities.get(i) else {
                                break;
                            };
                            match self.store.query_nearest(&entity.embedding, k) {
                                Ok(hits) => done.push((i, hits)),
                                Err(source) => {
                                    abort.store(true, Ordering::Relaxed);
                                    return Err(RetrievalError::Query {
                                        entity_id: entity.id.clone(),
                                        source,
                                    }
                                    .into());
                                }
                            }
                        }
                        Ok(done)
                    })
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
                .collect()
        });

        let mut slots: Vec<Vec<Neighbor>> = vec![Vec::new(); entities.len()];
        for outcome in outcomes {
            for (i, hits) in outcome? {
                slots[i] = hits;
            }
        }
        Ok(slots)
    }
}

/// Every embedding in a run must share the first entity's dimensionality
fn check_dimensions(entities: &[Entity]) -> Result<(), RetrievalError> {
    let Some(first) = entities.first() else {
        return Ok(());
    };
    let expected = first.embedding.len();
    for entity in entities {
        if entity.embedding.len() != expected {
            return Err(RetrievalError::DimensionMismatch {
                entity_id: entity.id.clone(),
                expected,
                found: entity.embedding.len(),
            });
        }
    }
    Ok(())
}
