//! Run entry point: retrieval, graph, matching, reconciliation, persistence
//!
//! A run works on one snapshot and computes the full matching decision
//! before anything is written. Cancellation is honoured up to the first
//! write; after that the run completes or fails as a whole.

use crate::cancel::CancellationToken;
use crate::config::MatchmakerConfig;
use crate::error::{MatchmakerResult, RunStage};
use crate::graph::{CanonicalPair, Entity, ForbiddenSet, GraphBuilder, RetrievalError};
use crate::matching;
use crate::reconcile::{Reconciler, Reconciliation};
use crate::storage::{PairingStore, SimilarityStore, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Tallies for one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    pub entities: usize,
    pub forbidden_pairs: usize,
    pub edges: usize,
    pub matched_pairs: usize,
    pub unmatched_entities: usize,
    pub rows_written: usize,
    pub metadata_updated: usize,
}

impl RunCounts {
    /// Tallies before persistence. Unmatched entities are those the solver
    /// left without a partner; endpoints of already-known pairs count as matched.
    fn for_decision(
        entities: usize,
        forbidden_pairs: usize,
        edges: usize,
        solver_pairs: usize,
        reconciliation: &Reconciliation,
    ) -> Self {
        Self {
            entities,
            forbidden_pairs,
            edges,
            matched_pairs: reconciliation.new_pairs.len(),
            unmatched_entities: entities.saturating_sub(2 * solver_pairs),
            ..Self::default()
        }
    }
}

/// The matching decision for a snapshot, before persistence
#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    pub run_id: Uuid,
    pub new_pairs: Vec<CanonicalPair>,
    /// Matched pairs dropped because they were already in the history
    pub already_known: Vec<CanonicalPair>,
    pub counts: RunCounts,
    #[serde(skip)]
    snapshot: Vec<Entity>,
}

/// Result of a completed run, reported to the trigger layer
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub new_pairs: Vec<CanonicalPair>,
    pub counts: RunCounts,
}

/// Runs matchmaking against explicit collaborator handles
pub struct Matchmaker<'a> {
    similarity: &'a dyn SimilarityStore,
    pairing: &'a dyn PairingStore,
    config: MatchmakerConfig,
}

impl<'a> Matchmaker<'a> {
    pub fn new(
        similarity: &'a dyn SimilarityStore,
        pairing: &'a dyn PairingStore,
        config: MatchmakerConfig,
    ) -> Self {
        Self {
            similarity,
            pairing,
            config,
        }
    }

    /// Compute the matching decision without writing anything
    pub fn plan(&self, cancel: &CancellationToken) -> MatchmakerResult<RunPlan> {
        let run_id = Uuid::new_v4();
        self.plan_with_id(run_id, cancel)
    }

    /// Plan, then persist the new pairs
    pub fn perform_run(&self, cancel: &CancellationToken) -> MatchmakerResult<RunReport> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        info!(%run_id, "matchmaking run started");

        let mut plan = self.plan_with_id(run_id, cancel)?;

        // Last point at which the run can stop without side effects
        cancel.checkpoint(RunStage::Persistence)?;

        let reconciler = Reconciler::new(self.similarity, self.pairing, &self.config.pairing);
        let outcome = reconciler.persist(&plan.new_pairs, &plan.snapshot)?;
        plan.counts.rows_written = outcome.rows_written;
        plan.counts.metadata_updated = outcome.metadata_updated;

        let finished_at = Utc::now();
        info!(
            %run_id,
            pairs = plan.new_pairs.len(),
            rows = outcome.rows_written,
            elapsed_ms = (finished_at - started_at).num_milliseconds(),
            "matchmaking run finished"
        );

        Ok(RunReport {
            run_id,
            started_at,
            finished_at,
            new_pairs: plan.new_pairs,
            counts: plan.counts,
        })
    }

    fn plan_with_id(&self, run_id: Uuid, cancel: &CancellationToken) -> MatchmakerResult<RunPlan> {
        cancel.checkpoint(RunStage::Retrieval)?;
        let entities = self.fetch_snapshot()?;
        let forbidden = ForbiddenSet::from_entities(&entities);
        debug!(
            %run_id,
            entities = entities.len(),
            forbidden = forbidden.len(),
            "snapshot fetched"
        );

        cancel.checkpoint(RunStage::GraphConstruction)?;
        let graph = GraphBuilder::new(self.similarity, self.config.graph.clone())
            .build(&entities, &forbidden, cancel)?;

        cancel.checkpoint(RunStage::Matching)?;
        let matched = matching::solve(graph.node_count(), &graph.edges)?;
        debug!(
            %run_id,
            edges = graph.edge_count(),
            pairs = matched.len(),
            "matching computed"
        );

        cancel.checkpoint(RunStage::Matching)?;
        let reconciler = Reconciler::new(self.similarity, self.pairing, &self.config.pairing);
        let reconciliation = reconciler.reconcile(&graph.index, &matched, &forbidden)?;

        let counts = RunCounts::for_decision(
            entities.len(),
            forbidden.len(),
            graph.edge_count(),
            matched.len(),
            &reconciliation,
        );
        info!(
            %run_id,
            entities = counts.entities,
            edges = counts.edges,
            pairs = counts.matched_pairs,
            "matching decision ready"
        );

        Ok(RunPlan {
            run_id,
            new_pairs: reconciliation.new_pairs,
            already_known: reconciliation.already_known,
            counts,
            snapshot: entities,
        })
    }

    /// Fetch every entity, enforcing the configured snapshot bound
    fn fetch_snapshot(&self) -> MatchmakerResult<Vec<Entity>> {
        let limit = self.config.retrieval.max_entities;
        let entities = self.similarity.fetch_all().map_err(|err| match err {
            StorageError::LimitExceeded { limit, found } => {
                RetrievalError::TooManyEntities { limit, found }
            }
            other => RetrievalError::Fetch(other),
        })?;
        if entities.len() > limit {
            return Err(RetrievalError::TooManyEntities {
                limit,
                found: entities.len(),
            }
            .into());
        }
        Ok(entities)
    }
}
