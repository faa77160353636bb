//! Reconciler: matched index pairs to durable pairing history
//!
//! Translates the matching back to identifiers, drops anything already in
//! the history, and writes the surviving pairs in two independent steps:
//! one bulk upsert into the pairing table, then one metadata update per
//! participant so later runs forbid the new pairs.

use crate::config::PairingConfig;
use crate::error::{MatchmakerError, MatchmakerResult};
use crate::graph::{CanonicalPair, Entity, ForbiddenSet, NodeIndex};
use crate::matching::ContractViolation;
use crate::storage::{BulkUpsert, MetadataPatch, PairingStore, Row, SimilarityStore, StorageError};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

/// Matching output split against the known history
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Reconciliation {
    /// Canonical pairs never seen before, sorted
    pub new_pairs: Vec<CanonicalPair>,
    /// Matched pairs that the history already holds
    pub already_known: Vec<CanonicalPair>,
}

/// What a successful persistence step wrote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PersistOutcome {
    pub rows_written: usize,
    pub metadata_updated: usize,
}

pub struct Reconciler<'a> {
    similarity: &'a dyn SimilarityStore,
    pairing: &'a dyn PairingStore,
    config: &'a PairingConfig,
}

impl<'a> Reconciler<'a> {
    pub fn new(
        similarity: &'a dyn SimilarityStore,
        pairing: &'a dyn PairingStore,
        config: &'a PairingConfig,
    ) -> Self {
        Self {
            similarity,
            pairing,
            config,
        }
    }

    /// Canonicalize `matched` and split off pairs already in `forbidden`.
    ///
    /// The graph never offers forbidden edges, so `already_known` is expected
    /// to be empty; it is checked again here because the next step writes.
    pub fn reconcile(
        &self,
        index: &NodeIndex,
        matched: &[(usize, usize)],
        forbidden: &ForbiddenSet,
    ) -> Result<Reconciliation, ContractViolation> {
        let node_count = index.len();
        let lookup = |node: usize| {
            index
                .id_of(node)
                .ok_or(ContractViolation::IndexOutOfRange { node, node_count })
        };

        let mut fresh = BTreeSet::new();
        let mut known = BTreeSet::new();
        for &(a, b) in matched {
            if a == b {
                return Err(ContractViolation::SelfLoop { node: a });
            }
            let pair = CanonicalPair::new(lookup(a)?, lookup(b)?);
            if forbidden.contains_pair(&pair) {
                warn!(pair = %pair, "matched pair is already in the pairing history");
                known.insert(pair);
            } else {
                fresh.insert(pair);
            }
        }

        Ok(Reconciliation {
            new_pairs: fresh.into_iter().collect(),
            already_known: known.into_iter().collect(),
        })
    }

    /// Bulk upsert for `pairs`, keyed by the two person columns
    pub fn build_request(&self, pairs: &[CanonicalPair]) -> BulkUpsert {
        let key_columns = vec![
            self.config.person_1_column.clone(),
            self.config.person_2_column.clone(),
        ];
        pairs.iter().fold(BulkUpsert::new(key_columns), |request, pair| {
            let mut row = Row::new()
                .with_cell(self.config.person_1_column.as_str(), pair.lower())
                .with_cell(self.config.person_2_column.as_str(), pair.upper());
            if let Some(column) = &self.config.send_email_column {
                row = row.with_cell(column.as_str(), true);
            }
            request.with_row(row)
        })
    }

    /// Record `pairs` in the pairing table, then in each participant's history.
    ///
    /// `snapshot` supplies the partner lists the new partners are merged
    /// into. Safe to repeat: both writes are upserts of the same values.
    pub fn persist(
        &self,
        pairs: &[CanonicalPair],
        snapshot: &[Entity],
    ) -> MatchmakerResult<PersistOutcome> {
        if pairs.is_empty() {
            debug!("no new pairs to persist");
            return Ok(PersistOutcome::default());
        }

        let request = self.build_request(pairs);
        let accepted = self
            .pairing
            .bulk_upsert(&self.config.table, &request)
            .map_err(|source| MatchmakerError::Persistence {
                pairs: pairs.to_vec(),
                source,
            })?;
        if accepted != pairs.len() {
            return Err(MatchmakerError::Persistence {
                pairs: pairs.to_vec(),
                source: StorageError::Rejected(format!(
                    "pairing table accepted {} of {} rows",
                    accepted,
                    pairs.len()
                )),
            });
        }
        debug!(table = %self.config.table, rows = accepted, "pairing rows upserted");

        let histories = partner_histories(pairs, snapshot);
        let mut updated_ids = Vec::with_capacity(histories.len());
        let mut failed_ids = Vec::new();
        let mut first_error = None;

        for (id, partners) in histories {
            let patch = MetadataPatch::past_pairings(partners);
            match self.similarity.upsert_metadata(&id, &patch) {
                Ok(()) => updated_ids.push(id),
                Err(err) => {
                    warn!(entity = %id, error = %err, "failed to update partner history");
                    failed_ids.push(id);
                    first_error.get_or_insert(err);
                }
            }
        }

        if let Some(source) = first_error {
            return Err(MatchmakerError::PartialPersistence {
                pairs: pairs.to_vec(),
                updated_ids,
                failed_ids,
                source,
            });
        }

        info!(
            rows = accepted,
            metadata = updated_ids.len(),
            "pairs persisted"
        );
        Ok(PersistOutcome {
            rows_written: accepted,
            metadata_updated: updated_ids.len(),
        })
    }
}

/// Full partner list for every participant: known partners plus new ones, sorted
fn partner_histories(
    pairs: &[CanonicalPair],
    snapshot: &[Entity],
) -> BTreeMap<String, BTreeSet<String>> {
    let by_id: HashMap<&str, &Entity> = snapshot.iter().map(|e| (e.id.as_str(), e)).collect();
    let mut histories: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for pair in pairs {
        for (id, partner) in [(pair.lower(), pair.upper()), (pair.upper(), pair.lower())] {
            let history = histories.entry(id.to_string()).or_insert_with(|| {
                by_id
                    .get(id)
                    .map(|entity| entity.real_partners().map(str::to_string).collect())
                    .unwrap_or_default()
            });
            history.insert(partner.to_string());
        }
    }
    histories
}
