//! MatchingEngine: cardinality-first maximum-weight matching
//!
//! Real similarity weights are mapped to exact integers before solving:
//!
//! ```text
//! q(w)  = round((w - min) / (max - min) * 2^52)      (0 when all weights are equal)
//! B     = cap * 2^52 + 1,  cap = min(edge_count, n / 2)
//! w'    = B + q(w)
//! ```
//!
//! A matching with `m` edges weighs between `m * B` and `m * B + cap * 2^52`,
//! which is below `(m + 1) * B`. Adding one pair therefore always beats any
//! gain in quantized weight, and among matchings of equal size the solver
//! maximizes the quantized weight. The quantum matches the f64 mantissa, so
//! only weights that f64 cannot tell apart from `min`'s scale may tie. The
//! solver runs on `i128` so the shifted weights and duals stay exact.

mod blossom;

use blossom::Weight;

use crate::graph::Edge;
use thiserror::Error;
use tracing::debug;

/// Bits of resolution used to quantize edge weights
pub const WEIGHT_RESOLUTION_BITS: u32 = 52;

/// Transformed weights must stay below this so dual arithmetic cannot overflow
const MAX_TRANSFORMED_WEIGHT: Weight = Weight::MAX / 8;

/// Malformed input to the matching engine; always an upstream bug
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("self-loop on node {node}")]
    SelfLoop { node: usize },

    #[error("edge endpoint {node} is outside 0..{node_count}")]
    IndexOutOfRange { node: usize, node_count: usize },

    #[error("edge ({a}, {b}) appears twice with weights {first} and {second}")]
    ConflictingDuplicate {
        a: usize,
        b: usize,
        first: f64,
        second: f64,
    },

    #[error("edge ({a}, {b}) has a non-finite weight")]
    NonFiniteWeight { a: usize, b: usize },

    #[error("{edges} edges on {node_count} nodes exceed the exact integer weight range")]
    WeightOverflow { node_count: usize, edges: usize },
}

/// Solve cardinality-first maximum-weight matching over nodes `0..node_count`.
///
/// Returns disjoint pairs `(a, b)` with `a < b`, sorted by `a`. Isolated nodes
/// stay unmatched. The result depends only on the set of edges, not their
/// order, so ties are broken the same way on every run.
pub fn solve(node_count: usize, edges: &[Edge]) -> Result<Vec<(usize, usize)>, ContractViolation> {
    let edges = normalize(node_count, edges)?;
    if edges.is_empty() {
        return Ok(Vec::new());
    }

    let weighted = integer_weights(node_count, &edges)?;
    let mates = blossom::max_weight_matching(node_count, &weighted);

    let pairs: Vec<(usize, usize)> = mates
        .iter()
        .enumerate()
        .filter_map(|(i, mate)| mate.filter(|&j| i < j).map(|j| (i, j)))
        .collect();

    debug!(
        nodes = node_count,
        edges = edges.len(),
        pairs = pairs.len(),
        "matching solved"
    );
    Ok(pairs)
}

/// Sum of the original weights of `pairs` under `edges`
pub fn total_weight(edges: &[Edge], pairs: &[(usize, usize)]) -> f64 {
    pairs
        .iter()
        .filter_map(|&(a, b)| edges.iter().find(|e| e.key() == (a.min(b), a.max(b))))
        .map(|e| e.weight)
        .sum()
}

/// Validate, orient, sort and collapse identical duplicates
fn normalize(node_count: usize, edges: &[Edge]) -> Result<Vec<Edge>, ContractViolation> {
    let mut sorted = Vec::with_capacity(edges.len());
    for edge in edges {
        for node in [edge.a, edge.b] {
            if node >= node_count {
                return Err(ContractViolation::IndexOutOfRange { node, node_count });
            }
        }
        if edge.a == edge.b {
            return Err(ContractViolation::SelfLoop { node: edge.a });
        }
        if !edge.weight.is_finite() {
            return Err(ContractViolation::NonFiniteWeight {
                a: edge.a,
                b: edge.b,
            });
        }
        sorted.push(Edge::new(edge.a, edge.b, edge.weight));
    }
    sorted.sort_by_key(Edge::key);

    let mut unique: Vec<Edge> = Vec::with_capacity(sorted.len());
    for edge in sorted {
        match unique.last() {
            Some(prev) if prev.key() == edge.key() => {
                if prev.weight != edge.weight {
                    return Err(ContractViolation::ConflictingDuplicate {
                        a: edge.a,
                        b: edge.b,
                        first: prev.weight,
                        second: edge.weight,
                    });
                }
            }
            _ => unique.push(edge),
        }
    }
    Ok(unique)
}

/// Map real weights to the cardinality-dominating integer scale
fn integer_weights(
    node_count: usize,
    edges: &[Edge],
) -> Result<Vec<(usize, usize, Weight)>, ContractViolation> {
    let overflow = || ContractViolation::WeightOverflow {
        node_count,
        edges: edges.len(),
    };

    let (min, max) = edges
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| {
            (lo.min(e.weight), hi.max(e.weight))
        });
    let range = max - min;
    if !range.is_finite() {
        return Err(overflow());
    }

    let resolution: Weight = 1 << WEIGHT_RESOLUTION_BITS;
    let cap = Weight::try_from(edges.len().min(node_count / 2)).map_err(|_| overflow())?;
    let shift = cap
        .checked_mul(resolution)
        .and_then(|v| v.checked_add(1))
        .ok_or_else(overflow)?;

    edges
        .iter()
        .map(|e| {
            let quantized = if range > 0.0 {
                ((e.weight - min) / range * resolution as f64).round() as Weight
            } else {
                0
            };
            let weight = shift
                .checked_add(quantized)
                .filter(|&w| w <= MAX_TRANSFORMED_WEIGHT)
                .ok_or_else(overflow)?;
            Ok((e.a, e.b, weight))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};

    fn e(a: usize, b: usize, w: f64) -> Edge {
        Edge::new(a, b, w)
    }

    fn complete(n: usize) -> Vec<Edge> {
        let mut edges = Vec::new();
        for a in 0..n {
            for b in a + 1..n {
                // distinct positive weights
                edges.push(e(a, b, 1.0 + (a * n + b) as f64 / 100.0));
            }
        }
        edges
    }

    fn assert_valid(node_count: usize, edges: &[Edge], pairs: &[(usize, usize)]) {
        let mut seen = vec![false; node_count];
        for &(a, b) in pairs {
            assert!(a < b, "pair ({a}, {b}) not ordered");
            assert!(!seen[a] && !seen[b], "node reused in {pairs:?}");
            seen[a] = true;
            seen[b] = true;
            assert!(
                edges.iter().any(|edge| edge.key() == (a, b)),
                "({a}, {b}) is not an edge"
            );
        }
        assert!(pairs.windows(2).all(|w| w[0].0 < w[1].0));
    }

    /// Best (cardinality, weight) over all matchings
    fn brute_force(node_count: usize, edges: &[Edge]) -> (usize, f64) {
        fn go(edges: &[Edge], used: &mut [bool], from: usize) -> (usize, f64) {
            let mut best = (0, 0.0);
            for (idx, edge) in edges.iter().enumerate().skip(from) {
                if used[edge.a] || used[edge.b] {
                    continue;
                }
                used[edge.a] = true;
                used[edge.b] = true;
                let (count, weight) = go(edges, used, idx + 1);
                used[edge.a] = false;
                used[edge.b] = false;
                let candidate = (count + 1, weight + edge.weight);
                if candidate.0 > best.0 || (candidate.0 == best.0 && candidate.1 > best.1) {
                    best = candidate;
                }
            }
            best
        }
        go(edges, &mut vec![false; node_count], 0)
    }

    #[test]
    fn complete_graph_on_six_nodes_matches_everyone() {
        let edges = complete(6);
        let pairs = solve(6, &edges).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_valid(6, &edges, &pairs);
    }

    #[test]
    fn complete_graph_on_five_nodes_leaves_one_out() {
        let edges = complete(5);
        let pairs = solve(5, &edges).unwrap();
        assert_eq!(pairs.len(), 2);
        assert_valid(5, &edges, &pairs);
    }

    #[test]
    fn isolated_node_is_never_matched() {
        let edges = vec![e(0, 1, 0.5), e(1, 2, 0.7), e(0, 2, 0.6)];
        let pairs = solve(4, &edges).unwrap();
        assert_eq!(pairs, vec![(1, 2)]);
        assert!(pairs.iter().all(|&(a, b)| a != 3 && b != 3));
    }

    #[test]
    fn empty_input() {
        assert!(solve(0, &[]).unwrap().is_empty());
        assert!(solve(7, &[]).unwrap().is_empty());
    }

    #[test]
    fn cardinality_beats_weight() {
        // Max-weight alone would take only the heavy middle edge
        let edges = vec![e(0, 1, 0.01), e(1, 2, 0.99), e(2, 3, 0.01)];
        assert_eq!(solve(4, &edges).unwrap(), vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn heavier_matching_wins_at_equal_cardinality() {
        let edges = vec![e(0, 1, 0.9), e(2, 3, 0.8), e(0, 2, 0.2), e(1, 3, 0.1)];
        assert_eq!(solve(4, &edges).unwrap(), vec![(0, 1), (2, 3)]);

        let edges = vec![e(0, 1, 0.1), e(2, 3, 0.2), e(0, 2, 0.8), e(1, 3, 0.9)];
        assert_eq!(solve(4, &edges).unwrap(), vec![(0, 2), (1, 3)]);
    }

    #[test]
    fn zero_negative_and_tied_weights_are_accepted() {
        let edges = vec![e(0, 1, 0.0), e(1, 2, 0.0), e(2, 3, 0.0)];
        assert_eq!(solve(4, &edges).unwrap(), vec![(0, 1), (2, 3)]);

        let edges = vec![e(0, 1, -0.4), e(2, 3, -0.9), e(1, 2, -0.1)];
        assert_eq!(solve(4, &edges).unwrap(), vec![(0, 1), (2, 3)]);
    }

    #[test]
    fn odd_cycle_needs_a_blossom() {
        // Augmenting 3-4 goes through the contracted triangle 0-1-2
        let edges = vec![
            e(0, 1, 0.5),
            e(1, 2, 0.5),
            e(0, 2, 0.5),
            e(2, 3, 0.1),
            e(3, 4, 0.9),
            e(0, 5, 0.1),
        ];
        let pairs = solve(6, &edges).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_valid(6, &edges, &pairs);
    }

    #[test]
    fn reversed_edges_are_oriented() {
        let edges = vec![Edge {
            a: 3,
            b: 1,
            weight: 0.4,
        }];
        assert_eq!(solve(4, &edges).unwrap(), vec![(1, 3)]);
    }

    #[test]
    fn identical_duplicates_collapse() {
        let edges = vec![e(0, 1, 0.3), e(1, 0, 0.3)];
        assert_eq!(solve(2, &edges).unwrap(), vec![(0, 1)]);
    }

    #[test]
    fn contract_violations_are_rejected() {
        let self_loop = vec![Edge {
            a: 2,
            b: 2,
            weight: 1.0,
        }];
        assert_eq!(
            solve(3, &self_loop),
            Err(ContractViolation::SelfLoop { node: 2 })
        );

        assert_eq!(
            solve(3, &[e(0, 3, 1.0)]),
            Err(ContractViolation::IndexOutOfRange {
                node: 3,
                node_count: 3
            })
        );

        assert!(matches!(
            solve(3, &[e(0, 1, 0.2), e(1, 0, 0.3)]),
            Err(ContractViolation::ConflictingDuplicate { a: 0, b: 1, .. })
        ));

        assert_eq!(
            solve(3, &[e(0, 1, f64::NAN)]),
            Err(ContractViolation::NonFiniteWeight { a: 0, b: 1 })
        );
    }

    #[test]
    fn unbounded_weight_range_is_rejected() {
        let edges = vec![e(0, 1, f64::MAX), e(2, 3, -f64::MAX)];
        assert!(matches!(
            solve(4, &edges),
            Err(ContractViolation::WeightOverflow { .. })
        ));
    }

    #[test]
    fn transform_dominates_any_weight_gain() {
        let edges = vec![e(0, 1, 0.0), e(1, 2, 1.0), e(2, 3, 0.0)];
        let weighted = integer_weights(4, &edges).unwrap();
        let resolution: Weight = 1 << WEIGHT_RESOLUTION_BITS;
        let shift = 2 * resolution + 1;
        assert_eq!(weighted[0].2, shift);
        assert_eq!(weighted[1].2, shift + resolution);
        // two light pairs outweigh the single heaviest
        assert!(weighted[0].2 + weighted[2].2 > weighted[1].2);
    }

    #[test]
    fn tiny_weight_gap_still_decides_between_perfect_matchings() {
        // One dominant edge stretches the range; the 1e-4 edge must still count
        let edges = vec![
            e(0, 1, 1e6),
            e(2, 3, 0.0),
            e(4, 5, 0.0),
            e(2, 4, 1e-4),
            e(3, 5, 0.0),
        ];
        let pairs = solve(6, &edges).unwrap();
        assert_eq!(pairs, vec![(0, 1), (2, 4), (3, 5)]);
        assert!(total_weight(&edges, &pairs) >= 1e6 + 1e-4);
    }

    #[test]
    fn weight_gaps_far_below_the_range_are_resolved() {
        let mut rng = StdRng::seed_from_u64(99);
        for trial in 0..200 {
            let n = rng.gen_range(4..=8);
            // A heavy anchor edge plus light edges whose gaps are ~1e-9 of the range
            let mut edges = vec![e(0, 1, 1e3)];
            for a in 2..n {
                for b in a + 1..n {
                    if rng.gen_bool(0.7) {
                        edges.push(e(a, b, rng.gen_range(0.0..1e-6)));
                    }
                }
            }

            let pairs = solve(n, &edges).unwrap();
            let (best_count, best_weight) = brute_force(n, &edges);
            assert_eq!(pairs.len(), best_count, "trial {trial}: {edges:?}");
            let light = |w: f64| w - 1e3;
            let gap = (light(total_weight(&edges, &pairs)) - light(best_weight)).abs();
            assert!(gap < 1e-9, "trial {trial}: {pairs:?} misses the optimum by {gap}");
        }
    }

    #[test]
    fn input_order_does_not_change_the_result() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut edges = Vec::new();
        for a in 0..12 {
            for b in a + 1..12 {
                if rng.gen_bool(0.4) {
                    // few distinct values, so many ties
                    edges.push(e(a, b, f64::from(rng.gen_range(0..3u8)) / 2.0));
                }
            }
        }
        let expected = solve(12, &edges).unwrap();
        for _ in 0..5 {
            edges.shuffle(&mut rng);
            assert_eq!(solve(12, &edges).unwrap(), expected);
        }
    }

    #[test]
    fn matches_brute_force_on_small_graphs() {
        let mut rng = StdRng::seed_from_u64(42);
        for trial in 0..400 {
            let n = rng.gen_range(1..=8);
            let density = rng.gen_range(0.2..1.0);
            let tied = trial % 2 == 0;
            let mut edges = Vec::new();
            for a in 0..n {
                for b in a + 1..n {
                    if rng.gen_bool(density) {
                        let w = if tied {
                            f64::from(rng.gen_range(0..4u8)) / 3.0
                        } else {
                            rng.gen_range(-1.0..1.0)
                        };
                        edges.push(e(a, b, w));
                    }
                }
            }

            let pairs = solve(n, &edges).unwrap();
            assert_valid(n, &edges, &pairs);

            let (best_count, best_weight) = brute_force(n, &edges);
            assert_eq!(pairs.len(), best_count, "trial {trial}: {edges:?}");
            let weight = total_weight(&edges, &pairs);
            assert!(
                (weight - best_weight).abs() < 1e-6,
                "trial {trial}: weight {weight} vs optimum {best_weight}"
            );
        }
    }

    #[test]
    fn large_sparse_graph_leaves_no_augmentable_edge() {
        let mut rng = StdRng::seed_from_u64(2024);
        let n = 300;
        let mut edges = Vec::new();
        for a in 0..n {
            for _ in 0..4 {
                let b = rng.gen_range(0..n);
                if a != b {
                    edges.push(e(a, b, rng.gen_range(0.0..1.0)));
                }
            }
        }
        // Drop conflicting re-draws of the same pair
        edges.sort_by_key(Edge::key);
        edges.dedup_by_key(|edge| edge.key());

        let pairs = solve(n, &edges).unwrap();
        assert_valid(n, &edges, &pairs);

        let mut matched = vec![false; n];
        for &(a, b) in &pairs {
            matched[a] = true;
            matched[b] = true;
        }
        assert!(edges.iter().all(|edge| matched[edge.a] || matched[edge.b]));
    }
}
