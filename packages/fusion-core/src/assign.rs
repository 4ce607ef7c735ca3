//! # assign
//!
//! Optimal one-to-one assignment over the candidate set.
//!
//! Candidates become entries of a cost matrix (`cost = 1 − s_total`,
//! sentinel 1.5 everywhere else) and a shortest-augmenting-path solver
//! with row/column potentials produces the minimum-cost partial
//! bijection. Sentinel cells can be assigned by the solver but never
//! survive the candidate/threshold filter, so padding needs no special
//! casing.
//!
//! A greedy strategy is kept as an explicitly non-optimal alternative:
//! it takes candidates by descending score and accepts any pair whose
//! endpoints are still free. On competing candidates it can strand a
//! target the optimal solver would have matched.

use std::collections::{HashMap, HashSet};

use crate::candidates::Candidate;

const SENTINEL_COST: f64 = 1.5;

/// Assignment algorithm selection. `Optimal` is the default; `Greedy` is
/// the documented fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssignStrategy {
    #[default]
    Optimal,
    Greedy,
}

/// Result of one assignment round: accepted pairs plus the complements of
/// the matched id sets.
#[derive(Debug, Clone, Default)]
pub struct Assignment {
    pub matches: Vec<Candidate>,
    pub unmatched_arpa: Vec<String>,
    pub unmatched_ais: Vec<String>,
}

/// Solve the one-to-one assignment and filter by `accept_threshold`
/// (inclusive).
///
/// The id universe is the union of the provided id sets and the ids seen
/// in `candidates`; mismatches between the two are tolerated. With no
/// candidates, every id is unmatched.
pub fn assign_one_to_one(
    candidates: &[Candidate],
    arpa_ids: &[String],
    ais_ids: &[String],
    accept_threshold: f64,
    strategy: AssignStrategy,
) -> Assignment {
    let arpa_ids = id_union(arpa_ids, candidates.iter().map(|c| c.arpa_id.as_str()));
    let ais_ids = id_union(ais_ids, candidates.iter().map(|c| c.ais_id.as_str()));

    let matches = match strategy {
        AssignStrategy::Optimal => {
            optimal_matches(candidates, &arpa_ids, &ais_ids, accept_threshold)
        }
        AssignStrategy::Greedy => greedy_matches(candidates, accept_threshold),
    };

    let matched_arpa: HashSet<&str> = matches.iter().map(|c| c.arpa_id.as_str()).collect();
    let matched_ais: HashSet<&str> = matches.iter().map(|c| c.ais_id.as_str()).collect();

    Assignment {
        unmatched_arpa: arpa_ids
            .iter()
            .filter(|id| !matched_arpa.contains(id.as_str()))
            .cloned()
            .collect(),
        unmatched_ais: ais_ids
            .iter()
            .filter(|id| !matched_ais.contains(id.as_str()))
            .cloned()
            .collect(),
        matches,
    }
}

fn id_union<'a>(provided: &[String], seen: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(provided.len());
    let mut known: HashSet<&str> = HashSet::new();
    for id in provided {
        if known.insert(id.as_str()) {
            ids.push(id.clone());
        }
    }
    let extra: Vec<String> = seen
        .filter(|id| !known.contains(*id))
        .map(str::to_owned)
        .collect();
    for id in extra {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    ids
}

fn optimal_matches(
    candidates: &[Candidate],
    arpa_ids: &[String],
    ais_ids: &[String],
    accept_threshold: f64,
) -> Vec<Candidate> {
    if candidates.is_empty() || arpa_ids.is_empty() || ais_ids.is_empty() {
        return Vec::new();
    }

    let arpa_index: HashMap<&str, usize> = arpa_ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();
    let ais_index: HashMap<&str, usize> = ais_ids
        .iter()
        .enumerate()
        .map(|(j, id)| (id.as_str(), j))
        .collect();

    // The solver wants rows ≤ columns; orient the matrix accordingly and
    // translate back afterwards.
    let transposed = arpa_ids.len() > ais_ids.len();
    let (n_rows, n_cols) = if transposed {
        (ais_ids.len(), arpa_ids.len())
    } else {
        (arpa_ids.len(), ais_ids.len())
    };

    let mut cost = vec![vec![SENTINEL_COST; n_cols]; n_rows];
    let mut by_cell: HashMap<(usize, usize), &Candidate> = HashMap::new();
    for c in candidates {
        let (i, j) = (arpa_index[c.arpa_id.as_str()], ais_index[c.ais_id.as_str()]);
        let (r, k) = if transposed { (j, i) } else { (i, j) };
        cost[r][k] = 1.0 - c.scores.s_total;
        by_cell.insert((r, k), c);
    }

    let assigned_col = min_cost_assignment(&cost);

    let mut matches = Vec::new();
    for (row, col) in assigned_col.into_iter().enumerate() {
        if let Some(c) = by_cell.get(&(row, col)) {
            if c.scores.s_total >= accept_threshold {
                matches.push((*c).clone());
            }
        }
    }
    matches
}

fn greedy_matches(candidates: &[Candidate], accept_threshold: f64) -> Vec<Candidate> {
    let mut order: Vec<&Candidate> = candidates.iter().collect();
    // Descending score; id tie-break keeps the outcome deterministic.
    order.sort_by(|a, b| {
        b.scores
            .s_total
            .partial_cmp(&a.scores.s_total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| (a.arpa_id.as_str(), a.ais_id.as_str()).cmp(&(b.arpa_id.as_str(), b.ais_id.as_str())))
    });

    let mut taken_arpa: HashSet<&str> = HashSet::new();
    let mut taken_ais: HashSet<&str> = HashSet::new();
    let mut matches = Vec::new();
    for c in order {
        if c.scores.s_total < accept_threshold {
            continue;
        }
        if taken_arpa.contains(c.arpa_id.as_str()) || taken_ais.contains(c.ais_id.as_str()) {
            continue;
        }
        taken_arpa.insert(c.arpa_id.as_str());
        taken_ais.insert(c.ais_id.as_str());
        matches.push(c.clone());
    }
    matches
}

// ── Minimum-cost assignment solver ────────────────────────────────────────────

/// Shortest-augmenting-path assignment with potentials (the classic
/// Hungarian/Jonker–Volgenant formulation). Requires `rows ≤ cols`;
/// returns the assigned column for every row. O(rows²·cols).
fn min_cost_assignment(cost: &[Vec<f64>]) -> Vec<usize> {
    let n = cost.len();
    if n == 0 {
        return Vec::new();
    }
    let m = cost[0].len();
    debug_assert!(n <= m);

    // 1-based arrays; index 0 is the virtual unmatched slot.
    let mut u = vec![0.0f64; n + 1];
    let mut v = vec![0.0f64; m + 1];
    let mut row_of = vec![0usize; m + 1];
    let mut way = vec![0usize; m + 1];

    for i in 1..=n {
        row_of[0] = i;
        let mut j0 = 0usize;
        let mut minv = vec![f64::INFINITY; m + 1];
        let mut used = vec![false; m + 1];

        loop {
            used[j0] = true;
            let i0 = row_of[j0];
            let mut delta = f64::INFINITY;
            let mut j1 = 0usize;
            for j in 1..=m {
                if used[j] {
                    continue;
                }
                let cur = cost[i0 - 1][j - 1] - u[i0] - v[j];
                if cur < minv[j] {
                    minv[j] = cur;
                    way[j] = j0;
                }
                if minv[j] < delta {
                    delta = minv[j];
                    j1 = j;
                }
            }
            for j in 0..=m {
                if used[j] {
                    u[row_of[j]] += delta;
                    v[j] -= delta;
                } else {
                    minv[j] -= delta;
                }
            }
            j0 = j1;
            if row_of[j0] == 0 {
                break;
            }
        }

        // Walk the augmenting path back to the root.
        loop {
            let j1 = way[j0];
            row_of[j0] = row_of[j1];
            j0 = j1;
            if j0 == 0 {
                break;
            }
        }
    }

    let mut assigned = vec![usize::MAX; n];
    for j in 1..=m {
        if row_of[j] > 0 {
            assigned[row_of[j] - 1] = j - 1;
        }
    }
    assigned
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{FeatureVector, SubScores};

    fn candidate(arpa_id: &str, ais_id: &str, s_total: f64) -> Candidate {
        Candidate {
            arpa_id: arpa_id.into(),
            ais_id: ais_id.into(),
            features: FeatureVector::default(),
            scores: SubScores {
                s_total,
                ..Default::default()
            },
        }
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_candidates_leaves_everything_unmatched() {
        let out = assign_one_to_one(
            &[],
            &ids(&["T1", "T2"]),
            &ids(&["M1"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert!(out.matches.is_empty());
        assert_eq!(out.unmatched_arpa, ids(&["T1", "T2"]));
        assert_eq!(out.unmatched_ais, ids(&["M1"]));
    }

    #[test]
    fn single_candidate_above_threshold_matches() {
        let cands = vec![candidate("T1", "M1", 0.9)];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert_eq!(out.matches.len(), 1);
        assert!(out.unmatched_arpa.is_empty());
        assert!(out.unmatched_ais.is_empty());
    }

    #[test]
    fn score_exactly_at_threshold_is_accepted() {
        let cands = vec![candidate("T1", "M1", 0.55)];
        let accepted = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1"]),
            0.55,
            AssignStrategy::Optimal,
        );
        assert_eq!(accepted.matches.len(), 1);
    }

    #[test]
    fn threshold_sensitivity_flips_acceptance() {
        // s_total = 0.55: accepted at 0.5, rejected at 0.6 — both ids then
        // report as unmatched.
        let cands = vec![candidate("T1", "M1", 0.55)];
        let at_05 = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert_eq!(at_05.matches.len(), 1);

        let at_06 = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1"]),
            0.6,
            AssignStrategy::Optimal,
        );
        assert!(at_06.matches.is_empty());
        assert_eq!(at_06.unmatched_arpa, ids(&["T1"]));
        assert_eq!(at_06.unmatched_ais, ids(&["M1"]));
    }

    #[test]
    fn competing_candidates_force_the_optimal_swap() {
        // Greedy takes (T1, M1) at 0.9 and strands T2 (its only leftover
        // option scores below threshold). The optimal solver swaps to
        // (T1, M2) + (T2, M1) for a higher combined score.
        let cands = vec![
            candidate("T1", "M1", 0.9),
            candidate("T1", "M2", 0.85),
            candidate("T2", "M1", 0.8),
            candidate("T2", "M2", 0.1),
        ];
        let arpa = ids(&["T1", "T2"]);
        let ais = ids(&["M1", "M2"]);

        let optimal = assign_one_to_one(&cands, &arpa, &ais, 0.5, AssignStrategy::Optimal);
        assert_eq!(optimal.matches.len(), 2);
        let pairs: Vec<(String, String)> = optimal
            .matches
            .iter()
            .map(|c| (c.arpa_id.clone(), c.ais_id.clone()))
            .collect();
        assert!(pairs.contains(&("T1".into(), "M2".into())));
        assert!(pairs.contains(&("T2".into(), "M1".into())));
        assert!(optimal.unmatched_arpa.is_empty());

        let greedy = assign_one_to_one(&cands, &arpa, &ais, 0.5, AssignStrategy::Greedy);
        assert_eq!(greedy.matches.len(), 1);
        assert_eq!(greedy.unmatched_arpa, ids(&["T2"]));

        let total = |a: &Assignment| a.matches.iter().map(|c| c.scores.s_total).sum::<f64>();
        assert!(total(&greedy) < total(&optimal));
    }

    #[test]
    fn rectangular_more_arpa_than_ais() {
        let cands = vec![
            candidate("T1", "M1", 0.7),
            candidate("T2", "M1", 0.9),
            candidate("T3", "M1", 0.6),
        ];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1", "T2", "T3"]),
            &ids(&["M1"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].arpa_id, "T2");
        assert_eq!(out.unmatched_arpa, ids(&["T1", "T3"]));
        assert!(out.unmatched_ais.is_empty());
    }

    #[test]
    fn rectangular_more_ais_than_arpa() {
        let cands = vec![candidate("T1", "M2", 0.8), candidate("T1", "M1", 0.6)];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1", "M2", "M3"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].ais_id, "M2");
        assert_eq!(out.unmatched_ais, ids(&["M1", "M3"]));
    }

    #[test]
    fn candidate_ids_missing_from_provided_sets_are_tolerated() {
        let cands = vec![candidate("T9", "M9", 0.95)];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1"]),
            &ids(&["M1"]),
            0.5,
            AssignStrategy::Optimal,
        );
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.unmatched_arpa, ids(&["T1"]));
        assert_eq!(out.unmatched_ais, ids(&["M1"]));
    }

    #[test]
    fn output_is_a_partial_bijection() {
        let cands = vec![
            candidate("T1", "M1", 0.9),
            candidate("T1", "M2", 0.88),
            candidate("T2", "M1", 0.87),
            candidate("T2", "M2", 0.86),
            candidate("T3", "M2", 0.85),
        ];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1", "T2", "T3"]),
            &ids(&["M1", "M2"]),
            0.5,
            AssignStrategy::Optimal,
        );
        let arpa: HashSet<&str> = out.matches.iter().map(|c| c.arpa_id.as_str()).collect();
        let ais: HashSet<&str> = out.matches.iter().map(|c| c.ais_id.as_str()).collect();
        assert_eq!(arpa.len(), out.matches.len());
        assert_eq!(ais.len(), out.matches.len());
        // Matched ∪ unmatched must reconstruct the inputs exactly.
        assert_eq!(out.matches.len() + out.unmatched_arpa.len(), 3);
        assert_eq!(out.matches.len() + out.unmatched_ais.len(), 2);
    }

    #[test]
    fn greedy_fallback_honors_threshold_and_one_to_one() {
        let cands = vec![
            candidate("T1", "M1", 0.95),
            candidate("T2", "M1", 0.9),
            candidate("T2", "M2", 0.4),
        ];
        let out = assign_one_to_one(
            &cands,
            &ids(&["T1", "T2"]),
            &ids(&["M1", "M2"]),
            0.5,
            AssignStrategy::Greedy,
        );
        assert_eq!(out.matches.len(), 1);
        assert_eq!(out.matches[0].arpa_id, "T1");
        assert_eq!(out.unmatched_arpa, ids(&["T2"]));
        assert_eq!(out.unmatched_ais, ids(&["M2"]));
    }
}
