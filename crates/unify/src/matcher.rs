use serde::Serialize;
use tracing::debug;

use crate::model::ComparisonKey;
use crate::similarity::score;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchedPair {
    /// Index into the reference slice.
    pub reference: usize,
    /// Index into the candidate slice.
    pub candidate: usize,
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PairMatchOutput {
    pub matched: Vec<MatchedPair>,
    pub reference_only: Vec<usize>,
    pub candidate_only: Vec<usize>,
    /// Accepted pairs where another free candidate had the same best score.
    pub ties_broken: usize,
}

/// Greedy best-first one-to-one matching of one candidate source against the
/// reference set.
///
/// Reference records are visited in input order; each takes the
/// highest-scoring candidate not yet taken in this pass, and keeps it only if
/// the score reaches `threshold`. On equal scores the earlier candidate wins.
/// Input order is therefore part of the contract.
pub fn match_keys(
    reference: &[&ComparisonKey],
    candidates: &[&ComparisonKey],
    threshold: f64,
) -> PairMatchOutput {
    let mut candidate_used = vec![false; candidates.len()];
    let mut out = PairMatchOutput::default();

    for (ri, ref_key) in reference.iter().enumerate() {
        let mut best: Option<(usize, f64)> = None;
        let mut tied = false;

        for (ci, cand_key) in candidates.iter().enumerate() {
            if candidate_used[ci] {
                continue;
            }
            let s = score(ref_key, cand_key);
            match best {
                Some((_, best_score)) if s > best_score => {
                    best = Some((ci, s));
                    tied = false;
                }
                Some((_, best_score)) if s == best_score => tied = true,
                Some(_) => {}
                None => best = Some((ci, s)),
            }
        }

        match best {
            Some((ci, s)) if s >= threshold => {
                candidate_used[ci] = true;
                if tied {
                    out.ties_broken += 1;
                }
                out.matched.push(MatchedPair {
                    reference: ri,
                    candidate: ci,
                    score: s,
                });
            }
            _ => out.reference_only.push(ri),
        }
    }

    out.candidate_only = candidate_used
        .iter()
        .enumerate()
        .filter(|(_, used)| !**used)
        .map(|(i, _)| i)
        .collect();

    debug!(
        reference = reference.len(),
        candidates = candidates.len(),
        matched = out.matched.len(),
        ties = out.ties_broken,
        threshold,
        "matching pass"
    );

    out
}
