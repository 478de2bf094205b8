//! Run-over-run comparison for `unicat run --baseline`.
//! Pure: two results in, per-collection changes out. Ignores `meta`.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::model::{CollectionOutput, CoverageClass, UnifyResult};

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDelta {
    /// Only collections with at least one change, sorted by id.
    pub collections: Vec<CollectionDelta>,
    pub verified_delta: i64,
    pub canonical_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionDelta {
    pub collection_id: String,
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub reclassified: Vec<Reclassified>,
    pub verified_delta: i64,
    pub canonical_delta: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reclassified {
    pub canonical_id: String,
    pub from: CoverageClass,
    pub to: CoverageClass,
}

impl RunDelta {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}

impl CollectionDelta {
    fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.reclassified.is_empty()
            && self.verified_delta == 0
            && self.canonical_delta == 0
    }
}

// ---------------------------------------------------------------------------
// Compare
// ---------------------------------------------------------------------------

/// What changed between two runs, keyed by `canonical_id`.
pub fn compare(previous: &UnifyResult, current: &UnifyResult) -> RunDelta {
    let before = by_collection(previous);
    let after = by_collection(current);
    let ids: BTreeSet<&str> = before.keys().chain(after.keys()).copied().collect();

    let collections: Vec<CollectionDelta> = ids
        .into_iter()
        .map(|id| compare_collection(id, before.get(id).copied(), after.get(id).copied()))
        .filter(|d| !d.is_empty())
        .collect();

    RunDelta {
        verified_delta: signed(current.summary.verified) - signed(previous.summary.verified),
        canonical_delta: signed(current.summary.total_canonical)
            - signed(previous.summary.total_canonical),
        collections,
    }
}

fn by_collection(result: &UnifyResult) -> BTreeMap<&str, &CollectionOutput> {
    result
        .collections
        .iter()
        .map(|c| (c.collection_id.as_str(), c))
        .collect()
}

fn classes(output: Option<&CollectionOutput>) -> BTreeMap<&str, CoverageClass> {
    output
        .map(|o| {
            o.records
                .iter()
                .map(|r| (r.canonical_id.as_str(), r.coverage_class))
                .collect()
        })
        .unwrap_or_default()
}

fn compare_collection(
    collection_id: &str,
    before: Option<&CollectionOutput>,
    after: Option<&CollectionOutput>,
) -> CollectionDelta {
    let old = classes(before);
    let new = classes(after);

    let added = new
        .keys()
        .filter(|id| !old.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    let removed = old
        .keys()
        .filter(|id| !new.contains_key(*id))
        .map(|id| id.to_string())
        .collect();
    let reclassified = new
        .iter()
        .filter_map(|(id, &to)| {
            let from = *old.get(id)?;
            (from != to).then(|| Reclassified {
                canonical_id: id.to_string(),
                from,
                to,
            })
        })
        .collect();

    let count = |o: Option<&CollectionOutput>, f: fn(&CollectionOutput) -> usize| {
        o.map(f).map(signed).unwrap_or(0)
    };
    let verified = |o: &CollectionOutput| o.report.verified;
    let canonical = |o: &CollectionOutput| o.report.total_canonical;

    CollectionDelta {
        collection_id: collection_id.to_string(),
        added,
        removed,
        reclassified,
        verified_delta: count(after, verified) - count(before, verified),
        canonical_delta: count(after, canonical) - count(before, canonical),
    }
}

fn signed(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
