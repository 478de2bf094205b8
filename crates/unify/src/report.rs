//! Per-collection anomaly flags and the global roll-up.

use std::collections::BTreeMap;

use tracing::warn;

use crate::model::{Anomaly, CollectionOutput, RunReport, SourceStats};

/// Flag every candidate source whose valid, pre-collapse record count exceeds
/// `multiplier` times the reference count.
pub fn detect_over_extraction(
    collection_id: &str,
    reference: &str,
    sources: &[SourceStats],
    multiplier: f64,
) -> Vec<Anomaly> {
    let reference_count = sources
        .iter()
        .find(|s| s.source_id == reference)
        .map(|s| s.valid)
        .unwrap_or(0);

    sources
        .iter()
        .filter(|s| s.source_id != reference)
        .filter(|s| s.valid as f64 > multiplier * reference_count as f64)
        .map(|s| {
            warn!(
                collection = collection_id,
                source = %s.source_id,
                candidates = s.valid,
                reference = reference_count,
                "candidate source lists far more products than the reference"
            );
            Anomaly::CandidateOverExtraction {
                collection_id: collection_id.to_string(),
                source_id: s.source_id.clone(),
                candidate_count: s.valid,
                reference_count,
                multiplier,
            }
        })
        .collect()
}

/// Sum per-collection reports into the run-wide report.
///
/// Coverage is recomputed from the summed counts (sum of verified over sum of
/// canonical records), so small collections do not skew it. Source stats are
/// merged by source id.
pub fn summarize(collections: &[CollectionOutput]) -> RunReport {
    let mut total = RunReport::default();
    let mut sources: BTreeMap<String, SourceStats> = BTreeMap::new();

    for output in collections {
        let r = &output.report;
        total.input_records += r.input_records;
        total.rejected_count += r.rejected_count;
        total.reference_records += r.reference_records;
        total.candidate_records_raw += r.candidate_records_raw;
        total.candidate_records += r.candidate_records;
        total.variant_reduction += r.variant_reduction;
        total.matched_pairs += r.matched_pairs;
        total.verified += r.verified;
        total.candidate_only += r.candidate_only;
        total.reference_only += r.reference_only;
        total.total_canonical += r.total_canonical;
        total.ties_broken += r.ties_broken;
        total.unruled_fields.extend(r.unruled_fields.iter().cloned());
        total.anomalies.extend(r.anomalies.iter().cloned());

        for s in &r.sources {
            let entry = sources.entry(s.source_id.clone()).or_insert_with(|| SourceStats {
                source_id: s.source_id.clone(),
                ..SourceStats::default()
            });
            entry.input += s.input;
            entry.rejected += s.rejected;
            entry.valid += s.valid;
            entry.after_collapse += s.after_collapse;
            entry.variants += s.variants;
        }
    }

    total.coverage_pct = RunReport::coverage(total.verified, total.total_canonical);
    total.empty_input = collections.iter().all(|c| c.report.empty_input);
    total.sources = sources.into_values().collect();
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(source: &str, valid: usize) -> SourceStats {
        SourceStats {
            source_id: source.into(),
            input: valid,
            valid,
            after_collapse: valid,
            ..SourceStats::default()
        }
    }

    fn output(id: &str, verified: usize, total: usize) -> CollectionOutput {
        CollectionOutput {
            collection_id: id.into(),
            records: Vec::new(),
            report: RunReport {
                collection_id: Some(id.into()),
                verified,
                total_canonical: total,
                coverage_pct: RunReport::coverage(verified, total),
                sources: vec![stats("inventory", total)],
                ..RunReport::default()
            },
        }
    }

    #[test]
    fn over_extraction_is_per_candidate_source() {
        let sources = [stats("inventory", 10), stats("site", 21), stats("dealer", 20)];
        let anomalies = detect_over_extraction("boss", "inventory", &sources, 2.0);
        assert_eq!(anomalies.len(), 1);
        match &anomalies[0] {
            Anomaly::CandidateOverExtraction {
                source_id,
                candidate_count,
                reference_count,
                ..
            } => {
                assert_eq!(source_id, "site");
                assert_eq!(*candidate_count, 21);
                assert_eq!(*reference_count, 10);
            }
            other => panic!("unexpected anomaly {other:?}"),
        }
    }

    #[test]
    fn multiplier_is_configurable() {
        let sources = [stats("inventory", 10), stats("site", 25)];
        assert_eq!(detect_over_extraction("boss", "inventory", &sources, 2.0).len(), 1);
        assert!(detect_over_extraction("boss", "inventory", &sources, 3.0).is_empty());
    }

    #[test]
    fn global_coverage_is_sum_over_sum() {
        // 1/1 and 0/99: averaging would give 50%
        let summary = summarize(&[output("a", 1, 1), output("b", 0, 99)]);
        assert_eq!(summary.verified, 1);
        assert_eq!(summary.total_canonical, 100);
        assert!((summary.coverage_pct - 1.0).abs() < 1e-9);
        assert_eq!(summary.collection_id, None);
    }

    #[test]
    fn source_stats_are_merged_by_id() {
        let summary = summarize(&[output("a", 1, 3), output("b", 2, 4)]);
        assert_eq!(summary.sources.len(), 1);
        assert_eq!(summary.sources[0].source_id, "inventory");
        assert_eq!(summary.sources[0].valid, 7);
    }

    #[test]
    fn no_collections_is_empty_input() {
        let summary = summarize(&[]);
        assert!(summary.empty_input);
        assert_eq!(summary.coverage_pct, 0.0);
    }
}
