use crate::model::{CanonicalRecord, Contribution, CoverageClass, RunReport};

/// Coverage class from which sources contributed. No re-scoring.
pub fn classify_record(contributions: &[Contribution], reference: &str) -> CoverageClass {
    let from_reference = contributions.iter().any(|c| c.source_id == reference);
    let from_candidate = contributions.iter().any(|c| c.source_id != reference);
    match (from_reference, from_candidate) {
        (true, true) => CoverageClass::Verified,
        (true, false) => CoverageClass::ReferenceOnly,
        (false, _) => CoverageClass::CandidateOnly,
    }
}

/// Class counts and coverage for a set of canonical records. Only the
/// classification fields of the returned report are filled in.
pub fn classify(records: &[CanonicalRecord]) -> RunReport {
    let mut report = RunReport::default();

    for record in records {
        match record.coverage_class {
            CoverageClass::Verified => report.verified += 1,
            CoverageClass::CandidateOnly => report.candidate_only += 1,
            CoverageClass::ReferenceOnly => report.reference_only += 1,
        }
    }

    report.total_canonical = records.len();
    report.coverage_pct = RunReport::coverage(report.verified, report.total_canonical);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RawRecord;
    use std::collections::BTreeMap;

    fn contribution(source: &str) -> Contribution {
        Contribution {
            source_id: source.into(),
            record: RawRecord::new(source, "roland", "FP-30X"),
            score: 1.0,
        }
    }

    fn record(class: CoverageClass) -> CanonicalRecord {
        CanonicalRecord {
            canonical_id: "cat_0".into(),
            collection_id: "roland".into(),
            coverage_class: class,
            contributing_records: Vec::new(),
            merged_fields: BTreeMap::new(),
            variant_group: Vec::new(),
        }
    }

    #[test]
    fn class_from_contributors() {
        let inv = contribution("inventory");
        let site = contribution("site");
        let dealer = contribution("dealer");

        assert_eq!(
            classify_record(&[inv.clone(), site.clone()], "inventory"),
            CoverageClass::Verified
        );
        assert_eq!(
            classify_record(&[inv.clone(), site.clone(), dealer.clone()], "inventory"),
            CoverageClass::Verified
        );
        assert_eq!(
            classify_record(&[inv], "inventory"),
            CoverageClass::ReferenceOnly
        );
        assert_eq!(
            classify_record(&[dealer], "inventory"),
            CoverageClass::CandidateOnly
        );
    }

    #[test]
    fn counts_and_coverage() {
        let records = vec![
            record(CoverageClass::Verified),
            record(CoverageClass::Verified),
            record(CoverageClass::CandidateOnly),
            record(CoverageClass::ReferenceOnly),
        ];
        let report = classify(&records);
        assert_eq!(report.verified, 2);
        assert_eq!(report.candidate_only, 1);
        assert_eq!(report.reference_only, 1);
        assert_eq!(report.total_canonical, 4);
        assert_eq!(report.coverage_pct, 50.0);
    }

    #[test]
    fn empty_set_has_zero_coverage() {
        let report = classify(&[]);
        assert_eq!(report.total_canonical, 0);
        assert_eq!(report.coverage_pct, 0.0);
    }
}
