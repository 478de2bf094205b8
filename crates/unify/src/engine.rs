use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::KeyCache;
use crate::classify::{classify, classify_record};
use crate::config::UnifyConfig;
use crate::error::UnifyError;
use crate::identity::IdentityAssigner;
use crate::matcher::match_keys;
use crate::merge::merge;
use crate::model::{
    Anomaly, CanonicalRecord, CollectionFailure, CollectionOutput, ComparisonKey, Contribution,
    RawRecord, RunReport, SourceStats, UnifyInput, UnifyMeta, UnifyResult,
};
use crate::normalize::Normalizer;
use crate::report::{detect_over_extraction, summarize};
use crate::variants::{VariantCollapser, VariantGroup};

/// Unify every collection in `input`. Returns canonical records + reports.
///
/// Collections run in parallel on a pool of `config.workers` threads and are
/// returned sorted by collection id. A collection whose overrides do not
/// resolve is listed in `failures`; the others still run. Only global config
/// problems and pool startup fail the whole call.
///
/// `cache` is keyed by collection and display name only, so it must not be
/// shared between runs that use different normalization settings.
pub fn run(
    config: &UnifyConfig,
    input: &UnifyInput,
    cache: &KeyCache,
) -> Result<UnifyResult, UnifyError> {
    config.validate()?;
    let normalizer = Normalizer::from_config(config);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.unwrap_or(0))
        .thread_name(|i| format!("unify-{i}"))
        .build()
        .map_err(|e| UnifyError::ThreadPool(e.to_string()))?;

    let jobs: Vec<(&String, &BTreeMap<String, Vec<RawRecord>>)> =
        input.collections.iter().collect();
    let outcomes: Vec<(String, Result<CollectionOutput, UnifyError>)> = pool.install(|| {
        jobs.into_par_iter()
            .map(|(collection_id, sources)| {
                let outcome = unify_collection(config, &normalizer, cache, collection_id, sources);
                (collection_id.clone(), outcome)
            })
            .collect()
    });

    let mut collections = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (collection_id, outcome) in outcomes {
        match outcome {
            Ok(output) => collections.push(output),
            Err(e) => {
                warn!(collection = %collection_id, error = %e, "collection could not be processed");
                failures.push(CollectionFailure {
                    collection_id,
                    error: e.to_string(),
                });
            }
        }
    }

    let summary = summarize(&collections);
    info!(
        collections = collections.len(),
        failed = failures.len(),
        canonical = summary.total_canonical,
        verified = summary.verified,
        coverage = summary.coverage_pct,
        "run complete"
    );

    Ok(UnifyResult {
        meta: UnifyMeta {
            config_name: config.name.clone(),
            reference: config.reference.clone(),
            candidates: config.candidates.clone(),
            threshold: config.matching.threshold,
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
        },
        summary,
        collections,
        failures,
    })
}

/// Normalize → collapse → match → merge → classify for one collection.
///
/// `sources` maps source id to that source's records in input order. Records
/// under undeclared source ids are reported as an anomaly and left out.
pub fn unify_collection(
    config: &UnifyConfig,
    normalizer: &Normalizer,
    cache: &KeyCache,
    collection_id: &str,
    sources: &BTreeMap<String, Vec<RawRecord>>,
) -> Result<CollectionOutput, UnifyError> {
    let settings = config.settings_for(collection_id)?;
    let ctx = CollectionContext {
        collection_id,
        normalizer,
        cache,
        collapser: VariantCollapser::new(
            collection_id,
            &settings.suffixes,
            settings.variant_threshold,
        )?,
        identity_field: &settings.identity_field,
    };

    let mut anomalies = Vec::new();
    for (source_id, records) in sources {
        if !config.is_declared_source(source_id) {
            warn!(
                collection = collection_id,
                source = %source_id,
                records = records.len(),
                "ignoring records from undeclared source"
            );
            anomalies.push(Anomaly::UnrecognizedSource {
                collection_id: collection_id.to_string(),
                source_id: source_id.clone(),
                records: records.len(),
            });
        }
    }

    // Reference pass: every reference representative seeds a canonical record.
    let PreparedSource {
        groups: reference_groups,
        stats: reference_stats,
    } = ctx.prepare(&config.reference, records_for(sources, &config.reference));
    let reference_keys: Vec<&ComparisonKey> = reference_groups
        .iter()
        .map(|g| &g.representative.key)
        .collect();
    let mut builders: Vec<Builder> = reference_groups
        .iter()
        .map(|g| Builder::from_group(&config.reference, g))
        .collect();
    let reference_records = reference_stats.after_collapse;
    let mut source_stats = vec![reference_stats];

    // One independent matching pass per candidate source.
    let mut candidate_only: Vec<Builder> = Vec::new();
    let mut matched_pairs = 0;
    let mut ties_broken = 0;
    for candidate_id in &config.candidates {
        let PreparedSource { groups, stats } =
            ctx.prepare(candidate_id, records_for(sources, candidate_id));
        let candidate_keys: Vec<&ComparisonKey> =
            groups.iter().map(|g| &g.representative.key).collect();

        let pass = match_keys(&reference_keys, &candidate_keys, settings.threshold);
        matched_pairs += pass.matched.len();
        ties_broken += pass.ties_broken;

        for pair in &pass.matched {
            builders[pair.reference].absorb(candidate_id, &groups[pair.candidate], pair.score);
        }
        candidate_only.extend(
            pass.candidate_only
                .iter()
                .map(|&i| Builder::from_group(candidate_id, &groups[i])),
        );
        source_stats.push(stats);
    }
    builders.extend(candidate_only);

    let mut unruled_fields = BTreeSet::new();
    let records: Vec<CanonicalRecord> = builders
        .into_iter()
        .map(|b| {
            let merged = merge(&b.contributions, &settings.precedence);
            unruled_fields.extend(merged.unruled);
            CanonicalRecord {
                canonical_id: b.canonical_id,
                collection_id: collection_id.to_string(),
                coverage_class: classify_record(&b.contributions, &config.reference),
                contributing_records: b.contributions,
                merged_fields: merged.fields,
                variant_group: b.variants,
            }
        })
        .collect();

    anomalies.extend(detect_over_extraction(
        collection_id,
        &config.reference,
        &source_stats,
        settings.anomaly_multiplier,
    ));

    let candidate_stats = &source_stats[1..];
    let input_records: usize = source_stats.iter().map(|s| s.input).sum();
    let rejected_count: usize = source_stats.iter().map(|s| s.rejected).sum();
    let valid_records: usize = source_stats.iter().map(|s| s.valid).sum();
    let variant_reduction: usize = source_stats.iter().map(|s| s.variants).sum();
    let candidate_records_raw: usize = candidate_stats.iter().map(|s| s.valid).sum();
    let candidate_records: usize = candidate_stats.iter().map(|s| s.after_collapse).sum();

    let report = RunReport {
        collection_id: Some(collection_id.to_string()),
        input_records,
        rejected_count,
        reference_records,
        candidate_records_raw,
        candidate_records,
        variant_reduction,
        matched_pairs,
        ties_broken,
        unruled_fields,
        empty_input: valid_records == 0,
        sources: source_stats,
        anomalies,
        ..classify(&records)
    };

    if report.empty_input {
        info!(collection = collection_id, rejected = rejected_count, "collection has no valid records");
    }
    info!(
        collection = collection_id,
        canonical = report.total_canonical,
        verified = report.verified,
        candidate_only = report.candidate_only,
        reference_only = report.reference_only,
        coverage = report.coverage_pct,
        "collection unified"
    );

    Ok(CollectionOutput {
        collection_id: collection_id.to_string(),
        records,
        report,
    })
}

fn records_for<'s>(sources: &'s BTreeMap<String, Vec<RawRecord>>, source_id: &str) -> &'s [RawRecord] {
    sources.get(source_id).map(Vec::as_slice).unwrap_or(&[])
}

// ---------------------------------------------------------------------------
// Per-source preparation
// ---------------------------------------------------------------------------

struct CollectionContext<'a> {
    collection_id: &'a str,
    normalizer: &'a Normalizer,
    cache: &'a KeyCache,
    collapser: VariantCollapser,
    identity_field: &'a str,
}

/// A record that passed normalization.
struct Prepared<'r> {
    record: &'r RawRecord,
    key: ComparisonKey,
    canonical_id: String,
}

struct PreparedSource<'r> {
    groups: Vec<VariantGroup<Prepared<'r>>>,
    stats: SourceStats,
}

impl CollectionContext<'_> {
    /// Reject, identify and collapse one source's records.
    fn prepare<'r>(&self, source_id: &str, records: &'r [RawRecord]) -> PreparedSource<'r> {
        let mut ids = IdentityAssigner::new(self.collection_id, source_id, self.identity_field);
        let mut valid = Vec::with_capacity(records.len());
        let mut rejected = 0;

        for record in records {
            let outcome = self
                .cache
                .get_or_insert_with(self.collection_id, &record.display_name, || {
                    self.normalizer.normalize(&record.display_name, self.collection_id)
                });
            match outcome {
                Ok(key) => {
                    let canonical_id = ids.next_id(record);
                    valid.push(Prepared {
                        record,
                        key,
                        canonical_id,
                    });
                }
                Err(reason) => {
                    rejected += 1;
                    debug!(
                        collection = self.collection_id,
                        source = source_id,
                        name = %record.display_name,
                        %reason,
                        "rejected record"
                    );
                }
            }
        }

        let valid_count = valid.len();
        let groups = self.collapser.collapse(valid, |p| p.record.display_name.as_str());
        let variants: usize = groups.iter().map(|g| g.variants.len()).sum();
        debug!(
            collection = self.collection_id,
            source = source_id,
            valid = valid_count,
            groups = groups.len(),
            variants,
            "collapsed variants"
        );

        let stats = SourceStats {
            source_id: source_id.to_string(),
            input: records.len(),
            rejected,
            valid: valid_count,
            after_collapse: groups.len(),
            variants,
        };
        PreparedSource { groups, stats }
    }
}

// ---------------------------------------------------------------------------
// Canonical record assembly
// ---------------------------------------------------------------------------

struct Builder {
    canonical_id: String,
    contributions: Vec<Contribution>,
    variants: Vec<RawRecord>,
}

impl Builder {
    /// Seed from an unmatched representative; its own identity becomes the id.
    fn from_group(source_id: &str, group: &VariantGroup<Prepared<'_>>) -> Self {
        Self {
            canonical_id: group.representative.canonical_id.clone(),
            contributions: vec![Contribution {
                source_id: source_id.to_string(),
                record: group.representative.record.clone(),
                score: 1.0,
            }],
            variants: group.variants.iter().map(|v| v.record.clone()).collect(),
        }
    }

    fn absorb(&mut self, source_id: &str, group: &VariantGroup<Prepared<'_>>, score: f64) {
        self.contributions.push(Contribution {
            source_id: source_id.to_string(),
            record: group.representative.record.clone(),
            score,
        });
        self.variants
            .extend(group.variants.iter().map(|v| v.record.clone()));
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CoverageClass;

    fn record(source: &str, collection: &str, name: &str) -> RawRecord {
        RawRecord::new(source, collection, name)
    }

    fn run_default(config: &UnifyConfig, records: Vec<RawRecord>) -> UnifyResult {
        run(config, &UnifyInput::from_records(records), &KeyCache::new(64)).unwrap()
    }

    #[test]
    fn spelling_variant_is_verified() {
        let config = UnifyConfig::new("t", "inventory", &["site"]);
        let result = run_default(
            &config,
            vec![
                record("inventory", "roland", "FP-30X"),
                record("site", "roland", "FP 30 X"),
            ],
        );
        let out = result.collection("roland").unwrap();
        assert_eq!(out.records.len(), 1);
        let r = &out.records[0];
        assert_eq!(r.coverage_class, CoverageClass::Verified);
        assert_eq!(r.contributing_records[1].score, 1.0);
        assert_eq!(out.report.matched_pairs, 1);
        assert_eq!(out.report.coverage_pct, 100.0);
    }

    #[test]
    fn reference_seeds_id_and_comes_first() {
        let config = UnifyConfig::new("t", "inventory", &["site"]);
        let result = run_default(
            &config,
            vec![
                record("site", "roland", "Something Else Entirely"),
                record("inventory", "roland", "JC-120 Jazz Chorus"),
                record("site", "roland", "Jazz Chorus JC-120"),
            ],
        );
        let records = &result.collection("roland").unwrap().records;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].contributing_records[0].source_id, "inventory");
        assert_eq!(
            records[0].canonical_id,
            IdentityAssigner::new("roland", "inventory", "sku")
                .next_id(&record("inventory", "roland", "JC-120 Jazz Chorus"))
        );
        assert_eq!(records[1].coverage_class, CoverageClass::CandidateOnly);
    }

    #[test]
    fn rejected_names_are_counted_not_matched() {
        let config = UnifyConfig::new("t", "inventory", &["site"]);
        let result = run_default(
            &config,
            vec![
                record("inventory", "boss", "DS-1 Distortion"),
                record("inventory", "boss", "  "),
                record("site", "boss", "ok"),
                record("site", "boss", "DS-1 Distortion Pedal"),
            ],
        );
        let report = &result.collection("boss").unwrap().report;
        assert_eq!(report.input_records, 4);
        assert_eq!(report.rejected_count, 2);
        assert_eq!(report.total_canonical, 1);
        assert_eq!(report.sources[0].rejected, 1);
        assert_eq!(report.sources[1].rejected, 1);
    }

    #[test]
    fn undeclared_source_is_reported() {
        let config = UnifyConfig::new("t", "inventory", &["site"]);
        let result = run_default(
            &config,
            vec![
                record("inventory", "boss", "DS-1 Distortion"),
                record("mystery", "boss", "DS-1 Distortion"),
            ],
        );
        let report = &result.collection("boss").unwrap().report;
        assert_eq!(report.input_records, 1);
        assert!(report.anomalies.iter().any(|a| matches!(
            a,
            Anomaly::UnrecognizedSource { source_id, records: 1, .. } if source_id == "mystery"
        )));
    }

    #[test]
    fn bad_override_fails_only_its_collection() {
        let mut config = UnifyConfig::new("t", "inventory", &["site"]);
        config.collections.insert(
            "broken".into(),
            crate::config::CollectionOverride {
                suffixes: vec!["(unclosed".into()],
                ..Default::default()
            },
        );
        let result = run_default(
            &config,
            vec![
                record("inventory", "broken", "Anything Here"),
                record("inventory", "fine", "Anything Here"),
            ],
        );
        assert_eq!(result.collections.len(), 1);
        assert_eq!(result.collections[0].collection_id, "fine");
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].collection_id, "broken");
        assert!(result.failures[0].error.contains("(unclosed"));
    }

    #[test]
    fn empty_collection_is_flagged_not_raised() {
        let config = UnifyConfig::new("t", "inventory", &["site"]);
        let mut input = UnifyInput::default();
        input.declare("korg", "site");
        let result = run(&config, &input, &KeyCache::new(0)).unwrap();
        let out = result.collection("korg").unwrap();
        assert!(out.records.is_empty());
        assert!(out.report.empty_input);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn invalid_global_config_fails_the_run() {
        let mut config = UnifyConfig::new("t", "inventory", &["site"]);
        config.matching.threshold = 2.0;
        let err = run(&config, &UnifyInput::default(), &KeyCache::new(0)).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn collections_sorted_regardless_of_workers() {
        let mut config = UnifyConfig::new("t", "inventory", &[]);
        let records: Vec<RawRecord> = ["zeta", "alpha", "mid"]
            .iter()
            .map(|c| record("inventory", c, "Some Product"))
            .collect();
        for workers in [1, 4] {
            config.workers = Some(workers);
            let result = run_default(&config, records.clone());
            let ids: Vec<&str> = result
                .collections
                .iter()
                .map(|c| c.collection_id.as_str())
                .collect();
            assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
        }
    }
}
