use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// One listing as seen from a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    pub source_id: String,
    pub collection_id: String,
    pub display_name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl RawRecord {
    pub fn new(
        source_id: impl Into<String>,
        collection_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            collection_id: collection_id.into(),
            display_name: display_name.into(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(field.into(), value.into());
        self
    }

    /// Attribute value, treating blank strings as absent.
    pub fn attr(&self, field: &str) -> Option<&str> {
        self.attributes
            .get(field)
            .map(|v| v.as_str())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Raw records grouped by collection, then by source. Order within a source
/// is the caller's input order and is preserved.
#[derive(Debug, Clone, Default)]
pub struct UnifyInput {
    pub collections: BTreeMap<String, BTreeMap<String, Vec<RawRecord>>>,
}

impl UnifyInput {
    pub fn from_records(records: impl IntoIterator<Item = RawRecord>) -> Self {
        let mut input = Self::default();
        input.extend(records);
        input
    }

    pub fn extend(&mut self, records: impl IntoIterator<Item = RawRecord>) {
        for record in records {
            self.collections
                .entry(record.collection_id.clone())
                .or_default()
                .entry(record.source_id.clone())
                .or_default()
                .push(record);
        }
    }

    /// Declare a collection with no records for a source, so it is still
    /// processed (and reported as empty) when the upstream scrape came back empty.
    pub fn declare(&mut self, collection_id: &str, source_id: &str) {
        self.collections
            .entry(collection_id.to_string())
            .or_default()
            .entry(source_id.to_string())
            .or_default();
    }

    pub fn record_count(&self) -> usize {
        self.collections
            .values()
            .flat_map(|sources| sources.values())
            .map(Vec::len)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Comparison form of a display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComparisonKey {
    pub normalized_tokens: BTreeSet<String>,
    /// Tokens rejoined in original order.
    pub normalized_string: String,
}

/// Why a display name was excluded from matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidRecord {
    TooShort { length: usize },
    TooLong { length: usize },
    NoTokens,
}

impl std::fmt::Display for InvalidRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooShort { length } => write!(f, "name too short ({length} chars)"),
            Self::TooLong { length } => write!(f, "name too long ({length} chars)"),
            Self::NoTokens => write!(f, "no tokens left after cleaning"),
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CoverageClass {
    Verified,
    CandidateOnly,
    ReferenceOnly,
}

impl std::fmt::Display for CoverageClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Verified => write!(f, "VERIFIED"),
            Self::CandidateOnly => write!(f, "CANDIDATE_ONLY"),
            Self::ReferenceOnly => write!(f, "REFERENCE_ONLY"),
        }
    }
}

/// A record that contributed to a canonical record, with the score it was
/// matched at. The reference record itself contributes at 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contribution {
    pub source_id: String,
    pub record: RawRecord,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedField {
    pub value: String,
    pub source_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub canonical_id: String,
    pub collection_id: String,
    pub coverage_class: CoverageClass,
    pub contributing_records: Vec<Contribution>,
    pub merged_fields: BTreeMap<String, MergedField>,
    #[serde(default)]
    pub variant_group: Vec<RawRecord>,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStats {
    pub source_id: String,
    pub input: usize,
    pub rejected: usize,
    pub valid: usize,
    pub after_collapse: usize,
    pub variants: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// A candidate source listed far more products than the reference source.
    CandidateOverExtraction {
        collection_id: String,
        source_id: String,
        candidate_count: usize,
        reference_count: usize,
        multiplier: f64,
    },
    /// Records arrived under a source id the config does not declare.
    UnrecognizedSource {
        collection_id: String,
        source_id: String,
        records: usize,
    },
}

/// Counts for one collection, or (with `collection_id = None`) for the whole run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub input_records: usize,
    pub rejected_count: usize,
    /// Reference records after variant collapse.
    pub reference_records: usize,
    /// Candidate records (all candidate sources) before variant collapse.
    pub candidate_records_raw: usize,
    /// Candidate records (all candidate sources) after variant collapse.
    pub candidate_records: usize,
    pub variant_reduction: usize,
    pub matched_pairs: usize,
    pub verified: usize,
    pub candidate_only: usize,
    pub reference_only: usize,
    pub total_canonical: usize,
    pub coverage_pct: f64,
    pub ties_broken: usize,
    #[serde(default)]
    pub unruled_fields: BTreeSet<String>,
    pub empty_input: bool,
    #[serde(default)]
    pub sources: Vec<SourceStats>,
    #[serde(default)]
    pub anomalies: Vec<Anomaly>,
}

impl RunReport {
    /// Coverage over the canonical set: verified / total.
    pub fn coverage(verified: usize, total: usize) -> f64 {
        if total == 0 {
            0.0
        } else {
            verified as f64 / total as f64 * 100.0
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionOutput {
    pub collection_id: String,
    pub records: Vec<CanonicalRecord>,
    pub report: RunReport,
}

/// A collection that could not be processed (configuration problem).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionFailure {
    pub collection_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifyMeta {
    pub config_name: String,
    pub reference: String,
    pub candidates: Vec<String>,
    pub threshold: f64,
    pub engine_version: String,
    pub run_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifyResult {
    pub meta: UnifyMeta,
    pub summary: RunReport,
    pub collections: Vec<CollectionOutput>,
    #[serde(default)]
    pub failures: Vec<CollectionFailure>,
}

impl UnifyResult {
    pub fn collection(&self, collection_id: &str) -> Option<&CollectionOutput> {
        self.collections
            .iter()
            .find(|c| c.collection_id == collection_id)
    }

    pub fn records(&self) -> impl Iterator<Item = &CanonicalRecord> {
        self.collections.iter().flat_map(|c| c.records.iter())
    }
}
