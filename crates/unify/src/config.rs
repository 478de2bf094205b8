use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;

use crate::error::UnifyError;
use crate::merge::{FieldRule, PrecedenceTable};

/// Label used in errors raised by the global (non-collection) config.
pub const GLOBAL_SCOPE: &str = "*";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UnifyConfig {
    pub name: String,
    /// Source authoritative for commerce fields (price, SKU).
    pub reference: String,
    /// Content sources, in priority order.
    #[serde(default)]
    pub candidates: Vec<String>,
    /// Attribute holding a stable record identity (used for `canonical_id`).
    #[serde(default = "default_identity_field")]
    pub identity_field: String,
    /// Worker pool size. `None` = available parallelism.
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub variants: VariantConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub precedence: PrecedenceConfig,
    #[serde(default)]
    pub collections: BTreeMap<String, CollectionOverride>,
    /// File locations for the CLI loader. The engine itself never reads them.
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

fn default_identity_field() -> String {
    "sku".into()
}

fn default_cache_capacity() -> usize {
    10_000
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default = "default_min_length")]
    pub min_length: usize,
    #[serde(default = "default_max_length")]
    pub max_length: usize,
    /// Applied to every collection, on top of per-collection lists.
    #[serde(default)]
    pub noise_words: Vec<String>,
}

fn default_min_length() -> usize {
    3
}

fn default_max_length() -> usize {
    200
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_length: default_min_length(),
            max_length: default_max_length(),
            noise_words: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingConfig {
    /// Minimum similarity for a pair to be accepted. Lower = more recall,
    /// more false positives.
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

fn default_threshold() -> f64 {
    0.4
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantConfig {
    /// Minimum group size before same-base records are collapsed.
    #[serde(default = "default_variant_threshold")]
    pub threshold: usize,
    /// Trailing-suffix regex fragments stripped to find the base model name.
    #[serde(default = "default_variant_suffixes")]
    pub suffixes: Vec<String>,
}

fn default_variant_threshold() -> usize {
    5
}

pub fn default_variant_suffixes() -> Vec<String> {
    [
        // colours and finishes
        r"(?:black|white|red|blue|green|yellow|orange|purple|pink|grey|gray|silver|gold|brown|beige|navy|teal|ivory|natural|walnut|rosewood|sunburst|cherry)",
        r"(?:matte|gloss|glossy|satin|metallic|finish)",
        // sizes
        r"(?:xs|x{1,3}l|small|medium|large|mini|compact)",
        // editions and versions
        r"(?:limited|special|anniversary|deluxe|standard)?\s*edition",
        r"(?:v|ver|version|mk|mark)\s*\.?\s*\d{1,2}",
        // running indices: "(2)", "[3]", "#4"
        r"[\(\[#]\s*\d{1,3}\s*[\)\]]?",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for VariantConfig {
    fn default() -> Self {
        Self {
            threshold: default_variant_threshold(),
            suffixes: default_variant_suffixes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Flag a collection when a candidate source lists more than
    /// `anomaly_multiplier` times the reference count (pre-collapse).
    #[serde(default = "default_anomaly_multiplier")]
    pub anomaly_multiplier: f64,
}

fn default_anomaly_multiplier() -> f64 {
    2.0
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            anomaly_multiplier: default_anomaly_multiplier(),
        }
    }
}

// ---------------------------------------------------------------------------
// Precedence
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrecedenceConfig {
    /// Tie-break order between sources. Undeclared sources are appended in
    /// declaration order (reference first).
    #[serde(default)]
    pub source_priority: Vec<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, RuleSpec>,
}

/// Field rule as written in TOML; resolved into a [`FieldRule`] per collection.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub rule: String,
    #[serde(default)]
    pub order: Vec<String>,
}

// ---------------------------------------------------------------------------
// Per-collection overrides
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollectionOverride {
    /// Added to the global noise words (brand names, category nouns).
    #[serde(default)]
    pub noise_words: Vec<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub variant_threshold: Option<usize>,
    /// Appended to the global suffix patterns.
    #[serde(default)]
    pub suffixes: Vec<String>,
    #[serde(default)]
    pub precedence: Option<PrecedenceConfig>,
}

// ---------------------------------------------------------------------------
// Sources (CLI loader)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub file: String,
    #[serde(default)]
    pub format: SourceFormat,
    /// Fixed collection id for every record in the file.
    #[serde(default)]
    pub collection: Option<String>,
    /// Column carrying the collection id. Ignored when `collection` is set.
    #[serde(default)]
    pub collection_column: Option<String>,
    #[serde(default = "default_name_column")]
    pub name_column: String,
    /// Source column -> attribute name expected by the precedence table.
    #[serde(default)]
    pub rename: BTreeMap<String, String>,
}

fn default_name_column() -> String {
    "name".into()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceFormat {
    #[default]
    Csv,
    Json,
}

// ---------------------------------------------------------------------------
// Resolved per-collection settings
// ---------------------------------------------------------------------------

/// Everything a single collection run needs, with overrides applied.
#[derive(Debug, Clone)]
pub struct CollectionSettings {
    pub threshold: f64,
    pub variant_threshold: usize,
    pub suffixes: Vec<String>,
    pub precedence: PrecedenceTable,
    pub anomaly_multiplier: f64,
    pub identity_field: String,
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl UnifyConfig {
    /// A config with defaults everywhere, for programmatic use.
    pub fn new(name: &str, reference: &str, candidates: &[&str]) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
            candidates: candidates.iter().map(|c| c.to_string()).collect(),
            identity_field: default_identity_field(),
            workers: None,
            cache_capacity: default_cache_capacity(),
            normalize: NormalizeConfig::default(),
            matching: MatchingConfig::default(),
            variants: VariantConfig::default(),
            report: ReportConfig::default(),
            precedence: PrecedenceConfig::default(),
            collections: BTreeMap::new(),
            sources: BTreeMap::new(),
        }
    }

    pub fn from_toml(input: &str) -> Result<Self, UnifyError> {
        let config: UnifyConfig =
            toml::from_str(input).map_err(|e| UnifyError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reference first, then candidates in declared order.
    pub fn source_ids(&self) -> Vec<&str> {
        std::iter::once(self.reference.as_str())
            .chain(self.candidates.iter().map(|c| c.as_str()))
            .collect()
    }

    pub fn is_declared_source(&self, source_id: &str) -> bool {
        self.reference == source_id || self.candidates.iter().any(|c| c == source_id)
    }

    /// Global validation. Per-collection overrides are checked lazily by
    /// [`UnifyConfig::settings_for`] so one bad collection cannot block the rest.
    pub fn validate(&self) -> Result<(), UnifyError> {
        if self.reference.trim().is_empty() {
            return Err(UnifyError::ConfigValidation(
                "reference source must not be empty".into(),
            ));
        }

        let mut seen = HashSet::new();
        for source in self.source_ids() {
            if !seen.insert(source) {
                return Err(UnifyError::ConfigValidation(format!(
                    "source '{source}' is declared more than once"
                )));
            }
        }

        check_threshold(GLOBAL_SCOPE, self.matching.threshold)?;
        check_variant_threshold(GLOBAL_SCOPE, self.variants.threshold)?;

        if self.normalize.max_length == 0 || self.normalize.min_length > self.normalize.max_length
        {
            return Err(UnifyError::ConfigValidation(format!(
                "normalize: min_length ({}) must not exceed max_length ({})",
                self.normalize.min_length, self.normalize.max_length
            )));
        }

        let multiplier = self.report.anomaly_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(UnifyError::ConfigValidation(format!(
                "report: anomaly_multiplier must be positive, got {multiplier}"
            )));
        }

        if self.workers == Some(0) {
            return Err(UnifyError::ConfigValidation(
                "workers must be at least 1".into(),
            ));
        }

        for pattern in &self.variants.suffixes {
            crate::variants::compile_suffix(GLOBAL_SCOPE, pattern)?;
        }

        self.resolve_precedence(GLOBAL_SCOPE, None)?;

        for source_id in self.sources.keys() {
            if !self.is_declared_source(source_id) {
                return Err(UnifyError::UnknownSource(format!(
                    "[sources.{source_id}] is not the reference or a candidate"
                )));
            }
        }

        Ok(())
    }

    /// Resolve every declared collection override, returning the ones that fail.
    pub fn collection_errors(&self) -> Vec<(String, UnifyError)> {
        self.collections
            .keys()
            .filter_map(|id| self.settings_for(id).err().map(|e| (id.clone(), e)))
            .collect()
    }

    /// Settings for one collection, with its overrides applied and validated.
    pub fn settings_for(&self, collection_id: &str) -> Result<CollectionSettings, UnifyError> {
        let overrides = self.collections.get(collection_id);

        let threshold = overrides
            .and_then(|o| o.threshold)
            .unwrap_or(self.matching.threshold);
        check_threshold(collection_id, threshold)?;

        let variant_threshold = overrides
            .and_then(|o| o.variant_threshold)
            .unwrap_or(self.variants.threshold);
        check_variant_threshold(collection_id, variant_threshold)?;

        let mut suffixes = self.variants.suffixes.clone();
        if let Some(o) = overrides {
            suffixes.extend(o.suffixes.iter().cloned());
        }

        let precedence = self.resolve_precedence(
            collection_id,
            overrides.and_then(|o| o.precedence.as_ref()),
        )?;

        Ok(CollectionSettings {
            threshold,
            variant_threshold,
            suffixes,
            precedence,
            anomaly_multiplier: self.report.anomaly_multiplier,
            identity_field: self.identity_field.clone(),
        })
    }

    fn resolve_precedence(
        &self,
        scope: &str,
        layer: Option<&PrecedenceConfig>,
    ) -> Result<PrecedenceTable, UnifyError> {
        let declared = self.source_ids();

        let requested = match layer {
            Some(l) if !l.source_priority.is_empty() => &l.source_priority,
            _ => &self.precedence.source_priority,
        };

        let mut source_priority: Vec<String> = Vec::with_capacity(declared.len());
        for source in requested {
            if !self.is_declared_source(source) {
                return Err(UnifyError::InvalidPrecedence {
                    collection: scope.into(),
                    field: "source_priority".into(),
                    message: format!("unknown source '{source}'"),
                });
            }
            if source_priority.contains(source) {
                return Err(UnifyError::InvalidPrecedence {
                    collection: scope.into(),
                    field: "source_priority".into(),
                    message: format!("source '{source}' listed twice"),
                });
            }
            source_priority.push(source.clone());
        }
        for source in declared {
            if !source_priority.iter().any(|s| s == source) {
                source_priority.push(source.to_string());
            }
        }

        let mut rules = BTreeMap::new();
        let layered = self
            .precedence
            .fields
            .iter()
            .chain(layer.into_iter().flat_map(|l| l.fields.iter()));
        for (field, spec) in layered {
            rules.insert(field.clone(), self.resolve_rule(scope, field, spec)?);
        }

        Ok(PrecedenceTable {
            reference: self.reference.clone(),
            source_priority,
            rules,
        })
    }

    fn resolve_rule(&self, scope: &str, field: &str, spec: &RuleSpec) -> Result<FieldRule, UnifyError> {
        let invalid = |message: String| UnifyError::InvalidPrecedence {
            collection: scope.into(),
            field: field.into(),
            message,
        };

        match spec.rule.as_str() {
            "reference_wins" | "richest" if !spec.order.is_empty() => Err(invalid(format!(
                "`order` is only valid with rule = \"sources\", not \"{}\"",
                spec.rule
            ))),
            "reference_wins" => Ok(FieldRule::ReferenceWins),
            "richest" => Ok(FieldRule::Richest),
            "sources" => {
                if spec.order.is_empty() {
                    return Err(invalid("rule \"sources\" needs a non-empty `order`".into()));
                }
                for source in &spec.order {
                    if !self.is_declared_source(source) {
                        return Err(invalid(format!("unknown source '{source}' in order")));
                    }
                }
                Ok(FieldRule::Sources(spec.order.clone()))
            }
            other => Err(invalid(format!(
                "unknown rule \"{other}\" (expected reference_wins, richest or sources)"
            ))),
        }
    }
}

fn check_threshold(scope: &str, threshold: f64) -> Result<(), UnifyError> {
    if !(0.0..=1.0).contains(&threshold) {
        return Err(UnifyError::ConfigValidation(format!(
            "collection '{scope}': threshold must be within [0, 1], got {threshold}"
        )));
    }
    Ok(())
}

fn check_variant_threshold(scope: &str, threshold: usize) -> Result<(), UnifyError> {
    if threshold == 0 {
        return Err(UnifyError::ConfigValidation(format!(
            "collection '{scope}': variant threshold must be at least 1"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
