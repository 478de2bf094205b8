//! `unicat run | validate | score`: config-driven catalog unification.

use std::path::{Path, PathBuf};

use clap::Subcommand;
use serde::Serialize;
use tracing::{info, warn};

use unicat_unify::config::SourceFormat;
use unicat_unify::input::{load_csv_records, load_json_records};
use unicat_unify::similarity::{explain, ScoreBreakdown};
use unicat_unify::{compare, KeyCache, Normalizer, RunDelta, UnifyConfig, UnifyInput, UnifyResult};

use crate::exit_codes::{
    EXIT_ANOMALY, EXIT_COLLECTION_FAILED, EXIT_INVALID_CONFIG, EXIT_RUNTIME,
};
use crate::CliError;

#[derive(Subcommand)]
pub enum UnifyCommands {
    /// Unify every collection described by a TOML config file
    #[command(after_help = "\
Examples:
  unicat run gear.unify.toml
  unicat run gear.unify.toml --json
  unicat run gear.unify.toml --output catalog.json
  unicat run gear.unify.toml --baseline yesterday.json --json
  unicat run gear.unify.toml --workers 1 -vv")]
    Run {
        /// Path to the .unify.toml config file
        config: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,

        /// Worker threads (overrides `workers` in the config)
        #[arg(long)]
        workers: Option<usize>,

        /// Previous JSON output to diff against
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Exit 6 when any anomaly is flagged
        #[arg(long)]
        fail_on_anomaly: bool,
    },

    /// Validate a config, including every per-collection override
    #[command(after_help = "\
Examples:
  unicat validate gear.unify.toml")]
    Validate {
        /// Path to the .unify.toml config file
        config: PathBuf,
    },

    /// Show how two display names score against each other
    #[command(after_help = "\
Examples:
  unicat score 'FP-30X' 'FP 30 X'
  unicat score 'Roland FP30X' 'FP-30X' --config gear.unify.toml --collection roland
  unicat score 'TD-17KVX' 'TD 17' --json")]
    Score {
        /// First display name
        a: String,

        /// Second display name
        b: String,

        /// Config supplying noise words, length bounds and the threshold
        #[arg(long)]
        config: Option<PathBuf>,

        /// Collection whose noise words and threshold apply
        #[arg(long, default_value = "")]
        collection: String,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

pub fn cmd_unify(cmd: UnifyCommands) -> Result<(), CliError> {
    match cmd {
        UnifyCommands::Run { config, json, output, workers, baseline, fail_on_anomaly } => {
            cmd_run(config, json, output, workers, baseline, fail_on_anomaly)
        }
        UnifyCommands::Validate { config } => cmd_validate(config),
        UnifyCommands::Score { a, b, config, collection, json } => {
            cmd_score(a, b, config, collection, json)
        }
    }
}

// ============================================================================
// run
// ============================================================================

/// `--json` / `--output` document: the engine result plus an optional delta.
#[derive(Serialize)]
struct RunOutput<'a> {
    #[serde(flatten)]
    result: &'a UnifyResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<RunDelta>,
}

fn read_config(path: &Path) -> Result<UnifyConfig, CliError> {
    let config_str = std::fs::read_to_string(path)
        .map_err(|e| CliError::io(format!("cannot read config: {e}")))?;
    UnifyConfig::from_toml(&config_str).map_err(CliError::unify)
}

/// Load every `[sources.<id>]` file, resolved relative to the config file.
fn load_input(config: &UnifyConfig, config_path: &Path) -> Result<UnifyInput, CliError> {
    let base_dir = config_path.parent().unwrap_or_else(|| Path::new("."));
    let mut input = UnifyInput::default();

    for source_id in config.source_ids() {
        let Some(source) = config.sources.get(source_id) else {
            warn!(source = source_id, "no [sources] entry; source contributes no records");
            continue;
        };

        let path = base_dir.join(&source.file);
        let data = std::fs::read_to_string(&path)
            .map_err(|e| CliError::io(format!("cannot read {}: {e}", path.display())))?;
        let records = match source.format {
            SourceFormat::Csv => load_csv_records(source_id, &data, source),
            SourceFormat::Json => load_json_records(source_id, &data, source),
        }
        .map_err(CliError::unify)?;

        if let Some(collection) = &source.collection {
            input.declare(collection, source_id);
        }
        input.extend(records);
    }

    info!(
        collections = input.collections.len(),
        records = input.record_count(),
        "loaded sources"
    );
    Ok(input)
}

fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    workers: Option<usize>,
    baseline: Option<PathBuf>,
    fail_on_anomaly: bool,
) -> Result<(), CliError> {
    if workers == Some(0) {
        return Err(CliError::usage("--workers must be at least 1"));
    }

    let mut config = read_config(&config_path)?;
    if workers.is_some() {
        config.workers = workers;
    }

    let input = load_input(&config, &config_path)?;
    let cache = KeyCache::new(config.cache_capacity);
    let result = unicat_unify::run(&config, &input, &cache).map_err(CliError::unify)?;
    let stats = cache.stats();
    info!(
        hits = stats.hits,
        misses = stats.misses,
        cached = stats.len,
        capacity = stats.capacity,
        "normalization cache"
    );

    let delta = match baseline {
        Some(path) => {
            let text = std::fs::read_to_string(&path).map_err(|e| {
                CliError::io(format!("cannot read baseline {}: {e}", path.display()))
            })?;
            let previous: UnifyResult = serde_json::from_str(&text).map_err(|e| {
                CliError::io(format!("baseline {} is not a unicat result: {e}", path.display()))
                    .with_hint("pass a file written by `unicat run --output`")
            })?;
            Some(compare(&previous, &result))
        }
        None => None,
    };

    // Output
    let doc = RunOutput { result: &result, delta };
    let json_str = serde_json::to_string_pretty(&doc)
        .map_err(|e| CliError::new(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;

    if let Some(ref path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::io(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }

    if json_output {
        println!("{json_str}");
    }

    // Human summary to stderr
    print_summary(&result, doc.delta.as_ref());

    let s = &result.summary;
    if !result.failures.is_empty() {
        return Err(CliError::new(
            EXIT_COLLECTION_FAILED,
            format!("{} collection(s) could not be processed", result.failures.len()),
        )
        .with_hint("run `unicat validate` to check collection overrides"));
    }
    if fail_on_anomaly && !s.anomalies.is_empty() {
        return Err(CliError::new(
            EXIT_ANOMALY,
            format!("{} anomaly flag(s) raised", s.anomalies.len()),
        ));
    }

    Ok(())
}

fn print_summary(result: &UnifyResult, delta: Option<&RunDelta>) {
    let s = &result.summary;
    eprintln!(
        "{}: {} collection(s), {} canonical records: {} verified, {} candidate-only, {} reference-only ({:.1}% coverage)",
        result.meta.config_name,
        result.collections.len(),
        s.total_canonical,
        s.verified,
        s.candidate_only,
        s.reference_only,
        s.coverage_pct,
    );
    eprintln!(
        "input: {} records, {} rejected, {} variants collapsed, {} pairs matched",
        s.input_records, s.rejected_count, s.variant_reduction, s.matched_pairs,
    );
    if !s.unruled_fields.is_empty() {
        let fields: Vec<&str> = s.unruled_fields.iter().map(String::as_str).collect();
        eprintln!("no precedence rule: {}", fields.join(", "));
    }
    for anomaly in &s.anomalies {
        eprintln!("anomaly: {}", serde_json::to_string(anomaly).unwrap_or_default());
    }
    for failure in &result.failures {
        eprintln!("  collection '{}': error: {}", failure.collection_id, failure.error);
    }
    if let Some(delta) = delta {
        if delta.is_empty() {
            eprintln!("baseline: no changes");
        } else {
            eprintln!(
                "baseline: {} collection(s) changed, verified {:+}, canonical {:+}",
                delta.collections.len(),
                delta.verified_delta,
                delta.canonical_delta,
            );
        }
    }
}

// ============================================================================
// validate
// ============================================================================

fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = read_config(&config_path)?;

    let errors = config.collection_errors();
    if let Some((_, first)) = errors.first() {
        for (collection_id, err) in &errors {
            eprintln!("  collection '{collection_id}': {err}");
        }
        return Err(CliError::new(EXIT_INVALID_CONFIG, first.to_string()));
    }

    eprintln!(
        "valid: '{}' with reference '{}', {} candidate(s), {} collection override(s)",
        config.name,
        config.reference,
        config.candidates.len(),
        config.collections.len(),
    );
    Ok(())
}

// ============================================================================
// score
// ============================================================================

#[derive(Serialize)]
struct ScoreOutput<'a> {
    a: &'a str,
    b: &'a str,
    normalized_a: &'a str,
    normalized_b: &'a str,
    #[serde(flatten)]
    breakdown: ScoreBreakdown,
    threshold: f64,
    matches: bool,
}

fn cmd_score(
    a: String,
    b: String,
    config_path: Option<PathBuf>,
    collection: String,
    json_output: bool,
) -> Result<(), CliError> {
    let (normalizer, threshold) = match config_path {
        Some(path) => {
            let config = read_config(&path)?;
            let settings = config.settings_for(&collection).map_err(CliError::unify)?;
            (Normalizer::from_config(&config), settings.threshold)
        }
        None => {
            let defaults = UnifyConfig::new("score", "a", &[]);
            (Normalizer::default(), defaults.matching.threshold)
        }
    };

    let key = |name: &str| {
        normalizer.normalize(name, &collection).map_err(|reason| {
            CliError::usage(format!("'{name}' is rejected by normalization: {reason}"))
        })
    };
    let key_a = key(&a)?;
    let key_b = key(&b)?;
    let breakdown = explain(&key_a, &key_b);

    if json_output {
        let doc = ScoreOutput {
            a: &a,
            b: &b,
            normalized_a: &key_a.normalized_string,
            normalized_b: &key_b.normalized_string,
            breakdown,
            threshold,
            matches: breakdown.score >= threshold,
        };
        let json_str = serde_json::to_string_pretty(&doc)
            .map_err(|e| CliError::new(EXIT_RUNTIME, format!("JSON serialization error: {e}")))?;
        println!("{json_str}");
    } else {
        println!("a:              {:?} -> {:?}", a, key_a.normalized_string);
        println!("b:              {:?} -> {:?}", b, key_b.normalized_string);
        println!("token overlap:  {:.3}", breakdown.token_overlap);
        println!("sequence ratio: {:.3}", breakdown.sequence_ratio);
        println!(
            "score:          {:.3} ({} threshold {})",
            breakdown.score,
            if breakdown.score >= threshold { "meets" } else { "below" },
            threshold,
        );
    }
    Ok(())
}
