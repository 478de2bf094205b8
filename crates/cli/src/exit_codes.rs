//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success (including runs with zero matches)                |
//! | 1    | General error (unspecified)                               |
//! | 2    | CLI usage error (bad args)                                |
//! | 3    | Invalid config (parse, validation, collection overrides)  |
//! | 4    | Runtime error (unreadable file, malformed source data)    |
//! | 5    | Some collections could not be processed                   |
//! | 6    | Anomalies flagged and `--fail-on-anomaly` was given       |
//!
//! "No overlap between sources" is a result, not a failure: it exits 0.
//! A collection that could not be processed exits 5. The two are never
//! folded into the same code.

use unicat_unify::UnifyError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure. Registry slot only; no command
/// returns it today.
#[allow(dead_code)]
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config cannot be parsed, fails validation, or has a bad collection override
/// (`validate` only; `run` isolates those as exit 5).
pub const EXIT_INVALID_CONFIG: u8 = 3;

/// IO failure or malformed source data.
pub const EXIT_RUNTIME: u8 = 4;

/// The run finished but at least one collection failed.
pub const EXIT_COLLECTION_FAILED: u8 = 5;

/// The run finished with anomaly flags and `--fail-on-anomaly` was set.
pub const EXIT_ANOMALY: u8 = 6;

/// Exit code for an engine error.
pub fn unify_exit_code(err: &UnifyError) -> u8 {
    if err.is_config() {
        EXIT_INVALID_CONFIG
    } else {
        EXIT_RUNTIME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_INVALID_CONFIG,
            EXIT_RUNTIME,
            EXIT_COLLECTION_FAILED,
            EXIT_ANOMALY,
        ];
        let mut sorted = codes.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), codes.len());
    }

    #[test]
    fn config_errors_map_to_invalid_config() {
        let err = UnifyError::ConfigValidation("bad".into());
        assert_eq!(unify_exit_code(&err), EXIT_INVALID_CONFIG);
        let err = UnifyError::MissingColumn {
            source_id: "vendor".into(),
            column: "name".into(),
        };
        assert_eq!(unify_exit_code(&err), EXIT_RUNTIME);
    }
}
