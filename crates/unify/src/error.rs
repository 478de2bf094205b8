use thiserror::Error;

/// Fatal errors. Everything recoverable (rejected names, ties, fields without
/// a precedence rule, empty collections) is reported, not raised.
#[derive(Debug, Error)]
pub enum UnifyError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (bad threshold, duplicate source, etc.).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// A source id referenced somewhere that is not declared.
    #[error("unknown source: {0}")]
    UnknownSource(String),
    /// A variant suffix pattern that does not compile.
    #[error("collection '{collection}': invalid variant pattern '{pattern}': {message}")]
    InvalidPattern {
        collection: String,
        pattern: String,
        message: String,
    },
    /// A precedence rule that cannot be resolved.
    #[error("collection '{collection}', field '{field}': {message}")]
    InvalidPrecedence {
        collection: String,
        field: String,
        message: String,
    },
    /// Missing required column in input data.
    #[error("source '{source_id}': missing column '{column}'")]
    MissingColumn { source_id: String, column: String },
    /// Malformed input text (CSV or JSON).
    #[error("source '{source_id}': {message}")]
    Parse { source_id: String, message: String },
    /// The worker pool could not be started.
    #[error("cannot start worker pool: {0}")]
    ThreadPool(String),
}

impl UnifyError {
    /// True for errors caused by configuration rather than input data.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::ConfigParse(_)
                | Self::ConfigValidation(_)
                | Self::UnknownSource(_)
                | Self::InvalidPattern { .. }
                | Self::InvalidPrecedence { .. }
        )
    }
}
