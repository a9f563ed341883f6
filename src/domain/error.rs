//! Domain error types.
//!
//! Skipped orders (insufficient cash, merge cap, below minimum quantity) are
//! NOT errors; they are modeled as `EntryPlan::Skip` values in the engine.
//! Everything here is either a startup failure or a run-aborting condition.

/// Top-level error type for quantrader.
#[derive(Debug, thiserror::Error)]
pub enum QuantraderError {
    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    /// Programming/data invariant broken (unreachable quantile bucket,
    /// non-positive price or quantity, missing quote for a held asset).
    /// Always aborts the run.
    #[error("invariant violation: {reason}")]
    InvariantViolation { reason: String },

    #[error("dataset error: {reason}")]
    Dataset { reason: String },

    #[error("exchange error during {operation}: {reason}")]
    Exchange { operation: String, reason: String },

    #[error("state store error: {reason}")]
    StateStore { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<&QuantraderError> for std::process::ExitCode {
    fn from(err: &QuantraderError) -> Self {
        let code: u8 = match err {
            QuantraderError::Io(_) => 1,
            QuantraderError::ConfigParse { .. }
            | QuantraderError::ConfigMissing { .. }
            | QuantraderError::ConfigInvalid { .. } => 2,
            QuantraderError::Dataset { .. } | QuantraderError::StateStore { .. } => 3,
            QuantraderError::Exchange { .. } => 4,
            QuantraderError::InvariantViolation { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
