use thiserror::Error;

/// Errors surfaced to callers of the feed pipeline.
///
/// Only caller contract violations end up here. Missing keyed state,
/// degenerate inputs and dimension mismatches are absorbed by the stages.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid feed size: {requested} (expected 1..={max})")]
    InvalidFeedSize { requested: usize, max: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<envy::Error> for PipelineError {
    fn from(err: envy::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = PipelineError::InvalidFeedSize {
            requested: 0,
            max: 200,
        };
        assert_eq!(err.to_string(), "Invalid feed size: 0 (expected 1..=200)");

        let err = PipelineError::InvalidInput("score is NaN".to_string());
        assert_eq!(err.to_string(), "Invalid input: score is NaN");
    }
}
