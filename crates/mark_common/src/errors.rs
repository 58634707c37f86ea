//! Error kinds shared across the grading assistant
//!
//! Library code returns `GraderError`; the binary wraps with `anyhow`.

/// Errors surfaced by the gateway, the scorer, and the dispatch layer
#[derive(Debug, Clone, thiserror::Error)]
pub enum GraderError {
    /// LMS unreachable or non-2xx response
    #[error("network error: {0}")]
    Network(String),

    /// Expired or invalid API token
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Rubric or score text not in the expected shape
    #[error("parse error: {0}")]
    Parse(String),

    /// A required identifier was absent before dispatch
    #[error("missing required parameter: {0}")]
    MissingParameter(String),

    /// The utterance could not be mapped to any intent
    #[error("could not determine what you want to do")]
    UnknownIntent,

    /// External call exceeded the configured deadline
    #[error("request timed out after {0} seconds")]
    Timeout(u64),
}

impl GraderError {
    /// Errors counted against the session's bounded-retry budget.
    /// Missing parameters and unknown intents short-circuit before any
    /// network call and are not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraderError::Network(_) | GraderError::Parse(_) | GraderError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(GraderError::Network("down".into()).is_retryable());
        assert!(GraderError::Parse("bad score".into()).is_retryable());
        assert!(GraderError::Timeout(30).is_retryable());
        assert!(!GraderError::MissingParameter("course_id".into()).is_retryable());
        assert!(!GraderError::UnknownIntent.is_retryable());
        assert!(!GraderError::Auth("expired".into()).is_retryable());
    }
}
