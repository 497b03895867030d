//! Error types for the SSDL estimator

use thiserror::Error;

/// Estimator error type
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Input violates a precondition (probability outside [0,1], negative count, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Computation error
    #[error("Computation error: {0}")]
    Computation(String),

    /// Prompt and fake ratio too close for the tight/loose inversion
    #[error("Singular decomposition: prompt ratio {prompt} and fake ratio {fake} are degenerate")]
    SingularDecomposition {
        /// Prompt ratio of the offending leg
        prompt: f64,
        /// Fake ratio of the offending leg
        fake: f64,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_singular_message_names_ratios() {
        let e = Error::SingularDecomposition { prompt: 0.5, fake: 0.5 };
        let msg = e.to_string();
        assert!(msg.contains("0.5"), "unexpected message: {}", msg);
    }
}
