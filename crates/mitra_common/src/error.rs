//! Error types for Mitra.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MitraError {
    /// Internal signal from the circuit breaker; consumed by the fallback
    /// chain, never shown to users.
    #[error("circuit open")]
    CircuitOpen,

    #[error("Transcription error: {0}")]
    Transcription(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Knowledge store error: {0}")]
    Knowledge(String),

    #[error("Preference store error: {0}")]
    Preference(String),

    #[error("Delivery error: {0}")]
    Delivery(String),

    #[error("Delivery failed after {attempts} attempts: {last_error}")]
    DeliveryExhausted { attempts: usize, last_error: String },

    #[error("{stage} stage timed out after {millis}ms")]
    StageTimeout { stage: &'static str, millis: u64 },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MitraError {
    /// True for the breaker's rejection signal, which the fallback chain
    /// treats as a failed attempt without having called upstream.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, MitraError::CircuitOpen)
    }

    /// True for timeout failures, which count against the breaker exactly
    /// like upstream errors do.
    pub fn is_timeout(&self) -> bool {
        matches!(self, MitraError::StageTimeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_circuit_open_message_is_terse() {
        let err = MitraError::CircuitOpen;
        assert_eq!(err.to_string(), "circuit open");
        assert!(err.is_circuit_open());
    }

    #[test]
    fn test_stage_timeout_formats_stage_and_millis() {
        let err = MitraError::StageTimeout {
            stage: "resolving",
            millis: 8000,
        };
        assert_eq!(err.to_string(), "resolving stage timed out after 8000ms");
        assert!(err.is_timeout());
    }

    #[test]
    fn test_delivery_exhausted_carries_attempt_count() {
        let err = MitraError::DeliveryExhausted {
            attempts: 3,
            last_error: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: MitraError = io.into();
        assert!(matches!(err, MitraError::Io(_)));
    }
}
