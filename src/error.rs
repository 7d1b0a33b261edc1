use thiserror::Error;

/// Failure talking to a text-generation endpoint. Never carries a partial reply.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenerationError {
    #[error("request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("endpoint returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("malformed endpoint response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum OracleError {
    #[error("judge call failed: {0}")]
    Judge(#[from] GenerationError),
    #[error("malformed verdict: {0}")]
    MalformedVerdict(String),
}

/// Why a window ended in a terminal failure record.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum WindowFailure {
    #[error("transport error: {0}")]
    Transport(GenerationError),
    #[error("oracle error: {0}")]
    Oracle(OracleError),
    #[error("threshold {threshold:.2} not met after {attempts} attempts (last score {last_score:.2})")]
    ThresholdNotMet {
        threshold: f64,
        attempts: u32,
        last_score: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestErrorCode {
    E001StoreLocked,
    E002StoreCorrupt,
    E003ConfigInvalid,
    E004InputInvalid,
}

impl DigestErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::E001StoreLocked => "E001_STORE_LOCKED",
            Self::E002StoreCorrupt => "E002_STORE_CORRUPT",
            Self::E003ConfigInvalid => "E003_CONFIG_INVALID",
            Self::E004InputInvalid => "E004_INPUT_INVALID",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn threshold_failure_reason_names_attempts() {
        let failure = WindowFailure::ThresholdNotMet {
            threshold: 0.8,
            attempts: 5,
            last_score: 0.62,
        };
        assert_eq!(
            failure.to_string(),
            "threshold 0.80 not met after 5 attempts (last score 0.62)"
        );
    }

    #[test]
    fn transport_failure_reason_carries_status() {
        let failure = WindowFailure::Transport(GenerationError::Status {
            status: 503,
            body: "busy".to_string(),
        });
        assert_eq!(
            failure.to_string(),
            "transport error: endpoint returned status 503: busy"
        );
    }
}
