//! Error types for the lofi-server.
//!
//! Defines all error codes and types used throughout the service for
//! consistent error handling and reporting, both over HTTP and on the CLI.

use std::fmt;

/// Error codes returned by the service in error responses.
///
/// These codes are used in HTTP error bodies and allow clients
/// to programmatically handle specific error conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Checkpoint download from remote storage failed.
    /// Trigger: Missing object, network error, checksum mismatch.
    CheckpointFetchFailed,

    /// Model construction or weight loading failed.
    /// Trigger: Incompatible weights, unavailable device.
    ModelLoadFailed,

    /// Prompt text is invalid.
    /// Trigger: Empty prompt or exceeds 1000 characters.
    InvalidPrompt,

    /// Requested duration is outside valid range.
    /// Trigger: Non-positive, non-integer, or above the configured maximum.
    InvalidDuration,

    /// Seed parameter could not be parsed.
    InvalidSeed,

    /// Audio input is unusable.
    /// Trigger: Empty clip, unreadable WAV, non-positive loop target.
    InvalidAudio,

    /// The model invocation itself failed.
    /// Trigger: OOM or internal device error during generation.
    GenerationFailed,

    /// Converting samples to a WAV container failed.
    EncodingFailed,

    /// Generation queue is at maximum capacity.
    QueueFull,

    /// The request deadline passed before generation could start.
    Timeout,

    /// A call to a remote lofi-server failed (client mode).
    RemoteRequestFailed,
}

impl ErrorCode {
    /// Returns the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::CheckpointFetchFailed => "CHECKPOINT_FETCH_FAILED",
            ErrorCode::ModelLoadFailed => "MODEL_LOAD_FAILED",
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidDuration => "INVALID_DURATION",
            ErrorCode::InvalidSeed => "INVALID_SEED",
            ErrorCode::InvalidAudio => "INVALID_AUDIO",
            ErrorCode::GenerationFailed => "GENERATION_FAILED",
            ErrorCode::EncodingFailed => "ENCODING_FAILED",
            ErrorCode::QueueFull => "QUEUE_FULL",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::RemoteRequestFailed => "REMOTE_REQUEST_FAILED",
        }
    }

    /// Returns a human-readable description of the error.
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::CheckpointFetchFailed => "Failed to fetch model checkpoint from remote storage",
            ErrorCode::ModelLoadFailed => "Failed to construct the model or apply its weights",
            ErrorCode::InvalidPrompt => "Prompt must be non-empty and at most 1000 characters",
            ErrorCode::InvalidDuration => "Duration must be a positive integer within the server maximum",
            ErrorCode::InvalidSeed => "Seed must be a non-negative integer",
            ErrorCode::InvalidAudio => "Audio input is empty, unreadable or has an invalid target",
            ErrorCode::GenerationFailed => "Model invocation failed during generation",
            ErrorCode::EncodingFailed => "Failed to encode samples as WAV",
            ErrorCode::QueueFull => "Generation queue is at maximum capacity",
            ErrorCode::Timeout => "Request deadline passed before generation started",
            ErrorCode::RemoteRequestFailed => "Request to the generation server failed",
        }
    }

    /// Returns a recovery hint suggesting how to resolve this error.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCode::CheckpointFetchFailed => {
                "Check network access and the LOFI_CHECKPOINT_BUCKET / LOFI_CHECKPOINT_BLOB \
                 settings; the next request retries the download"
            }
            ErrorCode::ModelLoadFailed => {
                "Verify the checkpoint matches the model, or use LOFI_DEVICE=cpu; \
                 the next request retries loading"
            }
            ErrorCode::InvalidPrompt => {
                "Provide a descriptive prompt between 1 and 1000 characters \
                 (e.g., 'chill piano, rain, cozy room')"
            }
            ErrorCode::InvalidDuration => {
                "Specify a whole number of seconds within the server maximum (e.g., duration=10)"
            }
            ErrorCode::InvalidSeed => "Pass an unsigned integer seed (e.g., seed=42) or omit it",
            ErrorCode::InvalidAudio => {
                "Provide a non-empty PCM WAV file and a positive target duration"
            }
            ErrorCode::GenerationFailed => {
                "Try a shorter duration or retry the request; check device memory if it persists"
            }
            ErrorCode::EncodingFailed => "Check free disk space in the output directory",
            ErrorCode::QueueFull => {
                "Wait for pending generations to complete before submitting new requests"
            }
            ErrorCode::Timeout => "Retry later or request a shorter duration",
            ErrorCode::RemoteRequestFailed => {
                "Check the server URL and that the generation server is running"
            }
        }
    }

    /// Returns true for errors caused by bad caller input.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::InvalidPrompt
                | ErrorCode::InvalidDuration
                | ErrorCode::InvalidSeed
                | ErrorCode::InvalidAudio
        )
    }

    /// Returns the HTTP status code used when this error reaches a client.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::InvalidPrompt
            | ErrorCode::InvalidDuration
            | ErrorCode::InvalidSeed
            | ErrorCode::InvalidAudio => 400,
            ErrorCode::CheckpointFetchFailed | ErrorCode::ModelLoadFailed | ErrorCode::QueueFull => {
                503
            }
            ErrorCode::Timeout => 504,
            ErrorCode::GenerationFailed | ErrorCode::EncodingFailed => 500,
            ErrorCode::RemoteRequestFailed => 502,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main error type for service operations.
#[derive(Debug)]
pub struct ServiceError {
    /// The error code identifying the type of error.
    pub code: ErrorCode,
    /// Human-readable error message with context.
    pub message: String,
    /// Whether the failure is transient and the operation may be retried once.
    pub retryable: bool,
    /// Optional underlying cause of the error.
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ServiceError {
    /// Creates a new ServiceError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            source: None,
        }
    }

    /// Creates a new ServiceError with an underlying cause.
    pub fn with_source(
        code: ErrorCode,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: false,
            source: Some(Box::new(source)),
        }
    }

    /// Creates a CHECKPOINT_FETCH_FAILED error.
    pub fn checkpoint_fetch_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::CheckpointFetchFailed,
            format!("Failed to fetch checkpoint: {}", reason.into()),
        )
    }

    /// Creates a MODEL_LOAD_FAILED error.
    pub fn model_load_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ModelLoadFailed,
            format!("Failed to load model: {}", reason.into()),
        )
    }

    /// Creates an INVALID_PROMPT error for empty prompts.
    pub fn empty_prompt() -> Self {
        Self::new(ErrorCode::InvalidPrompt, "Prompt cannot be empty")
    }

    /// Creates an INVALID_PROMPT error for prompts that are too long.
    pub fn prompt_too_long(len: usize, max: usize) -> Self {
        Self::new(
            ErrorCode::InvalidPrompt,
            format!("Prompt too long: {} characters (maximum {})", len, max),
        )
    }

    /// Creates an INVALID_DURATION error.
    pub fn invalid_duration(duration: i64, max: u32) -> Self {
        Self::new(
            ErrorCode::InvalidDuration,
            format!(
                "Invalid duration: {} seconds (must be between 1 and {})",
                duration, max
            ),
        )
    }

    /// Creates an INVALID_DURATION error for values that are not integers.
    pub fn unparsable_duration(raw: &str) -> Self {
        Self::new(
            ErrorCode::InvalidDuration,
            format!("Invalid duration: '{}' is not a whole number of seconds", raw),
        )
    }

    /// Creates an INVALID_SEED error.
    pub fn invalid_seed(raw: &str) -> Self {
        Self::new(
            ErrorCode::InvalidSeed,
            format!("Invalid seed: '{}' is not an unsigned integer", raw),
        )
    }

    /// Creates an INVALID_AUDIO error.
    pub fn invalid_audio(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidAudio, reason)
    }

    /// Creates a GENERATION_FAILED error.
    pub fn generation_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::GenerationFailed,
            format!("Generation failed: {}", reason.into()),
        )
    }

    /// Creates a GENERATION_FAILED error that is worth one retry.
    pub fn transient_generation_failure(reason: impl Into<String>) -> Self {
        Self {
            retryable: true,
            ..Self::generation_failed(reason)
        }
    }

    /// Creates an ENCODING_FAILED error.
    pub fn encoding_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::EncodingFailed,
            format!("Encoding failed: {}", reason.into()),
        )
    }

    /// Creates a QUEUE_FULL error.
    pub fn queue_full(capacity: usize) -> Self {
        Self::new(
            ErrorCode::QueueFull,
            format!("Generation queue is full (maximum {} pending jobs)", capacity),
        )
    }

    /// Creates a TIMEOUT error.
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, reason)
    }

    /// Creates a REMOTE_REQUEST_FAILED error.
    pub fn remote_request_failed(reason: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::RemoteRequestFailed,
            format!("Remote request failed: {}", reason.into()),
        )
    }
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}. Recovery: {}",
            self.code,
            self.message,
            self.code.recovery_hint()
        )
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Result type alias using ServiceError.
pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_as_str() {
        assert_eq!(ErrorCode::CheckpointFetchFailed.as_str(), "CHECKPOINT_FETCH_FAILED");
        assert_eq!(ErrorCode::ModelLoadFailed.as_str(), "MODEL_LOAD_FAILED");
        assert_eq!(ErrorCode::InvalidPrompt.as_str(), "INVALID_PROMPT");
        assert_eq!(ErrorCode::InvalidDuration.as_str(), "INVALID_DURATION");
        assert_eq!(ErrorCode::GenerationFailed.as_str(), "GENERATION_FAILED");
        assert_eq!(ErrorCode::EncodingFailed.as_str(), "ENCODING_FAILED");
        assert_eq!(ErrorCode::Timeout.as_str(), "TIMEOUT");
    }

    #[test]
    fn validation_errors_map_to_bad_request() {
        for code in [
            ErrorCode::InvalidPrompt,
            ErrorCode::InvalidDuration,
            ErrorCode::InvalidSeed,
            ErrorCode::InvalidAudio,
        ] {
            assert!(code.is_validation());
            assert_eq!(code.http_status(), 400);
        }
        assert!(!ErrorCode::GenerationFailed.is_validation());
    }

    #[test]
    fn process_level_failures_are_unavailable() {
        assert_eq!(ErrorCode::CheckpointFetchFailed.http_status(), 503);
        assert_eq!(ErrorCode::ModelLoadFailed.http_status(), 503);
        assert_eq!(ErrorCode::GenerationFailed.http_status(), 500);
        assert_eq!(ErrorCode::Timeout.http_status(), 504);
    }

    #[test]
    fn service_error_display() {
        let err = ServiceError::invalid_duration(200, 30);
        assert!(err.to_string().contains("INVALID_DURATION"));
        assert!(err.to_string().contains("200"));
        assert!(err.to_string().contains("Recovery:"));
    }

    #[test]
    fn transient_failures_are_retryable() {
        assert!(ServiceError::transient_generation_failure("device busy").retryable);
        assert!(!ServiceError::generation_failed("bad shapes").retryable);
    }
}
