//! Error types for the correlation engine
//!
//! Every failure the engine can report is a variant of [`ProfilerError`].
//! [`ProfilerError::class`] groups them into the categories that decide how
//! they are surfaced: initialization failures abort startup, registry and
//! lifecycle failures fail the call that caused them, and correlation
//! failures are only counted (callbacks never return them to the host).

use crate::types::{CommHandle, RequestKey};
use thiserror::Error;

/// Errors that can occur while profiling
#[derive(Error, Debug)]
pub enum ProfilerError {
    #[error("Event {0} not supported by the instrumentation layer")]
    UnsupportedEvent(String),

    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("Communicator {0} is already registered")]
    DuplicateRegistration(CommHandle),

    #[error("Communicator {0} is not registered")]
    NotRegistered(CommHandle),

    #[error("Unknown communicator {0}")]
    UnknownCommunicator(CommHandle),

    #[error("Cannot translate local rank {local} of {comm} to a world rank")]
    TranslationError { comm: CommHandle, local: i32 },

    #[error("Request {0} is already in flight")]
    CorrelationConflict(RequestKey),

    #[error("Completion for request {0} has no matching begin")]
    UnmatchedCompletion(RequestKey),

    #[error("Engine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Instrumentation error: {0}")]
    Instrumentation(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for profiler operations
pub type Result<T> = std::result::Result<T, ProfilerError>;

/// How an error is surfaced to the surrounding program
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Fails `initialize()`; the program must not run uninstrumented
    Initialization,
    /// Fails the registry call; other communicators are unaffected
    Registry,
    /// Counted and reported at shutdown
    Correlation,
    /// A lifecycle call made in the wrong engine state
    Lifecycle,
    /// File or serialization failure outside the callback path
    Io,
}

impl ProfilerError {
    /// Category of this error
    pub fn class(&self) -> ErrorClass {
        match self {
            ProfilerError::UnsupportedEvent(_) | ProfilerError::InitializationFailure(_) => {
                ErrorClass::Initialization
            }
            ProfilerError::DuplicateRegistration(_)
            | ProfilerError::NotRegistered(_)
            | ProfilerError::UnknownCommunicator(_)
            | ProfilerError::TranslationError { .. }
            | ProfilerError::Instrumentation(_)
            | ProfilerError::Runtime(_) => ErrorClass::Registry,
            ProfilerError::CorrelationConflict(_) | ProfilerError::UnmatchedCompletion(_) => {
                ErrorClass::Correlation
            }
            ProfilerError::InvalidState { .. } => ErrorClass::Lifecycle,
            ProfilerError::Io(_) | ProfilerError::Json(_) | ProfilerError::Config(_) => {
                ErrorClass::Io
            }
        }
    }
}

impl From<toml::de::Error> for ProfilerError {
    fn from(err: toml::de::Error) -> Self {
        ProfilerError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, RequestId};

    #[test]
    fn test_unsupported_event_names_the_event() {
        let err = ProfilerError::UnsupportedEvent("PERUSE_COMM_REQ_COMPLETE".to_string());
        assert!(err.to_string().contains("PERUSE_COMM_REQ_COMPLETE"));
        assert_eq!(err.class(), ErrorClass::Initialization);
    }

    #[test]
    fn test_correlation_errors_are_classified() {
        let key = RequestKey::new(Direction::Send, RequestId(5));
        assert_eq!(
            ProfilerError::CorrelationConflict(key).class(),
            ErrorClass::Correlation
        );
        let err = ProfilerError::UnmatchedCompletion(key);
        assert_eq!(err.class(), ErrorClass::Correlation);
        assert!(err.to_string().contains("send:5"));
    }

    #[test]
    fn test_registry_errors_are_classified() {
        assert_eq!(
            ProfilerError::DuplicateRegistration(CommHandle(1)).class(),
            ErrorClass::Registry
        );
        assert_eq!(
            ProfilerError::TranslationError {
                comm: CommHandle(1),
                local: -1
            }
            .class(),
            ErrorClass::Registry
        );
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ProfilerError = io.into();
        assert_eq!(err.class(), ErrorClass::Io);
    }
}
