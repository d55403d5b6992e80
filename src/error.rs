use std::fmt;

use thiserror::Error;

/// Errors raised by the workflow core.
///
/// Only [`Automaton`](crate::workflow::Automaton) interprets these into its
/// retry/terminate logic; every other component simply propagates them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AutomatonError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("Plugin error: {0}")]
    Plugin(String),

    #[error("Data processing error: {0}")]
    DataProcessing(String),

    #[error("Notification error: {0}")]
    Notification(String),

    #[error("Gave up after {attempts} attempts: {}", .failures.last().map(String::as_str).unwrap_or("no failure recorded"))]
    RetryExhausted { attempts: u32, failures: Vec<String> },
}

impl AutomatonError {
    /// Fatal errors end the run immediately instead of consuming the retry budget.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Plugin(_))
    }
}

/// Raised by [`RetryExecutor`](crate::retry::RetryExecutor) once every attempt failed.
///
/// `failures` holds one entry per attempt, oldest first.
#[derive(Debug, Error)]
#[error("retry exhausted after {attempts} attempts")]
pub struct RetryExhaustedError<E> {
    pub attempts: u32,
    pub failures: Vec<E>,
}

impl<E: fmt::Display> From<RetryExhaustedError<E>> for AutomatonError {
    fn from(err: RetryExhaustedError<E>) -> Self {
        AutomatonError::RetryExhausted {
            attempts: err.attempts,
            failures: err.failures.iter().map(ToString::to_string).collect(),
        }
    }
}

pub type Result<T, E = AutomatonError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_configuration_and_plugin_errors_are_fatal() {
        assert!(AutomatonError::Configuration("missing".into()).is_fatal());
        assert!(AutomatonError::Plugin("bad section".into()).is_fatal());
        assert!(!AutomatonError::Checkpoint("disk full".into()).is_fatal());
        assert!(!AutomatonError::DataProcessing("bad post".into()).is_fatal());
        assert!(!AutomatonError::Notification("smtp down".into()).is_fatal());
    }

    #[test]
    fn retry_exhausted_keeps_failures_in_order() {
        let err = RetryExhaustedError {
            attempts: 3,
            failures: vec!["first", "second", "third"],
        };
        assert_eq!(err.to_string(), "retry exhausted after 3 attempts");

        let converted: AutomatonError = err.into();
        assert_eq!(
            converted,
            AutomatonError::RetryExhausted {
                attempts: 3,
                failures: vec!["first".into(), "second".into(), "third".into()],
            }
        );
        assert_eq!(converted.to_string(), "Gave up after 3 attempts: third");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AutomatonError>();
    }
}
