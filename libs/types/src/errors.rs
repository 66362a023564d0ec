//! Error types for the vote pipeline
//!
//! Error taxonomy using thiserror. Each failure class maps to
//! one stage of the pipeline and carries its own recovery rule:
//!
//! | Failure | Stage | Effect |
//! |---|---|---|
//! | `ValidationFailure` | request layer | rejected before the pipeline |
//! | `AppendFailure` | publish | surfaced to the caller, no counter change |
//! | `ParseFailure` | reconciliation | entry stays pending, retried by reclaim |
//! | `PersistFailure` | reconciliation | entry stays pending, never acked |
//! | `TransportFailure` | broadcast relay | ends that one relay |

use thiserror::Error;

/// Malformed client input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("Candidate name must not be empty")]
    EmptyName,

    #[error("Invalid candidate id: {value}")]
    InvalidCandidateId { value: String },

    #[error("Malformed request body: {reason}")]
    MalformedBody { reason: String },
}

/// The durable event log rejected or could not receive an append
#[derive(Error, Debug, Clone, PartialEq)]
#[error("append to stream {stream} failed: {reason}")]
pub struct AppendFailure {
    pub stream: String,
    pub reason: String,
}

/// A log entry's fields could not be turned into a vote
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseFailure {
    #[error("Missing field: {field}")]
    MissingField { field: &'static str },

    #[error("Malformed field {field}={value:?}: {reason}")]
    MalformedField {
        field: &'static str,
        value: String,
        reason: String,
    },
}

/// The system-of-record store could not persist a vote
#[derive(Error, Debug, Clone, PartialEq)]
#[error("persisting vote {vote_id} failed: {reason}")]
pub struct PersistFailure {
    pub vote_id: String,
    pub reason: String,
}

/// A live relay connection was lost
#[derive(Error, Debug, Clone, PartialEq)]
#[error("relay transport lost: {reason}")]
pub struct TransportFailure {
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppendFailure {
            stream: "voto_stream".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "append to stream voto_stream failed: connection refused"
        );

        let err = ParseFailure::MalformedField {
            field: "voteID",
            value: "xyz".into(),
            reason: "invalid length".into(),
        };
        assert!(err.to_string().contains("voteID"));
        assert!(err.to_string().contains("\"xyz\""));
    }
}
