//! Error taxonomy for the aggregation core.
//!
//! Fatal kinds abort a run before any source is queried (gate failures) or
//! abort result construction (mismatch, cancellation). Non-fatal kinds are
//! captured per source or per record and never cross the aggregator boundary
//! as errors.

use serde::Serialize;
use thiserror::Error;

/// Fatal failures raised by the authorization gate.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthorizationError {
    /// The gate is not configured as running in the declared safe environment.
    #[error("operation '{0}' requires a lab environment")]
    Environment(String),
    /// The operation is not on the gate's allow-list.
    #[error("operation '{0}' is not authorized")]
    UnauthorizedOperation(String),
}

/// Fatal failures of an aggregation run as a whole.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),
    /// The authorization record was issued for a different operation.
    #[error("authorization issued for '{issued}' but run declares '{declared}'")]
    AuthorizationMismatch { issued: String, declared: String },
    #[error("no source adapters configured")]
    NoAdapters,
    #[error("aggregation run cancelled")]
    Cancelled,
    #[error("field encryption failed: {0}")]
    Codec(#[from] CodecError),
}

/// Per-adapter fetch failure. Non-fatal: recorded in the run result and the
/// run continues with the remaining sources.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SourceError {
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("fetch timed out after {0} ms")]
    Timeout(u64),
    #[error("parse failure: {0}")]
    Parse(String),
}

/// Failures of the session field codec.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    /// Ciphertext was not produced under this session's key.
    #[error("ciphertext does not match this session key")]
    Decryption,
    /// Field is not a well-formed ciphertext envelope.
    #[error("malformed ciphertext field: {0}")]
    Malformed(String),
    /// Descriptor is already in the requested state.
    #[error("descriptor already {0}")]
    AlreadyInState(&'static str),
}

/// Violations of the per-target research lifecycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResearchError {
    #[error("target '{target}' cannot move from {from} to {to}")]
    InvalidTransition {
        target: String,
        from: &'static str,
        to: &'static str,
    },
    #[error("target '{0}' has no recorded findings")]
    NoFindings(String),
}
