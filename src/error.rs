//! Error types for the RLN core.

use thiserror::Error;

/// Opaque error produced by a proving or verification backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Errors returned by registry, cache, recovery, codec and backend operations.
///
/// A detected breach is not an error; it is reported through
/// [`crate::cache::ProofStatus::Breach`].
#[derive(Error, Debug)]
pub enum RlnError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Member not found: {0}")]
    MemberNotFound(String),

    #[error("Commitment is slashed: {0}")]
    AlreadySlashed(String),

    #[error("Commitment is already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Commitment is not an active member: {0}")]
    NotAMember(String),

    #[error("Malformed cache document: {0}")]
    MalformedCache(String),

    #[error("Malformed registry document: {0}")]
    MalformedRegistry(String),

    #[error("Degenerate recovery: both shares use x = {0}")]
    DegenerateRecovery(String),

    #[error("Nullifier mismatch: {0}")]
    NullifierMismatch(String),

    #[error("Invalid compression: {0}")]
    InvalidCompression(String),

    #[error("Backend failure: {0}")]
    BackendFailure(#[source] BackendError),
}

pub type Result<T> = std::result::Result<T, RlnError>;
