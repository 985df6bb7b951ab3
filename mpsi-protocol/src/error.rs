//! Error types for the multiparty PSI protocol.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during protocol execution.
///
/// A failed AEAD open on a decoy slot is *not* represented here: inside the
/// unblinding workers it is an ordinary `None`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PsiError {
    /// Input data was empty.
    #[error("Input data cannot be empty")]
    EmptyInput,

    /// Bytes did not decode to a point on the curve.
    #[error("Invalid point encoding: {0}")]
    InvalidPoint(String),

    /// A serialized ciphertext had the wrong number of bytes.
    #[error("Invalid ciphertext length: expected {expected} bytes, got {actual}")]
    InvalidCiphertextLength { expected: usize, actual: usize },

    /// Baby-step giant-step search exhausted the table without a hit.
    #[error("Discrete logarithm not found in lookup table")]
    DiscreteLogNotFound,

    /// The CRT moduli were unusable.
    #[error("Invalid CRT moduli: {0}")]
    InvalidModuli(String),

    /// A cryptographic operation failed.
    #[error("Cryptographic error: {0}")]
    CryptoError(String),

    /// AEAD tag verification failed.
    #[error("Authentication failed")]
    AuthenticationFailed,

    /// A sum variant was run before the aggregate public key was set.
    #[error("Aggregate public key has not been set")]
    MissingAggregateKey,

    /// Only the last party may blind-encrypt the running map.
    #[error("Party {id} cannot finalize the round, only party {last} can")]
    NotLastParty { id: usize, last: usize },

    /// The run configuration was rejected.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An input set file could not be read or written.
    #[error("Failed to access input set {}: {reason}", path.display())]
    InputFile { path: PathBuf, reason: String },

    /// A record in an input set file could not be parsed.
    #[error("Malformed record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// Try-and-increment hashing ran out of counters.
    #[error("Hash-to-curve exhausted its retry budget")]
    HashToCurveExhausted,

    /// A worker pool returned outputs of the wrong kind or did not cover
    /// every slot.
    #[error("Unexpected worker output: {0}")]
    UnexpectedOutput(String),
}

/// Result type for PSI operations.
pub type Result<T> = std::result::Result<T, PsiError>;
