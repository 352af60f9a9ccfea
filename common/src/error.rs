use std::fmt;

use alloy_primitives::Address;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure modes of the attestation pipeline, from config parsing through
/// custody signing to on-chain verification.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Configuration could not be read, parsed, or validated.
    #[error("config error: {0}")]
    Config(String),

    /// Typed-data construction or hashing failed (unknown type name,
    /// malformed domain, uncoercible message field).
    #[error("typed data schema error: {0}")]
    Schema(String),

    /// The custody public key is not a DER-encoded secp256k1 SPKI.
    #[error("malformed public key: {0}")]
    KeyFormat(String),

    /// The custody signature is not a DER-encoded ECDSA signature.
    #[error("malformed signature: {0}")]
    SignatureFormat(String),

    /// A single custody signing or key-fetch call failed.
    #[error("custody signing failed: {0}")]
    Signing(String),

    /// Custody signing kept failing after the retry budget was spent.
    #[error("custody signing unavailable after {attempts} attempts: {last}")]
    SigningUnavailable { attempts: u32, last: String },

    /// Neither recovery id recovers the expected signer from the digest.
    #[error("no recovery id recovers signer {expected}; key or config mismatch")]
    NoValidRecoveryId { expected: Address },

    /// The custody key does not derive the configured signer address.
    #[error("custody key derives {derived}, configured signer is {configured}")]
    SignerMismatch { derived: Address, configured: Address },

    /// A verification call failed at the transport or node layer.
    #[error("verification rpc error: {0}")]
    Rpc(String),

    /// The verifying contract kept rejecting the signature within the
    /// retry budget.
    #[error("on-chain verification failed after {attempts} attempts: {reason}")]
    VerificationFailed { attempts: u32, reason: VerifyRejection },

    /// The whole bundle did not finish inside the wall-clock budget.
    #[error("bundle assembly timed out after {0} seconds")]
    AssemblyTimeout(u64),

    /// A chain/contract pair failed and the abort policy stopped the run.
    #[error("chain {chain_id} contract {contract}: {source}")]
    Pair {
        chain_id: u64,
        contract: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Annotate an error with the chain/contract pair it belongs to.
    pub fn for_pair(chain_id: u64, contract: impl Into<String>, source: Error) -> Self {
        Self::Pair { chain_id, contract: contract.into(), source: Box::new(source) }
    }
}

/// Why an on-chain verification attempt did not accept a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyRejection {
    /// The contract returned false while the deadline was still live.
    Rejected,
    /// The contract returned false and the shared deadline had passed, so
    /// re-signing the same bundle cannot help.
    StaleDeadline,
}

impl fmt::Display for VerifyRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rejected => write!(f, "signature rejected by contract"),
            Self::StaleDeadline => write!(f, "deadline expired before verification"),
        }
    }
}
