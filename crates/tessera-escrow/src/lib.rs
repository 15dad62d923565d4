//! # tessera-escrow
//!
//! Funded, time-windowed escrows with cumulative partial fills, and the
//! per-chain factory exposing the on-chain entry points.
//!
//! An escrow locks `total_amount` split into `num_parts` equal parts and
//! commits to `num_parts + 1` secrets through a Merkle root. Revealing the
//! secret at index `k` unlocks a cumulative fill of `k` parts. Withdrawals
//! additionally need a relayer-signed [`AuthorizationGrant`] for the exact
//! index range, and every consumed secret is nullified in the factory-wide
//! [`NullifierRegistry`](tessera_nullifier::NullifierRegistry).
//!
//! ## Modules
//!
//! - [`escrow`] — The escrow state machine
//! - [`factory`] — Per-chain entry points: creation, sponsored execution, withdrawals, refunds
//! - [`guards`] — Shared replay guards (nullifiers and grant nonces)
//! - [`ledger`] — Token balances held outside escrows
//! - [`request`] — Withdrawal requests and payouts
//! - [`events`] — Escrow event log
//!
//! [`AuthorizationGrant`]: tessera_auth::AuthorizationGrant

pub mod escrow;
pub mod events;
pub mod factory;
pub mod guards;
pub mod ledger;
pub mod request;

pub use escrow::Escrow;
pub use events::EscrowEvent;
pub use factory::EscrowFactory;
pub use request::{Payout, RangeWithdrawal, SecretReveal};

use tessera_auth::AuthError;
use tessera_nullifier::NullifierError;

/// Error types for escrow operations. Every error is raised before any
/// state or balance changes.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EscrowError {
    #[error("escrow already resolved")]
    AlreadyResolved,

    #[error("withdrawal window has closed")]
    WindowExpired,

    #[error("cancellation window has not started")]
    CancellationNotStarted,

    #[error("invalid merkle proof")]
    InvalidMerkleProof,

    #[error("nullifier already used")]
    NullifierAlreadyUsed,

    #[error("invalid fill amount")]
    InvalidFillAmount,

    #[error("invalid signature")]
    InvalidSignature,

    #[error("caller is not the authorized resolver")]
    UnauthorizedCaller,

    #[error("grant does not match the escrow or index range")]
    GrantMismatch,

    #[error("grant nonce already used")]
    NonceReused,

    #[error("invalid secret index {0}")]
    InvalidSecretIndex(u32),

    #[error("total amount must be non-zero and divisible by the part count")]
    InvalidAmount,

    #[error("time windows must be strictly increasing and in the future")]
    InvalidTimeWindows,

    #[error("part count {0} outside the allowed range")]
    InvalidParts(u32),

    #[error("deadline has passed")]
    DeadlineExpired,

    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u128, available: u128 },

    #[error("escrow not found")]
    EscrowNotFound,

    #[error("transaction targets chain {0}")]
    WrongChain(String),

    #[error("sponsored transaction already executed")]
    AlreadyExecuted,
}

impl EscrowError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AlreadyResolved => "ALREADY_RESOLVED",
            Self::WindowExpired => "WINDOW_EXPIRED",
            Self::CancellationNotStarted => "CANCELLATION_NOT_STARTED",
            Self::InvalidMerkleProof => "INVALID_MERKLE_PROOF",
            Self::NullifierAlreadyUsed => "NULLIFIER_ALREADY_USED",
            Self::InvalidFillAmount => "INVALID_FILL_AMOUNT",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::UnauthorizedCaller => "UNAUTHORIZED_CALLER",
            Self::GrantMismatch => "GRANT_MISMATCH",
            Self::NonceReused => "NONCE_REUSED",
            Self::InvalidSecretIndex(_) => "INVALID_SECRET_INDEX",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidTimeWindows => "INVALID_TIME_WINDOWS",
            Self::InvalidParts(_) => "INVALID_PARTS",
            Self::DeadlineExpired => "DEADLINE_EXPIRED",
            Self::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            Self::EscrowNotFound => "ESCROW_NOT_FOUND",
            Self::WrongChain(_) => "WRONG_CHAIN",
            Self::AlreadyExecuted => "ALREADY_EXECUTED",
        }
    }
}

impl From<NullifierError> for EscrowError {
    fn from(err: NullifierError) -> Self {
        match err {
            NullifierError::AlreadyUsed(_) => Self::NullifierAlreadyUsed,
        }
    }
}

impl From<AuthError> for EscrowError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::UntrustedSigner | AuthError::InvalidSignature => Self::InvalidSignature,
            AuthError::NonceExhausted => Self::NonceReused,
            AuthError::EscrowMismatch
            | AuthError::ResolverMismatch
            | AuthError::RangeMismatch { .. }
            | AuthError::InvalidRange { .. } => Self::GrantMismatch,
        }
    }
}

/// Convenience result type for escrow operations.
pub type Result<T> = std::result::Result<T, EscrowError>;
