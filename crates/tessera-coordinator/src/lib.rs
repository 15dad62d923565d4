//! # tessera-coordinator
//!
//! Off-chain coordination of partial-fill atomic swaps between a maker, any
//! number of resolvers and the relayer.
//!
//! The relayer never holds funds. It validates each stage of a fill against
//! the maker's committed intent, cross-checks both escrows on chain, checks
//! the maker's staged secret disclosure and finally signs the authorization
//! grants that let exactly one resolver withdraw exactly one index range.
//!
//! ## Modules
//!
//! - [`order`] — Pure order state machine: `apply(order, event, now)`
//! - [`relayer`] — [`SwapCoordinator`]: keyed order repository, validation, grant issuance, persistence, sweeper
//! - [`maker`] — Maker role: secret generation, co-signing, staged disclosure
//! - [`resolver`] — Resolver role: claims, sponsored transactions, deployments, withdrawals
//! - [`chain`] — [`ChainAdapter`] trait and the in-process [`LocalChain`]
//! - [`clock`] — Injected time source
//! - [`events`] — Sequenced event bus
//! - [`outbox`] — Per-party push delivery

pub mod chain;
pub mod clock;
pub mod events;
pub mod maker;
pub mod order;
pub mod outbox;
pub mod relayer;
pub mod resolver;

pub use chain::{ChainAdapter, LocalChain};
pub use clock::{Clock, ManualClock, SystemClock};
pub use events::EventBus;
pub use maker::{Maker, MakerOrder, OrderParams};
pub use order::{OrderEvent, OrderMachine, StageTimeouts, Transition};
pub use outbox::Outbox;
pub use relayer::SwapCoordinator;
pub use resolver::Resolver;

use tessera_auth::AuthError;
use tessera_crypto::CryptoError;
use tessera_db::DbError;
use tessera_escrow::EscrowError;
use tessera_transport::Rejection;
use tessera_types::order::{FillStage, OrderStatus};
use tessera_types::ChainId;

/// Error types for swap coordination. Every variant leaves the order as it
/// was; the sender may retry the stage with corrected data.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("order not found")]
    OrderNotFound,

    #[error("order already exists")]
    DuplicateOrder,

    #[error("fill not found")]
    FillNotFound,

    #[error("merkle root does not match the leaf hashes")]
    InvalidMerkleRoot,

    #[error("expected {expected} leaf hashes, got {actual}")]
    InvalidLeafCount { expected: usize, actual: usize },

    #[error("leaf hash at index {0} repeats an earlier leaf")]
    DuplicateLeaf(u32),

    #[error("part count {0} outside the allowed range")]
    InvalidParts(u32),

    #[error("amounts must be non-zero and the source amount divisible by the part count")]
    InvalidAmount,

    #[error("invalid time windows: {0}")]
    InvalidTimeWindows(&'static str),

    #[error("deadline has passed")]
    DeadlineExpired,

    #[error("maker address does not derive from the maker key")]
    MakerMismatch,

    #[error("source and destination are both on chain {0}")]
    SameChain(ChainId),

    #[error("order is {}", .0.as_str())]
    OrderNotOpen(OrderStatus),

    #[error("source escrow creation is still pending")]
    SourceEscrowPending,

    #[error("an earlier fill has not settled")]
    FillInProgress,

    #[error("range must start at {expected}, got {start}")]
    RangeNotAvailable { expected: u32, start: u32 },

    #[error("invalid index range [{start}, {end}]")]
    InvalidRange { start: u32, end: u32 },

    #[error("invalid signature")]
    InvalidSignature,

    #[error("first fill must carry a sponsored transaction")]
    MissingSponsoredTransaction,

    #[error("source escrow already exists; no sponsored transaction expected")]
    UnexpectedSponsoredTransaction,

    #[error("sponsored transaction does not match the order: {0}")]
    SponsoredMismatch(&'static str),

    #[error("fill is {actual:?}, expected {expected:?}")]
    WrongStage { expected: FillStage, actual: FillStage },

    #[error("deployment does not match the order: {0}")]
    DeploymentMismatch(String),

    #[error("source escrow differs from the one recorded for this order")]
    SourceEscrowMismatch,

    #[error("invalid disclosure: {0}")]
    InvalidDisclosure(String),

    #[error("no adapter for chain {0}")]
    UnknownChain(ChainId),

    #[error("signature timestamp outside the accepted skew")]
    StaleSignature,

    #[error("escrow error: {0}")]
    Escrow(#[from] EscrowError),

    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("database error: {0}")]
    Db(#[from] DbError),
}

impl CoordinatorError {
    /// Stable SCREAMING_SNAKE_CASE code for the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderNotFound => "ORDER_NOT_FOUND",
            Self::DuplicateOrder => "DUPLICATE_ORDER",
            Self::FillNotFound => "FILL_NOT_FOUND",
            Self::InvalidMerkleRoot => "INVALID_MERKLE_ROOT",
            Self::InvalidLeafCount { .. } => "INVALID_LEAF_COUNT",
            Self::DuplicateLeaf(_) => "DUPLICATE_LEAF",
            Self::InvalidParts(_) => "INVALID_PARTS",
            Self::InvalidAmount => "INVALID_AMOUNT",
            Self::InvalidTimeWindows(_) => "INVALID_TIME_WINDOWS",
            Self::DeadlineExpired => "DEADLINE_EXPIRED",
            Self::MakerMismatch => "MAKER_MISMATCH",
            Self::SameChain(_) => "SAME_CHAIN",
            Self::OrderNotOpen(_) => "ORDER_NOT_OPEN",
            Self::SourceEscrowPending => "SOURCE_ESCROW_PENDING",
            Self::FillInProgress => "FILL_IN_PROGRESS",
            Self::RangeNotAvailable { .. } => "RANGE_NOT_AVAILABLE",
            Self::InvalidRange { .. } => "INVALID_RANGE",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::MissingSponsoredTransaction => "MISSING_SPONSORED_TRANSACTION",
            Self::UnexpectedSponsoredTransaction => "UNEXPECTED_SPONSORED_TRANSACTION",
            Self::SponsoredMismatch(_) => "SPONSORED_MISMATCH",
            Self::WrongStage { .. } => "WRONG_STAGE",
            Self::DeploymentMismatch(_) => "DEPLOYMENT_MISMATCH",
            Self::SourceEscrowMismatch => "SOURCE_ESCROW_MISMATCH",
            Self::InvalidDisclosure(_) => "INVALID_DISCLOSURE",
            Self::UnknownChain(_) => "UNKNOWN_CHAIN",
            Self::StaleSignature => "STALE_SIGNATURE",
            Self::Escrow(err) => err.code(),
            Self::Auth(_) => "AUTHORIZATION_FAILED",
            Self::Crypto(_) => "CRYPTO_ERROR",
            Self::Db(_) => "INTERNAL_ERROR",
        }
    }

    /// The structured wire rejection for this error.
    pub fn rejection(&self) -> Rejection {
        Rejection::new(self.kind(), self.to_string())
    }
}

/// Convenience result type for coordination.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_carries_code_and_reason() {
        let rejection = CoordinatorError::RangeNotAvailable {
            expected: 4,
            start: 2,
        }
        .rejection();
        assert_eq!(rejection.kind, "RANGE_NOT_AVAILABLE");
        assert_eq!(rejection.reason, "range must start at 4, got 2");

        let escrow = CoordinatorError::from(EscrowError::NullifierAlreadyUsed);
        assert_eq!(escrow.kind(), "NULLIFIER_ALREADY_USED");
    }

    #[test]
    fn test_stage_error_names_both_stages() {
        let err = CoordinatorError::WrongStage {
            expected: FillStage::AwaitingSecrets,
            actual: FillStage::AwaitingDeployment,
        };
        assert_eq!(
            err.to_string(),
            "fill is AwaitingDeployment, expected AwaitingSecrets"
        );
        assert_eq!(
            CoordinatorError::OrderNotOpen(OrderStatus::Expired).to_string(),
            "order is expired"
        );
    }
}
