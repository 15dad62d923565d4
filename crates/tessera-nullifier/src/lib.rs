//! # tessera-nullifier
//!
//! Double-spend prevention via nullifier tracking.
//!
//! A nullifier is `keccak256(secret)`, identical to the secret's Merkle leaf.
//! One registry exists per escrow factory (one deploying authority per
//! chain) and is shared by every escrow that factory creates, so a secret is
//! single-use across all of them, not just within one escrow.
//!
//! ## Modules
//!
//! - [`registry`] — Insert-once nullifier set, linearizable across threads

pub mod registry;

pub use registry::NullifierRegistry;

use tessera_crypto::secret::Secret;

/// A nullifier value (32-byte hash).
pub type Nullifier = [u8; 32];

/// Error types for nullifier operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NullifierError {
    /// The nullifier has already been recorded (double-spend).
    #[error("nullifier already used: {}", hex::encode(.0))]
    AlreadyUsed(Nullifier),
}

/// Convenience result type for nullifier operations.
pub type Result<T> = std::result::Result<T, NullifierError>;

/// Derive the nullifier recorded when `secret` is consumed.
///
/// `nullifier = keccak256(secret)`
pub fn derive_nullifier(secret: &Secret) -> Nullifier {
    tessera_crypto::keccak::keccak256(secret.as_bytes())
}
