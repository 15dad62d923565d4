//! # tessera-crypto
//!
//! Cryptographic primitives for the Tessera swap protocol.
//!
//! Every party (maker tooling, resolvers, the relayer and every escrow
//! deployment) hashes with the functions in this crate. A root computed
//! off-chain must verify byte-for-byte on every chain, so there is exactly one
//! implementation of each primitive and no algorithm negotiation.
//!
//! ## Modules
//!
//! - [`keccak`] — keccak-256, the commitment hash (leaves, inner nodes, nullifiers)
//! - [`merkle`] — Commutative-pair Merkle commitment over secret-derived leaves
//! - [`secret`] — 32-byte swap secrets, zeroized on drop
//! - [`blake3`] — Domain-separated BLAKE3 for off-chain identifiers
//! - [`ed25519`] — Ed25519 signing and verification (relayer, makers, sponsors)

pub mod blake3;
pub mod ed25519;
pub mod keccak;
pub mod merkle;
pub mod secret;

/// A 32-byte hash value.
pub type Hash = [u8; 32];

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CryptoError {
    /// Ed25519 signature verification failed.
    #[error("signature verification failed")]
    SignatureVerification,

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A Merkle tree cannot be built over zero leaves.
    #[error("merkle tree requires at least one leaf")]
    EmptyTree,

    /// Leaf position outside the tree.
    #[error("leaf position {position} out of range for {leaf_count} leaves")]
    LeafOutOfRange { position: usize, leaf_count: usize },

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
