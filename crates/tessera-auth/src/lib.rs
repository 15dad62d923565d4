//! # tessera-auth
//!
//! Relayer-signed authorization grants: the frontrunning guard.
//!
//! In the `Withdrawal` phase only the auction winner may withdraw, but a
//! pending withdrawal is public and anyone could copy its secrets and proofs.
//! The relayer therefore signs a grant binding
//! `(escrow, resolver, index range, nonce)`. An escrow checks the signature
//! against its trusted relayer key, requires the exact index range being
//! withdrawn, rejects reused nonces, and pays the grant's resolver rather
//! than whoever submitted the call.
//!
//! ## Modules
//!
//! - [`grant`] — Grant type, canonical message bytes, signing and verification
//! - [`issuer`] — Serialized grant issuance with a monotonic nonce

pub mod grant;
pub mod issuer;

pub use grant::{grant_message, sign_grant, verify_grant, verify_grant_scope, AuthorizationGrant};
pub use issuer::GrantIssuer;

/// Error types for authorization.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    /// The grant declares a key other than the trusted relayer key.
    #[error("grant signed by untrusted key")]
    UntrustedSigner,

    /// The signature does not verify over the grant message.
    #[error("invalid grant signature")]
    InvalidSignature,

    /// The grant is for a different escrow.
    #[error("grant is for a different escrow")]
    EscrowMismatch,

    /// The grant names a different resolver.
    #[error("grant names a different resolver")]
    ResolverMismatch,

    /// The grant covers a different index range.
    #[error("grant covers [{granted_start}, {granted_end}], requested [{start}, {end}]")]
    RangeMismatch {
        granted_start: u32,
        granted_end: u32,
        start: u32,
        end: u32,
    },

    /// Indices are 1-based and `start <= end`.
    #[error("invalid index range [{start}, {end}]")]
    InvalidRange { start: u32, end: u32 },

    /// The nonce counter cannot advance further.
    #[error("grant nonce space exhausted")]
    NonceExhausted,
}

/// Convenience result type for authorization.
pub type Result<T> = std::result::Result<T, AuthError>;
