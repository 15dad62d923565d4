//! Authorization grants.
//!
//! ## Message layout (88 bytes)
//!
//! ```text
//! escrow_id (32) || resolver (32) || start_index (u64 BE) || end_index (u64 BE) || nonce (u64 BE)
//! ```
//!
//! Indices are widened to `u64` so every chain decodes the same fixed-width
//! layout.

use serde::{Deserialize, Serialize};
use tessera_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use tessera_types::{Address, EscrowId};

use crate::{AuthError, Result};

/// Length of the signed grant message.
pub const GRANT_MESSAGE_LEN: usize = 88;

/// A relayer-signed permission for one resolver to withdraw one index range
/// from one escrow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    pub escrow_id: EscrowId,
    pub authorized_resolver: Address,
    pub start_index: u32,
    pub end_index: u32,
    pub nonce: u64,
    pub signature: Signature,
    pub signer_public_key: VerifyingKey,
}

impl AuthorizationGrant {
    /// The message bytes this grant's signature covers.
    pub fn message(&self) -> [u8; GRANT_MESSAGE_LEN] {
        grant_message(
            &self.escrow_id,
            &self.authorized_resolver,
            self.start_index,
            self.end_index,
            self.nonce,
        )
    }

    /// Whether the grant covers exactly `[start, end]`.
    pub fn covers(&self, start: u32, end: u32) -> bool {
        self.start_index == start && self.end_index == end
    }
}

/// Build the canonical grant message.
pub fn grant_message(
    escrow_id: &EscrowId,
    resolver: &Address,
    start_index: u32,
    end_index: u32,
    nonce: u64,
) -> [u8; GRANT_MESSAGE_LEN] {
    let mut msg = [0u8; GRANT_MESSAGE_LEN];
    msg[..32].copy_from_slice(escrow_id.as_bytes());
    msg[32..64].copy_from_slice(resolver.as_bytes());
    msg[64..72].copy_from_slice(&u64::from(start_index).to_be_bytes());
    msg[72..80].copy_from_slice(&u64::from(end_index).to_be_bytes());
    msg[80..].copy_from_slice(&nonce.to_be_bytes());
    msg
}

/// Sign a grant with the relayer key.
pub fn sign_grant(
    escrow_id: EscrowId,
    resolver: Address,
    start_index: u32,
    end_index: u32,
    nonce: u64,
    relayer_key: &SigningKey,
) -> AuthorizationGrant {
    let message = grant_message(&escrow_id, &resolver, start_index, end_index, nonce);
    AuthorizationGrant {
        escrow_id,
        authorized_resolver: resolver,
        start_index,
        end_index,
        nonce,
        signature: relayer_key.sign(&message),
        signer_public_key: relayer_key.verifying_key(),
    }
}

/// Check that `grant` was signed by `trusted_key`.
///
/// # Errors
///
/// - [`AuthError::UntrustedSigner`] if the declared key is not the trusted key
/// - [`AuthError::InvalidSignature`] if the signature does not verify
pub fn verify_grant(grant: &AuthorizationGrant, trusted_key: &VerifyingKey) -> Result<()> {
    if grant.signer_public_key != *trusted_key {
        return Err(AuthError::UntrustedSigner);
    }
    trusted_key
        .verify(&grant.message(), &grant.signature)
        .map_err(|_| AuthError::InvalidSignature)
}

/// Check the signature and that the grant is for `escrow_id`, names
/// `resolver` (when given) and covers exactly `[start, end]`.
pub fn verify_grant_scope(
    grant: &AuthorizationGrant,
    escrow_id: &EscrowId,
    resolver: Option<&Address>,
    start: u32,
    end: u32,
    trusted_key: &VerifyingKey,
) -> Result<()> {
    verify_grant(grant, trusted_key)?;

    if grant.escrow_id != *escrow_id {
        return Err(AuthError::EscrowMismatch);
    }
    if let Some(resolver) = resolver {
        if grant.authorized_resolver != *resolver {
            return Err(AuthError::ResolverMismatch);
        }
    }
    if !grant.covers(start, end) {
        return Err(AuthError::RangeMismatch {
            granted_start: grant.start_index,
            granted_end: grant.end_index,
            start,
            end,
        });
    }
    Ok(())
}
