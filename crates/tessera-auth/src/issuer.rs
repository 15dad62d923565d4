//! Serialized grant issuance.
//!
//! The relayer signing key is shared by every order. Issuing through one
//! [`GrantIssuer`] serializes signing behind a mutex so two grants never
//! carry the same nonce. The counter can be seeded from persisted state so
//! nonces keep increasing across restarts.

use std::sync::{Mutex, PoisonError};

use tessera_crypto::ed25519::{SigningKey, VerifyingKey};
use tessera_types::{Address, EscrowId};
use tracing::info;

use crate::grant::{sign_grant, AuthorizationGrant};
use crate::{AuthError, Result};

/// The relayer's grant signer.
pub struct GrantIssuer {
    signing_key: SigningKey,
    public_key: VerifyingKey,
    last_nonce: Mutex<u64>,
}

impl GrantIssuer {
    /// An issuer whose first grant uses nonce 1.
    pub fn new(signing_key: SigningKey) -> Self {
        Self::with_last_nonce(signing_key, 0)
    }

    /// An issuer resuming after `last_nonce`.
    pub fn with_last_nonce(signing_key: SigningKey, last_nonce: u64) -> Self {
        let public_key = signing_key.verifying_key();
        Self {
            signing_key,
            public_key,
            last_nonce: Mutex::new(last_nonce),
        }
    }

    /// The key escrows must trust.
    pub fn public_key(&self) -> VerifyingKey {
        self.public_key
    }

    /// The most recently issued nonce (0 if none).
    pub fn last_nonce(&self) -> u64 {
        *self.last_nonce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sign a grant for `resolver` over `[start, end]` of `escrow_id` with the
    /// next nonce.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidRange`] unless `1 <= start <= end`
    /// - [`AuthError::NonceExhausted`] if the counter would overflow
    pub fn issue(
        &self,
        escrow_id: EscrowId,
        resolver: Address,
        start: u32,
        end: u32,
    ) -> Result<AuthorizationGrant> {
        if start == 0 || start > end {
            return Err(AuthError::InvalidRange { start, end });
        }

        let mut last = self
            .last_nonce
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let nonce = last.checked_add(1).ok_or(AuthError::NonceExhausted)?;
        let grant = sign_grant(escrow_id, resolver, start, end, nonce, &self.signing_key);
        *last = nonce;

        info!(
            escrow_id = %escrow_id,
            resolver = %resolver,
            start,
            end,
            nonce,
            "grant issued"
        );
        Ok(grant)
    }
}

impl std::fmt::Debug for GrantIssuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantIssuer")
            .field("public_key", &self.public_key)
            .field("last_nonce", &self.last_nonce())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grant::verify_grant;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn issuer(last: u64) -> GrantIssuer {
        GrantIssuer::with_last_nonce(SigningKey::from_bytes(&[5; 32]), last)
    }

    #[test]
    fn test_nonces_increase() {
        let issuer = issuer(0);
        let a = issuer
            .issue(EscrowId::new([1; 32]), Address::new([2; 32]), 1, 3)
            .expect("issue");
        let b = issuer
            .issue(EscrowId::new([1; 32]), Address::new([2; 32]), 4, 4)
            .expect("issue");
        assert_eq!((a.nonce, b.nonce), (1, 2));
        assert_eq!(issuer.last_nonce(), 2);
        assert_eq!(verify_grant(&b, &issuer.public_key()), Ok(()));
    }

    #[test]
    fn test_seeded_counter_resumes() {
        let issuer = issuer(41);
        let grant = issuer
            .issue(EscrowId::new([1; 32]), Address::new([2; 32]), 1, 1)
            .expect("issue");
        assert_eq!(grant.nonce, 42);
    }

    #[test]
    fn test_invalid_range_consumes_no_nonce() {
        let issuer = issuer(0);
        assert_eq!(
            issuer.issue(EscrowId::default(), Address::default(), 0, 1),
            Err(AuthError::InvalidRange { start: 0, end: 1 })
        );
        assert_eq!(
            issuer.issue(EscrowId::default(), Address::default(), 3, 2),
            Err(AuthError::InvalidRange { start: 3, end: 2 })
        );
        assert_eq!(issuer.last_nonce(), 0);
    }

    #[test]
    fn test_exhausted_counter() {
        let issuer = issuer(u64::MAX);
        assert_eq!(
            issuer.issue(EscrowId::default(), Address::default(), 1, 1),
            Err(AuthError::NonceExhausted)
        );
    }

    #[test]
    fn test_concurrent_issuance_never_repeats() {
        let issuer = Arc::new(issuer(0));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let issuer = Arc::clone(&issuer);
                std::thread::spawn(move || {
                    (0..25)
                        .map(|_| {
                            issuer
                                .issue(EscrowId::new([i; 32]), Address::default(), 1, 1)
                                .expect("issue")
                                .nonce
                        })
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut nonces = HashSet::new();
        for handle in handles {
            for nonce in handle.join().expect("thread") {
                assert!(nonces.insert(nonce), "nonce {nonce} repeated");
            }
        }
        assert_eq!(nonces.len(), 200);
        assert_eq!(issuer.last_nonce(), 200);
    }
}
