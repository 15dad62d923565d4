//! Replay guards shared by every escrow of one factory.
//!
//! Two sets are checked before any withdrawal commits: the nullifier
//! registry (each secret is consumed once) and the grant nonces (each grant
//! is used once). Lock order is always nonces, then nullifiers.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_crypto::ed25519::VerifyingKey;
use tessera_nullifier::{Nullifier, NullifierRegistry};

use crate::{EscrowError, Result};

/// Grant nonces already consumed.
#[derive(Debug, Default)]
pub struct UsedNonces {
    used: Mutex<HashSet<u64>>,
}

impl UsedNonces {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u64>> {
        self.used.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn contains(&self, nonce: u64) -> bool {
        self.lock().contains(&nonce)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Everything an escrow consults besides its own state.
#[derive(Clone, Copy, Debug)]
pub struct WithdrawGuards<'a> {
    pub relayer_key: &'a VerifyingKey,
    pub nullifiers: &'a NullifierRegistry,
    pub nonces: &'a UsedNonces,
}

impl WithdrawGuards<'_> {
    /// Consume `nonce` and every nullifier in `batch` together, or nothing.
    pub fn commit(&self, nonce: u64, batch: &[Nullifier]) -> Result<()> {
        let mut nonces = self.nonces.lock();
        if nonces.contains(&nonce) {
            return Err(EscrowError::NonceReused);
        }
        self.nullifiers.insert_all(batch)?;
        nonces.insert(nonce);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::ed25519::KeyPair;

    #[test]
    fn test_commit_is_all_or_nothing() {
        let key = KeyPair::from_bytes(&[1; 32]).verifying_key;
        let nullifiers = NullifierRegistry::new();
        let nonces = UsedNonces::new();
        let guards = WithdrawGuards {
            relayer_key: &key,
            nullifiers: &nullifiers,
            nonces: &nonces,
        };

        guards.commit(1, &[[1; 32]]).expect("first commit");
        assert!(nonces.contains(1));

        assert_eq!(
            guards.commit(2, &[[1; 32], [2; 32]]),
            Err(EscrowError::NullifierAlreadyUsed)
        );
        assert!(!nonces.contains(2));
        assert!(!nullifiers.contains(&[2; 32]));

        assert_eq!(guards.commit(1, &[[3; 32]]), Err(EscrowError::NonceReused));
        assert!(!nullifiers.contains(&[3; 32]));
        assert_eq!(nonces.len(), 1);
    }
}
