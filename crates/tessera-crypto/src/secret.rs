//! Swap secrets.
//!
//! An order with `N` parts commits to `N + 1` secrets. Secret `i` (1-based,
//! `i <= N`) unlocks a cumulative fill of `i` parts; secret `N + 1` is the
//! completion secret. A secret is generated once by the maker, disclosed at
//! most once per fill range, and retired when its nullifier is recorded.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::keccak::keccak256;
use crate::Hash;

/// A 32-byte swap secret. The bytes are wiped when the value is dropped and
/// never appear in `Debug` output.
#[serde_as]
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct Secret(#[serde_as(as = "Hex")] [u8; 32]);

impl Secret {
    /// Generate a fresh random secret from the OS RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Wrap existing secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// The Merkle leaf committed for this secret: `keccak256(secret)`.
    pub fn leaf(&self) -> Hash {
        keccak256(&self.0)
    }

    /// The nullifier recorded when this secret is consumed.
    ///
    /// Leaves and nullifiers share a derivation: a secret is spent exactly
    /// when its committed leaf is marked used.
    pub fn nullifier(&self) -> Hash {
        self.leaf()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Generate `count` independent secrets.
pub fn generate_secrets(count: usize) -> Vec<Secret> {
    (0..count).map(|_| Secret::generate()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn test_leaf_is_keccak_of_secret() {
        let secret = Secret::from_bytes([0x01; 32]);
        assert_eq!(
            secret.leaf(),
            hex!("cebc8882fecbec7fb80d2cf4b312bec018884c2d66667c67a90508214bd8bafc")
        );
        assert_eq!(secret.nullifier(), secret.leaf());
    }

    #[test]
    fn test_generated_secrets_differ() {
        let secrets = generate_secrets(4);
        assert_eq!(secrets.len(), 4);
        for (i, a) in secrets.iter().enumerate() {
            for b in secrets.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_debug_is_redacted() {
        let secret = Secret::from_bytes([0xAB; 32]);
        let rendered = format!("{secret:?}");
        assert_eq!(rendered, "Secret(..)");
        assert!(!rendered.contains("ab"));
    }

    #[test]
    fn test_serde_hex() {
        let secret = Secret::from_bytes([0x0F; 32]);
        let json = serde_json::to_string(&secret).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "0f".repeat(32)));
        let parsed: Secret = serde_json::from_str(&json).expect("parse");
        assert_eq!(parsed, secret);
    }
}
