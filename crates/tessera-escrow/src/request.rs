//! Withdrawal requests and payouts.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, DisplayFromStr};
use tessera_crypto::merkle;
use tessera_crypto::secret::Secret;
use tessera_types::{Address, Amount, AssetId, Hash};

/// A secret disclosed at a 1-based index, with its Merkle proof.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretReveal {
    pub index: u32,
    pub secret: Secret,
    #[serde_as(as = "Vec<Hex>")]
    pub proof: Vec<Hash>,
}

impl SecretReveal {
    /// Reveal `secret` at `index`, proving it against `leaves`.
    pub fn prove(index: u32, secret: Secret, leaves: &[Hash]) -> tessera_crypto::Result<Self> {
        let position = usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .ok_or(tessera_crypto::CryptoError::LeafOutOfRange {
                position: 0,
                leaf_count: leaves.len(),
            })?;
        let proof = merkle::prove(leaves, position)?;
        Ok(Self {
            index,
            secret,
            proof,
        })
    }

    pub fn leaf(&self) -> Hash {
        self.secret.leaf()
    }

    /// Whether the secret's leaf is committed under `root`.
    pub fn verifies(&self, root: &Hash) -> bool {
        merkle::verify(root, &self.leaf(), &self.proof)
    }
}

/// A range withdrawal: secrets at both ends and the amount wanted.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeWithdrawal {
    pub start: SecretReveal,
    pub end: SecretReveal,
    #[serde_as(as = "DisplayFromStr")]
    pub desired_amount: Amount,
}

/// Funds released by an escrow operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub to: Address,
    pub asset: AssetId,
    pub amount: Amount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::merkle::{build_root, leaves_for_secrets};

    #[test]
    fn test_prove_uses_one_based_index() {
        let secrets: Vec<Secret> = (1..=4u8).map(|i| Secret::from_bytes([i; 32])).collect();
        let leaves = leaves_for_secrets(&secrets);
        let root = build_root(&leaves).expect("root");

        let reveal = SecretReveal::prove(3, secrets[2].clone(), &leaves).expect("prove");
        assert!(reveal.verifies(&root));

        assert!(SecretReveal::prove(0, secrets[0].clone(), &leaves).is_err());
        assert!(SecretReveal::prove(5, secrets[0].clone(), &leaves).is_err());
    }
}
