//! Sponsored (gasless) escrow-creation transactions.
//!
//! The maker is the sender and spends its own funds; the resolver is the gas
//! sponsor. Both sign the same digest, so neither party can alter the call
//! after the other has signed.

use serde::{Deserialize, Serialize};
use tessera_crypto::blake3::{contexts, derive_key};
use tessera_crypto::ed25519::{Signature, VerifyingKey};

use crate::escrow::EscrowParams;
use crate::{Address, ChainId, Hash};

/// An escrow-creation call wrapped as a sponsored transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SponsoredTransaction {
    pub chain_id: ChainId,
    /// The maker, whose funds are locked.
    pub sender: Address,
    pub sender_public_key: VerifyingKey,
    /// The resolver paying for execution.
    pub gas_sponsor: Address,
    pub sponsor_public_key: VerifyingKey,
    pub params: EscrowParams,
    /// Sponsor-chosen value making otherwise identical calls distinct.
    pub nonce: u64,
}

impl SponsoredTransaction {
    /// Fixed concatenation of every field, in declaration order.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let chain = self.chain_id.as_str().as_bytes();
        let params = self.params.encode();
        let mut out = Vec::with_capacity(4 + chain.len() + 128 + params.len() + 8);
        out.extend_from_slice(&(chain.len() as u32).to_be_bytes());
        out.extend_from_slice(chain);
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(self.sender_public_key.as_bytes());
        out.extend_from_slice(self.gas_sponsor.as_bytes());
        out.extend_from_slice(self.sponsor_public_key.as_bytes());
        out.extend_from_slice(&params);
        out.extend_from_slice(&self.nonce.to_be_bytes());
        out
    }

    /// The digest both parties sign.
    pub fn digest(&self) -> Hash {
        derive_key(contexts::SPONSORED_TX_DIGEST, &self.signing_bytes())
    }

    /// Whether the declared sender and sponsor addresses derive from the
    /// declared keys.
    pub fn addresses_match_keys(&self) -> bool {
        self.sender == Address::from_public_key(&self.sender_public_key)
            && self.gas_sponsor == Address::from_public_key(&self.sponsor_public_key)
    }

    pub fn verify_sender(&self, signature: &Signature) -> bool {
        self.sender_public_key
            .verify(&self.digest(), signature)
            .is_ok()
    }

    pub fn verify_sponsor(&self, signature: &Signature) -> bool {
        self.sponsor_public_key
            .verify(&self.digest(), signature)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::escrow::{EscrowKind, TimeWindows};
    use crate::AssetId;
    use tessera_crypto::ed25519::KeyPair;

    fn sample(maker: &KeyPair, sponsor: &KeyPair) -> SponsoredTransaction {
        SponsoredTransaction {
            chain_id: ChainId::new("local-src"),
            sender: Address::from_public_key(&maker.verifying_key),
            sender_public_key: maker.verifying_key,
            gas_sponsor: Address::from_public_key(&sponsor.verifying_key),
            sponsor_public_key: sponsor.verifying_key,
            params: EscrowParams {
                kind: EscrowKind::SourcePartialFill,
                maker: Address::from_public_key(&maker.verifying_key),
                recipient: None,
                asset: AssetId::new("sui"),
                merkle_root: [5; 32],
                windows: TimeWindows::from_durations(100, 10, 10, 10),
                num_parts: 4,
                total_amount: 4_000,
                deadline: 150,
            },
            nonce: 1,
        }
    }

    #[test]
    fn test_both_parties_sign_same_digest() {
        let maker = KeyPair::from_bytes(&[1; 32]);
        let sponsor = KeyPair::from_bytes(&[2; 32]);
        let tx = sample(&maker, &sponsor);
        assert!(tx.addresses_match_keys());

        let digest = tx.digest();
        let maker_sig = maker.signing_key.sign(&digest);
        let sponsor_sig = sponsor.signing_key.sign(&digest);
        assert!(tx.verify_sender(&maker_sig));
        assert!(tx.verify_sponsor(&sponsor_sig));
        assert!(!tx.verify_sender(&sponsor_sig));
    }

    #[test]
    fn test_digest_covers_params() {
        let maker = KeyPair::from_bytes(&[1; 32]);
        let sponsor = KeyPair::from_bytes(&[2; 32]);
        let tx = sample(&maker, &sponsor);
        let signature = maker.signing_key.sign(&tx.digest());

        let mut altered = tx.clone();
        altered.params.total_amount = 8_000;
        assert_ne!(altered.digest(), tx.digest());
        assert!(!altered.verify_sender(&signature));
    }

    #[test]
    fn test_mismatched_address_detected() {
        let maker = KeyPair::from_bytes(&[1; 32]);
        let sponsor = KeyPair::from_bytes(&[2; 32]);
        let mut tx = sample(&maker, &sponsor);
        tx.gas_sponsor = Address::new([9; 32]);
        assert!(!tx.addresses_match_keys());
    }
}
