//! Identifiers.
//!
//! All 32-byte identifiers serialize as lowercase hex without a prefix.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::serde_as;
use tessera_crypto::blake3::{contexts, derive_key, encode_multi_field};
use tessera_crypto::ed25519::{derive_address, VerifyingKey};

use crate::{Hash, Timestamp, TypesError};

macro_rules! hex_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[serde_as]
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(#[serde_as(as = "Hex")] pub [u8; 32]);

        impl $name {
            pub const fn new(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.to_hex())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), &self.to_hex()[..12])
            }
        }

        impl FromStr for $name {
            type Err = TypesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_hash(s).map(Self)
            }
        }
    };
}

hex_id!(
    /// A 32-byte ledger address. Chains with shorter native addresses
    /// left-pad with zeros.
    Address
);
hex_id!(
    /// Identifier of an escrow object on one chain.
    EscrowId
);
hex_id!(
    /// Identifier of an order, derived from the maker key and commitment.
    OrderId
);
hex_id!(
    /// Identifier of one resolver's fill within an order.
    FillId
);

impl Address {
    /// The address controlled by an Ed25519 public key.
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self(derive_address(key))
    }
}

impl EscrowId {
    /// Derive the id of the `sequence`-th escrow created on `chain`.
    pub fn derive(chain: &ChainId, sequence: u64, merkle_root: &Hash) -> Self {
        let material = encode_multi_field(&[
            chain.as_str().as_bytes(),
            sequence.to_be_bytes().as_slice(),
            merkle_root.as_slice(),
        ]);
        Self(derive_key(contexts::ESCROW_ID, &material))
    }
}

impl OrderId {
    /// Derive an order id from the maker key, the Merkle root and creation time.
    pub fn derive(maker: &VerifyingKey, merkle_root: &Hash, created_at: Timestamp) -> Self {
        let material = encode_multi_field(&[
            maker.as_bytes().as_slice(),
            merkle_root.as_slice(),
            created_at.to_be_bytes().as_slice(),
        ]);
        Self(derive_key(contexts::ORDER_ID, &material))
    }
}

impl FillId {
    /// Derive a fill id from its order, resolver and start index.
    ///
    /// `attempt` is the number of fills the order already holds, so a range
    /// re-claimed after an abandoned fill gets a fresh id.
    pub fn derive(order_id: &OrderId, resolver: &Address, start_index: u32, attempt: u32) -> Self {
        let material = encode_multi_field(&[
            order_id.as_bytes().as_slice(),
            resolver.as_bytes().as_slice(),
            start_index.to_be_bytes().as_slice(),
            attempt.to_be_bytes().as_slice(),
        ]);
        Self(derive_key(contexts::FILL_ID, &material))
    }
}

/// Parse a 64-character hex string into 32 bytes.
pub fn parse_hash(s: &str) -> crate::Result<Hash> {
    let bytes = hex::decode(s).map_err(|e| TypesError::InvalidHex(e.to_string()))?;
    bytes.as_slice().try_into().map_err(|_| TypesError::InvalidLength {
        expected: 32,
        actual: bytes.len(),
    })
}

/// Chain identifier, e.g. `"sui-testnet"`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl ChainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Asset identifier on a chain (coin type, token contract, ...).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::ed25519::KeyPair;

    #[test]
    fn test_hex_roundtrip() {
        let id = EscrowId::new([0xAB; 32]);
        let json = serde_json::to_string(&id).expect("serialize");
        assert_eq!(json, format!("\"{}\"", "ab".repeat(32)));
        assert_eq!(serde_json::from_str::<EscrowId>(&json).expect("parse"), id);
        assert_eq!(id.to_string().parse::<EscrowId>().expect("parse"), id);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(matches!(
            "zz".parse::<OrderId>(),
            Err(TypesError::InvalidHex(_))
        ));
        assert_eq!(
            "abcd".parse::<OrderId>(),
            Err(TypesError::InvalidLength {
                expected: 32,
                actual: 2
            })
        );
    }

    #[test]
    fn test_debug_is_short() {
        let id = FillId::new([0x01; 32]);
        assert_eq!(format!("{id:?}"), "FillId(010101010101)");
    }

    #[test]
    fn test_derivations_are_domain_separated() {
        let kp = KeyPair::from_bytes(&[9u8; 32]);
        let root = [3u8; 32];
        let order = OrderId::derive(&kp.verifying_key, &root, 100);
        assert_ne!(order, OrderId::derive(&kp.verifying_key, &root, 101));

        let address = Address::from_public_key(&kp.verifying_key);
        assert_eq!(address.0, kp.address());

        let fill_a = FillId::derive(&order, &address, 1, 0);
        let fill_b = FillId::derive(&order, &address, 2, 0);
        assert_ne!(fill_a, fill_b);

        let chain = ChainId::new("local-a");
        assert_ne!(
            EscrowId::derive(&chain, 0, &root),
            EscrowId::derive(&chain, 1, &root)
        );
    }
}
