//! Escrow event log, the chain-level record of every state change.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, DisplayFromStr};
use tessera_types::escrow::EscrowKind;
use tessera_types::{Address, Amount, EscrowId, Hash, Timestamp};

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EscrowEvent {
    Created {
        escrow_id: EscrowId,
        kind: EscrowKind,
        maker: Address,
        #[serde_as(as = "Hex")]
        merkle_root: Hash,
        num_parts: u32,
        #[serde_as(as = "DisplayFromStr")]
        total_amount: Amount,
        at: Timestamp,
    },
    RangeWithdrawn {
        escrow_id: EscrowId,
        start_index: u32,
        end_index: u32,
        #[serde_as(as = "DisplayFromStr")]
        amount: Amount,
        recipient: Address,
        caller: Address,
        nonce: u64,
        at: Timestamp,
    },
    FullyWithdrawn {
        escrow_id: EscrowId,
        #[serde_as(as = "DisplayFromStr")]
        amount: Amount,
        recipient: Address,
        caller: Address,
        nonce: u64,
        at: Timestamp,
    },
    Refunded {
        escrow_id: EscrowId,
        maker: Address,
        #[serde_as(as = "DisplayFromStr")]
        amount: Amount,
        at: Timestamp,
    },
}

impl EscrowEvent {
    pub fn escrow_id(&self) -> EscrowId {
        match self {
            Self::Created { escrow_id, .. }
            | Self::RangeWithdrawn { escrow_id, .. }
            | Self::FullyWithdrawn { escrow_id, .. }
            | Self::Refunded { escrow_id, .. } => *escrow_id,
        }
    }
}
