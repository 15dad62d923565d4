//! Orders, fills and deployments.
//!
//! An order commits `total_parts + 1` leaves. Each fill claims a contiguous
//! index range `start_index..=end_index` (1-based). Fills of one order never
//! overlap: a new fill starts right after the highest index claimed by any
//! fill that has not been abandoned.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, DisplayFromStr};
use tessera_crypto::ed25519::{Signature, VerifyingKey};

use crate::escrow::TimeWindows;
use crate::sponsored::SponsoredTransaction;
use crate::{
    max_cumulative_fill, Address, Amount, AssetId, ChainId, EscrowId, FillId, Hash, OrderId,
    Timestamp,
};

/// An asset and an amount of it.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    pub asset: AssetId,
    #[serde_as(as = "DisplayFromStr")]
    pub amount: Amount,
}

/// Time windows for both legs of a swap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderWindows {
    pub source: TimeWindows,
    pub destination: TimeWindows,
}

/// What a maker submits: amounts, the commitment, and windows. No
/// transaction bytes.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderIntent {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub maker_source_address: Address,
    pub maker_destination_address: Address,
    pub maker_public_key: VerifyingKey,
    pub source: AssetAmount,
    pub destination: AssetAmount,
    pub total_parts: u32,
    #[serde_as(as = "Hex")]
    pub merkle_root: Hash,
    /// All `total_parts + 1` leaves in index order.
    #[serde_as(as = "Vec<Hex>")]
    pub leaf_hashes: Vec<Hash>,
    pub windows: OrderWindows,
    /// Latest time a sponsored creation transaction may execute.
    pub deadline: Timestamp,
    pub created_at: Timestamp,
}

impl OrderIntent {
    pub fn order_id(&self) -> OrderId {
        OrderId::derive(&self.maker_public_key, &self.merkle_root, self.created_at)
    }
}

/// Lifecycle of an order as tracked by the relayer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Unclaimed parts remain; new fills are accepted.
    Open,
    /// Every part is claimed by a live fill.
    Claimed,
    /// Every part has settled.
    Completed,
    /// The source withdrawal window closed before completion.
    Expired,
}

impl OrderStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Claimed => "claimed",
            Self::Completed => "completed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Expired)
    }
}

/// Stage of one fill.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillStage {
    /// The sponsored creation transaction waits for the maker's co-signature.
    AwaitingMakerSignature,
    /// Waiting for the resolver to report both deployments.
    AwaitingDeployment,
    /// Deployments validated; waiting for the maker to disclose secrets.
    AwaitingSecrets,
    /// Grants issued and secrets forwarded to the resolver.
    Authorized,
    /// The source-chain range was withdrawn.
    Settled,
    /// Timed out or withdrawn by the coordinator; its range is free again.
    Abandoned,
}

impl FillStage {
    /// Whether the fill still holds its index range.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Abandoned)
    }

    /// Whether the fill waits on a counterparty under a stage deadline.
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Self::AwaitingMakerSignature | Self::AwaitingDeployment | Self::AwaitingSecrets
        )
    }
}

/// Both legs of a fill as reported by the resolver.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub source_chain: ChainId,
    pub source_escrow: EscrowId,
    pub destination_chain: ChainId,
    pub destination_escrow: EscrowId,
    /// Leaf at the fill's end index.
    #[serde_as(as = "Hex")]
    pub hashlock: Hash,
    pub source_windows: TimeWindows,
    pub destination_windows: TimeWindows,
}

/// One resolver's claim on a contiguous index range.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: FillId,
    /// Source-chain address; grants name it and source withdrawals pay it.
    pub resolver: Address,
    /// Destination-chain address; refund target of the destination escrow.
    pub resolver_destination_address: Address,
    pub resolver_public_key: VerifyingKey,
    pub start_index: u32,
    pub end_index: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub source_amount: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub destination_amount: Amount,
    pub stage: FillStage,
    /// Present only on the fill that creates the source escrow.
    pub sponsored_tx: Option<SponsoredTransaction>,
    pub sponsor_signature: Option<Signature>,
    pub maker_signature: Option<Signature>,
    pub deployment: Option<Deployment>,
    pub grant_nonces: Vec<u64>,
    pub stage_deadline: Timestamp,
    pub abandon_reason: Option<String>,
    pub created_at: Timestamp,
}

impl Fill {
    /// Number of parts the range covers, treating the completion index as
    /// the last part.
    pub fn part_count(&self, total_parts: u32) -> u32 {
        let end = self.end_index.min(total_parts);
        end.saturating_sub(self.start_index).saturating_add(1)
    }
}

/// An order and all of its fills.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub intent: OrderIntent,
    pub status: OrderStatus,
    pub source_escrow: Option<EscrowId>,
    /// Parts covered by settled fills.
    pub filled_parts: u32,
    pub fills: Vec<Fill>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Order {
    /// A fresh open order for `intent`.
    pub fn new(intent: OrderIntent, now: Timestamp) -> Self {
        Self {
            order_id: intent.order_id(),
            intent,
            status: OrderStatus::Open,
            source_escrow: None,
            filled_parts: 0,
            fills: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn total_parts(&self) -> u32 {
        self.intent.total_parts
    }

    /// The completion index `N + 1`.
    pub fn completion_index(&self) -> u32 {
        self.intent.total_parts + 1
    }

    /// The committed leaf at a 1-based secret index.
    pub fn leaf_at(&self, index: u32) -> Option<Hash> {
        let position = usize::try_from(index).ok()?.checked_sub(1)?;
        self.intent.leaf_hashes.get(position).copied()
    }

    /// Cumulative source amount unlocked by the secret at `index`.
    pub fn max_cumulative_fill(&self, index: u32) -> Option<Amount> {
        max_cumulative_fill(self.intent.source.amount, self.intent.total_parts, index)
    }

    /// Highest index held by a live fill, or zero.
    pub fn claimed_through(&self) -> u32 {
        self.fills
            .iter()
            .filter(|fill| fill.stage.is_live())
            .map(|fill| fill.end_index)
            .max()
            .unwrap_or(0)
    }

    /// Where the next fill must start.
    pub fn next_start_index(&self) -> u32 {
        self.claimed_through() + 1
    }

    /// Whether every part is held by a live fill.
    pub fn is_fully_claimed(&self) -> bool {
        self.claimed_through() >= self.total_parts()
    }

    pub fn fill(&self, fill_id: &FillId) -> Option<&Fill> {
        self.fills.iter().find(|fill| fill.fill_id == *fill_id)
    }

    pub fn fill_mut(&mut self, fill_id: &FillId) -> Option<&mut Fill> {
        self.fills.iter_mut().find(|fill| fill.fill_id == *fill_id)
    }

    /// The fill currently creating the source escrow, if any.
    pub fn pending_source_creation(&self) -> Option<&Fill> {
        self.fills.iter().find(|fill| {
            fill.sponsored_tx.is_some()
                && matches!(
                    fill.stage,
                    FillStage::AwaitingMakerSignature | FillStage::AwaitingDeployment
                )
        })
    }

    /// Percentage of parts settled, in `0..=100`.
    pub fn fill_percentage(&self) -> u8 {
        if self.total_parts() == 0 {
            return 0;
        }
        let pct = u64::from(self.filled_parts.min(self.total_parts())) * 100
            / u64::from(self.total_parts());
        u8::try_from(pct).unwrap_or(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_crypto::ed25519::KeyPair;

    fn intent(parts: u32) -> OrderIntent {
        let maker = KeyPair::from_bytes(&[4; 32]);
        let leaf_hashes: Vec<Hash> = (1..=parts + 1).map(|i| [i as u8; 32]).collect();
        OrderIntent {
            source_chain: ChainId::new("src"),
            destination_chain: ChainId::new("dst"),
            maker_source_address: Address::from_public_key(&maker.verifying_key),
            maker_destination_address: Address::new([8; 32]),
            maker_public_key: maker.verifying_key,
            source: AssetAmount {
                asset: AssetId::new("sui"),
                amount: 1_000,
            },
            destination: AssetAmount {
                asset: AssetId::new("eth"),
                amount: 10,
            },
            total_parts: parts,
            merkle_root: [0; 32],
            leaf_hashes,
            windows: OrderWindows {
                source: TimeWindows::from_durations(0, 100, 100, 100),
                destination: TimeWindows::from_durations(0, 50, 50, 50),
            },
            deadline: 60,
            created_at: 1,
        }
    }

    fn fill(start: u32, end: u32, stage: FillStage) -> Fill {
        let kp = KeyPair::from_bytes(&[start as u8; 32]);
        Fill {
            fill_id: FillId::new([start as u8; 32]),
            resolver: Address::from_public_key(&kp.verifying_key),
            resolver_destination_address: Address::default(),
            resolver_public_key: kp.verifying_key,
            start_index: start,
            end_index: end,
            source_amount: 0,
            destination_amount: 0,
            stage,
            sponsored_tx: None,
            sponsor_signature: None,
            maker_signature: None,
            deployment: None,
            grant_nonces: Vec::new(),
            stage_deadline: 0,
            abandon_reason: None,
            created_at: 0,
        }
    }

    #[test]
    fn test_leaf_indexing_is_one_based() {
        let order = Order::new(intent(4), 1);
        assert_eq!(order.leaf_at(0), None);
        assert_eq!(order.leaf_at(1), Some([1; 32]));
        assert_eq!(order.leaf_at(5), Some([5; 32]));
        assert_eq!(order.leaf_at(6), None);
        assert_eq!(order.completion_index(), 5);
    }

    #[test]
    fn test_claims_skip_abandoned_fills() {
        let mut order = Order::new(intent(4), 1);
        assert_eq!(order.next_start_index(), 1);

        order.fills.push(fill(1, 2, FillStage::Authorized));
        order.fills.push(fill(3, 3, FillStage::Abandoned));
        assert_eq!(order.next_start_index(), 3);
        assert!(!order.is_fully_claimed());

        order.fills.push(fill(3, 5, FillStage::AwaitingSecrets));
        assert!(order.is_fully_claimed());
        assert_eq!(order.fills[2].part_count(4), 2);
    }

    #[test]
    fn test_fill_percentage() {
        let mut order = Order::new(intent(4), 1);
        order.filled_parts = 3;
        assert_eq!(order.fill_percentage(), 75);
        assert_eq!(order.max_cumulative_fill(2), Some(500));
    }
}
