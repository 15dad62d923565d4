//! Escrow parameters, time windows and read-only views.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, DisplayFromStr};

use crate::{max_cumulative_fill, Address, Amount, AssetId, EscrowId, Hash, Timestamp};

/// The three escalating boundaries of an escrow.
///
/// Valid windows satisfy `withdrawal_end < public_withdrawal_end < cancellation_end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindows {
    pub withdrawal_end: Timestamp,
    pub public_withdrawal_end: Timestamp,
    pub cancellation_end: Timestamp,
}

impl TimeWindows {
    /// Windows starting at `now` with the given phase durations.
    pub fn from_durations(now: Timestamp, withdrawal: u64, public: u64, cancellation: u64) -> Self {
        let withdrawal_end = now.saturating_add(withdrawal);
        let public_withdrawal_end = withdrawal_end.saturating_add(public);
        Self {
            withdrawal_end,
            public_withdrawal_end,
            cancellation_end: public_withdrawal_end.saturating_add(cancellation),
        }
    }

    /// Whether the boundaries are strictly increasing.
    pub fn is_ordered(&self) -> bool {
        self.withdrawal_end < self.public_withdrawal_end
            && self.public_withdrawal_end < self.cancellation_end
    }

    /// The phase in effect at `now`. Boundaries are inclusive.
    pub fn phase_at(&self, now: Timestamp) -> EscrowPhase {
        if now <= self.withdrawal_end {
            EscrowPhase::Withdrawal
        } else if now <= self.public_withdrawal_end {
            EscrowPhase::PublicWithdrawal
        } else if now <= self.cancellation_end {
            EscrowPhase::Cancellation
        } else {
            EscrowPhase::Expired
        }
    }
}

/// Time-driven escrow phase. There are no explicit transitions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowPhase {
    /// Only the resolver named in the grant may withdraw.
    Withdrawal,
    /// Anyone may submit a granted withdrawal; funds still go to the grantee.
    PublicWithdrawal,
    /// Anyone may refund the remaining balance to the maker.
    Cancellation,
    Expired,
}

impl EscrowPhase {
    pub fn allows_withdrawal(self) -> bool {
        matches!(self, Self::Withdrawal | Self::PublicWithdrawal)
    }

    pub fn allows_refund(self) -> bool {
        matches!(self, Self::Cancellation | Self::Expired)
    }
}

/// Which leg of a swap an escrow holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowKind {
    /// Maker funds on the source chain, split into `num_parts` parts.
    SourcePartialFill,
    /// Resolver funds on the destination chain, locked to one hashlock and
    /// paid to a fixed recipient.
    DestinationHashlock,
}

impl EscrowKind {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::SourcePartialFill => 0,
            Self::DestinationHashlock => 1,
        }
    }
}

/// Everything needed to create an escrow.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowParams {
    pub kind: EscrowKind,
    /// Refund target.
    pub maker: Address,
    /// Fixed payout address. When absent, withdrawals pay the grant's resolver.
    pub recipient: Option<Address>,
    pub asset: AssetId,
    #[serde_as(as = "Hex")]
    pub merkle_root: Hash,
    pub windows: TimeWindows,
    pub num_parts: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub total_amount: Amount,
    /// Creation must happen before this time.
    pub deadline: Timestamp,
}

impl EscrowParams {
    /// Destination-leg parameters: one part locked to `hashlock`, paid to
    /// `recipient`, refundable to `refund_to`.
    pub fn destination(
        refund_to: Address,
        recipient: Address,
        asset: AssetId,
        hashlock: Hash,
        windows: TimeWindows,
        amount: Amount,
        deadline: Timestamp,
    ) -> Self {
        Self {
            kind: EscrowKind::DestinationHashlock,
            maker: refund_to,
            recipient: Some(recipient),
            asset,
            merkle_root: hashlock,
            windows,
            num_parts: 1,
            total_amount: amount,
            deadline,
        }
    }

    /// `total_amount / num_parts`, or zero for a zero part count.
    pub fn part_size(&self) -> Amount {
        self.total_amount
            .checked_div(Amount::from(self.num_parts))
            .unwrap_or_default()
    }

    /// Canonical byte encoding, covered by sponsored-transaction signatures.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(192);
        out.push(self.kind.as_byte());
        out.extend_from_slice(self.maker.as_bytes());
        match &self.recipient {
            Some(recipient) => {
                out.push(1);
                out.extend_from_slice(recipient.as_bytes());
            }
            None => out.push(0),
        }
        out.extend_from_slice(&(self.asset.as_str().len() as u32).to_be_bytes());
        out.extend_from_slice(self.asset.as_str().as_bytes());
        out.extend_from_slice(&self.merkle_root);
        out.extend_from_slice(&self.windows.withdrawal_end.to_be_bytes());
        out.extend_from_slice(&self.windows.public_withdrawal_end.to_be_bytes());
        out.extend_from_slice(&self.windows.cancellation_end.to_be_bytes());
        out.extend_from_slice(&self.num_parts.to_be_bytes());
        out.extend_from_slice(&self.total_amount.to_be_bytes());
        out.extend_from_slice(&self.deadline.to_be_bytes());
        out
    }
}

/// Read-only snapshot of an escrow, as returned by the chain accessors.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowView {
    pub id: EscrowId,
    pub kind: EscrowKind,
    pub maker: Address,
    pub recipient: Option<Address>,
    pub asset: AssetId,
    #[serde_as(as = "Hex")]
    pub merkle_root: Hash,
    pub windows: TimeWindows,
    pub num_parts: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub total_amount: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub part_size: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub balance: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub filled_amount: Amount,
    pub deadline: Timestamp,
    pub is_resolved: bool,
    pub created_at: Timestamp,
    pub phase: EscrowPhase,
}

impl EscrowView {
    /// Cumulative amount unlocked by the secret at `index`.
    pub fn max_cumulative_fill(&self, index: u32) -> Option<Amount> {
        max_cumulative_fill(self.total_amount, self.num_parts, index)
    }
}
