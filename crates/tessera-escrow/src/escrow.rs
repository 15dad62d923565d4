//! The escrow state machine.
//!
//! Phases are derived from wall-clock time against three boundaries; there
//! are no explicit transitions. Every operation first computes the phase and
//! gates on it, then validates fully before touching any state.
//!
//! ## Partial fills
//!
//! The secret at index `k <= N` unlocks a cumulative fill of `k` parts, the
//! completion secret `N + 1` unlocks everything. A withdrawal over
//! `[start, end]` may move at most
//!
//! ```text
//! range_capacity = max_cumulative_fill(end) - max_cumulative_fill(start) + part_size
//! ```
//!
//! and never more than `max_cumulative_fill(end) - filled_amount`, so the
//! escrow as a whole never releases more than the highest revealed secret
//! allows.

use tessera_auth::{verify_grant, AuthorizationGrant};
use tessera_nullifier::Nullifier;
use tessera_types::escrow::{EscrowKind, EscrowParams, EscrowPhase, EscrowView, TimeWindows};
use tessera_types::{max_cumulative_fill, Address, Amount, AssetId, EscrowId, Hash, Timestamp, MAX_PARTS};
use tracing::{debug, info};

use crate::guards::WithdrawGuards;
use crate::request::{Payout, RangeWithdrawal, SecretReveal};
use crate::{EscrowError, Result};

/// A funded escrow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Escrow {
    pub id: EscrowId,
    pub kind: EscrowKind,
    /// Refund target.
    pub maker: Address,
    /// Fixed payout address for destination legs.
    pub recipient: Option<Address>,
    pub asset: AssetId,
    pub merkle_root: Hash,
    pub windows: TimeWindows,
    pub num_parts: u32,
    pub total_amount: Amount,
    pub part_size: Amount,
    pub balance: Amount,
    /// Monotonic; never exceeds `total_amount`.
    pub filled_amount: Amount,
    pub deadline: Timestamp,
    pub is_resolved: bool,
    pub created_at: Timestamp,
}

impl Escrow {
    /// Validate `params` and create a funded escrow.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidTimeWindows`] unless the boundaries strictly
    ///   increase and `withdrawal_end > now`
    /// - [`EscrowError::InvalidParts`] unless `1 <= num_parts <= 20`
    ///   (exactly 1 for destination legs)
    /// - [`EscrowError::InvalidAmount`] if the total is zero or not divisible
    /// - [`EscrowError::DeadlineExpired`] unless `deadline > now`
    pub fn create(id: EscrowId, params: EscrowParams, now: Timestamp) -> Result<Self> {
        if !params.windows.is_ordered() || params.windows.withdrawal_end <= now {
            return Err(EscrowError::InvalidTimeWindows);
        }
        let parts_ok = match params.kind {
            EscrowKind::SourcePartialFill => (1..=MAX_PARTS).contains(&params.num_parts),
            EscrowKind::DestinationHashlock => params.num_parts == 1,
        };
        if !parts_ok {
            return Err(EscrowError::InvalidParts(params.num_parts));
        }
        if params.total_amount == 0
            || params.total_amount % Amount::from(params.num_parts) != 0
        {
            return Err(EscrowError::InvalidAmount);
        }
        if params.deadline <= now {
            return Err(EscrowError::DeadlineExpired);
        }

        let part_size = params.part_size();
        Ok(Self {
            id,
            kind: params.kind,
            maker: params.maker,
            recipient: params.recipient,
            asset: params.asset,
            merkle_root: params.merkle_root,
            windows: params.windows,
            num_parts: params.num_parts,
            total_amount: params.total_amount,
            part_size,
            balance: params.total_amount,
            filled_amount: 0,
            deadline: params.deadline,
            is_resolved: false,
            created_at: now,
        })
    }

    /// The phase in effect at `now`.
    pub fn state_at(&self, now: Timestamp) -> EscrowPhase {
        self.windows.phase_at(now)
    }

    /// The completion index `N + 1`.
    pub fn completion_index(&self) -> u32 {
        self.num_parts + 1
    }

    /// Cumulative amount unlocked by the secret at `index`.
    ///
    /// # Errors
    ///
    /// - [`EscrowError::InvalidSecretIndex`] unless `1 <= index <= N + 1`
    pub fn max_cumulative_fill(&self, index: u32) -> Result<Amount> {
        max_cumulative_fill(self.total_amount, self.num_parts, index)
            .ok_or(EscrowError::InvalidSecretIndex(index))
    }

    /// Percentage of the total already filled, in `0..=100`.
    pub fn fill_percentage(&self) -> u8 {
        let pct = self.filled_amount.saturating_mul(100) / self.total_amount.max(1);
        u8::try_from(pct.min(100)).unwrap_or(100)
    }

    pub fn view(&self, now: Timestamp) -> EscrowView {
        EscrowView {
            id: self.id,
            kind: self.kind,
            maker: self.maker,
            recipient: self.recipient,
            asset: self.asset.clone(),
            merkle_root: self.merkle_root,
            windows: self.windows,
            num_parts: self.num_parts,
            total_amount: self.total_amount,
            part_size: self.part_size,
            balance: self.balance,
            filled_amount: self.filled_amount,
            deadline: self.deadline,
            is_resolved: self.is_resolved,
            created_at: self.created_at,
            phase: self.state_at(now),
        }
    }

    /// Where withdrawals pay out: the fixed recipient, else the grantee.
    fn payee(&self, grant: &AuthorizationGrant) -> Address {
        self.recipient.unwrap_or(grant.authorized_resolver)
    }

    /// Resolution, window, grant and caller checks shared by both withdrawals.
    fn authorize(
        &self,
        grant: &AuthorizationGrant,
        start: u32,
        end: u32,
        caller: &Address,
        guards: &WithdrawGuards<'_>,
        now: Timestamp,
    ) -> Result<EscrowPhase> {
        if self.is_resolved {
            return Err(EscrowError::AlreadyResolved);
        }
        let phase = self.state_at(now);
        if !phase.allows_withdrawal() {
            return Err(EscrowError::WindowExpired);
        }

        verify_grant(grant, guards.relayer_key)?;
        if grant.escrow_id != self.id || !grant.covers(start, end) {
            return Err(EscrowError::GrantMismatch);
        }
        if guards.nonces.contains(grant.nonce) {
            return Err(EscrowError::NonceReused);
        }

        if phase == EscrowPhase::Withdrawal && *caller != grant.authorized_resolver {
            return Err(EscrowError::UnauthorizedCaller);
        }
        Ok(phase)
    }

    fn check_unused(guards: &WithdrawGuards<'_>, nullifiers: &[Nullifier]) -> Result<()> {
        if nullifiers.iter().any(|n| guards.nullifiers.contains(n)) {
            return Err(EscrowError::NullifierAlreadyUsed);
        }
        Ok(())
    }

    /// Withdraw the parts spanned by `[request.start.index, request.end.index]`.
    ///
    /// Checks run in order: resolution, window, grant (signer, escrow, exact
    /// range, unused nonce), caller, index bounds, both Merkle proofs, both
    /// nullifiers, amount. Only then are the nullifiers and nonce consumed and
    /// the fill recorded.
    ///
    /// When `start == end` both reveals must carry the same secret and a
    /// single nullifier is consumed.
    pub fn withdraw_range(
        &mut self,
        request: &RangeWithdrawal,
        grant: &AuthorizationGrant,
        caller: &Address,
        guards: &WithdrawGuards<'_>,
        now: Timestamp,
    ) -> Result<Payout> {
        let (start, end) = (&request.start, &request.end);
        self.authorize(grant, start.index, end.index, caller, guards, now)?;

        if start.index == 0 {
            return Err(EscrowError::InvalidSecretIndex(start.index));
        }
        if start.index > end.index || end.index > self.completion_index() {
            return Err(EscrowError::InvalidSecretIndex(end.index));
        }

        self.check_proof(start)?;
        let nullifiers = if start.index == end.index {
            if start.secret != end.secret {
                return Err(EscrowError::InvalidMerkleProof);
            }
            vec![start.leaf()]
        } else {
            self.check_proof(end)?;
            vec![start.leaf(), end.leaf()]
        };
        Self::check_unused(guards, &nullifiers)?;

        let end_cap = self.max_cumulative_fill(end.index)?;
        let range_capacity = end_cap - self.max_cumulative_fill(start.index)? + self.part_size;
        let headroom = end_cap.saturating_sub(self.filled_amount);
        let actual = request.desired_amount.min(range_capacity).min(headroom);
        if actual == 0 {
            return Err(EscrowError::InvalidFillAmount);
        }
        if actual > self.balance {
            return Err(EscrowError::InsufficientFunds {
                needed: actual,
                available: self.balance,
            });
        }

        guards.commit(grant.nonce, &nullifiers)?;
        self.filled_amount += actual;
        self.balance -= actual;
        if self.filled_amount >= self.total_amount {
            self.is_resolved = true;
        }

        info!(
            escrow_id = %self.id,
            start = start.index,
            end = end.index,
            amount = %actual,
            filled = %self.filled_amount,
            resolved = self.is_resolved,
            "range withdrawn"
        );
        Ok(Payout {
            to: self.payee(grant),
            asset: self.asset.clone(),
            amount: actual,
        })
    }

    /// Withdraw the entire remaining balance with the completion secret.
    ///
    /// The grant must cover exactly `[N + 1, N + 1]`.
    pub fn withdraw_full(
        &mut self,
        completion: &SecretReveal,
        grant: &AuthorizationGrant,
        caller: &Address,
        guards: &WithdrawGuards<'_>,
        now: Timestamp,
    ) -> Result<Payout> {
        let index = self.completion_index();
        self.authorize(grant, index, index, caller, guards, now)?;

        if completion.index != index {
            return Err(EscrowError::InvalidSecretIndex(completion.index));
        }
        self.check_proof(completion)?;
        let nullifiers = [completion.leaf()];
        Self::check_unused(guards, &nullifiers)?;
        if self.balance == 0 {
            return Err(EscrowError::InvalidFillAmount);
        }

        guards.commit(grant.nonce, &nullifiers)?;
        let amount = self.balance;
        self.balance = 0;
        self.filled_amount = self.total_amount;
        self.is_resolved = true;

        info!(escrow_id = %self.id, amount = %amount, "escrow fully withdrawn");
        Ok(Payout {
            to: self.payee(grant),
            asset: self.asset.clone(),
            amount,
        })
    }

    /// Return the remaining balance to the maker. Permissionless once the
    /// cancellation window has opened.
    pub fn refund(&mut self, now: Timestamp) -> Result<Payout> {
        if self.is_resolved {
            return Err(EscrowError::AlreadyResolved);
        }
        if !self.state_at(now).allows_refund() {
            return Err(EscrowError::CancellationNotStarted);
        }

        let amount = self.balance;
        self.balance = 0;
        self.is_resolved = true;

        info!(escrow_id = %self.id, maker = %self.maker, amount = %amount, "escrow refunded");
        Ok(Payout {
            to: self.maker,
            asset: self.asset.clone(),
            amount,
        })
    }

    fn check_proof(&self, reveal: &SecretReveal) -> Result<()> {
        if !reveal.verifies(&self.merkle_root) {
            debug!(escrow_id = %self.id, index = reveal.index, "merkle proof rejected");
            return Err(EscrowError::InvalidMerkleProof);
        }
        Ok(())
    }
}
