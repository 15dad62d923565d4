//! Per-chain escrow factory: the on-chain entry points.
//!
//! One factory per chain owns the nullifier registry, the trusted relayer
//! key, the token ledger, every live escrow and the event log. Calls against
//! one escrow run one at a time behind that escrow's mutex; calls against
//! different escrows only meet at the shared replay guards.
//!
//! An escrow's mutex may be held while shared locks are taken; no shared
//! lock is ever held while waiting for an escrow.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use tessera_auth::AuthorizationGrant;
use tessera_crypto::ed25519::{Signature, VerifyingKey};
use tessera_nullifier::NullifierRegistry;
use tessera_types::escrow::{EscrowParams, EscrowView};
use tessera_types::sponsored::SponsoredTransaction;
use tessera_types::{Address, Amount, AssetId, ChainId, EscrowId, Hash, Timestamp};
use tracing::{info, warn};

use crate::escrow::Escrow;
use crate::events::EscrowEvent;
use crate::guards::{UsedNonces, WithdrawGuards};
use crate::ledger::Ledger;
use crate::request::{Payout, RangeWithdrawal, SecretReveal};
use crate::{EscrowError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// All escrows deployed by one authority on one chain.
pub struct EscrowFactory {
    chain_id: ChainId,
    relayer_key: VerifyingKey,
    nullifiers: Arc<NullifierRegistry>,
    nonces: UsedNonces,
    escrows: RwLock<HashMap<EscrowId, Arc<Mutex<Escrow>>>>,
    executed: Mutex<HashSet<Hash>>,
    ledger: Mutex<Ledger>,
    events: Mutex<Vec<EscrowEvent>>,
    sequence: AtomicU64,
}

impl EscrowFactory {
    /// A factory trusting grants signed by `relayer_key`.
    pub fn new(chain_id: ChainId, relayer_key: VerifyingKey) -> Self {
        Self::with_registry(chain_id, relayer_key, Arc::new(NullifierRegistry::new()))
    }

    /// A factory over an existing nullifier registry.
    pub fn with_registry(
        chain_id: ChainId,
        relayer_key: VerifyingKey,
        nullifiers: Arc<NullifierRegistry>,
    ) -> Self {
        Self {
            chain_id,
            relayer_key,
            nullifiers,
            nonces: UsedNonces::new(),
            escrows: RwLock::new(HashMap::new()),
            executed: Mutex::new(HashSet::new()),
            ledger: Mutex::new(Ledger::new()),
            events: Mutex::new(Vec::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn relayer_key(&self) -> VerifyingKey {
        self.relayer_key
    }

    pub fn nullifiers(&self) -> Arc<NullifierRegistry> {
        Arc::clone(&self.nullifiers)
    }

    /// Credit free funds to `owner`, e.g. from a bridge or faucet.
    pub fn deposit(&self, owner: Address, asset: AssetId, amount: Amount) {
        lock(&self.ledger).credit(owner, asset, amount);
    }

    /// Lock `params.total_amount` of `funder`'s balance in a new escrow.
    pub fn create_escrow(
        &self,
        funder: &Address,
        params: EscrowParams,
        now: Timestamp,
    ) -> Result<EscrowId> {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let id = EscrowId::derive(&self.chain_id, sequence, &params.merkle_root);
        let escrow = Escrow::create(id, params, now)?;

        lock(&self.ledger).debit(funder, &escrow.asset, escrow.total_amount)?;
        self.emit(EscrowEvent::Created {
            escrow_id: id,
            kind: escrow.kind,
            maker: escrow.maker,
            merkle_root: escrow.merkle_root,
            num_parts: escrow.num_parts,
            total_amount: escrow.total_amount,
            at: now,
        });
        info!(
            chain = %self.chain_id,
            escrow_id = %id,
            kind = ?escrow.kind,
            total = %escrow.total_amount,
            parts = escrow.num_parts,
            "escrow created"
        );

        self.escrows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(escrow)));
        Ok(id)
    }

    /// Execute a sponsored creation: the maker's funds, the sponsor's gas.
    ///
    /// Both signatures must verify over the transaction digest and the
    /// declared addresses must derive from the declared keys. Each
    /// transaction executes at most once.
    pub fn execute_sponsored(
        &self,
        tx: &SponsoredTransaction,
        maker_signature: &Signature,
        sponsor_signature: &Signature,
        now: Timestamp,
    ) -> Result<EscrowId> {
        if tx.chain_id != self.chain_id {
            return Err(EscrowError::WrongChain(tx.chain_id.to_string()));
        }
        if !tx.addresses_match_keys()
            || !tx.verify_sender(maker_signature)
            || !tx.verify_sponsor(sponsor_signature)
        {
            warn!(chain = %self.chain_id, "sponsored transaction signature rejected");
            return Err(EscrowError::InvalidSignature);
        }
        if tx.params.maker != tx.sender {
            return Err(EscrowError::UnauthorizedCaller);
        }

        let digest = tx.digest();
        let mut executed = lock(&self.executed);
        if executed.contains(&digest) {
            return Err(EscrowError::AlreadyExecuted);
        }
        let id = self.create_escrow(&tx.sender, tx.params.clone(), now)?;
        executed.insert(digest);

        info!(
            escrow_id = %id,
            sender = %tx.sender,
            sponsor = %tx.gas_sponsor,
            "sponsored creation executed"
        );
        Ok(id)
    }

    /// Withdraw a granted index range. Returns the amount transferred.
    pub fn withdraw_partial_range_authorized(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        request: &RangeWithdrawal,
        grant: &AuthorizationGrant,
        now: Timestamp,
    ) -> Result<Amount> {
        let handle = self.escrow_handle(escrow_id)?;
        let mut escrow = lock(&handle);
        let payout = escrow.withdraw_range(request, grant, caller, &self.guards(), now)?;

        self.emit(EscrowEvent::RangeWithdrawn {
            escrow_id: *escrow_id,
            start_index: request.start.index,
            end_index: request.end.index,
            amount: payout.amount,
            recipient: payout.to,
            caller: *caller,
            nonce: grant.nonce,
            at: now,
        });
        Ok(self.pay(payout))
    }

    /// Withdraw everything with the completion secret; the escrow is deleted.
    pub fn withdraw_full_authorized(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        completion: &SecretReveal,
        grant: &AuthorizationGrant,
        now: Timestamp,
    ) -> Result<Amount> {
        let handle = self.escrow_handle(escrow_id)?;
        let mut escrow = lock(&handle);
        let payout = escrow.withdraw_full(completion, grant, caller, &self.guards(), now)?;
        self.remove(escrow_id);

        self.emit(EscrowEvent::FullyWithdrawn {
            escrow_id: *escrow_id,
            amount: payout.amount,
            recipient: payout.to,
            caller: *caller,
            nonce: grant.nonce,
            at: now,
        });
        Ok(self.pay(payout))
    }

    /// Refund the remaining balance to the maker; the escrow is deleted.
    /// Anyone may call this once cancellation has started.
    pub fn anyone_refund_to_maker(&self, escrow_id: &EscrowId, now: Timestamp) -> Result<Amount> {
        let handle = self.escrow_handle(escrow_id)?;
        let mut escrow = lock(&handle);
        let payout = escrow.refund(now)?;
        self.remove(escrow_id);

        self.emit(EscrowEvent::Refunded {
            escrow_id: *escrow_id,
            maker: payout.to,
            amount: payout.amount,
            at: now,
        });
        Ok(self.pay(payout))
    }

    /// Read-only snapshot of a live escrow.
    pub fn escrow_view(&self, escrow_id: &EscrowId, now: Timestamp) -> Result<EscrowView> {
        let handle = self.escrow_handle(escrow_id)?;
        let escrow = lock(&handle);
        Ok(escrow.view(now))
    }

    /// Percentage of a live escrow's total already filled.
    pub fn fill_percentage(&self, escrow_id: &EscrowId) -> Result<u8> {
        let handle = self.escrow_handle(escrow_id)?;
        let escrow = lock(&handle);
        Ok(escrow.fill_percentage())
    }

    pub fn is_nullifier_used(&self, nullifier: &Hash) -> bool {
        self.nullifiers.contains(nullifier)
    }

    pub fn balance_of(&self, owner: &Address, asset: &AssetId) -> Amount {
        lock(&self.ledger).balance_of(owner, asset)
    }

    /// Every event emitted so far, oldest first.
    pub fn events(&self) -> Vec<EscrowEvent> {
        lock(&self.events).clone()
    }

    /// Events for one escrow, oldest first.
    pub fn events_for(&self, escrow_id: &EscrowId) -> Vec<EscrowEvent> {
        lock(&self.events)
            .iter()
            .filter(|event| event.escrow_id() == *escrow_id)
            .cloned()
            .collect()
    }

    fn guards(&self) -> WithdrawGuards<'_> {
        WithdrawGuards {
            relayer_key: &self.relayer_key,
            nullifiers: &self.nullifiers,
            nonces: &self.nonces,
        }
    }

    fn escrow_handle(&self, escrow_id: &EscrowId) -> Result<Arc<Mutex<Escrow>>> {
        self.escrows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(escrow_id)
            .cloned()
            .ok_or(EscrowError::EscrowNotFound)
    }

    fn remove(&self, escrow_id: &EscrowId) {
        self.escrows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(escrow_id);
    }

    fn pay(&self, payout: Payout) -> Amount {
        let amount = payout.amount;
        lock(&self.ledger).credit(payout.to, payout.asset, amount);
        amount
    }

    fn emit(&self, event: EscrowEvent) {
        lock(&self.events).push(event);
    }
}

impl std::fmt::Debug for EscrowFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EscrowFactory")
            .field("chain_id", &self.chain_id)
            .field("relayer_key", &self.relayer_key)
            .field("nullifiers", &self.nullifiers.len())
            .finish()
    }
}
