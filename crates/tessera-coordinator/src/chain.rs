//! Chain access.
//!
//! The relayer and the roles only touch a chain through [`ChainAdapter`]:
//! read-backs for cross-validation and settlement detection, and the escrow
//! entry points a resolver or maker submits. [`LocalChain`] runs an
//! [`EscrowFactory`] in process and is what tests and the `local` chain kind
//! use.

use std::sync::Arc;

use async_trait::async_trait;
use tessera_auth::AuthorizationGrant;
use tessera_crypto::ed25519::{Signature, VerifyingKey};
use tessera_escrow::{EscrowFactory, RangeWithdrawal, SecretReveal};
use tessera_types::escrow::{EscrowParams, EscrowView};
use tessera_types::sponsored::SponsoredTransaction;
use tessera_types::{Address, Amount, AssetId, ChainId, EscrowId, Hash, Timestamp};

use crate::clock::Clock;
use crate::Result;

/// One chain's escrow factory, as seen from off chain.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> &ChainId;

    /// The chain's notion of the current time.
    fn now(&self) -> Timestamp;

    async fn escrow_view(&self, escrow_id: &EscrowId) -> Result<EscrowView>;

    async fn is_nullifier_used(&self, nullifier: &Hash) -> Result<bool>;

    async fn balance_of(&self, owner: &Address, asset: &AssetId) -> Result<Amount>;

    /// Lock `funder`'s balance in a new escrow.
    async fn create_escrow(&self, funder: &Address, params: EscrowParams) -> Result<EscrowId>;

    async fn execute_sponsored(
        &self,
        tx: &SponsoredTransaction,
        maker_signature: &Signature,
        sponsor_signature: &Signature,
    ) -> Result<EscrowId>;

    async fn withdraw_range(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        request: &RangeWithdrawal,
        grant: &AuthorizationGrant,
    ) -> Result<Amount>;

    async fn withdraw_full(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        completion: &SecretReveal,
        grant: &AuthorizationGrant,
    ) -> Result<Amount>;

    async fn refund(&self, escrow_id: &EscrowId) -> Result<Amount>;
}

/// An in-process chain backed by an [`EscrowFactory`].
pub struct LocalChain {
    factory: EscrowFactory,
    clock: Arc<dyn Clock>,
}

impl LocalChain {
    /// A chain trusting grants signed by `relayer_key`.
    pub fn new(chain_id: ChainId, relayer_key: VerifyingKey, clock: Arc<dyn Clock>) -> Self {
        Self {
            factory: EscrowFactory::new(chain_id, relayer_key),
            clock,
        }
    }

    /// Direct access to the factory, e.g. to inspect events.
    pub fn factory(&self) -> &EscrowFactory {
        &self.factory
    }

    /// Credit free funds to `owner`.
    pub fn deposit(&self, owner: Address, asset: AssetId, amount: Amount) {
        self.factory.deposit(owner, asset, amount);
    }
}

#[async_trait]
impl ChainAdapter for LocalChain {
    fn chain_id(&self) -> &ChainId {
        self.factory.chain_id()
    }

    fn now(&self) -> Timestamp {
        self.clock.now()
    }

    async fn escrow_view(&self, escrow_id: &EscrowId) -> Result<EscrowView> {
        Ok(self.factory.escrow_view(escrow_id, self.now())?)
    }

    async fn is_nullifier_used(&self, nullifier: &Hash) -> Result<bool> {
        Ok(self.factory.is_nullifier_used(nullifier))
    }

    async fn balance_of(&self, owner: &Address, asset: &AssetId) -> Result<Amount> {
        Ok(self.factory.balance_of(owner, asset))
    }

    async fn create_escrow(&self, funder: &Address, params: EscrowParams) -> Result<EscrowId> {
        Ok(self.factory.create_escrow(funder, params, self.now())?)
    }

    async fn execute_sponsored(
        &self,
        tx: &SponsoredTransaction,
        maker_signature: &Signature,
        sponsor_signature: &Signature,
    ) -> Result<EscrowId> {
        Ok(self
            .factory
            .execute_sponsored(tx, maker_signature, sponsor_signature, self.now())?)
    }

    async fn withdraw_range(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        request: &RangeWithdrawal,
        grant: &AuthorizationGrant,
    ) -> Result<Amount> {
        Ok(self.factory.withdraw_partial_range_authorized(
            caller,
            escrow_id,
            request,
            grant,
            self.now(),
        )?)
    }

    async fn withdraw_full(
        &self,
        caller: &Address,
        escrow_id: &EscrowId,
        completion: &SecretReveal,
        grant: &AuthorizationGrant,
    ) -> Result<Amount> {
        Ok(self
            .factory
            .withdraw_full_authorized(caller, escrow_id, completion, grant, self.now())?)
    }

    async fn refund(&self, escrow_id: &EscrowId) -> Result<Amount> {
        Ok(self.factory.anyone_refund_to_maker(escrow_id, self.now())?)
    }
}

impl std::fmt::Debug for LocalChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalChain")
            .field("chain_id", self.factory.chain_id())
            .field("now", &self.clock.now())
            .finish()
    }
}
