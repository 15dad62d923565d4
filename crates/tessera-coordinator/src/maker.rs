//! Maker role.
//!
//! The maker owns the order's `N + 1` secrets. It commits to their leaves at
//! intake, co-signs the sponsored creation of the source escrow once it has
//! checked the transaction against its own intent, and discloses secrets one
//! validated fill at a time.

use std::sync::Arc;

use rusqlite::Connection;
use tessera_crypto::ed25519::{KeyPair, VerifyingKey};
use tessera_crypto::merkle;
use tessera_crypto::secret::{generate_secrets, Secret};
use tessera_db::queries::secrets as secret_store;
use tessera_transport::messages::{
    CoSignRequested, DeploymentValidated, DisclosedEntry, ExecuteOrder, ExecuteStage,
    MakerSignature, ProvideSecrets, SubscribeEvents,
};
use tessera_types::events::EventFilter;
use tessera_types::order::{AssetAmount, OrderIntent, OrderWindows};
use tessera_types::{Address, ChainId, OrderId, Timestamp};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::order::{check_sponsored, revealed_indices};
use crate::{CoordinatorError, Result};

/// What the maker wants to swap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderParams {
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source: AssetAmount,
    pub destination: AssetAmount,
    pub total_parts: u32,
    pub windows: OrderWindows,
    pub deadline: Timestamp,
}

/// An order as the maker holds it: the public intent plus the secrets.
#[derive(Clone)]
pub struct MakerOrder {
    pub order_id: OrderId,
    pub intent: OrderIntent,
    secrets: Vec<Secret>,
}

impl MakerOrder {
    /// The secret at a 1-based index.
    pub fn secret(&self, index: u32) -> Option<&Secret> {
        let position = usize::try_from(index).ok()?.checked_sub(1)?;
        self.secrets.get(position)
    }

    pub fn total_parts(&self) -> u32 {
        self.intent.total_parts
    }
}

impl std::fmt::Debug for MakerOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MakerOrder")
            .field("order_id", &self.order_id)
            .field("total_parts", &self.intent.total_parts)
            .finish_non_exhaustive()
    }
}

/// A maker: one signing key for the source chain and a payout address on
/// the destination chain.
pub struct Maker {
    keys: KeyPair,
    destination_address: Address,
    store: Option<Arc<Mutex<Connection>>>,
}

impl Maker {
    pub fn new(keys: KeyPair, destination_address: Address) -> Self {
        Self {
            keys,
            destination_address,
            store: None,
        }
    }

    /// Persist secrets in `conn` so a restarted maker can still disclose.
    pub fn with_store(mut self, conn: Arc<Mutex<Connection>>) -> Self {
        self.store = Some(conn);
        self
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keys.verifying_key
    }

    /// Source-chain address; it funds the source escrow and receives refunds.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.keys.verifying_key)
    }

    pub fn destination_address(&self) -> Address {
        self.destination_address
    }

    /// A signed subscription for this maker's pushes.
    pub fn subscribe(&self, now: Timestamp, filter: Option<EventFilter>) -> SubscribeEvents {
        SubscribeEvents::signed(&self.keys.signing_key, now, filter)
    }

    /// Generate `N + 1` secrets and commit to their leaves.
    ///
    /// # Errors
    ///
    /// - [`CoordinatorError::InvalidParts`] for a zero part count
    /// - [`CoordinatorError::Db`] if the secrets cannot be persisted
    pub async fn create_order(&self, params: OrderParams, now: Timestamp) -> Result<MakerOrder> {
        if params.total_parts == 0 {
            return Err(CoordinatorError::InvalidParts(params.total_parts));
        }
        let secrets = generate_secrets(params.total_parts as usize + 1);
        self.commit(params, secrets, now).await
    }

    /// Build the order for already chosen secrets.
    pub async fn commit(
        &self,
        params: OrderParams,
        secrets: Vec<Secret>,
        now: Timestamp,
    ) -> Result<MakerOrder> {
        let leaf_hashes = merkle::leaves_for_secrets(&secrets);
        let merkle_root = merkle::build_root(&leaf_hashes)?;
        let intent = OrderIntent {
            source_chain: params.source_chain,
            destination_chain: params.destination_chain,
            maker_source_address: self.address(),
            maker_destination_address: self.destination_address,
            maker_public_key: self.keys.verifying_key,
            source: params.source,
            destination: params.destination,
            total_parts: params.total_parts,
            merkle_root,
            leaf_hashes,
            windows: params.windows,
            deadline: params.deadline,
            created_at: now,
        };
        let order_id = intent.order_id();

        if let Some(store) = &self.store {
            secret_store::store(&*store.lock().await, &order_id, &secrets)?;
        }
        info!(order_id = %order_id, parts = intent.total_parts, "order committed");
        Ok(MakerOrder {
            order_id,
            intent,
            secrets,
        })
    }

    /// Rebuild a persisted order from its intent.
    ///
    /// # Errors
    ///
    /// [`CoordinatorError::OrderNotFound`] without a store, or if the stored
    /// secrets do not reproduce the intent's leaves.
    pub async fn restore(&self, intent: OrderIntent) -> Result<MakerOrder> {
        let store = self.store.as_ref().ok_or(CoordinatorError::OrderNotFound)?;
        let order_id = intent.order_id();
        let secrets = secret_store::load(&*store.lock().await, &order_id)?;
        if merkle::leaves_for_secrets(&secrets) != intent.leaf_hashes {
            return Err(CoordinatorError::OrderNotFound);
        }
        Ok(MakerOrder {
            order_id,
            intent,
            secrets,
        })
    }

    /// Co-sign the sponsored creation of the source escrow.
    ///
    /// The transaction must create exactly the escrow the intent describes,
    /// with this maker as sender and the requesting resolver as sponsor.
    pub fn cosign(&self, order: &MakerOrder, request: &CoSignRequested) -> Result<ExecuteOrder> {
        if request.order_id != order.order_id {
            return Err(CoordinatorError::OrderNotFound);
        }
        let tx = &request.sponsored_tx;
        if tx.gas_sponsor != request.resolver {
            return Err(CoordinatorError::SponsoredMismatch("gas sponsor"));
        }
        check_sponsored(&order.intent, tx, &tx.sponsor_public_key)?;
        if !tx.verify_sponsor(&request.sponsor_signature) {
            return Err(CoordinatorError::InvalidSignature);
        }

        let signature = self.keys.signing_key.sign(&tx.digest());
        debug!(order_id = %order.order_id, fill_id = %request.fill_id, "sponsored creation co-signed");
        Ok(ExecuteOrder {
            order_id: order.order_id,
            stage: ExecuteStage::MakerSignature(MakerSignature {
                fill_id: request.fill_id,
                signature,
            }),
        })
    }

    /// Disclose the secrets of one validated fill, hashes for the rest.
    ///
    /// The maker re-checks the validated deployment against its own intent
    /// before revealing anything.
    pub async fn disclose(
        &self,
        order: &MakerOrder,
        validated: &DeploymentValidated,
        now: Timestamp,
    ) -> Result<ProvideSecrets> {
        if validated.order_id != order.order_id {
            return Err(CoordinatorError::OrderNotFound);
        }
        let (start, end) = (validated.start_index, validated.end_index);
        let completion = order.total_parts() + 1;
        if start == 0 || start > end || end > completion {
            return Err(CoordinatorError::InvalidRange { start, end });
        }
        let deployment = &validated.deployment;
        if order.secret(end).map(Secret::leaf) != Some(deployment.hashlock) {
            return Err(CoordinatorError::DeploymentMismatch(
                "hashlock is not the leaf at the fill's end index".to_string(),
            ));
        }
        if deployment.source_windows != order.intent.windows.source
            || deployment.destination_windows != order.intent.windows.destination
        {
            return Err(CoordinatorError::DeploymentMismatch("windows".to_string()));
        }

        let reveal = revealed_indices(order.total_parts(), start, end);
        let entries = (1u32..)
            .zip(&order.secrets)
            .map(|(index, secret)| {
                if reveal.contains(&index) {
                    DisclosedEntry::Secret(secret.clone())
                } else {
                    DisclosedEntry::Hash(secret.leaf())
                }
            })
            .collect();

        if let Some(store) = &self.store {
            secret_store::mark_disclosed(&*store.lock().await, &order.order_id, &reveal, now)?;
        }
        info!(
            order_id = %order.order_id,
            fill_id = %validated.fill_id,
            start,
            end,
            revealed = reveal.len(),
            "secrets disclosed"
        );
        Ok(ProvideSecrets {
            order_id: order.order_id,
            fill_id: validated.fill_id,
            entries,
        })
    }
}

impl std::fmt::Debug for Maker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Maker")
            .field("address", &self.address())
            .field("destination_address", &self.destination_address)
            .field("persistent", &self.store.is_some())
            .finish()
    }
}
