//! Resolver role.
//!
//! A resolver claims a range, sponsors the gas of the source escrow creation
//! (first fill only), funds a destination escrow for its share, and after
//! authorization withdraws on both chains.

use tessera_crypto::ed25519::{KeyPair, Signature, VerifyingKey};
use tessera_escrow::{RangeWithdrawal, SecretReveal};
use tessera_transport::messages::{
    claim_message, AuthorizedSecrets, CoSignRequest, DeploymentAck, ExecuteOrder, ExecuteStage,
    IndexedSecret, MakerSigned, ReportDeployment, SubscribeEvents,
};
use tessera_types::escrow::EscrowParams;
use tessera_types::events::EventFilter;
use tessera_types::order::{Deployment, OrderIntent};
use tessera_types::sponsored::SponsoredTransaction;
use tessera_types::{Address, Amount, EscrowId, FillId, OrderId, Timestamp};
use tracing::info;

use crate::chain::ChainAdapter;
use crate::order::source_params;
use crate::{CoordinatorError, Result};

/// A resolver: one signing key and a funding address on the destination chain.
pub struct Resolver {
    keys: KeyPair,
    destination_address: Address,
}

impl Resolver {
    pub fn new(keys: KeyPair, destination_address: Address) -> Self {
        Self {
            keys,
            destination_address,
        }
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keys.verifying_key
    }

    /// Source-chain address. Grants name it; source withdrawals pay it.
    pub fn address(&self) -> Address {
        Address::from_public_key(&self.keys.verifying_key)
    }

    /// Funds destination escrows and receives their refunds.
    pub fn destination_address(&self) -> Address {
        self.destination_address
    }

    pub fn subscribe(&self, now: Timestamp, filter: Option<EventFilter>) -> SubscribeEvents {
        SubscribeEvents::signed(&self.keys.signing_key, now, filter)
    }

    /// The gasless source escrow creation for `intent`, signed as sponsor.
    pub fn build_sponsored(
        &self,
        intent: &OrderIntent,
        nonce: u64,
    ) -> (SponsoredTransaction, Signature) {
        let tx = SponsoredTransaction {
            chain_id: intent.source_chain.clone(),
            sender: intent.maker_source_address,
            sender_public_key: intent.maker_public_key,
            gas_sponsor: self.address(),
            sponsor_public_key: self.keys.verifying_key,
            params: source_params(intent),
            nonce,
        };
        let signature = self.keys.signing_key.sign(&tx.digest());
        (tx, signature)
    }

    /// Claim `start..=end` of an order whose source escrow already exists.
    pub fn claim(&self, order_id: OrderId, start: u32, end: u32) -> ExecuteOrder {
        self.claim_request(order_id, start, end, None)
    }

    /// Claim the first range of an order, carrying the sponsored creation.
    pub fn claim_first(
        &self,
        intent: &OrderIntent,
        start: u32,
        end: u32,
        nonce: u64,
    ) -> ExecuteOrder {
        let sponsored = self.build_sponsored(intent, nonce);
        self.claim_request(intent.order_id(), start, end, Some(sponsored))
    }

    fn claim_request(
        &self,
        order_id: OrderId,
        start: u32,
        end: u32,
        sponsored: Option<(SponsoredTransaction, Signature)>,
    ) -> ExecuteOrder {
        let claim_signature = self.keys.signing_key.sign(&claim_message(
            &order_id,
            &self.destination_address,
            start,
            end,
        ));
        let (sponsored_tx, sponsor_signature) = match sponsored {
            Some((tx, signature)) => (Some(tx), Some(signature)),
            None => (None, None),
        };
        ExecuteOrder {
            order_id,
            stage: ExecuteStage::CoSignRequest(CoSignRequest {
                resolver_public_key: self.keys.verifying_key,
                resolver_destination_address: self.destination_address,
                start_index: start,
                end_index: end,
                claim_signature,
                sponsored_tx,
                sponsor_signature,
            }),
        }
    }

    /// Submit the fully signed sponsored creation to the source chain.
    pub async fn execute_source(
        &self,
        chain: &dyn ChainAdapter,
        signed: &MakerSigned,
    ) -> Result<EscrowId> {
        let escrow_id = chain
            .execute_sponsored(
                &signed.sponsored_tx,
                &signed.maker_signature,
                &signed.sponsor_signature,
            )
            .await?;
        info!(order_id = %signed.order_id, escrow_id = %escrow_id, "source escrow executed");
        Ok(escrow_id)
    }

    /// Tell the relayer the source escrow is live.
    pub fn acknowledge(&self, order_id: OrderId, fill_id: FillId, source_escrow: EscrowId) -> ExecuteOrder {
        ExecuteOrder {
            order_id,
            stage: ExecuteStage::DeploymentAck(DeploymentAck {
                fill_id,
                source_escrow,
            }),
        }
    }

    /// Destination escrow for a fill ending at `end_index`: locked to that
    /// index's leaf, paying the maker, refundable to this resolver.
    pub fn destination_params(
        &self,
        intent: &OrderIntent,
        end_index: u32,
        amount: Amount,
    ) -> Result<EscrowParams> {
        let hashlock = leaf_at(intent, end_index)?;
        let windows = intent.windows.destination;
        Ok(EscrowParams::destination(
            self.destination_address,
            intent.maker_destination_address,
            intent.destination.asset.clone(),
            hashlock,
            windows,
            amount,
            windows.withdrawal_end,
        ))
    }

    /// Fund the destination escrow of a fill.
    pub async fn deploy_destination(
        &self,
        chain: &dyn ChainAdapter,
        intent: &OrderIntent,
        end_index: u32,
        amount: Amount,
    ) -> Result<EscrowId> {
        let params = self.destination_params(intent, end_index, amount)?;
        let escrow_id = chain
            .create_escrow(&self.destination_address, params)
            .await?;
        info!(
            chain = %chain.chain_id(),
            escrow_id = %escrow_id,
            end_index,
            amount = %amount,
            "destination escrow deployed"
        );
        Ok(escrow_id)
    }

    /// Describe both legs of a fill to the relayer.
    pub fn report(
        &self,
        intent: &OrderIntent,
        fill_id: FillId,
        end_index: u32,
        source_escrow: EscrowId,
        destination_escrow: EscrowId,
    ) -> Result<ReportDeployment> {
        Ok(ReportDeployment {
            order_id: intent.order_id(),
            fill_id,
            deployment: Deployment {
                source_chain: intent.source_chain.clone(),
                source_escrow,
                destination_chain: intent.destination_chain.clone(),
                destination_escrow,
                hashlock: leaf_at(intent, end_index)?,
                source_windows: intent.windows.source,
                destination_windows: intent.windows.destination,
            },
        })
    }

    /// Range withdrawal on the source escrow: the lowest and highest
    /// released secrets, proven against the full leaf list.
    pub fn source_withdrawal(&self, authorized: &AuthorizedSecrets) -> Result<RangeWithdrawal> {
        let (first, last) = range_ends(&authorized.secrets)?;
        Ok(RangeWithdrawal {
            start: SecretReveal::prove(first.index, first.secret.clone(), &authorized.leaf_hashes)?,
            end: SecretReveal::prove(last.index, last.secret.clone(), &authorized.leaf_hashes)?,
            desired_amount: authorized.source_amount,
        })
    }

    /// Withdrawal of the single-part destination escrow with the fill's end
    /// secret.
    pub fn destination_withdrawal(
        &self,
        authorized: &AuthorizedSecrets,
        amount: Amount,
    ) -> Result<RangeWithdrawal> {
        let (_, last) = range_ends(&authorized.secrets)?;
        let reveal = SecretReveal::prove(1, last.secret.clone(), &[last.secret.leaf()])?;
        Ok(RangeWithdrawal {
            start: reveal.clone(),
            end: reveal,
            desired_amount: amount,
        })
    }

    /// Withdraw both legs of an authorized fill. Returns the source and
    /// destination amounts moved.
    pub async fn withdraw(
        &self,
        source: &dyn ChainAdapter,
        destination: &dyn ChainAdapter,
        authorized: &AuthorizedSecrets,
        destination_amount: Amount,
    ) -> Result<(Amount, Amount)> {
        let caller = self.address();
        let to_maker = destination
            .withdraw_range(
                &caller,
                &authorized.destination_escrow,
                &self.destination_withdrawal(authorized, destination_amount)?,
                &authorized.destination_grant,
            )
            .await?;
        let to_resolver = source
            .withdraw_range(
                &caller,
                &authorized.source_escrow,
                &self.source_withdrawal(authorized)?,
                &authorized.source_grant,
            )
            .await?;
        info!(
            fill_id = %authorized.fill_id,
            source = %to_resolver,
            destination = %to_maker,
            "fill withdrawn on both chains"
        );
        Ok((to_resolver, to_maker))
    }
}

impl std::fmt::Debug for Resolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver")
            .field("address", &self.address())
            .field("destination_address", &self.destination_address)
            .finish()
    }
}

fn leaf_at(intent: &OrderIntent, index: u32) -> Result<tessera_types::Hash> {
    usize::try_from(index)
        .ok()
        .and_then(|i| i.checked_sub(1))
        .and_then(|position| intent.leaf_hashes.get(position).copied())
        .ok_or(CoordinatorError::InvalidRange {
            start: index,
            end: index,
        })
}

fn range_ends(secrets: &[IndexedSecret]) -> Result<(&IndexedSecret, &IndexedSecret)> {
    let first = secrets.iter().min_by_key(|s| s.index);
    let last = secrets.iter().max_by_key(|s| s.index);
    match (first, last) {
        (Some(first), Some(last)) => Ok((first, last)),
        _ => Err(CoordinatorError::InvalidDisclosure(
            "no secrets released".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LocalChain;
    use crate::clock::ManualClock;
    use crate::order::check_sponsored;
    use std::sync::Arc;
    use tessera_auth::sign_grant;
    use tessera_crypto::merkle;
    use tessera_crypto::secret::Secret;
    use tessera_types::escrow::{EscrowKind, TimeWindows};
    use tessera_types::order::{AssetAmount, OrderWindows};
    use tessera_types::{AssetId, ChainId};

    fn intent(secrets: &[Secret]) -> OrderIntent {
        let maker = KeyPair::from_bytes(&[1; 32]);
        let leaf_hashes = merkle::leaves_for_secrets(secrets);
        OrderIntent {
            source_chain: ChainId::new("src"),
            destination_chain: ChainId::new("dst"),
            maker_source_address: Address::from_public_key(&maker.verifying_key),
            maker_destination_address: Address::new([9; 32]),
            maker_public_key: maker.verifying_key,
            source: AssetAmount {
                asset: AssetId::new("sui"),
                amount: 400,
            },
            destination: AssetAmount {
                asset: AssetId::new("eth"),
                amount: 40,
            },
            total_parts: secrets.len() as u32 - 1,
            merkle_root: merkle::build_root(&leaf_hashes).expect("root"),
            leaf_hashes,
            windows: OrderWindows {
                source: TimeWindows::from_durations(1_000, 100, 100, 100),
                destination: TimeWindows::from_durations(1_000, 50, 50, 50),
            },
            deadline: 1_050,
            created_at: 1_000,
        }
    }

    #[test]
    fn test_sponsored_transaction_matches_intent() {
        let secrets: Vec<Secret> = (1..=5u8).map(|i| Secret::from_bytes([i; 32])).collect();
        let intent = intent(&secrets);
        let resolver = Resolver::new(KeyPair::from_bytes(&[2; 32]), Address::new([3; 32]));
        let (tx, signature) = resolver.build_sponsored(&intent, 7);
        assert!(check_sponsored(&intent, &tx, &resolver.public_key()).is_ok());
        assert!(tx.verify_sponsor(&signature));
        assert_eq!(tx.params.kind, EscrowKind::SourcePartialFill);
    }

    #[test]
    fn test_claim_signature_covers_range() {
        let resolver = Resolver::new(KeyPair::from_bytes(&[2; 32]), Address::new([3; 32]));
        let order_id = OrderId::new([4; 32]);
        let ExecuteOrder { stage, .. } = resolver.claim(order_id, 3, 5);
        let request = match stage {
            ExecuteStage::CoSignRequest(request) => Some(request),
            _ => None,
        }
        .expect("co-sign request");
        assert!(request.sponsored_tx.is_none());
        assert!(request
            .resolver_public_key
            .verify(&request.claim_message(&order_id), &request.claim_signature)
            .is_ok());
    }

    #[tokio::test]
    async fn test_destination_leg_pays_maker() {
        let secrets: Vec<Secret> = (1..=5u8).map(|i| Secret::from_bytes([i; 32])).collect();
        let intent = intent(&secrets);
        let relayer = KeyPair::from_bytes(&[8; 32]);
        let clock = Arc::new(ManualClock::new(1_000));
        let chain = LocalChain::new(ChainId::new("dst"), relayer.verifying_key, clock.clone());
        let resolver = Resolver::new(KeyPair::from_bytes(&[2; 32]), Address::new([3; 32]));
        chain.deposit(resolver.destination_address(), AssetId::new("eth"), 20);

        let escrow = resolver
            .deploy_destination(&chain, &intent, 2, 20)
            .await
            .expect("deploy");
        let view = chain.escrow_view(&escrow).await.expect("view");
        assert_eq!(view.merkle_root, intent.leaf_hashes[1]);
        assert_eq!(view.recipient, Some(intent.maker_destination_address));

        let authorized = AuthorizedSecrets {
            order_id: intent.order_id(),
            fill_id: FillId::new([6; 32]),
            source_escrow: EscrowId::new([7; 32]),
            source_amount: 200,
            source_grant: sign_grant(
                EscrowId::new([7; 32]),
                resolver.address(),
                1,
                2,
                1,
                &relayer.signing_key,
            ),
            destination_escrow: escrow,
            destination_grant: sign_grant(escrow, resolver.address(), 1, 1, 2, &relayer.signing_key),
            secrets: vec![
                IndexedSecret {
                    index: 1,
                    secret: secrets[0].clone(),
                },
                IndexedSecret {
                    index: 2,
                    secret: secrets[1].clone(),
                },
            ],
            leaf_hashes: intent.leaf_hashes.clone(),
        };

        let source = resolver.source_withdrawal(&authorized).expect("source");
        assert_eq!((source.start.index, source.end.index), (1, 2));
        assert!(source.end.verifies(&intent.merkle_root));

        let request = resolver
            .destination_withdrawal(&authorized, 20)
            .expect("destination");
        let paid = chain
            .withdraw_range(
                &resolver.address(),
                &escrow,
                &request,
                &authorized.destination_grant,
            )
            .await
            .expect("withdraw");
        assert_eq!(paid, 20);
        assert_eq!(
            chain
                .balance_of(&intent.maker_destination_address, &AssetId::new("eth"))
                .await
                .expect("balance"),
            20
        );
        assert!(chain
            .is_nullifier_used(&secrets[1].nullifier())
            .await
            .expect("nullifier"));
    }
}
