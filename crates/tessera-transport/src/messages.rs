//! Message kinds and payloads for the Tessera protocol.
//!
//! [`Message`] is adjacently tagged: `{"kind": "CREATE_ORDER", "payload": {...}}`.
//! Requests flow from makers and resolvers to the relayer, pushes flow from the
//! relayer to registered parties, and responses answer a request by id.

use serde::{Deserialize, Serialize};
use serde_with::hex::Hex;
use serde_with::{serde_as, DisplayFromStr};
use tessera_auth::AuthorizationGrant;
use tessera_crypto::ed25519::{Signature, SigningKey, VerifyingKey};
use tessera_crypto::secret::Secret;
use tessera_types::events::{Event, EventFilter};
use tessera_types::order::{AssetAmount, Deployment, Order, OrderIntent, OrderStatus};
use tessera_types::sponsored::SponsoredTransaction;
use tessera_types::{Address, Amount, ChainId, EscrowId, FillId, Hash, OrderId, Timestamp};

/// Domain prefix of the bytes a resolver signs to claim a fill range.
pub const CLAIM_DOMAIN: &[u8] = b"tessera-claim-v1";

/// Domain prefix of the bytes a party signs to subscribe.
pub const SUBSCRIBE_DOMAIN: &[u8] = b"tessera-subscribe-v1";

/// Every message kind exchanged on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    // Requests
    CreateOrder(OrderIntent),
    ExecuteOrder(ExecuteOrder),
    ProvideSecrets(ProvideSecrets),
    ReportDeployment(ReportDeployment),
    GetOrders(GetOrders),
    GetOrderStatus(GetOrderStatus),
    SubscribeEvents(SubscribeEvents),

    // Pushes
    AuthorizedSecrets(AuthorizedSecrets),
    DeploymentValidated(DeploymentValidated),
    SecretsAuthorized(SecretsAuthorized),
    CoSignRequested(CoSignRequested),
    MakerSigned(MakerSigned),
    Event(Event),

    // Responses
    Ack,
    OrderAccepted(OrderAccepted),
    FillAccepted(FillAccepted),
    Orders(OrderList),
    OrderStatus(Box<Order>),
    Subscribed(Subscribed),
    Rejected(Rejection),
}

impl Message {
    /// The wire tag of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateOrder(_) => "CREATE_ORDER",
            Self::ExecuteOrder(_) => "EXECUTE_ORDER",
            Self::ProvideSecrets(_) => "PROVIDE_SECRETS",
            Self::ReportDeployment(_) => "REPORT_DEPLOYMENT",
            Self::GetOrders(_) => "GET_ORDERS",
            Self::GetOrderStatus(_) => "GET_ORDER_STATUS",
            Self::SubscribeEvents(_) => "SUBSCRIBE_EVENTS",
            Self::AuthorizedSecrets(_) => "AUTHORIZED_SECRETS",
            Self::DeploymentValidated(_) => "DEPLOYMENT_VALIDATED",
            Self::SecretsAuthorized(_) => "SECRETS_AUTHORIZED",
            Self::CoSignRequested(_) => "CO_SIGN_REQUESTED",
            Self::MakerSigned(_) => "MAKER_SIGNED",
            Self::Event(_) => "EVENT",
            Self::Ack => "ACK",
            Self::OrderAccepted(_) => "ORDER_ACCEPTED",
            Self::FillAccepted(_) => "FILL_ACCEPTED",
            Self::Orders(_) => "ORDERS",
            Self::OrderStatus(_) => "ORDER_STATUS",
            Self::Subscribed(_) => "SUBSCRIBED",
            Self::Rejected(_) => "REJECTED",
        }
    }

    /// Whether this kind is sent by a party to the relayer.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            Self::CreateOrder(_)
                | Self::ExecuteOrder(_)
                | Self::ProvideSecrets(_)
                | Self::ReportDeployment(_)
                | Self::GetOrders(_)
                | Self::GetOrderStatus(_)
                | Self::SubscribeEvents(_)
        )
    }

    pub fn rejected(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected(Rejection::new(kind, reason))
    }
}

/// `EXECUTE_ORDER`: one stage of fill execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOrder {
    pub order_id: OrderId,
    pub stage: ExecuteStage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecuteStage {
    /// Resolver claims a range. The first fill of an order also carries the
    /// sponsored source-escrow creation for the maker to co-sign.
    CoSignRequest(CoSignRequest),
    /// Maker co-signature over the sponsored transaction digest.
    MakerSignature(MakerSignature),
    /// Resolver reports the sponsored source escrow was executed on chain.
    DeploymentAck(DeploymentAck),
}

impl ExecuteStage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CoSignRequest(_) => "CO_SIGN_REQUEST",
            Self::MakerSignature(_) => "MAKER_SIGNATURE",
            Self::DeploymentAck(_) => "DEPLOYMENT_ACK",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoSignRequest {
    pub resolver_public_key: VerifyingKey,
    pub resolver_destination_address: Address,
    pub start_index: u32,
    pub end_index: u32,
    /// Resolver signature over [`CoSignRequest::claim_message`].
    pub claim_signature: Signature,
    #[serde(default)]
    pub sponsored_tx: Option<SponsoredTransaction>,
    #[serde(default)]
    pub sponsor_signature: Option<Signature>,
}

impl CoSignRequest {
    /// Bytes the resolver signs to claim `start_index..=end_index` of an order.
    pub fn claim_message(&self, order_id: &OrderId) -> Vec<u8> {
        claim_message(
            order_id,
            &self.resolver_destination_address,
            self.start_index,
            self.end_index,
        )
    }

    pub fn resolver(&self) -> Address {
        Address::from_public_key(&self.resolver_public_key)
    }
}

/// `CLAIM_DOMAIN || order_id || destination_address || start (u32 BE) || end (u32 BE)`
pub fn claim_message(
    order_id: &OrderId,
    destination_address: &Address,
    start_index: u32,
    end_index: u32,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(CLAIM_DOMAIN.len() + 72);
    out.extend_from_slice(CLAIM_DOMAIN);
    out.extend_from_slice(order_id.as_bytes());
    out.extend_from_slice(destination_address.as_bytes());
    out.extend_from_slice(&start_index.to_be_bytes());
    out.extend_from_slice(&end_index.to_be_bytes());
    out
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerSignature {
    pub fill_id: FillId,
    pub signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentAck {
    pub fill_id: FillId,
    pub source_escrow: EscrowId,
}

/// One position of the maker's staged disclosure, in index order.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisclosedEntry {
    Secret(Secret),
    Hash(#[serde_as(as = "Hex")] Hash),
}

impl DisclosedEntry {
    pub fn leaf(&self) -> Hash {
        match self {
            Self::Secret(secret) => secret.leaf(),
            Self::Hash(hash) => *hash,
        }
    }

    pub fn secret(&self) -> Option<&Secret> {
        match self {
            Self::Secret(secret) => Some(secret),
            Self::Hash(_) => None,
        }
    }
}

/// `PROVIDE_SECRETS`: the maker's staged reveal for one validated fill.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvideSecrets {
    pub order_id: OrderId,
    pub fill_id: FillId,
    /// `total_parts + 1` entries; entry `k` is index `k + 1`.
    pub entries: Vec<DisclosedEntry>,
}

/// `REPORT_DEPLOYMENT`: both escrows of a fill are live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportDeployment {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub deployment: Deployment,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrders {
    #[serde(default)]
    pub status: Option<OrderStatus>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetOrderStatus {
    pub order_id: OrderId,
}

/// `SUBSCRIBE_EVENTS`: register the connection as the party owning
/// `public_key` for pushes. The signature covers [`subscribe_message`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeEvents {
    pub public_key: VerifyingKey,
    pub timestamp: Timestamp,
    pub signature: Signature,
    #[serde(default)]
    pub filter: Option<EventFilter>,
}

impl SubscribeEvents {
    /// A signed subscription for `signer` at `timestamp`.
    pub fn signed(signer: &SigningKey, timestamp: Timestamp, filter: Option<EventFilter>) -> Self {
        let public_key = signer.verifying_key();
        Self {
            public_key,
            timestamp,
            signature: signer.sign(&subscribe_message(&public_key, timestamp)),
            filter,
        }
    }

    pub fn party(&self) -> Address {
        Address::from_public_key(&self.public_key)
    }

    pub fn verify(&self) -> bool {
        self.public_key
            .verify(
                &subscribe_message(&self.public_key, self.timestamp),
                &self.signature,
            )
            .is_ok()
    }
}

/// `SUBSCRIBE_DOMAIN || public_key || timestamp (u64 BE)`
pub fn subscribe_message(public_key: &VerifyingKey, timestamp: Timestamp) -> Vec<u8> {
    let mut out = Vec::with_capacity(SUBSCRIBE_DOMAIN.len() + 40);
    out.extend_from_slice(SUBSCRIBE_DOMAIN);
    out.extend_from_slice(public_key.as_bytes());
    out.extend_from_slice(&timestamp.to_be_bytes());
    out
}

/// A secret released to a resolver, at its 1-based index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexedSecret {
    pub index: u32,
    pub secret: Secret,
}

/// `AUTHORIZED_SECRETS`: everything a resolver needs to withdraw on both chains.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedSecrets {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub source_escrow: EscrowId,
    #[serde_as(as = "DisplayFromStr")]
    pub source_amount: Amount,
    pub source_grant: AuthorizationGrant,
    pub destination_escrow: EscrowId,
    pub destination_grant: AuthorizationGrant,
    pub secrets: Vec<IndexedSecret>,
    #[serde_as(as = "Vec<Hex>")]
    pub leaf_hashes: Vec<Hash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentValidated {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub start_index: u32,
    pub end_index: u32,
    pub deployment: Deployment,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsAuthorized {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub start_index: u32,
    pub end_index: u32,
}

/// Pushed to the maker: a resolver asks for a co-signature.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoSignRequested {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub resolver: Address,
    pub start_index: u32,
    pub end_index: u32,
    #[serde_as(as = "DisplayFromStr")]
    pub source_amount: Amount,
    pub sponsored_tx: SponsoredTransaction,
    pub sponsor_signature: Signature,
}

/// Pushed to the resolver: the sponsored transaction is fully signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerSigned {
    pub order_id: OrderId,
    pub fill_id: FillId,
    pub sponsored_tx: SponsoredTransaction,
    pub maker_signature: Signature,
    pub sponsor_signature: Signature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub order_id: OrderId,
}

#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillAccepted {
    pub order_id: OrderId,
    pub fill_id: FillId,
    #[serde_as(as = "DisplayFromStr")]
    pub source_amount: Amount,
    #[serde_as(as = "DisplayFromStr")]
    pub destination_amount: Amount,
}

/// Public view of an order in `ORDERS`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
    pub source: AssetAmount,
    pub destination: AssetAmount,
    pub total_parts: u32,
    pub filled_parts: u32,
    pub next_start_index: u32,
    pub source_escrow: Option<EscrowId>,
}

impl From<&Order> for OrderSummary {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.order_id,
            status: order.status,
            source_chain: order.intent.source_chain.clone(),
            destination_chain: order.intent.destination_chain.clone(),
            source: order.intent.source.clone(),
            destination: order.intent.destination.clone(),
            total_parts: order.intent.total_parts,
            filled_parts: order.filled_parts,
            next_start_index: order.next_start_index(),
            source_escrow: order.source_escrow,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderList {
    pub orders: Vec<OrderSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscribed {
    pub party: Address,
    pub subscription_id: u64,
}

/// Structured rejection: a stable SCREAMING_SNAKE_CASE `kind` plus the
/// human-readable `reason`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: String,
    pub reason: String,
}

impl Rejection {
    pub fn new(kind: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tessera_crypto::ed25519::KeyPair;

    #[test]
    fn test_adjacent_tagging() {
        let msg = Message::GetOrderStatus(GetOrderStatus {
            order_id: OrderId::new([0xAA; 32]),
        });
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(
            value,
            json!({"kind": "GET_ORDER_STATUS", "payload": {"order_id": "aa".repeat(32)}})
        );
        assert_eq!(msg.kind(), "GET_ORDER_STATUS");
        assert!(msg.is_request());
    }

    #[test]
    fn test_unit_ack_and_rejection() {
        let ack = serde_json::to_value(&Message::Ack).expect("serialize");
        assert_eq!(ack, json!({"kind": "ACK"}));
        let parsed: Message = serde_json::from_value(ack).expect("parse");
        assert_eq!(parsed, Message::Ack);

        let rejected = Message::rejected("INVALID_MERKLE_ROOT", "root mismatch");
        assert_eq!(
            serde_json::to_value(&rejected).expect("serialize"),
            json!({"kind": "REJECTED", "payload": {"kind": "INVALID_MERKLE_ROOT", "reason": "root mismatch"}})
        );
        assert!(!rejected.is_request());
    }

    #[test]
    fn test_execute_stage_is_tagged() {
        let msg = Message::ExecuteOrder(ExecuteOrder {
            order_id: OrderId::new([1; 32]),
            stage: ExecuteStage::DeploymentAck(DeploymentAck {
                fill_id: FillId::new([2; 32]),
                source_escrow: EscrowId::new([3; 32]),
            }),
        });
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["kind"], "EXECUTE_ORDER");
        assert_eq!(value["payload"]["stage"]["stage"], "DEPLOYMENT_ACK");
        assert_eq!(value["payload"]["stage"]["source_escrow"], "03".repeat(32));

        let parsed: Message = serde_json::from_value(value).expect("parse");
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_disclosure_entries() {
        let secret = Secret::from_bytes([5; 32]);
        let entries = vec![
            DisclosedEntry::Secret(secret.clone()),
            DisclosedEntry::Hash([6; 32]),
        ];
        let value = serde_json::to_value(&entries).expect("serialize");
        assert_eq!(
            value,
            json!([{"secret": "05".repeat(32)}, {"hash": "06".repeat(32)}])
        );
        assert_eq!(entries[0].leaf(), secret.leaf());
        assert_eq!(entries[1].leaf(), [6; 32]);
        assert!(entries[1].secret().is_none());
    }

    #[test]
    fn test_subscription_signature() {
        let party = KeyPair::from_bytes(&[3; 32]);
        let mut subscribe = SubscribeEvents::signed(&party.signing_key, 1_000, None);
        assert!(subscribe.verify());
        assert_eq!(subscribe.party(), Address::from_public_key(&party.verifying_key));

        subscribe.timestamp += 1;
        assert!(!subscribe.verify());
    }

    #[test]
    fn test_claim_signature_binds_range() {
        let resolver = KeyPair::from_bytes(&[9; 32]);
        let order_id = OrderId::new([1; 32]);
        let mut request = CoSignRequest {
            resolver_public_key: resolver.verifying_key,
            resolver_destination_address: Address::new([4; 32]),
            start_index: 1,
            end_index: 3,
            claim_signature: resolver
                .signing_key
                .sign(&claim_message(&order_id, &Address::new([4; 32]), 1, 3)),
            sponsored_tx: None,
            sponsor_signature: None,
        };
        assert!(resolver
            .verifying_key
            .verify(&request.claim_message(&order_id), &request.claim_signature)
            .is_ok());
        assert_eq!(request.resolver(), Address::from_public_key(&resolver.verifying_key));

        request.end_index = 4;
        assert!(resolver
            .verifying_key
            .verify(&request.claim_message(&order_id), &request.claim_signature)
            .is_err());
    }
}
