//! The order state machine.
//!
//! Every change to an [`Order`] goes through [`OrderMachine::apply`], which is
//! pure: it takes the current order, one [`OrderEvent`] and the time, and
//! returns the next order plus the pushes and events the change produces. It
//! never touches a chain, the database or a key. Inputs that need those
//! (on-chain read-backs, grant signatures) are resolved by the relayer first
//! and arrive here as event data.
//!
//! ## Fill lifecycle
//!
//! ```text
//! FillRequested ──(first fill)──> AwaitingMakerSignature ──MakerSigned──┐
//!       │                                                               v
//!       └──────────(later fills)──────────────────────────> AwaitingDeployment
//!                                                                       │ DeploymentReported
//!                                                                       v
//!                      Settled <──FillSettled── Authorized <──SecretsAuthorized── AwaitingSecrets
//! ```
//!
//! Any pending stage past its deadline is abandoned on the next `Tick`, and
//! the range becomes claimable again.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tessera_auth::AuthorizationGrant;
use tessera_crypto::ed25519::{Signature, VerifyingKey};
use tessera_crypto::merkle::{self, DisclosedLeaf};
use tessera_transport::messages::{
    AuthorizedSecrets, CoSignRequest, CoSignRequested, DeploymentValidated, DisclosedEntry,
    IndexedSecret, MakerSigned, SecretsAuthorized,
};
use tessera_transport::Message;
use tessera_types::escrow::{EscrowKind, EscrowParams};
use tessera_types::events::{Event, EventType};
use tessera_types::order::{Deployment, Fill, FillStage, Order, OrderIntent, OrderStatus};
use tessera_types::sponsored::SponsoredTransaction;
use tessera_types::{pro_rata, Address, Amount, EscrowId, FillId, Timestamp, MAX_PARTS};

use crate::{CoordinatorError, Result};

/// How long each pending fill stage may take before it is abandoned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTimeouts {
    pub cosign_secs: u64,
    pub deployment_secs: u64,
    pub secrets_secs: u64,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            cosign_secs: 300,
            deployment_secs: 600,
            secrets_secs: 300,
        }
    }
}

/// Inputs to [`OrderMachine::apply`].
#[derive(Clone, Debug)]
pub enum OrderEvent {
    /// A resolver claims the next range.
    FillRequested(CoSignRequest),
    /// The maker co-signed the first fill's sponsored transaction.
    MakerSigned { fill_id: FillId, signature: Signature },
    /// The sponsored source escrow is live on chain.
    SourceEscrowCreated { fill_id: FillId, escrow_id: EscrowId },
    /// Both escrows of a fill are live and were read back from chain.
    DeploymentReported { fill_id: FillId, deployment: Deployment },
    /// The maker's disclosure checked out and the relayer signed both grants.
    SecretsAuthorized {
        fill_id: FillId,
        source_grant: AuthorizationGrant,
        destination_grant: AuthorizationGrant,
        secrets: Vec<IndexedSecret>,
    },
    /// The fill's end secret was consumed on the source chain.
    FillSettled { fill_id: FillId },
    /// Time passed: abandon stale fills, expire the order.
    Tick,
}

impl OrderEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::FillRequested(_) => "fill_requested",
            Self::MakerSigned { .. } => "maker_signed",
            Self::SourceEscrowCreated { .. } => "source_escrow_created",
            Self::DeploymentReported { .. } => "deployment_reported",
            Self::SecretsAuthorized { .. } => "secrets_authorized",
            Self::FillSettled { .. } => "fill_settled",
            Self::Tick => "tick",
        }
    }
}

/// A push for one party.
#[derive(Clone, Debug, PartialEq)]
pub struct Outbound {
    pub to: Address,
    pub message: Message,
}

/// The result of one accepted transition.
#[derive(Clone, Debug)]
pub struct Transition {
    pub order: Order,
    pub outbound: Vec<Outbound>,
    pub events: Vec<Event>,
    /// The fill created by a `FillRequested` transition.
    pub fill_id: Option<FillId>,
}

impl Transition {
    fn start(order: &Order) -> Self {
        Self {
            order: order.clone(),
            outbound: Vec::new(),
            events: Vec::new(),
            fill_id: None,
        }
    }

    /// Whether the transition changed nothing.
    pub fn is_noop(&self) -> bool {
        self.events.is_empty()
    }

    fn emit(&mut self, event_type: EventType, now: Timestamp, payload: serde_json::Value) {
        self.events.push(Event::new(
            event_type,
            Some(self.order.order_id),
            now,
            payload,
        ));
    }

    fn push(&mut self, to: Address, message: Message) {
        self.outbound.push(Outbound { to, message });
    }
}

/// Applies events to orders under a fixed set of stage timeouts.
#[derive(Clone, Copy, Debug, Default)]
pub struct OrderMachine {
    timeouts: StageTimeouts,
}

impl OrderMachine {
    pub fn new(timeouts: StageTimeouts) -> Self {
        Self { timeouts }
    }

    pub fn timeouts(&self) -> StageTimeouts {
        self.timeouts
    }

    /// Validate an intent and open it as a new order.
    pub fn open(&self, intent: OrderIntent, now: Timestamp) -> Result<Transition> {
        validate_intent(&intent, now)?;
        let order = Order::new(intent, now);
        let mut t = Transition::start(&order);
        t.emit(
            EventType::OrderCreated,
            now,
            json!({
                "source_chain": order.intent.source_chain,
                "destination_chain": order.intent.destination_chain,
                "source_amount": order.intent.source.amount.to_string(),
                "destination_amount": order.intent.destination.amount.to_string(),
                "total_parts": order.intent.total_parts,
            }),
        );
        Ok(t)
    }

    /// Apply `event` to `order` at `now`.
    ///
    /// # Errors
    ///
    /// Any error leaves `order` untouched; nothing is returned to persist.
    pub fn apply(&self, order: &Order, event: OrderEvent, now: Timestamp) -> Result<Transition> {
        let mut t = Transition::start(order);
        match event {
            OrderEvent::FillRequested(request) => self.request_fill(&mut t, request, now)?,
            OrderEvent::MakerSigned { fill_id, signature } => {
                self.maker_signed(&mut t, fill_id, signature, now)?
            }
            OrderEvent::SourceEscrowCreated { fill_id, escrow_id } => {
                source_escrow_created(&mut t, fill_id, escrow_id, now)?
            }
            OrderEvent::DeploymentReported {
                fill_id,
                deployment,
            } => self.deployment_reported(&mut t, fill_id, deployment, now)?,
            OrderEvent::SecretsAuthorized {
                fill_id,
                source_grant,
                destination_grant,
                secrets,
            } => secrets_authorized(
                &mut t,
                fill_id,
                source_grant,
                destination_grant,
                secrets,
                now,
            )?,
            OrderEvent::FillSettled { fill_id } => fill_settled(&mut t, fill_id, now)?,
            OrderEvent::Tick => tick(&mut t, now),
        }
        if !t.is_noop() {
            t.order.updated_at = now;
        }
        Ok(t)
    }

    fn request_fill(
        &self,
        t: &mut Transition,
        request: CoSignRequest,
        now: Timestamp,
    ) -> Result<()> {
        let order = &t.order;
        if order.status != OrderStatus::Open {
            return Err(CoordinatorError::OrderNotOpen(order.status));
        }
        if order.source_escrow.is_none() && order.pending_source_creation().is_some() {
            return Err(CoordinatorError::SourceEscrowPending);
        }
        if order
            .fills
            .iter()
            .any(|fill| fill.stage.is_live() && fill.stage != FillStage::Settled)
        {
            return Err(CoordinatorError::FillInProgress);
        }

        let (start, end) = (request.start_index, request.end_index);
        let expected = order.next_start_index();
        if start != expected {
            return Err(CoordinatorError::RangeNotAvailable {
                expected,
                start,
            });
        }
        if end < start || end > order.completion_index() {
            return Err(CoordinatorError::InvalidRange { start, end });
        }
        request
            .resolver_public_key
            .verify(&request.claim_message(&order.order_id), &request.claim_signature)
            .map_err(|_| CoordinatorError::InvalidSignature)?;

        let (stage, stage_deadline) = match order.source_escrow {
            None => {
                if now >= order.intent.deadline {
                    return Err(CoordinatorError::DeadlineExpired);
                }
                let (Some(tx), Some(sponsor_signature)) =
                    (&request.sponsored_tx, &request.sponsor_signature)
                else {
                    return Err(CoordinatorError::MissingSponsoredTransaction);
                };
                check_sponsored(&order.intent, tx, &request.resolver_public_key)?;
                if !tx.verify_sponsor(sponsor_signature) {
                    return Err(CoordinatorError::InvalidSignature);
                }
                (
                    FillStage::AwaitingMakerSignature,
                    now.saturating_add(self.timeouts.cosign_secs),
                )
            }
            Some(_) => {
                if request.sponsored_tx.is_some() {
                    return Err(CoordinatorError::UnexpectedSponsoredTransaction);
                }
                if now > order.intent.windows.source.withdrawal_end {
                    return Err(CoordinatorError::DeadlineExpired);
                }
                (
                    FillStage::AwaitingDeployment,
                    now.saturating_add(self.timeouts.deployment_secs),
                )
            }
        };

        let (source_amount, destination_amount) = fill_amounts(order, start, end)?;
        let resolver = request.resolver();
        let attempt = u32::try_from(order.fills.len()).unwrap_or(u32::MAX);
        let fill_id = FillId::derive(&order.order_id, &resolver, start, attempt);
        let fill = Fill {
            fill_id,
            resolver,
            resolver_destination_address: request.resolver_destination_address,
            resolver_public_key: request.resolver_public_key,
            start_index: start,
            end_index: end,
            source_amount,
            destination_amount,
            stage,
            sponsored_tx: request.sponsored_tx,
            sponsor_signature: request.sponsor_signature,
            maker_signature: None,
            deployment: None,
            grant_nonces: Vec::new(),
            stage_deadline,
            abandon_reason: None,
            created_at: now,
        };

        if let (Some(tx), Some(sponsor_signature)) = (&fill.sponsored_tx, fill.sponsor_signature) {
            let requested = CoSignRequested {
                order_id: t.order.order_id,
                fill_id,
                resolver,
                start_index: start,
                end_index: end,
                source_amount,
                sponsored_tx: tx.clone(),
                sponsor_signature,
            };
            t.push(
                t.order.intent.maker_source_address,
                Message::CoSignRequested(requested),
            );
        }
        t.order.fills.push(fill);
        t.fill_id = Some(fill_id);
        t.emit(
            EventType::FillRequested,
            now,
            json!({
                "fill_id": fill_id,
                "resolver": resolver,
                "start_index": start,
                "end_index": end,
                "source_amount": source_amount.to_string(),
                "destination_amount": destination_amount.to_string(),
            }),
        );

        if t.order.is_fully_claimed() {
            t.order.status = OrderStatus::Claimed;
            t.emit(EventType::OrderClaimed, now, json!({ "fill_id": fill_id }));
        }
        Ok(())
    }

    fn maker_signed(
        &self,
        t: &mut Transition,
        fill_id: FillId,
        signature: Signature,
        now: Timestamp,
    ) -> Result<()> {
        let deadline = now.saturating_add(self.timeouts.deployment_secs);
        let order_id = t.order.order_id;
        let fill = fill_in_stage(&mut t.order, &fill_id, FillStage::AwaitingMakerSignature)?;
        let (Some(tx), Some(sponsor_signature)) = (&fill.sponsored_tx, fill.sponsor_signature)
        else {
            return Err(CoordinatorError::MissingSponsoredTransaction);
        };
        if !tx.verify_sender(&signature) {
            return Err(CoordinatorError::InvalidSignature);
        }

        let signed = MakerSigned {
            order_id,
            fill_id,
            sponsored_tx: tx.clone(),
            maker_signature: signature,
            sponsor_signature,
        };
        let resolver = fill.resolver;
        fill.maker_signature = Some(signature);
        fill.stage = FillStage::AwaitingDeployment;
        fill.stage_deadline = deadline;

        t.push(resolver, Message::MakerSigned(signed));
        t.emit(EventType::MakerSigned, now, json!({ "fill_id": fill_id }));
        Ok(())
    }

    fn deployment_reported(
        &self,
        t: &mut Transition,
        fill_id: FillId,
        deployment: Deployment,
        now: Timestamp,
    ) -> Result<()> {
        let fill = t
            .order
            .fill(&fill_id)
            .ok_or(CoordinatorError::FillNotFound)?;
        expect_stage(fill, FillStage::AwaitingDeployment)?;
        check_deployment(&t.order, fill, &deployment)?;

        match t.order.source_escrow {
            Some(existing) if existing != deployment.source_escrow => {
                return Err(CoordinatorError::SourceEscrowMismatch);
            }
            Some(_) => {}
            None => {
                if fill.sponsored_tx.is_none() || fill.maker_signature.is_none() {
                    return Err(CoordinatorError::SourceEscrowPending);
                }
                record_source_escrow(t, fill_id, deployment.source_escrow, now);
            }
        }

        let deadline = now.saturating_add(self.timeouts.secrets_secs);
        let fill = fill_in_stage(&mut t.order, &fill_id, FillStage::AwaitingDeployment)?;
        fill.deployment = Some(deployment.clone());
        fill.stage = FillStage::AwaitingSecrets;
        fill.stage_deadline = deadline;
        let (resolver, start, end) = (fill.resolver, fill.start_index, fill.end_index);

        let validated = DeploymentValidated {
            order_id: t.order.order_id,
            fill_id,
            start_index: start,
            end_index: end,
            deployment: deployment.clone(),
        };
        t.push(
            t.order.intent.maker_source_address,
            Message::DeploymentValidated(validated.clone()),
        );
        t.push(resolver, Message::DeploymentValidated(validated));
        t.emit(
            EventType::DeploymentValidated,
            now,
            json!({
                "fill_id": fill_id,
                "source_escrow": deployment.source_escrow,
                "destination_escrow": deployment.destination_escrow,
            }),
        );
        Ok(())
    }
}

fn source_escrow_created(
    t: &mut Transition,
    fill_id: FillId,
    escrow_id: EscrowId,
    now: Timestamp,
) -> Result<()> {
    let fill = t
        .order
        .fill(&fill_id)
        .ok_or(CoordinatorError::FillNotFound)?;
    expect_stage(fill, FillStage::AwaitingDeployment)?;
    if fill.sponsored_tx.is_none() || fill.maker_signature.is_none() {
        return Err(CoordinatorError::MissingSponsoredTransaction);
    }
    match t.order.source_escrow {
        Some(existing) if existing != escrow_id => Err(CoordinatorError::SourceEscrowMismatch),
        Some(_) => Ok(()),
        None => {
            record_source_escrow(t, fill_id, escrow_id, now);
            Ok(())
        }
    }
}

fn record_source_escrow(t: &mut Transition, fill_id: FillId, escrow_id: EscrowId, now: Timestamp) {
    t.order.source_escrow = Some(escrow_id);
    t.emit(
        EventType::SourceEscrowCreated,
        now,
        json!({ "fill_id": fill_id, "escrow_id": escrow_id }),
    );
}

fn secrets_authorized(
    t: &mut Transition,
    fill_id: FillId,
    source_grant: AuthorizationGrant,
    destination_grant: AuthorizationGrant,
    secrets: Vec<IndexedSecret>,
    now: Timestamp,
) -> Result<()> {
    let public_withdrawal_end = t.order.intent.windows.source.public_withdrawal_end;
    let leaf_hashes = t.order.intent.leaf_hashes.clone();
    let order_id = t.order.order_id;
    let maker = t.order.intent.maker_source_address;

    let fill = fill_in_stage(&mut t.order, &fill_id, FillStage::AwaitingSecrets)?;
    let deployment = fill
        .deployment
        .clone()
        .ok_or(CoordinatorError::WrongStage {
            expected: FillStage::AwaitingSecrets,
            actual: FillStage::AwaitingDeployment,
        })?;
    check_grant(
        &source_grant,
        &deployment.source_escrow,
        &fill.resolver,
        fill.start_index,
        fill.end_index,
    )?;
    check_grant(
        &destination_grant,
        &deployment.destination_escrow,
        &fill.resolver,
        1,
        1,
    )?;

    fill.grant_nonces = vec![source_grant.nonce, destination_grant.nonce];
    fill.stage = FillStage::Authorized;
    fill.stage_deadline = public_withdrawal_end;
    let (resolver, start, end, source_amount) =
        (fill.resolver, fill.start_index, fill.end_index, fill.source_amount);

    let revealed: Vec<u32> = secrets.iter().map(|s| s.index).collect();
    t.emit(
        EventType::SecretsProvided,
        now,
        json!({ "fill_id": fill_id, "revealed": revealed }),
    );
    for grant in [&source_grant, &destination_grant] {
        t.emit(
            EventType::GrantIssued,
            now,
            json!({
                "fill_id": fill_id,
                "escrow_id": grant.escrow_id,
                "resolver": grant.authorized_resolver,
                "start_index": grant.start_index,
                "end_index": grant.end_index,
                "nonce": grant.nonce,
            }),
        );
    }

    t.push(
        resolver,
        Message::AuthorizedSecrets(AuthorizedSecrets {
            order_id,
            fill_id,
            source_escrow: deployment.source_escrow,
            source_amount,
            source_grant,
            destination_escrow: deployment.destination_escrow,
            destination_grant,
            secrets,
            leaf_hashes,
        }),
    );
    t.push(
        maker,
        Message::SecretsAuthorized(SecretsAuthorized {
            order_id,
            fill_id,
            start_index: start,
            end_index: end,
        }),
    );
    t.emit(
        EventType::SecretsAuthorized,
        now,
        json!({ "fill_id": fill_id, "start_index": start, "end_index": end }),
    );
    Ok(())
}

fn fill_settled(t: &mut Transition, fill_id: FillId, now: Timestamp) -> Result<()> {
    let total_parts = t.order.total_parts();
    let fill = fill_in_stage(&mut t.order, &fill_id, FillStage::Authorized)?;
    fill.stage = FillStage::Settled;
    let parts = fill.part_count(total_parts);

    t.order.filled_parts = t.order.filled_parts.saturating_add(parts).min(total_parts);
    t.emit(
        EventType::FillSettled,
        now,
        json!({ "fill_id": fill_id, "parts": parts, "filled_parts": t.order.filled_parts }),
    );
    if t.order.filled_parts >= total_parts {
        t.order.status = OrderStatus::Completed;
        t.emit(EventType::OrderCompleted, now, json!({}));
    }
    Ok(())
}

fn tick(t: &mut Transition, now: Timestamp) {
    if t.order.status.is_terminal() {
        return;
    }

    if is_expired(&t.order, now) {
        abandon_pending(t, now, |_| true, "order expired");
        t.order.status = OrderStatus::Expired;
        t.emit(EventType::OrderExpired, now, json!({}));
        return;
    }

    abandon_pending(t, now, |fill| now > fill.stage_deadline, "stage timed out");
    if t.order.status == OrderStatus::Claimed && !t.order.is_fully_claimed() {
        t.order.status = OrderStatus::Open;
        t.emit(
            EventType::OrderReopened,
            now,
            json!({ "next_start_index": t.order.next_start_index() }),
        );
    }
}

/// Past the source public window no withdrawal can happen; before the source
/// escrow exists, past the creation deadline none can be created.
fn is_expired(order: &Order, now: Timestamp) -> bool {
    if now > order.intent.windows.source.public_withdrawal_end {
        return true;
    }
    let awaiting_execution = order
        .pending_source_creation()
        .is_some_and(|fill| fill.maker_signature.is_some());
    order.source_escrow.is_none() && now >= order.intent.deadline && !awaiting_execution
}

fn abandon_pending<F>(t: &mut Transition, now: Timestamp, select: F, reason: &str)
where
    F: Fn(&Fill) -> bool,
{
    let mut abandoned = Vec::new();
    for fill in t.order.fills.iter_mut() {
        if fill.stage.is_pending() && select(&*fill) {
            let detail = format!("{reason} in {:?}", fill.stage);
            fill.stage = FillStage::Abandoned;
            fill.abandon_reason = Some(detail.clone());
            abandoned.push((fill.fill_id, fill.resolver, detail));
        }
    }
    for (fill_id, resolver, detail) in abandoned {
        t.emit(
            EventType::FillAbandoned,
            now,
            json!({ "fill_id": fill_id, "resolver": resolver, "reason": detail }),
        );
    }
}

fn fill_in_stage<'a>(
    order: &'a mut Order,
    fill_id: &FillId,
    expected: FillStage,
) -> Result<&'a mut Fill> {
    let fill = order
        .fill_mut(fill_id)
        .ok_or(CoordinatorError::FillNotFound)?;
    expect_stage(fill, expected)?;
    Ok(fill)
}

fn expect_stage(fill: &Fill, expected: FillStage) -> Result<()> {
    if fill.stage != expected {
        return Err(CoordinatorError::WrongStage {
            expected,
            actual: fill.stage,
        });
    }
    Ok(())
}

fn check_grant(
    grant: &AuthorizationGrant,
    escrow_id: &EscrowId,
    resolver: &Address,
    start: u32,
    end: u32,
) -> Result<()> {
    use tessera_auth::AuthError;

    if grant.escrow_id != *escrow_id {
        return Err(AuthError::EscrowMismatch.into());
    }
    if grant.authorized_resolver != *resolver {
        return Err(AuthError::ResolverMismatch.into());
    }
    if !grant.covers(start, end) {
        return Err(AuthError::RangeMismatch {
            granted_start: grant.start_index,
            granted_end: grant.end_index,
            start,
            end,
        }
        .into());
    }
    Ok(())
}

/// Check an order intent before it is accepted.
///
/// # Errors
///
/// - [`CoordinatorError::InvalidParts`] unless `1 <= total_parts <= 20`
/// - [`CoordinatorError::InvalidLeafCount`] unless there are `total_parts + 1` leaves
/// - [`CoordinatorError::DuplicateLeaf`] if any leaf repeats
/// - [`CoordinatorError::InvalidMerkleRoot`] if the leaves do not reproduce the root
/// - [`CoordinatorError::InvalidAmount`] for zero amounts or an indivisible source amount
/// - [`CoordinatorError::MakerMismatch`] if the source address is not the key's
/// - [`CoordinatorError::SameChain`] if both legs would share one factory
/// - [`CoordinatorError::InvalidTimeWindows`] / [`CoordinatorError::DeadlineExpired`]
pub fn validate_intent(intent: &OrderIntent, now: Timestamp) -> Result<()> {
    // Both legs hash-lock the same leaves; one nullifier registry would let
    // the destination withdrawal burn the secret the source leg needs.
    if intent.source_chain == intent.destination_chain {
        return Err(CoordinatorError::SameChain(intent.source_chain.clone()));
    }

    let parts = intent.total_parts;
    if !(1..=MAX_PARTS).contains(&parts) {
        return Err(CoordinatorError::InvalidParts(parts));
    }

    let expected = parts as usize + 1;
    if intent.leaf_hashes.len() != expected {
        return Err(CoordinatorError::InvalidLeafCount {
            expected,
            actual: intent.leaf_hashes.len(),
        });
    }
    let mut seen = HashSet::with_capacity(expected);
    for (position, leaf) in intent.leaf_hashes.iter().enumerate() {
        if !seen.insert(leaf) {
            return Err(CoordinatorError::DuplicateLeaf(position as u32 + 1));
        }
    }
    if merkle::build_root(&intent.leaf_hashes)? != intent.merkle_root {
        return Err(CoordinatorError::InvalidMerkleRoot);
    }

    let source = intent.source.amount;
    if source == 0 || intent.destination.amount == 0 || source % Amount::from(parts) != 0 {
        return Err(CoordinatorError::InvalidAmount);
    }
    if intent.maker_source_address != Address::from_public_key(&intent.maker_public_key) {
        return Err(CoordinatorError::MakerMismatch);
    }

    let windows = &intent.windows;
    if !windows.source.is_ordered() || !windows.destination.is_ordered() {
        return Err(CoordinatorError::InvalidTimeWindows(
            "boundaries must strictly increase",
        ));
    }
    if windows.destination.cancellation_end >= windows.source.cancellation_end {
        return Err(CoordinatorError::InvalidTimeWindows(
            "destination cancellation must end before source cancellation",
        ));
    }
    if windows.source.withdrawal_end <= now || windows.destination.withdrawal_end <= now {
        return Err(CoordinatorError::InvalidTimeWindows(
            "withdrawal window already closed",
        ));
    }
    if intent.deadline <= now {
        return Err(CoordinatorError::DeadlineExpired);
    }
    if intent.deadline > windows.source.withdrawal_end {
        return Err(CoordinatorError::InvalidTimeWindows(
            "deadline must fall inside the source withdrawal window",
        ));
    }
    Ok(())
}

/// The source escrow an intent commits to.
pub fn source_params(intent: &OrderIntent) -> EscrowParams {
    EscrowParams {
        kind: EscrowKind::SourcePartialFill,
        maker: intent.maker_source_address,
        recipient: None,
        asset: intent.source.asset.clone(),
        merkle_root: intent.merkle_root,
        windows: intent.windows.source,
        num_parts: intent.total_parts,
        total_amount: intent.source.amount,
        deadline: intent.deadline,
    }
}

/// Check a sponsored transaction against the intent it claims to execute.
pub fn check_sponsored(
    intent: &OrderIntent,
    tx: &SponsoredTransaction,
    sponsor: &VerifyingKey,
) -> Result<()> {
    if tx.chain_id != intent.source_chain {
        return Err(CoordinatorError::SponsoredMismatch("chain"));
    }
    if tx.sender != intent.maker_source_address || tx.sender_public_key != intent.maker_public_key
    {
        return Err(CoordinatorError::SponsoredMismatch("sender"));
    }
    if tx.sponsor_public_key != *sponsor {
        return Err(CoordinatorError::SponsoredMismatch("gas sponsor"));
    }
    if !tx.addresses_match_keys() {
        return Err(CoordinatorError::SponsoredMismatch("addresses"));
    }
    if tx.params != source_params(intent) {
        return Err(CoordinatorError::SponsoredMismatch("escrow parameters"));
    }
    Ok(())
}

/// Check a reported deployment against the order and the fill's range.
pub fn check_deployment(order: &Order, fill: &Fill, deployment: &Deployment) -> Result<()> {
    let intent = &order.intent;
    let mismatch =
        |what: &str| -> Result<()> { Err(CoordinatorError::DeploymentMismatch(what.to_string())) };
    if deployment.source_chain != intent.source_chain
        || deployment.destination_chain != intent.destination_chain
    {
        return mismatch("chain");
    }
    if Some(deployment.hashlock) != order.leaf_at(fill.end_index) {
        return mismatch("hashlock is not the leaf at the fill's end index");
    }
    if deployment.source_windows != intent.windows.source {
        return mismatch("source windows");
    }
    if deployment.destination_windows != intent.windows.destination {
        return mismatch("destination windows");
    }
    Ok(())
}

/// Source and destination amounts of the range `start..=end`.
///
/// Destination amounts are differences of cumulative pro-rata shares, so the
/// fills of an order always add up to the full destination amount.
pub fn fill_amounts(order: &Order, start: u32, end: u32) -> Result<(Amount, Amount)> {
    let intent = &order.intent;
    if start == 0 {
        return Err(CoordinatorError::InvalidRange { start, end });
    }
    let cumulative = |index: u32| -> Option<Amount> {
        if index == 0 {
            Some(0)
        } else {
            order.max_cumulative_fill(index)
        }
    };
    let last = end.min(order.total_parts());
    let (Some(upper), Some(lower)) = (cumulative(last), cumulative(start - 1)) else {
        return Err(CoordinatorError::InvalidRange { start, end });
    };
    let source_amount = upper - lower;

    let share = |cum: Amount| pro_rata(intent.destination.amount, cum, intent.source.amount);
    let destination_amount = match (share(upper), share(lower)) {
        (Some(hi), Some(lo)) => hi - lo,
        _ => return Err(CoordinatorError::InvalidAmount),
    };
    if source_amount == 0 || destination_amount == 0 {
        return Err(CoordinatorError::InvalidAmount);
    }
    Ok((source_amount, destination_amount))
}

/// Indices the maker reveals in the clear for a fill over `start..=end`.
pub fn revealed_indices(total_parts: u32, start: u32, end: u32) -> Vec<u32> {
    let mut indices: Vec<u32> = (start..=end.min(total_parts)).collect();
    if end == total_parts + 1 {
        indices.push(end);
    }
    indices
}

/// Check a staged disclosure for `fill_id` and return the revealed secrets.
///
/// Every index in [`revealed_indices`] must carry a secret hashing to its
/// committed leaf, every other index only a hash, and the reconstructed root
/// must equal the committed root.
pub fn check_disclosure(
    order: &Order,
    fill_id: &FillId,
    entries: &[DisclosedEntry],
) -> Result<Vec<IndexedSecret>> {
    let fill = order.fill(fill_id).ok_or(CoordinatorError::FillNotFound)?;
    expect_stage(fill, FillStage::AwaitingSecrets)?;

    let total_parts = order.total_parts();
    let expected = order.intent.leaf_hashes.len();
    if entries.len() != expected {
        return Err(CoordinatorError::InvalidDisclosure(format!(
            "expected {expected} entries, got {}",
            entries.len()
        )));
    }

    let reveal = revealed_indices(total_parts, fill.start_index, fill.end_index);
    let mut secrets = Vec::with_capacity(reveal.len());
    let mut disclosure = Vec::with_capacity(entries.len());
    for (index, entry) in (1u32..).zip(entries) {
        let must_reveal = reveal.contains(&index);
        match (must_reveal, entry) {
            (true, DisclosedEntry::Secret(secret)) => {
                if order.leaf_at(index) != Some(secret.leaf()) {
                    return Err(CoordinatorError::InvalidDisclosure(format!(
                        "secret at index {index} does not match its leaf"
                    )));
                }
                secrets.push(IndexedSecret {
                    index,
                    secret: secret.clone(),
                });
                disclosure.push(DisclosedLeaf::Revealed(secret));
            }
            (true, DisclosedEntry::Hash(_)) => {
                return Err(CoordinatorError::InvalidDisclosure(format!(
                    "index {index} must be revealed"
                )));
            }
            (false, DisclosedEntry::Secret(_)) => {
                return Err(CoordinatorError::InvalidDisclosure(format!(
                    "index {index} is outside the validated range"
                )));
            }
            (false, DisclosedEntry::Hash(hash)) => disclosure.push(DisclosedLeaf::Hashed(*hash)),
        }
    }

    if merkle::reconstruct_root(&disclosure)? != order.intent.merkle_root {
        return Err(CoordinatorError::InvalidDisclosure(
            "reconstructed root does not match the commitment".to_string(),
        ));
    }
    Ok(secrets)
}
