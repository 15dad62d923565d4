//! The relayer: a keyed repository of orders driven through [`OrderMachine`].
//!
//! Each order sits behind its own async mutex inside an async `RwLock`ed map,
//! so independent orders progress concurrently while the stages of one order
//! are serialized. Every accepted transition is persisted before it becomes
//! visible: the in-memory order, the event bus and the party pushes only see
//! it once the snapshot (and any grants) are written.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::Connection;
use serde_json::json;
use tessera_auth::{AuthorizationGrant, GrantIssuer};
use tessera_crypto::ed25519::{SigningKey, VerifyingKey};
use tessera_db::queries::{grants, orders, settings};
use tessera_db::DbError;
use tessera_transport::messages::{
    ExecuteOrder, ExecuteStage, FillAccepted, OrderAccepted, OrderList, OrderSummary,
    ProvideSecrets, ReportDeployment, Subscribed, SubscribeEvents,
};
use tessera_transport::Message;
use tessera_types::escrow::{EscrowKind, EscrowView};
use tessera_types::events::{Event, EventType};
use tessera_types::order::{Deployment, Fill, FillStage, Order, OrderIntent, OrderStatus};
use tessera_types::{ChainId, EscrowId, FillId, OrderId};
use tokio::sync::{broadcast, mpsc, watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::chain::ChainAdapter;
use crate::clock::Clock;
use crate::events::EventBus;
use crate::order::{check_disclosure, OrderEvent, OrderMachine, StageTimeouts, Transition};
use crate::outbox::Outbox;
use crate::{CoordinatorError, Result};

/// Accepted distance between a subscription timestamp and the relayer clock.
pub const SIGNATURE_SKEW_SECS: u64 = 300;

/// Default event bus capacity.
pub const DEFAULT_EVENT_BUFFER: usize = 1024;

/// Assembles a [`SwapCoordinator`] from its injected collaborators.
pub struct CoordinatorBuilder {
    relayer_key: SigningKey,
    clock: Arc<dyn Clock>,
    timeouts: StageTimeouts,
    chains: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    db: Option<Arc<Mutex<Connection>>>,
    event_buffer: usize,
}

impl CoordinatorBuilder {
    pub fn timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Register a chain. With at least one chain registered, orders on
    /// unknown chains are refused and deployments are read back on chain.
    pub fn chain(mut self, adapter: Arc<dyn ChainAdapter>) -> Self {
        self.chains.insert(adapter.chain_id().clone(), adapter);
        self
    }

    pub fn database(mut self, conn: Arc<Mutex<Connection>>) -> Self {
        self.db = Some(conn);
        self
    }

    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Build the coordinator, reloading active orders and the grant nonce
    /// counter from the database when one is configured.
    pub async fn build(self) -> Result<SwapCoordinator> {
        let mut repository = HashMap::new();
        let mut last_nonce = 0;
        if let Some(db) = &self.db {
            let conn = db.lock().await;
            for order in orders::list_active(&conn)? {
                repository.insert(order.order_id, Arc::new(Mutex::new(order)));
            }
            last_nonce = settings::get_u64(&conn, settings::LAST_GRANT_NONCE, 0)?
                .max(grants::max_nonce(&conn)?);
            let completed = orders::count_by_status(&conn, OrderStatus::Completed)?;
            info!(
                orders = repository.len(),
                completed,
                last_nonce,
                "relayer state restored"
            );
        }

        Ok(SwapCoordinator {
            machine: OrderMachine::new(self.timeouts),
            orders: RwLock::new(repository),
            issuer: GrantIssuer::with_last_nonce(self.relayer_key, last_nonce),
            chains: self.chains,
            db: self.db,
            events: EventBus::new(self.event_buffer),
            outbox: Outbox::new(),
            clock: self.clock,
            next_subscription: AtomicU64::new(1),
        })
    }
}

/// The relayer side of the swap protocol.
pub struct SwapCoordinator {
    machine: OrderMachine,
    orders: RwLock<HashMap<OrderId, Arc<Mutex<Order>>>>,
    issuer: GrantIssuer,
    chains: HashMap<ChainId, Arc<dyn ChainAdapter>>,
    db: Option<Arc<Mutex<Connection>>>,
    events: EventBus,
    outbox: Outbox,
    clock: Arc<dyn Clock>,
    next_subscription: AtomicU64,
}

impl SwapCoordinator {
    pub fn builder(relayer_key: SigningKey, clock: Arc<dyn Clock>) -> CoordinatorBuilder {
        CoordinatorBuilder {
            relayer_key,
            clock,
            timeouts: StageTimeouts::default(),
            chains: HashMap::new(),
            db: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }

    /// The key escrow factories must trust for grants.
    pub fn relayer_key(&self) -> VerifyingKey {
        self.issuer.public_key()
    }

    pub fn last_grant_nonce(&self) -> u64 {
        self.issuer.last_nonce()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn outbox(&self) -> &Outbox {
        &self.outbox
    }

    /// Answer one request. Failures become `REJECTED` responses.
    pub async fn handle(&self, message: Message) -> Message {
        let kind = message.kind();
        let result = match message {
            Message::CreateOrder(intent) => self
                .create_order(intent)
                .await
                .map(|order_id| Message::OrderAccepted(OrderAccepted { order_id })),
            Message::ExecuteOrder(request) => self.execute_order(request).await,
            Message::ProvideSecrets(request) => {
                self.provide_secrets(request).await.map(|()| Message::Ack)
            }
            Message::ReportDeployment(request) => {
                self.report_deployment(request).await.map(|()| Message::Ack)
            }
            Message::GetOrders(query) => self.orders(query.status).await.map(Message::Orders),
            Message::GetOrderStatus(query) => self
                .order(&query.order_id)
                .await
                .map(|order| Message::OrderStatus(Box::new(order))),
            Message::SubscribeEvents(_) => {
                return Message::rejected(
                    "UNEXPECTED_MESSAGE",
                    "subscriptions are bound to a connection",
                );
            }
            other => {
                return Message::rejected(
                    "UNEXPECTED_MESSAGE",
                    format!("{} is not a request", other.kind()),
                );
            }
        };

        result.unwrap_or_else(|err| {
            warn!(kind, error = %err, "request rejected");
            Message::Rejected(err.rejection())
        })
    }

    /// `CREATE_ORDER`: validate and store a new open order.
    pub async fn create_order(&self, intent: OrderIntent) -> Result<OrderId> {
        self.require_chain(&intent.source_chain)?;
        self.require_chain(&intent.destination_chain)?;

        let order_id = intent.order_id();
        let mut repository = self.orders.write().await;
        if repository.contains_key(&order_id) || self.stored(&order_id).await?.is_some() {
            return Err(CoordinatorError::DuplicateOrder);
        }

        let t = self.machine.open(intent, self.clock.now())?;
        self.persist(&t, None).await?;
        repository.insert(order_id, Arc::new(Mutex::new(t.order.clone())));
        drop(repository);

        info!(
            order_id = %order_id,
            parts = t.order.total_parts(),
            source = %t.order.intent.source_chain,
            destination = %t.order.intent.destination_chain,
            "order created"
        );
        self.publish(t);
        Ok(order_id)
    }

    /// `EXECUTE_ORDER`: one stage of fill execution.
    pub async fn execute_order(&self, request: ExecuteOrder) -> Result<Message> {
        let order_id = request.order_id;
        match request.stage {
            ExecuteStage::CoSignRequest(claim) => {
                let t = self
                    .transition(&order_id, OrderEvent::FillRequested(claim))
                    .await?;
                let fill = t
                    .fill_id
                    .and_then(|fill_id| t.order.fill(&fill_id))
                    .ok_or(CoordinatorError::FillNotFound)?;
                Ok(Message::FillAccepted(FillAccepted {
                    order_id,
                    fill_id: fill.fill_id,
                    source_amount: fill.source_amount,
                    destination_amount: fill.destination_amount,
                }))
            }
            ExecuteStage::MakerSignature(signed) => {
                self.transition(
                    &order_id,
                    OrderEvent::MakerSigned {
                        fill_id: signed.fill_id,
                        signature: signed.signature,
                    },
                )
                .await?;
                Ok(Message::Ack)
            }
            ExecuteStage::DeploymentAck(ack) => {
                let order = self.order(&order_id).await?;
                if let Some(chain) = self.adapter(&order.intent.source_chain)? {
                    let view = chain.escrow_view(&ack.source_escrow).await.map_err(|_| {
                        CoordinatorError::DeploymentMismatch("source escrow not found".to_string())
                    })?;
                    let fill = order.fill(&ack.fill_id).ok_or(CoordinatorError::FillNotFound)?;
                    check_source_view(&order, fill, &view)?;
                }
                self.transition(
                    &order_id,
                    OrderEvent::SourceEscrowCreated {
                        fill_id: ack.fill_id,
                        escrow_id: ack.source_escrow,
                    },
                )
                .await?;
                Ok(Message::Ack)
            }
        }
    }

    /// `REPORT_DEPLOYMENT`: cross-check both legs, then ask the maker for
    /// secrets.
    pub async fn report_deployment(&self, request: ReportDeployment) -> Result<()> {
        let order = self.order(&request.order_id).await?;
        let fill = order
            .fill(&request.fill_id)
            .ok_or(CoordinatorError::FillNotFound)?;

        if let Err(err) = self.verify_deployment(&order, fill, &request.deployment).await {
            if matches!(err, CoordinatorError::DeploymentMismatch(_)) {
                warn!(
                    order_id = %order.order_id,
                    fill_id = %fill.fill_id,
                    error = %err,
                    "deployment rejected"
                );
                self.events.emit(Event::new(
                    EventType::DeploymentRejected,
                    Some(order.order_id),
                    self.clock.now(),
                    json!({ "fill_id": fill.fill_id, "reason": err.to_string() }),
                ));
            }
            return Err(err);
        }

        self.transition(
            &request.order_id,
            OrderEvent::DeploymentReported {
                fill_id: request.fill_id,
                deployment: request.deployment,
            },
        )
        .await?;
        Ok(())
    }

    /// `PROVIDE_SECRETS`: check the staged disclosure, sign both grants and
    /// release the secrets to the fill's resolver.
    pub async fn provide_secrets(&self, request: ProvideSecrets) -> Result<()> {
        let handle = self.handle_for(&request.order_id).await?;
        let mut order = handle.lock().await;

        let secrets = check_disclosure(&order, &request.fill_id, &request.entries)?;
        let fill = order
            .fill(&request.fill_id)
            .ok_or(CoordinatorError::FillNotFound)?;
        let deployment = fill
            .deployment
            .as_ref()
            .ok_or(CoordinatorError::WrongStage {
                expected: FillStage::AwaitingSecrets,
                actual: fill.stage,
            })?;

        let source_grant = self.issuer.issue(
            deployment.source_escrow,
            fill.resolver,
            fill.start_index,
            fill.end_index,
        )?;
        let destination_grant =
            self.issuer
                .issue(deployment.destination_escrow, fill.resolver, 1, 1)?;

        let t = self.machine.apply(
            &order,
            OrderEvent::SecretsAuthorized {
                fill_id: request.fill_id,
                source_grant: source_grant.clone(),
                destination_grant: destination_grant.clone(),
                secrets,
            },
            self.clock.now(),
        )?;
        self.persist(
            &t,
            Some((request.fill_id, &[source_grant, destination_grant][..])),
        )
        .await?;
        *order = t.order.clone();
        drop(order);

        info!(
            order_id = %request.order_id,
            fill_id = %request.fill_id,
            "secrets authorized"
        );
        self.publish(t);
        Ok(())
    }

    /// `GET_ORDERS`
    pub async fn orders(&self, status: Option<OrderStatus>) -> Result<OrderList> {
        let mut list: Vec<Order> = match &self.db {
            Some(db) => orders::list(&*db.lock().await, status)?,
            None => {
                let mut list = Vec::new();
                for handle in self.handles().await {
                    let order = handle.lock().await;
                    if status.map_or(true, |s| order.status == s) {
                        list.push(order.clone());
                    }
                }
                list
            }
        };
        list.sort_by_key(|order| order.created_at);
        Ok(OrderList {
            orders: list.iter().map(OrderSummary::from).collect(),
        })
    }

    /// `GET_ORDER_STATUS`
    pub async fn order(&self, order_id: &OrderId) -> Result<Order> {
        let cached = self.orders.read().await.get(order_id).cloned();
        if let Some(handle) = cached {
            return Ok(handle.lock().await.clone());
        }
        self.stored(order_id)
            .await?
            .ok_or(CoordinatorError::OrderNotFound)
    }

    /// `SUBSCRIBE_EVENTS`: authenticate the party and open its push channel.
    pub fn subscribe(
        &self,
        request: &SubscribeEvents,
    ) -> Result<(Subscribed, mpsc::UnboundedReceiver<Message>)> {
        if !request.verify() {
            return Err(CoordinatorError::InvalidSignature);
        }
        if self.clock.now().abs_diff(request.timestamp) > SIGNATURE_SKEW_SECS {
            return Err(CoordinatorError::StaleSignature);
        }
        let party = request.party();
        let receiver = self.outbox.register(party);
        let subscription_id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        info!(party = %party, subscription_id, "party subscribed");
        Ok((
            Subscribed {
                party,
                subscription_id,
            },
            receiver,
        ))
    }

    /// One sweep: settle fills whose end secret was consumed on the source
    /// chain, then abandon stale fills and expire dead orders. Returns the
    /// number of orders that changed.
    pub async fn sweep(&self) -> usize {
        let mut changed = 0;
        for handle in self.handles().await {
            let mut order = handle.lock().await;
            if order.status.is_terminal() {
                continue;
            }
            let mut touched = false;

            for fill_id in self.settled_fills(&order).await {
                match self.apply_locked(&mut order, OrderEvent::FillSettled { fill_id }).await {
                    Ok(_) => touched = true,
                    Err(err) => warn!(order_id = %order.order_id, error = %err, "settlement failed"),
                }
            }
            match self.apply_locked(&mut order, OrderEvent::Tick).await {
                Ok(t) => touched |= !t.is_noop(),
                Err(err) => warn!(order_id = %order.order_id, error = %err, "sweep failed"),
            }
            if touched {
                changed += 1;
            }
        }
        if changed > 0 {
            debug!(changed, "sweep applied");
        }
        changed
    }

    /// Sweep every `interval` until `shutdown` flips to `true`.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sweeper stopped");
                        return;
                    }
                }
            }
        }
    }

    /// Authorized fills whose end nullifier is used on the source chain.
    async fn settled_fills(&self, order: &Order) -> Vec<FillId> {
        let Ok(Some(chain)) = self.adapter(&order.intent.source_chain) else {
            return Vec::new();
        };
        let mut settled = Vec::new();
        for fill in order.fills.iter().filter(|f| f.stage == FillStage::Authorized) {
            let Some(nullifier) = order.leaf_at(fill.end_index) else {
                continue;
            };
            match chain.is_nullifier_used(&nullifier).await {
                Ok(true) => settled.push(fill.fill_id),
                Ok(false) => {}
                Err(err) => warn!(fill_id = %fill.fill_id, error = %err, "nullifier lookup failed"),
            }
        }
        settled
    }

    async fn transition(&self, order_id: &OrderId, event: OrderEvent) -> Result<Transition> {
        let handle = self.handle_for(order_id).await?;
        let mut order = handle.lock().await;
        self.apply_locked(&mut order, event).await
    }

    /// Apply, persist, then install and publish. `order` is untouched on error.
    async fn apply_locked(&self, order: &mut Order, event: OrderEvent) -> Result<Transition> {
        let name = event.name();
        let t = self.machine.apply(order, event, self.clock.now())?;
        if t.is_noop() {
            return Ok(t);
        }
        self.persist(&t, None).await?;
        *order = t.order.clone();
        info!(
            order_id = %order.order_id,
            event = name,
            status = order.status.as_str(),
            "order transition"
        );
        self.publish(t.clone());
        Ok(t)
    }

    /// Write the order snapshot, plus any grants issued for `fill_id`, in one
    /// database transaction.
    async fn persist(
        &self,
        t: &Transition,
        issued: Option<(FillId, &[AuthorizationGrant])>,
    ) -> Result<()> {
        let Some(db) = &self.db else {
            return Ok(());
        };
        let conn = db.lock().await;
        let tx = conn.unchecked_transaction().map_err(DbError::from)?;
        if let Some((fill_id, issued)) = issued {
            for grant in issued {
                grants::insert(&tx, grant, &t.order.order_id, &fill_id, t.order.updated_at)?;
                settings::raise_u64(&tx, settings::LAST_GRANT_NONCE, grant.nonce)?;
            }
        }
        orders::upsert(&tx, &t.order)?;
        tx.commit().map_err(DbError::from)?;
        Ok(())
    }

    fn publish(&self, t: Transition) {
        for event in t.events {
            self.events.emit(event);
        }
        for outbound in t.outbound {
            self.outbox.send(outbound.to, outbound.message);
        }
    }

    async fn handle_for(&self, order_id: &OrderId) -> Result<Arc<Mutex<Order>>> {
        self.orders
            .read()
            .await
            .get(order_id)
            .cloned()
            .ok_or(CoordinatorError::OrderNotFound)
    }

    async fn handles(&self) -> Vec<Arc<Mutex<Order>>> {
        self.orders.read().await.values().cloned().collect()
    }

    async fn stored(&self, order_id: &OrderId) -> Result<Option<Order>> {
        let Some(db) = &self.db else {
            return Ok(None);
        };
        match orders::get(&*db.lock().await, order_id) {
            Ok(order) => Ok(Some(order)),
            Err(DbError::NotFound(_)) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// The adapter for `chain`, `None` when no chains are registered at all.
    fn adapter(&self, chain: &ChainId) -> Result<Option<&Arc<dyn ChainAdapter>>> {
        if self.chains.is_empty() {
            return Ok(None);
        }
        self.chains
            .get(chain)
            .map(Some)
            .ok_or_else(|| CoordinatorError::UnknownChain(chain.clone()))
    }

    fn require_chain(&self, chain: &ChainId) -> Result<()> {
        self.adapter(chain).map(|_| ())
    }

    /// Read both legs back from chain and compare them with the order.
    async fn verify_deployment(
        &self,
        order: &Order,
        fill: &Fill,
        deployment: &Deployment,
    ) -> Result<()> {
        crate::order::check_deployment(order, fill, deployment)?;

        if let Some(chain) = self.adapter(&deployment.source_chain)? {
            let view = read_escrow(chain.as_ref(), &deployment.source_escrow, "source").await?;
            check_source_view(order, fill, &view)?;
        }
        if let Some(chain) = self.adapter(&deployment.destination_chain)? {
            let view =
                read_escrow(chain.as_ref(), &deployment.destination_escrow, "destination").await?;
            check_destination_view(order, fill, deployment, &view)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SwapCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwapCoordinator")
            .field("relayer_key", &self.issuer.public_key())
            .field("chains", &self.chains.keys().collect::<Vec<_>>())
            .field("persistent", &self.db.is_some())
            .field("event_sequence", &self.events.sequence())
            .finish_non_exhaustive()
    }
}

async fn read_escrow(chain: &dyn ChainAdapter, id: &EscrowId, leg: &str) -> Result<EscrowView> {
    chain
        .escrow_view(id)
        .await
        .map_err(|_| CoordinatorError::DeploymentMismatch(format!("{leg} escrow {id} not found")))
}

fn mismatch(what: &str) -> CoordinatorError {
    CoordinatorError::DeploymentMismatch(what.to_string())
}

fn check_source_view(order: &Order, fill: &Fill, view: &EscrowView) -> Result<()> {
    let intent = &order.intent;
    if view.kind != EscrowKind::SourcePartialFill {
        return Err(mismatch("source escrow kind"));
    }
    if view.merkle_root != intent.merkle_root {
        return Err(mismatch("source merkle root"));
    }
    if view.num_parts != intent.total_parts || view.total_amount != intent.source.amount {
        return Err(mismatch("source parts or amount"));
    }
    if view.maker != intent.maker_source_address {
        return Err(mismatch("source maker"));
    }
    if view.asset != intent.source.asset {
        return Err(mismatch("source asset"));
    }
    if view.windows != intent.windows.source {
        return Err(mismatch("source windows"));
    }
    if view.deadline != intent.deadline {
        return Err(mismatch("source deadline"));
    }
    if view.is_resolved {
        return Err(mismatch("source escrow already resolved"));
    }
    if view.balance < fill.source_amount {
        return Err(mismatch("source balance"));
    }
    Ok(())
}

fn check_destination_view(
    order: &Order,
    fill: &Fill,
    deployment: &Deployment,
    view: &EscrowView,
) -> Result<()> {
    let intent = &order.intent;
    if view.kind != EscrowKind::DestinationHashlock {
        return Err(mismatch("destination escrow kind"));
    }
    if view.merkle_root != deployment.hashlock {
        return Err(mismatch("destination hashlock"));
    }
    if view.recipient != Some(intent.maker_destination_address) {
        return Err(mismatch("destination recipient"));
    }
    if view.maker != fill.resolver_destination_address {
        return Err(mismatch("destination refund address"));
    }
    if view.asset != intent.destination.asset {
        return Err(mismatch("destination asset"));
    }
    if view.balance < fill.destination_amount {
        return Err(mismatch("destination amount"));
    }
    if view.windows != intent.windows.destination {
        return Err(mismatch("destination windows"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LocalChain;
    use crate::clock::ManualClock;
    use crate::maker::{Maker, MakerOrder, OrderParams};
    use crate::resolver::Resolver;
    use tessera_crypto::ed25519::KeyPair;
    use tessera_types::escrow::TimeWindows;
    use tessera_types::order::{AssetAmount, OrderWindows};
    use tessera_types::{Address, AssetId};

    const NOW: u64 = 50_000;

    struct Harness {
        clock: Arc<ManualClock>,
        coordinator: SwapCoordinator,
        maker: Maker,
    }

    async fn harness(db: Option<Arc<Mutex<Connection>>>) -> Harness {
        let clock = Arc::new(ManualClock::new(NOW));
        let mut builder = SwapCoordinator::builder(
            KeyPair::from_bytes(&[0xAA; 32]).signing_key,
            clock.clone(),
        );
        if let Some(db) = db {
            builder = builder.database(db);
        }
        Harness {
            clock,
            coordinator: builder.build().await.expect("build"),
            maker: Maker::new(KeyPair::from_bytes(&[0x01; 32]), Address::new([0x02; 32])),
        }
    }

    fn params() -> OrderParams {
        OrderParams {
            source_chain: ChainId::new("src"),
            destination_chain: ChainId::new("dst"),
            source: AssetAmount {
                asset: AssetId::new("sui"),
                amount: 1_000,
            },
            destination: AssetAmount {
                asset: AssetId::new("eth"),
                amount: 100,
            },
            total_parts: 4,
            windows: OrderWindows {
                source: TimeWindows::from_durations(NOW, 600, 600, 600),
                destination: TimeWindows::from_durations(NOW, 300, 300, 300),
            },
            deadline: NOW + 500,
        }
    }

    async fn open_order(h: &Harness) -> MakerOrder {
        let order = h.maker.create_order(params(), NOW).await.expect("create");
        let reply = h
            .coordinator
            .handle(Message::CreateOrder(order.intent.clone()))
            .await;
        assert_eq!(reply.kind(), "ORDER_ACCEPTED");
        order
    }

    #[tokio::test]
    async fn test_duplicate_order_rejected() {
        let h = harness(None).await;
        let order = open_order(&h).await;
        let reply = h
            .coordinator
            .handle(Message::CreateOrder(order.intent.clone()))
            .await;
        match reply {
            Message::Rejected(rejection) => assert_eq!(rejection.kind, "DUPLICATE_ORDER"),
            other => assert_eq!(other.kind(), "REJECTED"),
        }
    }

    #[tokio::test]
    async fn test_unknown_chain_rejected_when_chains_registered() {
        let clock = Arc::new(ManualClock::new(NOW));
        let relayer = KeyPair::from_bytes(&[0xAA; 32]);
        let chain = Arc::new(LocalChain::new(
            ChainId::new("src"),
            relayer.verifying_key,
            clock.clone(),
        ));
        let coordinator = SwapCoordinator::builder(relayer.signing_key, clock)
            .chain(chain)
            .build()
            .await
            .expect("build");
        let maker = Maker::new(KeyPair::from_bytes(&[0x01; 32]), Address::new([0x02; 32]));
        let order = maker.create_order(params(), NOW).await.expect("create");
        assert!(matches!(
            coordinator.create_order(order.intent).await,
            Err(CoordinatorError::UnknownChain(chain)) if chain.as_str() == "dst"
        ));
    }

    #[tokio::test]
    async fn test_cosign_request_is_pushed_to_maker() {
        let h = harness(None).await;
        let order = open_order(&h).await;
        let mut maker_rx = h
            .coordinator
            .subscribe(&h.maker.subscribe(NOW, None))
            .map(|(_, rx)| rx)
            .expect("subscribe");

        let resolver = Resolver::new(KeyPair::from_bytes(&[0x05; 32]), Address::new([0x06; 32]));
        let reply = h
            .coordinator
            .handle(Message::ExecuteOrder(resolver.claim_first(&order.intent, 1, 2, 1)))
            .await;
        let Message::FillAccepted(accepted) = reply else {
            unreachable!("expected FILL_ACCEPTED, got {}", reply.kind());
        };
        assert_eq!(accepted.source_amount, 500);
        assert_eq!(accepted.destination_amount, 50);

        let pushed = maker_rx.try_recv().expect("push");
        let Message::CoSignRequested(request) = pushed else {
            unreachable!("expected CO_SIGN_REQUESTED");
        };
        assert_eq!(request.fill_id, accepted.fill_id);

        let signed = h.maker.cosign(&order, &request).expect("cosign");
        assert_eq!(
            h.coordinator.handle(Message::ExecuteOrder(signed)).await,
            Message::Ack
        );
    }

    #[tokio::test]
    async fn test_stale_subscription_rejected() {
        let h = harness(None).await;
        let stale = h.maker.subscribe(NOW - SIGNATURE_SKEW_SECS - 1, None);
        assert!(matches!(
            h.coordinator.subscribe(&stale),
            Err(CoordinatorError::StaleSignature)
        ));

        let mut forged = h.maker.subscribe(NOW, None);
        forged.timestamp += 1;
        assert!(matches!(
            h.coordinator.subscribe(&forged),
            Err(CoordinatorError::InvalidSignature)
        ));
    }

    #[tokio::test]
    async fn test_sweeper_abandons_unsigned_fill() {
        let h = harness(None).await;
        let order = open_order(&h).await;
        let resolver = Resolver::new(KeyPair::from_bytes(&[0x05; 32]), Address::new([0x06; 32]));
        let reply = h
            .coordinator
            .handle(Message::ExecuteOrder(resolver.claim_first(&order.intent, 1, 5, 1)))
            .await;
        assert_eq!(reply.kind(), "FILL_ACCEPTED");
        assert_eq!(
            h.coordinator.order(&order.order_id).await.expect("order").status,
            OrderStatus::Claimed
        );

        let mut events = h.coordinator.events();
        assert_eq!(h.coordinator.sweep().await, 0);
        h.clock.advance(StageTimeouts::default().cosign_secs + 1);
        assert_eq!(h.coordinator.sweep().await, 1);

        let current = h.coordinator.order(&order.order_id).await.expect("order");
        assert_eq!(current.status, OrderStatus::Open);
        assert_eq!(current.fills[0].stage, FillStage::Abandoned);
        assert_eq!(
            events.recv().await.expect("event").event_type,
            EventType::FillAbandoned
        );
    }

    #[tokio::test]
    async fn test_orders_persist_and_reload() {
        let db = Arc::new(Mutex::new(tessera_db::open_memory().expect("db")));
        let h = harness(Some(db.clone())).await;
        let order = open_order(&h).await;
        drop(h);

        let reloaded = harness(Some(db)).await;
        let stored = reloaded
            .coordinator
            .order(&order.order_id)
            .await
            .expect("reloaded");
        assert_eq!(stored.status, OrderStatus::Open);
        let list = reloaded
            .coordinator
            .orders(Some(OrderStatus::Open))
            .await
            .expect("list");
        assert_eq!(list.orders.len(), 1);
        assert_eq!(list.orders[0].next_start_index, 1);
    }

    #[tokio::test]
    async fn test_source_view_must_be_live_and_funded() {
        let h = harness(None).await;
        let order = open_order(&h).await;
        let resolver = Resolver::new(KeyPair::from_bytes(&[0x05; 32]), Address::new([0x06; 32]));
        let reply = h
            .coordinator
            .handle(Message::ExecuteOrder(resolver.claim_first(&order.intent, 1, 2, 1)))
            .await;
        assert_eq!(reply.kind(), "FILL_ACCEPTED");
        let state = h.coordinator.order(&order.order_id).await.expect("order");
        let fill = &state.fills[0];

        let chain = LocalChain::new(
            ChainId::new("src"),
            KeyPair::from_bytes(&[0xAA; 32]).verifying_key,
            h.clock.clone(),
        );
        chain.deposit(h.maker.address(), AssetId::new("sui"), 1_000);
        let escrow = chain
            .create_escrow(&h.maker.address(), crate::order::source_params(&order.intent))
            .await
            .expect("create");
        let view = chain.escrow_view(&escrow).await.expect("view");
        assert!(check_source_view(&state, fill, &view).is_ok());

        let mut resolved = view.clone();
        resolved.is_resolved = true;
        let mut drained = view.clone();
        drained.balance = fill.source_amount - 1;
        let mut late = view;
        late.deadline += 1;
        for bad in [resolved, drained, late] {
            assert!(matches!(
                check_source_view(&state, fill, &bad),
                Err(CoordinatorError::DeploymentMismatch(_))
            ));
        }
    }
}
