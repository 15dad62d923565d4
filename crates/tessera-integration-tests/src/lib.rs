//! # tessera-integration-tests
//!
//! Shared harness for the end-to-end swap flows under `tests/`.
//!
//! A [`Swap`] wires one relayer to two in-process chains that read the same
//! manual clock, so a test can walk an order through every window without
//! sleeping. Makers and resolvers talk to the relayer exactly as they would
//! over the wire: requests go through [`SwapCoordinator::handle`] and pushes
//! arrive on the party's subscription.
//!
//! Run all integration tests:
//! ```sh
//! cargo test -p tessera-integration-tests
//! ```

use std::ops::Deref;
use std::sync::Arc;

use rusqlite::Connection;
use tessera_coordinator::{
    ChainAdapter, Clock, CoordinatorError, LocalChain, Maker, MakerOrder, ManualClock, OrderParams,
    Resolver, SwapCoordinator,
};
use tessera_crypto::ed25519::{KeyPair, SigningKey};
use tessera_transport::messages::{AuthorizedSecrets, FillAccepted, SubscribeEvents};
use tessera_transport::{Message, Rejection};
use tessera_types::escrow::TimeWindows;
use tessera_types::order::{AssetAmount, OrderWindows};
use tessera_types::{Address, Amount, AssetId, ChainId, EscrowId, Timestamp};
use tokio::sync::{mpsc, Mutex};

/// Simulated start time shared by every flow.
pub const START: Timestamp = 1_700_000_000;

pub const SOURCE_CHAIN: &str = "sui-local";
pub const DESTINATION_CHAIN: &str = "eth-local";
pub const SOURCE_ASSET: &str = "sui";
pub const DESTINATION_ASSET: &str = "eth";

/// Source windows: exclusive until +1h, public until +1h30, refundable until +2h30.
pub fn source_windows() -> TimeWindows {
    TimeWindows::from_durations(START, 3_600, 1_800, 3_600)
}

/// Destination windows close well inside the source windows.
pub fn destination_windows() -> TimeWindows {
    TimeWindows::from_durations(START, 1_800, 900, 1_800)
}

/// Why a flow step failed.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("relayer rejected the request: {} ({})", .0.kind, .0.reason)]
    Rejected(Rejection),

    #[error("expected a {0} push")]
    MissingPush(&'static str),

    #[error("unexpected reply {0}")]
    UnexpectedReply(&'static str),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

impl FlowError {
    /// The wire rejection code, if the relayer refused the request.
    pub fn rejection_kind(&self) -> Option<&str> {
        match self {
            Self::Rejected(rejection) => Some(rejection.kind.as_str()),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

/// A party with its push subscription.
pub struct Connected<T> {
    role: T,
    inbox: mpsc::UnboundedReceiver<Message>,
}

impl<T> Connected<T> {
    /// Drain pushes until one matches `pick`; earlier pushes are dropped.
    pub fn take<U>(&mut self, what: &'static str, pick: impl Fn(Message) -> Option<U>) -> Result<U> {
        while let Ok(message) = self.inbox.try_recv() {
            if let Some(found) = pick(message) {
                return Ok(found);
            }
        }
        Err(FlowError::MissingPush(what))
    }

    pub fn drain(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inbox.try_recv() {
            messages.push(message);
        }
        messages
    }

    pub fn into_inner(self) -> T {
        self.role
    }
}

impl<T> Deref for Connected<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.role
    }
}

/// A fill taken through authorization.
#[derive(Debug)]
pub struct AuthorizedFill {
    pub accepted: FillAccepted,
    pub source_escrow: EscrowId,
    pub destination_escrow: EscrowId,
    pub authorized: AuthorizedSecrets,
}

/// One relayer between two local chains.
pub struct Swap {
    pub clock: Arc<ManualClock>,
    pub source: Arc<LocalChain>,
    pub destination: Arc<LocalChain>,
    pub coordinator: Arc<SwapCoordinator>,
    relayer_key: SigningKey,
}

impl Swap {
    pub async fn new() -> Result<Self> {
        Self::build(None).await
    }

    /// A relayer persisting to `db`.
    pub async fn with_database(db: Arc<Mutex<Connection>>) -> Result<Self> {
        Self::build(Some(db)).await
    }

    async fn build(db: Option<Arc<Mutex<Connection>>>) -> Result<Self> {
        let clock = Arc::new(ManualClock::new(START));
        let relayer_key = SigningKey::from_bytes(&[0xEE; 32]);
        let source = Arc::new(LocalChain::new(
            ChainId::new(SOURCE_CHAIN),
            relayer_key.verifying_key(),
            clock.clone(),
        ));
        let destination = Arc::new(LocalChain::new(
            ChainId::new(DESTINATION_CHAIN),
            relayer_key.verifying_key(),
            clock.clone(),
        ));
        let coordinator = Arc::new(
            Self::start_relayer(&relayer_key, &clock, &source, &destination, db).await?,
        );
        Ok(Self {
            clock,
            source,
            destination,
            coordinator,
            relayer_key,
        })
    }

    async fn start_relayer(
        relayer_key: &SigningKey,
        clock: &Arc<ManualClock>,
        source: &Arc<LocalChain>,
        destination: &Arc<LocalChain>,
        db: Option<Arc<Mutex<Connection>>>,
    ) -> Result<SwapCoordinator> {
        let mut builder = SwapCoordinator::builder(relayer_key.clone(), clock.clone())
            .chain(source.clone())
            .chain(destination.clone());
        if let Some(db) = db {
            builder = builder.database(db);
        }
        Ok(builder.build().await?)
    }

    /// Replace the relayer with a fresh process over the same chains and
    /// database. Parties must reconnect.
    pub async fn restart(&mut self, db: Arc<Mutex<Connection>>) -> Result<()> {
        self.coordinator = Arc::new(
            Self::start_relayer(
                &self.relayer_key,
                &self.clock,
                &self.source,
                &self.destination,
                Some(db),
            )
            .await?,
        );
        Ok(())
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn advance_to(&self, at: Timestamp) {
        self.clock.set(at);
    }

    /// A maker whose destination payout address is derived from `seed`.
    pub fn maker(&self, seed: u8) -> Maker {
        Maker::new(KeyPair::from_bytes(&[seed; 32]), Address::new([!seed; 32]))
    }

    /// A resolver holding `funds` on the destination chain.
    pub fn resolver(&self, seed: u8, funds: Amount) -> Resolver {
        let resolver = Resolver::new(KeyPair::from_bytes(&[seed; 32]), Address::new([!seed; 32]));
        self.destination.deposit(
            resolver.destination_address(),
            AssetId::new(DESTINATION_ASSET),
            funds,
        );
        resolver
    }

    pub fn connect<T>(&self, role: T, subscription: SubscribeEvents) -> Result<Connected<T>> {
        let (_, inbox) = self.coordinator.subscribe(&subscription)?;
        Ok(Connected { role, inbox })
    }

    pub fn connect_maker(&self, maker: Maker) -> Result<Connected<Maker>> {
        let subscription = maker.subscribe(self.now(), None);
        self.connect(maker, subscription)
    }

    pub fn connect_resolver(&self, resolver: Resolver) -> Result<Connected<Resolver>> {
        let subscription = resolver.subscribe(self.now(), None);
        self.connect(resolver, subscription)
    }

    /// Send one request; a `REJECTED` reply becomes [`FlowError::Rejected`].
    pub async fn request(&self, message: Message) -> Result<Message> {
        match self.coordinator.handle(message).await {
            Message::Rejected(rejection) => Err(FlowError::Rejected(rejection)),
            reply => Ok(reply),
        }
    }

    /// Fund the maker on the source chain and submit a new order.
    pub async fn open(&self, maker: &Maker, params: OrderParams) -> Result<MakerOrder> {
        self.source.deposit(
            maker.address(),
            params.source.asset.clone(),
            params.source.amount,
        );
        let order = maker.create_order(params, self.now()).await?;
        match self.request(Message::CreateOrder(order.intent.clone())).await? {
            Message::OrderAccepted(_) => Ok(order),
            other => Err(FlowError::UnexpectedReply(other.kind())),
        }
    }

    /// Claim `start..=end`; the first fill of an order sponsors its source
    /// escrow.
    pub async fn claim(
        &self,
        resolver: &Resolver,
        order: &MakerOrder,
        start: u32,
        end: u32,
    ) -> Result<FillAccepted> {
        let current = self.coordinator.order(&order.order_id).await?;
        let request = if current.source_escrow.is_none() {
            resolver.claim_first(&order.intent, start, end, current.fills.len() as u64 + 1)
        } else {
            resolver.claim(order.order_id, start, end)
        };
        match self.request(Message::ExecuteOrder(request)).await? {
            Message::FillAccepted(accepted) => Ok(accepted),
            other => Err(FlowError::UnexpectedReply(other.kind())),
        }
    }

    /// Maker co-signs, resolver executes the creation and acknowledges it.
    pub async fn sponsor_source(
        &self,
        maker: &mut Connected<Maker>,
        resolver: &mut Connected<Resolver>,
        order: &MakerOrder,
        accepted: &FillAccepted,
    ) -> Result<EscrowId> {
        let request = maker.take("CO_SIGN_REQUESTED", |m| match m {
            Message::CoSignRequested(request) => Some(request),
            _ => None,
        })?;
        self.request(Message::ExecuteOrder(maker.cosign(order, &request)?))
            .await?;

        let signed = resolver.take("MAKER_SIGNED", |m| match m {
            Message::MakerSigned(signed) => Some(signed),
            _ => None,
        })?;
        let escrow_id = resolver.execute_source(self.source.as_ref(), &signed).await?;
        self.request(Message::ExecuteOrder(resolver.acknowledge(
            order.order_id,
            accepted.fill_id,
            escrow_id,
        )))
        .await?;
        Ok(escrow_id)
    }

    /// Fund the destination escrow and report both legs.
    pub async fn deploy(
        &self,
        resolver: &Resolver,
        order: &MakerOrder,
        accepted: &FillAccepted,
        end: u32,
        source_escrow: EscrowId,
    ) -> Result<EscrowId> {
        let destination_escrow = resolver
            .deploy_destination(
                self.destination.as_ref(),
                &order.intent,
                end,
                accepted.destination_amount,
            )
            .await?;
        let report = resolver.report(
            &order.intent,
            accepted.fill_id,
            end,
            source_escrow,
            destination_escrow,
        )?;
        self.request(Message::ReportDeployment(report)).await?;
        Ok(destination_escrow)
    }

    /// The maker answers the pending `DEPLOYMENT_VALIDATED` push.
    pub async fn disclose(&self, maker: &mut Connected<Maker>, order: &MakerOrder) -> Result<()> {
        let validated = maker.take("DEPLOYMENT_VALIDATED", |m| match m {
            Message::DeploymentValidated(validated) => Some(validated),
            _ => None,
        })?;
        let disclosure = maker.disclose(order, &validated, self.now()).await?;
        self.request(Message::ProvideSecrets(disclosure)).await?;
        Ok(())
    }

    /// Take a fill from claim to authorization.
    pub async fn authorize_fill(
        &self,
        maker: &mut Connected<Maker>,
        resolver: &mut Connected<Resolver>,
        order: &MakerOrder,
        start: u32,
        end: u32,
    ) -> Result<AuthorizedFill> {
        let accepted = self.claim(resolver, order, start, end).await?;
        let source_escrow = match self.coordinator.order(&order.order_id).await?.source_escrow {
            Some(existing) => existing,
            None => self.sponsor_source(maker, resolver, order, &accepted).await?,
        };
        let destination_escrow = self
            .deploy(resolver, order, &accepted, end, source_escrow)
            .await?;
        self.disclose(maker, order).await?;
        let authorized = resolver.take("AUTHORIZED_SECRETS", |m| match m {
            Message::AuthorizedSecrets(authorized) => Some(authorized),
            _ => None,
        })?;
        Ok(AuthorizedFill {
            accepted,
            source_escrow,
            destination_escrow,
            authorized,
        })
    }

    /// Withdraw both legs. Returns (source to resolver, destination to maker).
    pub async fn withdraw(&self, resolver: &Resolver, fill: &AuthorizedFill) -> Result<(Amount, Amount)> {
        Ok(resolver
            .withdraw(
                self.source.as_ref(),
                self.destination.as_ref(),
                &fill.authorized,
                fill.accepted.destination_amount,
            )
            .await?)
    }

    /// A whole fill: authorize, withdraw, then let the sweeper settle it.
    pub async fn complete_fill(
        &self,
        maker: &mut Connected<Maker>,
        resolver: &mut Connected<Resolver>,
        order: &MakerOrder,
        start: u32,
        end: u32,
    ) -> Result<AuthorizedFill> {
        let fill = self.authorize_fill(maker, resolver, order, start, end).await?;
        self.withdraw(resolver, &fill).await?;
        self.coordinator.sweep().await;
        Ok(fill)
    }

    pub async fn source_balance(&self, owner: &Address) -> Amount {
        self.source
            .balance_of(owner, &AssetId::new(SOURCE_ASSET))
            .await
            .unwrap_or_default()
    }

    pub async fn destination_balance(&self, owner: &Address) -> Amount {
        self.destination
            .balance_of(owner, &AssetId::new(DESTINATION_ASSET))
            .await
            .unwrap_or_default()
    }
}

/// Order parameters on the harness chains, windows anchored at [`START`].
pub fn order_params(total_parts: u32, source_amount: Amount, destination_amount: Amount) -> OrderParams {
    OrderParams {
        source_chain: ChainId::new(SOURCE_CHAIN),
        destination_chain: ChainId::new(DESTINATION_CHAIN),
        source: AssetAmount {
            asset: AssetId::new(SOURCE_ASSET),
            amount: source_amount,
        },
        destination: AssetAmount {
            asset: AssetId::new(DESTINATION_ASSET),
            amount: destination_amount,
        },
        total_parts,
        windows: OrderWindows {
            source: source_windows(),
            destination: destination_windows(),
        },
        deadline: START + 1_200,
    }
}
