//! Party-facing server: newline-delimited JSON envelopes over TCP.
//!
//! Each connection gets a writer task fed by a channel, so request replies,
//! relayer pushes and forwarded events interleave on one stream. A
//! `SUBSCRIBE_EVENTS` request binds the connection to the signing party: the
//! party's pushes and the events matching its filter are forwarded until the
//! connection closes.

use std::sync::Arc;

use tessera_coordinator::SwapCoordinator;
use tessera_transport::messages::SubscribeEvents;
use tessera_transport::wire::{read_envelope, write_envelope};
use tessera_transport::{Envelope, Message, TransportError};
use tessera_types::Address;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Outgoing messages for one connection: `(reply_to, message)`.
type Outgoing = mpsc::UnboundedSender<(Option<u64>, Message)>;

/// TCP server in front of a [`SwapCoordinator`].
pub struct RpcServer {
    coordinator: Arc<SwapCoordinator>,
    listener: TcpListener,
    permits: Arc<Semaphore>,
}

impl RpcServer {
    pub async fn bind(
        coordinator: Arc<SwapCoordinator>,
        listen_addr: &str,
        max_connections: usize,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen_addr).await?;
        Ok(Self {
            coordinator,
            listener,
            permits: Arc::new(Semaphore::new(max_connections.max(1))),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> std::io::Result<()> {
        info!(addr = %self.local_addr()?, "relayer listening");
        loop {
            let permit = match self.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Ok(()),
            };
            let (stream, peer) = self.listener.accept().await?;
            let coordinator = self.coordinator.clone();
            tokio::spawn(async move {
                debug!(%peer, "connection opened");
                if let Err(e) = handle_connection(coordinator, stream).await {
                    warn!(%peer, error = %e, "connection error");
                }
                debug!(%peer, "connection closed");
                drop(permit);
            });
        }
    }
}

/// Serve one party connection until it closes.
async fn handle_connection(
    coordinator: Arc<SwapCoordinator>,
    stream: TcpStream,
) -> Result<(), TransportError> {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (tx, mut rx) = mpsc::unbounded_channel::<(Option<u64>, Message)>();

    let writer: JoinHandle<Result<(), TransportError>> = tokio::spawn(async move {
        let mut next_id = 1u64;
        while let Some((reply_to, message)) = rx.recv().await {
            let envelope = match reply_to {
                Some(request) => Envelope::reply(next_id, request, message),
                None => Envelope::new(next_id, message),
            };
            next_id += 1;
            write_envelope(&mut write_half, &envelope).await?;
        }
        Ok(())
    });

    let mut subscription: Option<(Address, JoinHandle<()>)> = None;
    let mut buf = String::new();
    let result = loop {
        let envelope = match read_envelope(&mut reader, &mut buf).await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => break Ok(()),
            Err(TransportError::Deserialization(reason)) => {
                let _ = tx.send((None, Message::rejected("MALFORMED_MESSAGE", reason)));
                continue;
            }
            Err(e) => break Err(e),
        };

        let reply = match envelope.message {
            Message::SubscribeEvents(request) => {
                match subscribe(&coordinator, &request, tx.clone()) {
                    Ok((party, forwarder, subscribed)) => {
                        if let Some((_, previous)) = subscription.replace((party, forwarder)) {
                            previous.abort();
                        }
                        subscribed
                    }
                    Err(rejection) => rejection,
                }
            }
            message if !message.is_request() => Message::rejected(
                "UNEXPECTED_MESSAGE",
                format!("{} is not a request", message.kind()),
            ),
            message => coordinator.handle(message).await,
        };
        if tx.send((Some(envelope.id), reply)).is_err() {
            break Ok(());
        }
    };

    if let Some((party, forwarder)) = subscription {
        forwarder.abort();
        coordinator.outbox().unregister(&party);
    }
    drop(tx);
    match writer.await {
        Ok(Err(e)) if result.is_ok() => Err(e),
        _ => result,
    }
}

/// Register the party and start forwarding its pushes and filtered events.
fn subscribe(
    coordinator: &SwapCoordinator,
    request: &SubscribeEvents,
    tx: Outgoing,
) -> Result<(Address, JoinHandle<()>, Message), Message> {
    let (subscribed, mut pushes) = coordinator
        .subscribe(request)
        .map_err(|e| Message::Rejected(e.rejection()))?;
    let party = subscribed.party;
    let filter = request.filter.clone().unwrap_or_default();
    let mut events = coordinator.events();

    let forwarder = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                push = pushes.recv() => match push {
                    Some(message) => Some(message),
                    None => return,
                },
                event = events.recv() => match event {
                    Ok(event) => filter.matches(&event).then(|| Message::Event(event)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(party = %party, skipped, "event subscriber lagged");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            };
            let Some(message) = message else {
                continue;
            };
            if tx.send((None, message)).is_err() {
                return;
            }
        }
    });

    Ok((party, forwarder, Message::Subscribed(subscribed)))
}
