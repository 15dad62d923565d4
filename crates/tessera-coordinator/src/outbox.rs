//! Per-party push delivery.
//!
//! Parties are addressed by their ledger [`Address`]. A connection that
//! subscribes as a party takes over that party's channel; pushes for a party
//! with no live channel wait in a bounded backlog and are flushed on the next
//! registration.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tessera_transport::Message;
use tessera_types::Address;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Pushes kept per offline party before the oldest is dropped.
pub const BACKLOG_LIMIT: usize = 256;

#[derive(Default)]
struct Inner {
    live: HashMap<Address, mpsc::UnboundedSender<Message>>,
    backlog: HashMap<Address, VecDeque<Message>>,
}

/// Routes relayer pushes to registered parties.
#[derive(Default)]
pub struct Outbox {
    inner: Mutex<Inner>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `party`, replacing any previous channel, and deliver its backlog.
    pub fn register(&self, party: Address) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(backlog) = inner.backlog.remove(&party) {
            debug!(party = %party, queued = backlog.len(), "flushing backlog");
            for message in backlog {
                let _ = tx.send(message);
            }
        }
        inner.live.insert(party, tx);
        rx
    }

    /// Drop `party`'s channel; later pushes are queued.
    pub fn unregister(&self, party: &Address) {
        self.lock().live.remove(party);
    }

    /// Push `message` to `party`.
    pub fn send(&self, party: Address, message: Message) {
        let mut inner = self.lock();
        let message = match inner.live.get(&party) {
            Some(tx) => match tx.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };
        // Any channel still registered here has been closed by its receiver.
        inner.live.remove(&party);

        let backlog = inner.backlog.entry(party).or_default();
        if backlog.len() >= BACKLOG_LIMIT {
            warn!(party = %party, "push backlog full, dropping oldest");
            backlog.pop_front();
        }
        debug!(party = %party, kind = message.kind(), "party offline, push queued");
        backlog.push_back(message);
    }

    /// Number of queued pushes for `party`.
    pub fn backlog_len(&self, party: &Address) -> usize {
        self.lock().backlog.get(party).map_or(0, VecDeque::len)
    }
}

impl std::fmt::Debug for Outbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Outbox")
            .field("live", &inner.live.len())
            .field("backlogged", &inner.backlog.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_live_delivery() {
        let outbox = Outbox::new();
        let party = Address::new([1; 32]);
        let mut rx = outbox.register(party);
        outbox.send(party, Message::Ack);
        assert_eq!(rx.try_recv().expect("delivered"), Message::Ack);
        assert_eq!(outbox.backlog_len(&party), 0);
    }

    #[test]
    fn test_offline_backlog_flushes_on_register() {
        let outbox = Outbox::new();
        let party = Address::new([2; 32]);
        outbox.send(party, Message::Ack);
        outbox.send(party, Message::rejected("X", "y"));
        assert_eq!(outbox.backlog_len(&party), 2);

        let mut rx = outbox.register(party);
        assert_eq!(rx.try_recv().expect("first"), Message::Ack);
        assert_eq!(rx.try_recv().expect("second").kind(), "REJECTED");
        assert_eq!(outbox.backlog_len(&party), 0);
    }

    #[test]
    fn test_closed_channel_falls_back_to_backlog() {
        let outbox = Outbox::new();
        let party = Address::new([3; 32]);
        drop(outbox.register(party));
        outbox.send(party, Message::Ack);
        assert_eq!(outbox.backlog_len(&party), 1);
    }

    #[test]
    fn test_backlog_is_bounded() {
        let outbox = Outbox::new();
        let party = Address::new([4; 32]);
        for _ in 0..BACKLOG_LIMIT + 3 {
            outbox.send(party, Message::Ack);
        }
        assert_eq!(outbox.backlog_len(&party), BACKLOG_LIMIT);
    }
}
