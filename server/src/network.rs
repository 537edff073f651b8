//! Outbound delivery and connection handles
//!
//! The session loop never awaits a recipient. `Messenger` implementations
//! accept already-encoded bytes and must return immediately; the built-in
//! `Hub` gives every participant a bounded queue and drops the participant
//! when that queue is full or its receiver is gone.

use crate::session::SessionInput;
use dashmap::DashMap;
use log::{debug, warn};
use shared::PlayerId;
use std::fmt;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Fan-out of encoded messages to participants. Must never block.
pub trait Messenger: Send + Sync {
    fn broadcast(&self, bytes: &[u8]);
    fn send_to_one(&self, player_id: &PlayerId, bytes: &[u8]);
    fn send_to_others(&self, excluded: &PlayerId, bytes: &[u8]);
}

/// The transport side of a participant, closed when a host removes them
pub trait Connection: Send + Sync {
    fn close(&self);
}

/// Non-owning handle to a participant's connection
#[derive(Clone, Default)]
pub struct ConnectionRef(Option<Weak<dyn Connection>>);

impl ConnectionRef {
    pub fn new<C: Connection + 'static>(connection: &Arc<C>) -> Self {
        let weak: Weak<dyn Connection> = Arc::downgrade(connection) as Weak<dyn Connection>;
        Self(Some(weak))
    }

    pub fn none() -> Self {
        Self(None)
    }

    /// Closes the connection if it is still alive. Returns whether it was.
    pub fn close(&self) -> bool {
        match self.0.as_ref().and_then(Weak::upgrade) {
            Some(connection) => {
                connection.close();
                true
            }
            None => false,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.0.as_ref().is_some_and(|weak| weak.strong_count() > 0)
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ConnectionRef")
            .field(&if self.is_alive() { "alive" } else { "gone" })
            .finish()
    }
}

/// In-process fan-out to per-participant queues
pub struct Hub {
    recipients: DashMap<PlayerId, mpsc::Sender<Vec<u8>>>,
    input: mpsc::Sender<SessionInput>,
    queue_capacity: usize,
}

impl Hub {
    /// `input` is the session's inbound channel. Dropped recipients are
    /// reported there as disconnects.
    pub fn new(input: mpsc::Sender<SessionInput>, queue_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            recipients: DashMap::new(),
            input,
            queue_capacity: queue_capacity.max(1),
        })
    }

    /// Registers a queue for `player_id`, replacing any previous one
    pub fn attach(
        self: &Arc<Self>,
        player_id: impl Into<PlayerId>,
    ) -> (Arc<HubConnection>, mpsc::Receiver<Vec<u8>>) {
        let player_id = player_id.into();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.recipients.insert(player_id.clone(), tx);

        let connection = Arc::new(HubConnection {
            player_id,
            hub: Arc::downgrade(self),
        });
        (connection, rx)
    }

    /// Forgets the queue of `player_id`. Its receiver sees the end of the stream.
    pub fn detach(&self, player_id: &str) -> bool {
        self.recipients.remove(player_id).is_some()
    }

    pub fn is_attached(&self, player_id: &str) -> bool {
        self.recipients.contains_key(player_id)
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    fn deliver(sender: &mpsc::Sender<Vec<u8>>, bytes: &[u8]) -> bool {
        match sender.try_send(bytes.to_vec()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Tells the session a recipient is gone. A busy session gets the
    /// report as soon as its input queue has room again.
    fn report_disconnect(&self, player_id: PlayerId) {
        let input = match self.input.try_send(SessionInput::Disconnected { player_id }) {
            Ok(()) => return,
            Err(TrySendError::Closed(input)) => {
                debug!("Session is gone, dropping {:?}", input);
                return;
            }
            Err(TrySendError::Full(input)) => input,
        };

        let tx = self.input.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = tx.send(input).await {
                        debug!("Session closed before {:?} was delivered", e.0);
                    }
                });
            }
            Err(_) => warn!("No runtime to deliver {:?}", input),
        }
    }

    /// Drops recipients that could not keep up and reports them
    fn drop_recipients(&self, dropped: Vec<PlayerId>) {
        for player_id in dropped {
            if self.recipients.remove(&player_id).is_some() {
                warn!("Dropping slow or closed recipient {}", player_id);
                self.report_disconnect(player_id);
            }
        }
    }

    fn fan_out(&self, excluded: Option<&PlayerId>, bytes: &[u8]) {
        // Collect first, the map must not be written while iterated
        let dropped: Vec<PlayerId> = self
            .recipients
            .iter()
            .filter(|entry| Some(entry.key()) != excluded)
            .filter(|entry| !Self::deliver(entry.value(), bytes))
            .map(|entry| entry.key().clone())
            .collect();
        self.drop_recipients(dropped);
    }
}

impl Messenger for Hub {
    fn broadcast(&self, bytes: &[u8]) {
        self.fan_out(None, bytes);
    }

    fn send_to_one(&self, player_id: &PlayerId, bytes: &[u8]) {
        let delivered = match self.recipients.get(player_id) {
            Some(sender) => Self::deliver(sender.value(), bytes),
            None => {
                debug!("No queue for {}, message dropped", player_id);
                return;
            }
        };
        if !delivered {
            self.drop_recipients(vec![player_id.clone()]);
        }
    }

    fn send_to_others(&self, excluded: &PlayerId, bytes: &[u8]) {
        self.fan_out(Some(excluded), bytes);
    }
}

/// A participant's end of the hub
pub struct HubConnection {
    player_id: PlayerId,
    hub: Weak<Hub>,
}

impl HubConnection {
    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }
}

impl Connection for HubConnection {
    fn close(&self) {
        if let Some(hub) = self.hub.upgrade() {
            if hub.detach(&self.player_id) {
                debug!("Closed connection of {}", self.player_id);
                hub.report_disconnect(self.player_id.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::input_channel;

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let (input_tx, _input_rx) = input_channel(8);
        let hub = Hub::new(input_tx, 4);
        let (_a, mut rx_a) = hub.attach("a");
        let (_b, mut rx_b) = hub.attach("b");

        hub.broadcast(b"hello");
        assert_eq!(rx_a.recv().await.unwrap(), b"hello".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn test_send_to_others_skips_excluded() {
        let (input_tx, _input_rx) = input_channel(8);
        let hub = Hub::new(input_tx, 4);
        let (_a, mut rx_a) = hub.attach("a");
        let (_b, mut rx_b) = hub.attach("b");

        hub.send_to_others(&"a".to_string(), b"x");
        hub.send_to_one(&"a".to_string(), b"y");

        assert_eq!(rx_a.recv().await.unwrap(), b"y".to_vec());
        assert_eq!(rx_b.recv().await.unwrap(), b"x".to_vec());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_recipient_and_reports() {
        let (input_tx, mut input_rx) = input_channel(8);
        let hub = Hub::new(input_tx, 2);
        let (_slow, _slow_rx) = hub.attach("slow");
        let (_fast, mut fast_rx) = hub.attach("fast");

        for _ in 0..3 {
            hub.broadcast(b"tick");
            fast_rx.recv().await.unwrap();
        }

        assert!(!hub.is_attached("slow"));
        assert!(hub.is_attached("fast"));
        match input_rx.recv().await {
            Some(SessionInput::Disconnected { player_id }) => assert_eq!(player_id, "slow"),
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_drop_is_reported_even_when_input_is_full() {
        let (input_tx, mut input_rx) = input_channel(1);
        input_tx
            .try_send(SessionInput::Disconnected {
                player_id: "earlier".to_string(),
            })
            .unwrap();
        let hub = Hub::new(input_tx, 1);
        let (_slow, _slow_rx) = hub.attach("slow");

        hub.broadcast(b"one");
        hub.broadcast(b"two");
        assert!(!hub.is_attached("slow"));

        match input_rx.recv().await {
            Some(SessionInput::Disconnected { player_id }) => assert_eq!(player_id, "earlier"),
            other => panic!("unexpected input: {:?}", other),
        }
        match input_rx.recv().await {
            Some(SessionInput::Disconnected { player_id }) => assert_eq!(player_id, "slow"),
            other => panic!("unexpected input: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_closed_receiver_is_dropped() {
        let (input_tx, mut input_rx) = input_channel(8);
        let hub = Hub::new(input_tx, 2);
        let (_gone, gone_rx) = hub.attach("gone");
        drop(gone_rx);

        hub.send_to_one(&"gone".to_string(), b"x");
        assert!(hub.is_empty());
        assert!(matches!(
            input_rx.recv().await,
            Some(SessionInput::Disconnected { .. })
        ));
    }

    #[tokio::test]
    async fn test_connection_close_detaches_once() {
        let (input_tx, mut input_rx) = input_channel(8);
        let hub = Hub::new(input_tx, 2);
        let (connection, mut rx) = hub.attach("a");
        let handle = ConnectionRef::new(&connection);

        assert!(handle.close());
        assert!(rx.recv().await.is_none());
        assert!(matches!(
            input_rx.recv().await,
            Some(SessionInput::Disconnected { .. })
        ));

        // Already detached, nothing more to report
        connection.close();
        assert!(input_rx.try_recv().is_err());
    }

    #[test]
    fn test_connection_ref_without_target() {
        let handle = ConnectionRef::none();
        assert!(!handle.is_alive());
        assert!(!handle.close());
        assert_eq!(format!("{:?}", handle), "ConnectionRef(\"gone\")");
    }
}
