//! The single-writer loop of one game session
//!
//! Every state change happens inside `Session::run`. Timer tasks, grace
//! periods and the flow machine itself only ever talk to the loop through
//! the signal channel, and callers only through `SessionHandle`, which
//! posts onto the bounded input channel. Readers may take snapshots at any
//! time through the shared lock.

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::EventRegistry;
use crate::flow::FlowEvent;
use crate::game::SessionState;
use crate::network::{ConnectionRef, Messenger};
use crate::registry::Lifecycle;
use crate::timer::{TimerSet, TimerSignal};
use crate::words::WordStore;
use log::{debug, error, info, warn};
use shared::{
    ClientMessage, GameSnapshot, PlayerId, PlayerInfo, ServerMessage, SessionId, Status,
};
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Internal notifications posted to the loop by its own machinery
#[derive(Debug)]
pub enum Signal {
    Flow(FlowEvent),
    Timer(TimerSignal),
    GraceExpired { player_id: PlayerId, epoch: u64 },
}

impl From<TimerSignal> for Signal {
    fn from(signal: TimerSignal) -> Self {
        Signal::Timer(signal)
    }
}

/// Requests from outside the loop
#[derive(Debug)]
pub enum SessionInput {
    Client {
        player_id: PlayerId,
        message: ClientMessage,
    },
    Join {
        player_id: PlayerId,
        username: String,
        connection: ConnectionRef,
        reply: oneshot::Sender<Result<PlayerInfo, SessionError>>,
    },
    Reconnect {
        player_id: PlayerId,
        connection: ConnectionRef,
        reply: oneshot::Sender<Result<PlayerInfo, SessionError>>,
    },
    Disconnected {
        player_id: PlayerId,
    },
}

pub fn input_channel(
    capacity: usize,
) -> (mpsc::Sender<SessionInput>, mpsc::Receiver<SessionInput>) {
    mpsc::channel(capacity.max(1))
}

pub struct Session {
    pub(crate) id: SessionId,
    pub(crate) config: SessionConfig,
    pub(crate) state: Arc<RwLock<SessionState>>,
    pub(crate) timers: TimerSet,
    pub(crate) messenger: Arc<dyn Messenger>,
    pub(crate) words: Arc<dyn WordStore>,
    pub(crate) events: EventRegistry,
    lifecycle: Option<Arc<dyn Lifecycle>>,
    pub(crate) signal_tx: mpsc::UnboundedSender<Signal>,
    signal_rx: mpsc::UnboundedReceiver<Signal>,
    input_rx: mpsc::Receiver<SessionInput>,
    cancel: CancellationToken,
}

impl Session {
    /// Builds a session around an input channel created with `input_channel`.
    /// The sender half is kept by the returned handle; clones of it may be
    /// given to the messenger for reporting dropped recipients.
    ///
    /// The loop exits on its own once every input sender is dropped. A `Hub`
    /// holds a sender for as long as the session holds the hub, so with a
    /// `Hub` as messenger this never happens and `SessionHandle::shutdown`
    /// is the way to stop the session early.
    pub fn new(
        id: impl Into<SessionId>,
        config: SessionConfig,
        messenger: Arc<dyn Messenger>,
        words: Arc<dyn WordStore>,
        input: (mpsc::Sender<SessionInput>, mpsc::Receiver<SessionInput>),
    ) -> (Self, SessionHandle) {
        let id = id.into();
        let (input_tx, input_rx) = input;
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let state = Arc::new(RwLock::new(SessionState::new(id.clone(), config.clone())));

        let handle = SessionHandle {
            id: id.clone(),
            input: input_tx,
            state: Arc::clone(&state),
            cancel: cancel.clone(),
        };

        let session = Self {
            id,
            config,
            state,
            timers: TimerSet::new(cancel.clone()),
            messenger,
            words,
            events: EventRegistry::with_defaults(),
            lifecycle: None,
            signal_tx,
            signal_rx,
            input_rx,
            cancel,
        };
        (session, handle)
    }

    /// Gets told once when the session has shut down
    pub fn with_lifecycle(mut self, lifecycle: Arc<dyn Lifecycle>) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs until the game ends, the last participant is gone for good, the
    /// handle asks for shutdown, or every input sender is dropped
    pub async fn run(mut self) {
        info!("Session {} started", self.id);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    info!("Session {} shutdown requested", self.id);
                    break;
                }

                Some(signal) = self.signal_rx.recv() => {
                    if self.handle_signal(signal).await.is_break() {
                        break;
                    }
                }

                input = self.input_rx.recv() => match input {
                    Some(input) => {
                        if self.handle_input(input).await.is_break() {
                            break;
                        }
                    }
                    None => {
                        info!("Session {} has no input senders left", self.id);
                        break;
                    }
                },
            }
        }

        self.cleanup().await;
    }

    async fn handle_signal(&mut self, signal: Signal) -> ControlFlow<()> {
        match signal {
            Signal::Flow(event) => self.handle_flow(event).await,
            Signal::Timer(timer) => {
                self.handle_timer(timer).await;
                ControlFlow::Continue(())
            }
            Signal::GraceExpired { player_id, epoch } => {
                self.handle_grace_expired(player_id, epoch).await
            }
        }
    }

    async fn handle_input(&mut self, input: SessionInput) -> ControlFlow<()> {
        match input {
            SessionInput::Client { player_id, message } => {
                self.handle_client_message(player_id, message).await;
            }
            SessionInput::Join {
                player_id,
                username,
                connection,
                reply,
            } => {
                let result = self.handle_join(player_id, username, connection).await;
                if reply.send(result).is_err() {
                    debug!("Join caller went away before the reply");
                }
            }
            SessionInput::Reconnect {
                player_id,
                connection,
                reply,
            } => {
                let result = self.handle_reconnect(player_id, connection).await;
                if reply.send(result).is_err() {
                    debug!("Reconnect caller went away before the reply");
                }
            }
            SessionInput::Disconnected { player_id } => {
                self.handle_disconnect(player_id).await;
            }
        }
        ControlFlow::Continue(())
    }

    /// Stops every timer, closes the input channel and tells the lifecycle.
    /// Runs exactly once, after the loop has exited.
    async fn cleanup(&mut self) {
        info!("Cleaning up session {}", self.id);

        if !self.timers.shutdown(self.config.shutdown_timeout()).await {
            warn!("Session {}: some timer tasks had to be aborted", self.id);
        }

        let was_finished = {
            let mut state = self.state.write().await;
            let was_finished = state.status == Status::Finished;
            state.status = Status::Finished;
            state.turn_time_remaining = None;
            was_finished
        };
        if !was_finished {
            self.broadcast(&ServerMessage::GameEnded {
                message: "Game has been terminated".to_string(),
            });
        }

        self.input_rx.close();
        self.cancel.cancel();

        if let Some(lifecycle) = self.lifecycle.take() {
            lifecycle.on_session_ended(&self.id);
        }
        info!("Session {} closed", self.id);
    }

    pub(crate) fn signal(&self, event: FlowEvent) {
        if self.signal_tx.send(Signal::Flow(event)).is_err() {
            error!("Session {}: signal channel closed, dropping {:?}", self.id, event);
        }
    }

    fn encode(&self, message: &ServerMessage) -> Option<Vec<u8>> {
        match message.encode() {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                error!(
                    "Session {}: failed to encode {}: {}",
                    self.id,
                    message.type_tag(),
                    e
                );
                None
            }
        }
    }

    pub(crate) fn broadcast(&self, message: &ServerMessage) {
        if let Some(bytes) = self.encode(message) {
            self.messenger.broadcast(&bytes);
        }
    }

    pub(crate) fn send_to(&self, player_id: &PlayerId, message: &ServerMessage) {
        if let Some(bytes) = self.encode(message) {
            self.messenger.send_to_one(player_id, &bytes);
        }
    }

    pub(crate) fn send_to_others(&self, excluded: &PlayerId, message: &ServerMessage) {
        if let Some(bytes) = self.encode(message) {
            self.messenger.send_to_others(excluded, &bytes);
        }
    }

    /// Broadcasts a snapshot of `state`, for callers already holding the lock
    pub(crate) fn broadcast_snapshot(&self, state: &SessionState) {
        self.broadcast(&ServerMessage::GameState(state.snapshot()));
    }

    pub(crate) fn notify_error(&self, player_id: &PlayerId, error: &SessionError) {
        self.send_to(
            player_id,
            &ServerMessage::Notification {
                level: shared::NotificationLevel::Error,
                message: error.to_string(),
            },
        );
    }
}

/// Cheap, cloneable front door of a running session
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    input: mpsc::Sender<SessionInput>,
    state: Arc<RwLock<SessionState>>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    async fn post(&self, input: SessionInput) -> Result<(), SessionError> {
        self.input
            .send(input)
            .await
            .map_err(|_| SessionError::Closed)
    }

    pub async fn join(
        &self,
        player_id: impl Into<PlayerId>,
        username: impl Into<String>,
        connection: ConnectionRef,
    ) -> Result<PlayerInfo, SessionError> {
        let (reply, response) = oneshot::channel();
        self.post(SessionInput::Join {
            player_id: player_id.into(),
            username: username.into(),
            connection,
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    pub async fn reconnect(
        &self,
        player_id: impl Into<PlayerId>,
        connection: ConnectionRef,
    ) -> Result<PlayerInfo, SessionError> {
        let (reply, response) = oneshot::channel();
        self.post(SessionInput::Reconnect {
            player_id: player_id.into(),
            connection,
            reply,
        })
        .await?;
        response.await.map_err(|_| SessionError::Closed)?
    }

    /// Queues a client message. The sender id comes from the transport,
    /// never from the message itself.
    pub async fn send(
        &self,
        player_id: impl Into<PlayerId>,
        message: ClientMessage,
    ) -> Result<(), SessionError> {
        self.post(SessionInput::Client {
            player_id: player_id.into(),
            message,
        })
        .await
    }

    pub async fn disconnect(&self, player_id: impl Into<PlayerId>) -> Result<(), SessionError> {
        self.post(SessionInput::Disconnected {
            player_id: player_id.into(),
        })
        .await
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.state.read().await.snapshot()
    }

    pub async fn last_activity(&self) -> Instant {
        self.state.read().await.last_activity
    }

    /// Asks the loop to stop. Safe to call more than once.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.input.is_closed()
    }

    /// A raw sender onto the session's input channel
    pub fn input(&self) -> mpsc::Sender<SessionInput> {
        self.input.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Hub;
    use crate::words::StaticWordStore;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    struct CountingLifecycle(AtomicUsize);

    impl Lifecycle for CountingLifecycle {
        fn on_session_ended(&self, _session_id: &SessionId) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn new_session() -> (Session, SessionHandle, Arc<Hub>) {
        let config = SessionConfig::default();
        let (input_tx, input_rx) = input_channel(config.input_queue);
        let hub = Hub::new(input_tx.clone(), config.outbound_queue);
        let (session, handle) = Session::new(
            "test",
            config,
            hub.clone(),
            Arc::new(StaticWordStore::builtin()),
            (input_tx, input_rx),
        );
        (session, handle, hub)
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_through_handle() {
        let (session, handle, _hub) = new_session();
        let task = session.spawn();

        let player = assert_ok!(handle.join("p1", "Ann", ConnectionRef::none()).await);
        assert!(player.is_host);
        assert_err!(handle.join("p1", "Ann", ConnectionRef::none()).await);
        assert_eq!(handle.snapshot().await.players.len(), 1);

        handle.shutdown();
        task.await.unwrap();
        assert!(handle.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_notifies_lifecycle_once() {
        let (session, handle, _hub) = new_session();
        let lifecycle = Arc::new(CountingLifecycle(AtomicUsize::new(0)));
        let task = session.with_lifecycle(lifecycle.clone()).spawn();

        handle.shutdown();
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(lifecycle.0.load(Ordering::SeqCst), 1);
        assert_eq!(handle.snapshot().await.status, Status::Finished);
    }

    struct Silent;

    impl Messenger for Silent {
        fn broadcast(&self, _bytes: &[u8]) {}
        fn send_to_one(&self, _player_id: &PlayerId, _bytes: &[u8]) {}
        fn send_to_others(&self, _excluded: &PlayerId, _bytes: &[u8]) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ends_when_every_sender_is_gone() {
        let config = SessionConfig::default();
        let (session, handle) = Session::new(
            "orphan",
            config.clone(),
            Arc::new(Silent),
            Arc::new(StaticWordStore::builtin()),
            input_channel(config.input_queue),
        );
        let lifecycle = Arc::new(CountingLifecycle(AtomicUsize::new(0)));
        let task = session.with_lifecycle(lifecycle.clone()).spawn();

        assert_ok!(handle.join("p1", "Ann", ConnectionRef::none()).await);
        let state = Arc::clone(&handle.state);
        drop(handle);
        task.await.unwrap();

        assert_eq!(lifecycle.0.load(Ordering::SeqCst), 1);
        assert_eq!(state.read().await.status, Status::Finished);
    }

    #[tokio::test(start_paused = true)]
    async fn test_calls_after_shutdown_fail_cleanly() {
        let (session, handle, _hub) = new_session();
        let task = session.spawn();
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(
            handle.join("p1", "Ann", ConnectionRef::none()).await,
            Err(SessionError::Closed)
        );
        assert_eq!(
            handle.send("p1", ClientMessage::request_game_state()).await,
            Err(SessionError::Closed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminated_session_tells_participants() {
        let (session, handle, hub) = new_session();
        let task = session.spawn();

        let (connection, mut rx) = hub.attach("p1");
        handle
            .join("p1", "Ann", ConnectionRef::new(&connection))
            .await
            .unwrap();
        handle.shutdown();
        task.await.unwrap();

        let mut last = None;
        while let Ok(bytes) = rx.try_recv() {
            last = Some(ServerMessage::decode(&bytes).unwrap());
        }
        assert!(matches!(last, Some(ServerMessage::GameEnded { .. })));
    }
}
