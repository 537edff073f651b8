//! Game flow: rounds, turns, word selection and the timers driving them
//!
//! ```text
//! GameStarted -> RoundStarted -> TurnStarted (select word) -> TurnStarted (draw)
//!     -> TurnEnded -> TurnStarted ... -> RoundEnded -> RoundStarted ... -> GameEnded
//! ```
//!
//! Each handler runs to completion inside the session loop and reaches the
//! next step by posting another `FlowEvent`, never by calling it directly.

use crate::error::SessionError;
use crate::game::SessionState;
use crate::session::{Session, Signal};
use crate::timer::{TimerEvent, TimerOutcome, TimerSignal};
use crate::words::pick_candidates;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use shared::{NotificationLevel, PlayerId, ServerMessage, Status, TimerKind, TurnPhase, Word};
use std::collections::HashSet;
use std::ops::ControlFlow;
use std::sync::Arc;

/// Minimum number of participants for the host to start the countdown
pub const MIN_PLAYERS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    GameStarted,
    RoundStarted,
    TurnStarted,
    TurnEnded,
    RoundEnded,
    GameEnded,
}

impl Session {
    pub(crate) async fn handle_flow(&mut self, event: FlowEvent) -> ControlFlow<()> {
        debug!("Session {}: {:?}", self.id, event);
        self.state.write().await.touch();

        match event {
            FlowEvent::GameStarted => {
                info!("Session {}: game started", self.id);
                self.signal(FlowEvent::RoundStarted);
            }
            FlowEvent::RoundStarted => self.on_round_started().await,
            FlowEvent::TurnStarted => self.on_turn_started().await,
            FlowEvent::TurnEnded => self.on_turn_ended().await,
            FlowEvent::RoundEnded => self.on_round_ended().await,
            FlowEvent::GameEnded => {
                self.on_game_ended().await;
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn on_round_started(&mut self) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if state.status != Status::InProgress {
            return;
        }

        state.round.begin();
        info!("Session {}: round {} started", self.id, state.round.count);
        self.broadcast_snapshot(&state);

        if state.everyone_away() {
            self.park(&mut state);
            return;
        }
        match state.assign_next_drawer() {
            Some(drawer) => {
                self.broadcast(&ServerMessage::DrawingPlayerChanged { player: drawer });
                self.signal(FlowEvent::TurnStarted);
            }
            None => {
                warn!("Session {}: nobody left to draw", self.id);
                self.signal(FlowEvent::GameEnded);
            }
        }
    }

    async fn on_turn_started(&mut self) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if state.status != Status::InProgress || state.turn.ending {
            return;
        }
        let Some(drawer_id) = state.turn.drawer_id.clone() else {
            warn!("Session {}: turn started without a drawer", self.id);
            return;
        };
        if !state.is_active(&drawer_id) {
            info!("Session {}: drawer {} is gone, skipping turn", self.id, drawer_id);
            self.end_turn(&mut state);
            return;
        }

        let phase = state.turn.phase;
        let has_word = state.turn.word.is_some();
        match phase {
            TurnPhase::WordSelection if !has_word => {
                if state.turn.is_selecting {
                    return;
                }
                state.turn.is_selecting = true;
                let used = state.used_words.clone();
                drop(state);
                self.begin_word_selection(drawer_id, used).await;
            }
            TurnPhase::WordSelection => {
                let guessers = state.rotation.clone();
                state.turn.begin_drawing(guessers);
                state.turn_time_remaining = Some(self.config.turn_duration);
                self.timers
                    .start(TimerKind::Turn, self.config.turn_duration, &self.signal_tx);
                info!(
                    "Session {}: {} is drawing for {}s",
                    self.id, drawer_id, self.config.turn_duration
                );
                self.broadcast_snapshot(&state);
            }
            TurnPhase::Drawing => {
                debug!("Session {}: turn already in drawing phase", self.id);
            }
        }
    }

    /// Fetches candidates and hands them to the drawer. The state lock is
    /// not held while the word store is consulted.
    async fn begin_word_selection(&mut self, drawer_id: PlayerId, used: HashSet<String>) {
        let wanted = self.config.word_choices;
        let fetched = match self.words.fetch_random_words(wanted * 2).await {
            Ok(words) => words,
            Err(e) => {
                error!("Session {}: word store failed: {}", self.id, e);
                Vec::new()
            }
        };
        let candidates = pick_candidates(fetched, &used, wanted);

        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if candidates.is_empty() {
            // Nothing to offer. The turn stays in selection until the
            // drawer leaves or the session shuts down.
            error!(
                "Session {}: no candidate words for {}, turn is stalled",
                self.id, drawer_id
            );
            self.broadcast(&ServerMessage::Notification {
                level: NotificationLevel::Error,
                message: "No words available".to_string(),
            });
            return;
        }

        state.turn.candidates = candidates.clone();
        self.send_to(
            &drawer_id,
            &ServerMessage::OpenSelectWordModal {
                selectable_words: candidates,
                is_selecting_word: true,
            },
        );
        self.send_to_others(&drawer_id, &ServerMessage::GameState(state.snapshot()));
        self.timers.start(
            TimerKind::WordSelection,
            self.config.word_selection_duration,
            &self.signal_tx,
        );
    }

    /// The drawer picked one of the offered words
    pub(crate) async fn choose_word(&mut self, player_id: &PlayerId, word: Word) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;

        if !state.turn.is_selecting || state.turn.ending || state.turn.candidates.is_empty() {
            debug!("Session {}: no word selection in progress", self.id);
            return;
        }
        if !state.turn.is_drawer(player_id) {
            warn!(
                "Session {}: {} tried to pick the word but is not drawing",
                self.id, player_id
            );
            return;
        }
        let Some(chosen) = state
            .turn
            .candidates
            .iter()
            .find(|candidate| candidate.word == word.word)
            .cloned()
        else {
            warn!(
                "Session {}: {} picked a word that was not offered",
                self.id, player_id
            );
            return;
        };

        self.timers.cancel(TimerKind::WordSelection);
        self.apply_word(&mut state, chosen);
    }

    /// Selection ran out of time, pick for the drawer
    async fn expire_word_selection(&mut self) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if !state.turn.is_selecting || state.turn.ending {
            return;
        }

        let chosen = state
            .turn
            .candidates
            .choose(&mut rand::thread_rng())
            .cloned();
        match chosen {
            Some(word) => {
                info!("Session {}: selection timed out, picked a word", self.id);
                self.apply_word(&mut state, word);
            }
            None => error!("Session {}: selection timed out without candidates", self.id),
        }
    }

    fn apply_word(&self, state: &mut SessionState, word: Word) {
        let Some(drawer_id) = state.turn.drawer_id.clone() else {
            return;
        };
        state.used_words.insert(word.word.to_lowercase());
        let masked = word.masked();
        state.turn.set_word(word.clone());

        self.send_to(
            &drawer_id,
            &ServerMessage::WordSelected {
                word: Some(word),
                masked: masked.clone(),
                is_selecting_word: false,
            },
        );
        self.send_to_others(
            &drawer_id,
            &ServerMessage::WordSelected {
                word: None,
                masked,
                is_selecting_word: false,
            },
        );
        self.signal(FlowEvent::TurnStarted);
    }

    /// Requests the end of the current turn. Further requests for the same
    /// turn are ignored.
    pub(crate) fn end_turn(&mut self, state: &mut SessionState) {
        if state.turn.ending {
            return;
        }
        state.turn.ending = true;
        self.timers.cancel(TimerKind::Turn);
        self.timers.cancel(TimerKind::WordSelection);
        self.signal(FlowEvent::TurnEnded);
    }

    async fn on_turn_ended(&mut self) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if state.status != Status::InProgress {
            return;
        }

        state.clear_drawing_flags();
        state.turn_time_remaining = None;
        let drawer_id = state.turn.drawer_id.clone();
        if let Some(id) = drawer_id.as_ref().filter(|id| !state.removed.contains(*id)) {
            state.round.mark_drawn(id);
        }
        let word = state.turn.word.clone();
        state.turn.is_selecting = false;
        state.turn.candidates.clear();

        info!(
            "Session {}: turn of {} ended",
            self.id,
            drawer_id.as_deref().unwrap_or("nobody")
        );
        self.broadcast(&ServerMessage::TurnEnded { drawer_id, word });
        self.broadcast_snapshot(&state);

        if state.everyone_away() {
            self.park(&mut state);
            return;
        }
        self.next_turn_or_round(&mut state);
    }

    /// Hands the turn to the next drawer, or ends the round when everyone
    /// in the rotation has drawn
    fn next_turn_or_round(&self, state: &mut SessionState) {
        if state.round.is_complete(&state.rotation) {
            self.signal(FlowEvent::RoundEnded);
            return;
        }
        match state.assign_next_drawer() {
            Some(drawer) => {
                self.broadcast(&ServerMessage::DrawingPlayerChanged { player: drawer });
                self.signal(FlowEvent::TurnStarted);
            }
            None => self.signal(FlowEvent::RoundEnded),
        }
    }

    /// Waits between turns until somebody comes back from the holding area.
    /// The last grace period running out shuts the session down instead.
    fn park(&self, state: &mut SessionState) {
        info!(
            "Session {}: all {} participant(s) away, pausing the game",
            self.id,
            state.held.len()
        );
        state.parked = true;
    }

    /// Continues a parked game once a participant is active again
    pub(crate) fn resume(&self, state: &mut SessionState) {
        if !state.parked || state.rotation.is_empty() {
            return;
        }
        state.parked = false;
        info!("Session {}: resuming the game", self.id);
        if state.status == Status::InProgress {
            self.next_turn_or_round(state);
        }
    }

    async fn on_round_ended(&mut self) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        if state.status != Status::InProgress {
            return;
        }

        info!("Session {}: round {} ended", self.id, state.round.count);
        self.broadcast_snapshot(&state);

        if state.round.count >= self.config.round_limit {
            self.signal(FlowEvent::GameEnded);
        } else {
            state.round.advance();
            self.signal(FlowEvent::RoundStarted);
        }
    }

    async fn on_game_ended(&mut self) {
        self.timers.cancel_all();
        let mut state = self.state.write().await;
        state.status = Status::Finished;
        state.turn_time_remaining = None;
        state.clear_drawing_flags();

        info!("Session {}: game over after {} round(s)", self.id, state.round.count);
        self.broadcast_snapshot(&state);
        self.broadcast(&ServerMessage::GameEnded {
            message: "Game over".to_string(),
        });
    }

    pub(crate) async fn handle_timer(&mut self, signal: TimerSignal) {
        let TimerSignal { kind, id, event } = signal;
        match event {
            TimerEvent::Tick { remaining } => {
                if !self.timers.record_tick(kind, id, remaining) {
                    debug!("Session {}: stale tick from {} timer", self.id, kind);
                    return;
                }
                self.broadcast(&ServerMessage::TimerTick {
                    timer_type: kind,
                    time_remaining: remaining,
                });
                if kind == TimerKind::Turn {
                    let state_lock = Arc::clone(&self.state);
                    let mut state = state_lock.write().await;
                    self.reveal_letters(&mut state, remaining);
                }
            }
            TimerEvent::Done(outcome) => {
                if !self.timers.complete(kind, id) {
                    debug!("Session {}: stale {} timer outcome", self.id, kind);
                    return;
                }
                match (kind, outcome) {
                    (_, TimerOutcome::Cancelled) => {
                        debug!("Session {}: {} timer cancelled", self.id, kind);
                    }
                    (TimerKind::GameStart, TimerOutcome::Finished) => {
                        self.on_countdown_finished().await;
                    }
                    (TimerKind::WordSelection, TimerOutcome::Finished) => {
                        self.expire_word_selection().await;
                    }
                    (TimerKind::Turn, TimerOutcome::Finished) => {
                        let state_lock = Arc::clone(&self.state);
                        let mut state = state_lock.write().await;
                        info!("Session {}: turn time is up", self.id);
                        self.end_turn(&mut state);
                    }
                }
            }
        }
    }

    fn reveal_letters(&self, state: &mut SessionState, remaining: u32) {
        state.turn_time_remaining = Some(remaining);
        if state.turn.phase != TurnPhase::Drawing || state.turn.ending {
            return;
        }
        let total = self.config.turn_duration;
        let elapsed = total.saturating_sub(remaining);
        let letters = state
            .turn
            .reveal_progress(elapsed, total, &mut rand::thread_rng());
        if !letters.is_empty() {
            self.broadcast(&ServerMessage::RevealedLetters { letters });
        }
    }

    /// Host-only: starts the pre-game countdown
    pub(crate) async fn start_game_countdown(
        &mut self,
        player_id: &PlayerId,
        kind: TimerKind,
    ) -> Result<(), SessionError> {
        if kind != TimerKind::GameStart {
            warn!(
                "Session {}: {} asked to start the {} timer",
                self.id, player_id, kind
            );
            return Ok(());
        }

        let state = self.state.read().await;
        if !state.is_host(player_id) {
            return Err(SessionError::Unauthorized);
        }
        if state.status != Status::NotStarted {
            return Err(SessionError::AlreadyStarted);
        }
        if state.participants.len() < MIN_PLAYERS {
            return Err(SessionError::NotEnoughPlayers(MIN_PLAYERS));
        }
        drop(state);

        if self.timers.is_active(TimerKind::GameStart) {
            debug!("Session {}: countdown already running", self.id);
            return Ok(());
        }
        info!(
            "Session {}: {} started the {}s countdown",
            self.id, player_id, self.config.start_countdown
        );
        self.timers.start(
            TimerKind::GameStart,
            self.config.start_countdown,
            &self.signal_tx,
        );
        Ok(())
    }

    /// Host-only: aborts the pre-game countdown
    pub(crate) async fn stop_game_countdown(
        &mut self,
        player_id: &PlayerId,
        kind: TimerKind,
    ) -> Result<(), SessionError> {
        if kind != TimerKind::GameStart {
            warn!(
                "Session {}: {} asked to stop the {} timer",
                self.id, player_id, kind
            );
            return Ok(());
        }
        if !self.state.read().await.is_host(player_id) {
            return Err(SessionError::Unauthorized);
        }

        if self.timers.cancel(TimerKind::GameStart) {
            info!("Session {}: countdown stopped by {}", self.id, player_id);
            self.broadcast(&ServerMessage::Notification {
                level: NotificationLevel::Info,
                message: "Countdown stopped".to_string(),
            });
        }
        Ok(())
    }

    /// Countdown ran out: the game is on, the first round follows after a
    /// short delay
    async fn on_countdown_finished(&mut self) {
        {
            let mut state = self.state.write().await;
            if state.status != Status::NotStarted {
                return;
            }
            state.status = Status::InProgress;
            info!("Session {}: starting with {} players", self.id, state.participants.len());
            self.broadcast_snapshot(&state);
        }

        let tx = self.signal_tx.clone();
        let token = self.timers.child_token();
        let delay = self.config.start_delay();
        self.timers.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let _ = tx.send(Signal::Flow(FlowEvent::GameStarted));
                }
            }
        });
    }
}
