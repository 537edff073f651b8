//! Participant lifecycle: join, disconnect, grace period, reconnect, removal
//!
//! A disconnected participant leaves the active set and the rotation at
//! once and waits in the holding area. Coming back within the grace period
//! restores the old seat, score and rotation position. When the grace period
//! runs out the participant is gone for good. While every participant is
//! away the game pauses between turns, and the session only shuts down once
//! the last grace period has run out.

use crate::error::SessionError;
use crate::game::SessionState;
use crate::network::ConnectionRef;
use crate::session::{Session, Signal};
use log::{debug, info, warn};
use shared::{PlayerId, PlayerInfo, ServerMessage, Status, TimerKind, TurnPhase};
use std::ops::ControlFlow;
use std::sync::Arc;

impl Session {
    pub(crate) async fn handle_join(
        &mut self,
        player_id: PlayerId,
        username: String,
        connection: ConnectionRef,
    ) -> Result<PlayerInfo, SessionError> {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        state.touch();

        let player = state
            .add_participant(player_id.clone(), username, connection)
            .map_err(|e| {
                warn!("Session {}: join of {} refused: {}", self.id, player_id, e);
                e
            })?;

        self.broadcast(&ServerMessage::PlayerJoined {
            player: player.clone(),
        });
        self.broadcast_snapshot(&state);
        Ok(player)
    }

    pub(crate) async fn handle_disconnect(&mut self, player_id: PlayerId) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        state.touch();

        if state.removed.contains(&player_id) {
            // Removal already cleaned up, this is the transport catching up
            debug!("Session {}: removed player {} disconnected", self.id, player_id);
            return;
        }
        let Some((mut participant, position)) = state.detach(&player_id) else {
            debug!("Session {}: {} is not active, ignoring disconnect", self.id, player_id);
            return;
        };

        participant.connected = false;
        participant.is_drawing = false;
        participant.connection = ConnectionRef::none();
        let epoch = state.hold(participant, position);
        info!(
            "Session {}: {} disconnected, holding seat for {:?}",
            self.id,
            player_id,
            self.config.grace_period()
        );

        self.broadcast(&ServerMessage::PlayerDisconnected {
            player_id: player_id.clone(),
        });
        self.after_departure(&mut state, &player_id);
        self.broadcast_snapshot(&state);

        let tx = self.signal_tx.clone();
        let token = self.timers.child_token();
        let grace = self.config.grace_period();
        self.timers.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(grace) => {
                    let _ = tx.send(Signal::GraceExpired { player_id, epoch });
                }
            }
        });
    }

    /// Ends the turn when its drawer left, or when the remaining guessers
    /// have all guessed already
    fn after_departure(&mut self, state: &mut SessionState, player_id: &str) {
        if state.status != Status::InProgress {
            return;
        }
        if state.turn.is_drawer(player_id) {
            info!("Session {}: drawer {} left, ending turn", self.id, player_id);
            self.end_turn(state);
            return;
        }
        let any_guessed = state.turn.guessed.values().any(|guessed| *guessed);
        if state.turn.phase == TurnPhase::Drawing
            && self.timers.is_active(TimerKind::Turn)
            && any_guessed
            && state.turn.all_guessed(&state.rotation)
        {
            info!("Session {}: every remaining guesser found the word", self.id);
            self.end_turn(state);
        }
    }

    pub(crate) async fn handle_grace_expired(
        &mut self,
        player_id: PlayerId,
        epoch: u64,
    ) -> ControlFlow<()> {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;

        let Some(participant) = state.release_held(&player_id, epoch) else {
            debug!("Session {}: stale grace period for {}", self.id, player_id);
            return ControlFlow::Continue(());
        };
        info!("Session {}: {} did not come back", self.id, player_id);

        state.promote_host_if_needed();
        self.broadcast(&ServerMessage::PlayerLeft {
            player: participant.info(),
        });
        self.broadcast_snapshot(&state);

        if state.participants.is_empty()
            && state.held.is_empty()
            && state.status != Status::Finished
        {
            info!("Session {}: no participants left, shutting down", self.id);
            return ControlFlow::Break(());
        }
        ControlFlow::Continue(())
    }

    pub(crate) async fn handle_reconnect(
        &mut self,
        player_id: PlayerId,
        connection: ConnectionRef,
    ) -> Result<PlayerInfo, SessionError> {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;
        state.touch();

        if state.removed.contains(&player_id) {
            warn!("Session {}: removed player {} tried to rejoin", self.id, player_id);
            return Err(SessionError::Removed(player_id));
        }

        if let Some(participant) = state.participants.get_mut(&player_id) {
            // Still active: the transport only swapped connections
            participant.connection = connection;
            participant.connected = true;
            let player = participant.info();
            self.send_to(&player_id, &ServerMessage::GameState(state.snapshot()));
            return Ok(player);
        }

        let Some(player) = state.restore(&player_id, connection) else {
            return Err(SessionError::NotReconnectable(player_id));
        };
        info!("Session {}: {} reconnected", self.id, player_id);

        self.broadcast(&ServerMessage::PlayerReconnected {
            player: player.clone(),
        });
        self.broadcast_snapshot(&state);
        self.resume(&mut state);
        Ok(player)
    }

    /// Host-only removal. The target is dropped for good right away and may
    /// never rejoin; its connection is closed afterwards.
    pub(crate) async fn remove_by_host(
        &mut self,
        host_id: &PlayerId,
        target_id: &PlayerId,
    ) -> Result<(), SessionError> {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;

        if !state.is_host(host_id) {
            return Err(SessionError::Unauthorized);
        }
        if host_id == target_id {
            return Err(SessionError::InvalidTarget(target_id.clone()));
        }
        if state.removed.contains(target_id) {
            debug!("Session {}: {} already removed", self.id, target_id);
            return Ok(());
        }

        let participant = match state.detach(target_id) {
            Some((participant, _)) => participant,
            None => match state.held.remove(target_id) {
                Some(held) => held.participant,
                None => return Err(SessionError::InvalidTarget(target_id.clone())),
            },
        };
        state.removed.insert(target_id.clone());
        state.round.forget(target_id);
        state.turn.guessed.remove(target_id);
        state.release_color(participant.color.clone());
        info!("Session {}: {} removed {}", self.id, host_id, target_id);

        let mut player = participant.info();
        player.connected = false;
        self.broadcast(&ServerMessage::PlayerRemoved { player });
        self.after_departure(&mut state, target_id);
        self.broadcast_snapshot(&state);
        drop(state);

        participant.connection.close();
        Ok(())
    }
}
