//! Inbound client events
//!
//! `EventRegistry` maps a message's `type` tag to a decoder for its payload.
//! Unknown tags and malformed payloads are logged and dropped; neither ever
//! reaches session state.

use crate::error::EventError;
use crate::guess::GuessOutcome;
use crate::session::Session;
use log::{debug, info, warn};
use serde_json::Value;
use shared::{
    tags, ClientMessage, FeedbackKind, GuessFeedback, InboundEvent, PlayerId, ServerMessage,
    TimerKind, TurnPhase,
};
use std::collections::HashMap;
use std::sync::Arc;

pub type Decoder = fn(Value) -> Result<InboundEvent, serde_json::Error>;

#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, Decoder>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every event a client may send
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(tags::REQUEST_GAME_STATE, |_| Ok(InboundEvent::RequestGameState));
        registry.register(tags::PLAYER_GUESS, |payload| {
            Ok(InboundEvent::Guess(serde_json::from_value(payload)?))
        });
        registry.register(tags::START_TIMER, |payload| {
            Ok(InboundEvent::StartTimer(serde_json::from_value(payload)?))
        });
        registry.register(tags::STOP_TIMER, |payload| {
            Ok(InboundEvent::StopTimer(serde_json::from_value(payload)?))
        });
        registry.register(tags::SELECT_WORD, |payload| {
            Ok(InboundEvent::SelectWord(serde_json::from_value(payload)?))
        });
        registry.register(tags::PLAYER_READY, |_| Ok(InboundEvent::Ready));
        registry.register(tags::PLAYER_TOGGLE_READY, |_| Ok(InboundEvent::ToggleReady));
        registry.register(tags::CURSOR_UPDATE, |payload| {
            Ok(InboundEvent::CursorUpdate(serde_json::from_value(payload)?))
        });
        registry.register(tags::REMOVE_PLAYER, |payload| {
            Ok(InboundEvent::RemovePlayer(serde_json::from_value(payload)?))
        });
        registry
    }

    pub fn register(&mut self, tag: &'static str, decoder: Decoder) {
        self.decoders.insert(tag, decoder);
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    pub fn decode(&self, message: ClientMessage) -> Result<InboundEvent, EventError> {
        let decoder = self
            .decoders
            .get(message.kind.as_str())
            .ok_or_else(|| EventError::UnknownType(message.kind.clone()))?;
        decoder(message.payload).map_err(|source| EventError::Decode {
            kind: message.kind,
            source,
        })
    }
}

impl Session {
    pub(crate) async fn handle_client_message(
        &mut self,
        player_id: PlayerId,
        message: ClientMessage,
    ) {
        let kind = message.kind.clone();
        let event = match self.events.decode(message) {
            Ok(event) => event,
            Err(e) => {
                warn!("Session {}: dropping message from {}: {}", self.id, player_id, e);
                return;
            }
        };

        {
            let mut state = self.state.write().await;
            if !state.is_active(&player_id) {
                debug!(
                    "Session {}: ignoring {} from inactive player {}",
                    self.id, kind, player_id
                );
                return;
            }
            state.touch();
        }

        let result = match event {
            InboundEvent::RequestGameState => {
                let snapshot = self.state.read().await.snapshot();
                self.send_to(&player_id, &ServerMessage::GameState(snapshot));
                Ok(())
            }
            InboundEvent::Guess(payload) => {
                self.handle_guess(&player_id, &payload.guess).await;
                Ok(())
            }
            InboundEvent::StartTimer(payload) => {
                self.start_game_countdown(&player_id, payload.timer_type)
                    .await
            }
            InboundEvent::StopTimer(payload) => {
                self.stop_game_countdown(&player_id, payload.timer_type)
                    .await
            }
            InboundEvent::SelectWord(payload) => {
                self.choose_word(&player_id, payload.word).await;
                Ok(())
            }
            InboundEvent::Ready => {
                self.set_ready(&player_id, Some(true)).await;
                Ok(())
            }
            InboundEvent::ToggleReady => {
                self.set_ready(&player_id, None).await;
                Ok(())
            }
            InboundEvent::CursorUpdate(cursor) => {
                self.send_to_others(
                    &player_id,
                    &ServerMessage::CursorUpdate {
                        player_id: player_id.clone(),
                        cursor,
                    },
                );
                Ok(())
            }
            InboundEvent::RemovePlayer(payload) => {
                self.remove_by_host(&player_id, &payload.player_id).await
            }
        };

        if let Err(e) = result {
            info!("Session {}: {} from {} refused: {}", self.id, kind, player_id, e);
            self.notify_error(&player_id, &e);
        }
    }

    async fn handle_guess(&mut self, player_id: &PlayerId, guess: &str) {
        let state_lock = Arc::clone(&self.state);
        let mut state = state_lock.write().await;

        let remaining = self
            .timers
            .remaining(TimerKind::Turn)
            .filter(|_| state.turn.phase == TurnPhase::Drawing);
        let outcome = state.evaluate_guess(player_id, guess, remaining, self.config.drawer_bonus);

        let Some(participant) = state.participants.get(player_id) else {
            return;
        };
        let mut feedback = GuessFeedback {
            player_id: player_id.clone(),
            username: participant.username.clone(),
            color: participant.color.clone(),
            text: guess.to_string(),
            kind: FeedbackKind::Miss,
        };

        match &outcome {
            GuessOutcome::Ignored(reason) => {
                debug!(
                    "Session {}: guess from {} ignored: {:?}",
                    self.id, player_id, reason
                );
            }
            GuessOutcome::Correct {
                points,
                score,
                drawer_bonus,
            } => {
                info!(
                    "Session {}: {} guessed the word for {} points",
                    self.id, player_id, points
                );
                // Never echo the word itself
                feedback.kind = FeedbackKind::Correct;
                feedback.text = format!("{} guessed the word!", feedback.username);
                self.broadcast(&ServerMessage::PlayerGuess(feedback));
                self.broadcast(&ServerMessage::ScoreUpdated {
                    player_id: player_id.clone(),
                    score: *score,
                });
                if let Some((drawer_id, drawer_score)) = drawer_bonus {
                    self.broadcast(&ServerMessage::ScoreUpdated {
                        player_id: drawer_id.clone(),
                        score: *drawer_score,
                    });
                }
                self.broadcast_snapshot(&state);
            }
            GuessOutcome::Close { .. } => {
                feedback.kind = FeedbackKind::Close;
                self.send_to(player_id, &ServerMessage::PlayerGuess(feedback.clone()));
                feedback.text = format!("{} is close!", feedback.username);
                self.send_to_others(player_id, &ServerMessage::PlayerGuess(feedback));
            }
            GuessOutcome::Miss => {
                self.broadcast(&ServerMessage::PlayerGuess(feedback));
            }
        }

        if outcome.ends_turn() {
            self.end_turn(&mut state);
        }
    }

    /// `ready = None` toggles
    async fn set_ready(&mut self, player_id: &PlayerId, ready: Option<bool>) {
        let mut state = self.state.write().await;
        let Some(participant) = state.participants.get_mut(player_id) else {
            return;
        };
        participant.ready = ready.unwrap_or(!participant.ready);
        debug!(
            "Session {}: {} ready = {}",
            self.id, player_id, participant.ready
        );
        self.broadcast_snapshot(&state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use serde_json::json;
    use shared::Word;

    #[test]
    fn test_known_events_decode() {
        let registry = EventRegistry::with_defaults();

        assert_eq!(
            registry.decode(ClientMessage::guess("house")).unwrap(),
            InboundEvent::Guess(shared::GuessPayload {
                guess: "house".to_string()
            })
        );
        assert_eq!(
            registry
                .decode(ClientMessage::start_timer(TimerKind::GameStart))
                .unwrap(),
            InboundEvent::StartTimer(shared::TimerPayload {
                timer_type: TimerKind::GameStart
            })
        );
        assert_eq!(
            registry
                .decode(ClientMessage::new(tags::PLAYER_READY, Value::Null))
                .unwrap(),
            InboundEvent::Ready
        );

        let word = Word::new("apple", "food");
        assert!(matches!(
            registry.decode(ClientMessage::select_word(&word)),
            Ok(InboundEvent::SelectWord(payload)) if payload.word == word
        ));
    }

    #[test]
    fn test_cursor_payload() {
        let registry = EventRegistry::with_defaults();
        let message = ClientMessage::new(tags::CURSOR_UPDATE, json!({ "x": 1.5, "y": 2.0 }));
        match registry.decode(message).unwrap() {
            InboundEvent::CursorUpdate(cursor) => {
                assert_approx_eq!(cursor.x, 1.5);
                assert_approx_eq!(cursor.y, 2.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        let registry = EventRegistry::with_defaults();
        let result = registry.decode(ClientMessage::new("danceParty", Value::Null));
        assert!(matches!(result, Err(EventError::UnknownType(kind)) if kind == "danceParty"));
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        let registry = EventRegistry::with_defaults();
        let message = ClientMessage::new(tags::PLAYER_GUESS, json!({ "guess": 12 }));
        assert!(matches!(
            registry.decode(message),
            Err(EventError::Decode { kind, .. }) if kind == tags::PLAYER_GUESS
        ));
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = EventRegistry::new();
        assert!(!registry.contains(tags::PLAYER_READY));
        registry.register(tags::PLAYER_READY, |_| Ok(InboundEvent::ToggleReady));
        assert_eq!(
            registry
                .decode(ClientMessage::new(tags::PLAYER_READY, Value::Null))
                .unwrap(),
            InboundEvent::ToggleReady
        );
    }
}
