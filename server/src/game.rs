use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::network::ConnectionRef;
use crate::round::Round;
use crate::turn::Turn;
use log::info;
use shared::{
    GameSnapshot, PlayerId, PlayerInfo, SessionId, Status, TurnPhase, FALLBACK_COLOR,
    PLAYER_COLORS,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: PlayerId,
    pub username: String,
    pub is_host: bool,
    pub connected: bool,
    pub ready: bool,
    pub score: u32,
    pub color: String,
    pub is_drawing: bool,
    pub connection: ConnectionRef,
}

impl Participant {
    pub fn new(id: PlayerId, username: String, color: String, is_host: bool) -> Self {
        Self {
            id,
            username,
            is_host,
            connected: true,
            ready: false,
            score: 0,
            color,
            is_drawing: false,
            connection: ConnectionRef::none(),
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id.clone(),
            username: self.username.clone(),
            is_host: self.is_host,
            connected: self.connected,
            ready: self.ready,
            score: self.score,
            color: self.color.clone(),
            is_drawing: self.is_drawing,
        }
    }
}

/// A participant waiting out the grace period
#[derive(Debug, Clone)]
pub struct HeldParticipant {
    pub participant: Participant,
    /// Rotation position at the moment of the disconnect
    pub position: usize,
    /// Distinguishes this disconnect from earlier ones of the same player
    pub epoch: u64,
}

/// Everything one session knows. Only the session loop writes to it.
#[derive(Debug)]
pub struct SessionState {
    pub id: SessionId,
    pub config: SessionConfig,
    pub status: Status,
    /// Active participants
    pub participants: HashMap<PlayerId, Participant>,
    /// Drawing order, always exactly the keys of `participants`
    pub rotation: Vec<PlayerId>,
    pub round: Round,
    pub turn: Turn,
    /// Ids a host removed. They may never come back.
    pub removed: HashSet<PlayerId>,
    /// Disconnected participants inside their grace period
    pub held: HashMap<PlayerId, HeldParticipant>,
    pub used_words: HashSet<String>,
    pub turn_time_remaining: Option<u32>,
    /// Flow is paused because every participant is in the holding area
    pub parked: bool,
    pub last_activity: Instant,
    colors: VecDeque<String>,
    next_epoch: u64,
}

impl SessionState {
    pub fn new(id: SessionId, config: SessionConfig) -> Self {
        Self {
            id,
            config,
            status: Status::NotStarted,
            participants: HashMap::new(),
            rotation: Vec::new(),
            round: Round::new(),
            turn: Turn::default(),
            removed: HashSet::new(),
            held: HashMap::new(),
            used_words: HashSet::new(),
            turn_time_remaining: None,
            parked: false,
            last_activity: Instant::now(),
            colors: PLAYER_COLORS.iter().map(|c| c.to_string()).collect(),
            next_epoch: 1,
        }
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_active(&self, player_id: &str) -> bool {
        self.participants.contains_key(player_id)
    }

    /// Only an active host may use host actions. A host in the holding area
    /// keeps the role, and nobody else is promoted until its grace period
    /// runs out.
    pub fn is_host(&self, player_id: &str) -> bool {
        self.participants
            .get(player_id)
            .is_some_and(|participant| participant.is_host)
    }

    /// True when nobody is active but someone may still come back
    pub fn everyone_away(&self) -> bool {
        self.rotation.is_empty() && !self.held.is_empty()
    }

    /// Seats are held for disconnected participants too
    pub fn seats_taken(&self) -> usize {
        self.participants.len() + self.held.len()
    }

    pub fn add_participant(
        &mut self,
        player_id: PlayerId,
        username: String,
        connection: ConnectionRef,
    ) -> Result<PlayerInfo, SessionError> {
        if self.removed.contains(&player_id) {
            return Err(SessionError::Removed(player_id));
        }
        if self.participants.contains_key(&player_id) || self.held.contains_key(&player_id) {
            return Err(SessionError::AlreadyJoined(player_id));
        }
        if self.status != Status::NotStarted {
            return Err(SessionError::NotJoinable);
        }
        if self.seats_taken() >= self.config.max_players {
            return Err(SessionError::SessionFull(self.config.max_players));
        }

        let is_host = !self.participants.values().any(|p| p.is_host)
            && !self.held.values().any(|h| h.participant.is_host);
        let color = self.take_color();

        let mut participant = Participant::new(player_id.clone(), username, color, is_host);
        participant.connection = connection;
        let player_info = participant.info();

        info!(
            "Session {}: {} joined as {}{}",
            self.id,
            player_id,
            player_info.username,
            if is_host { " (host)" } else { "" }
        );
        self.participants.insert(player_id.clone(), participant);
        self.rotation.push(player_id);
        Ok(player_info)
    }

    fn take_color(&mut self) -> String {
        self.colors
            .pop_front()
            .unwrap_or_else(|| FALLBACK_COLOR.to_string())
    }

    pub fn release_color(&mut self, color: String) {
        if color != FALLBACK_COLOR && !self.colors.contains(&color) {
            self.colors.push_back(color);
        }
    }

    /// Takes a participant out of the active set and the rotation, returning
    /// it with its former rotation position
    pub fn detach(&mut self, player_id: &str) -> Option<(Participant, usize)> {
        let participant = self.participants.remove(player_id)?;
        let position = self
            .rotation
            .iter()
            .position(|id| id == player_id)
            .unwrap_or(self.rotation.len());
        self.rotation.retain(|id| id != player_id);
        self.round.reindex(&self.rotation);
        Some((participant, position))
    }

    /// Parks a detached participant for the grace period. The returned epoch
    /// identifies this particular disconnect.
    pub fn hold(&mut self, participant: Participant, position: usize) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.held.insert(
            participant.id.clone(),
            HeldParticipant {
                participant,
                position,
                epoch,
            },
        );
        epoch
    }

    /// Puts a held participant back at its old rotation position
    pub fn restore(&mut self, player_id: &str, connection: ConnectionRef) -> Option<PlayerInfo> {
        let held = self.held.remove(player_id)?;
        let mut participant = held.participant;
        participant.connected = true;
        participant.connection = connection;
        participant.is_drawing = self.turn.is_drawer(player_id) && !self.turn.ending;

        let position = held.position.min(self.rotation.len());
        self.rotation.insert(position, participant.id.clone());
        self.round.reindex(&self.rotation);

        if self.status == Status::InProgress && self.turn.phase == TurnPhase::Drawing {
            self.turn.add_guesser(participant.id.clone());
        }

        let player_info = participant.info();
        self.participants.insert(participant.id.clone(), participant);
        Some(player_info)
    }

    /// Drops a held participant for good, unless it came back or
    /// disconnected again since `epoch` was handed out
    pub fn release_held(&mut self, player_id: &str, epoch: u64) -> Option<Participant> {
        if self.held.get(player_id)?.epoch != epoch {
            return None;
        }
        let held = self.held.remove(player_id)?;
        self.round.forget(player_id);
        self.release_color(held.participant.color.clone());
        Some(held.participant)
    }

    /// Makes the first participant in rotation order host when nobody is
    pub fn promote_host_if_needed(&mut self) -> Option<PlayerId> {
        let has_host = self.participants.values().any(|p| p.is_host)
            || self.held.values().any(|h| h.participant.is_host);
        if has_host {
            return None;
        }
        let next = self.rotation.first()?.clone();
        let participant = self.participants.get_mut(&next)?;
        participant.is_host = true;
        info!("Session {}: {} is now host", self.id, next);
        Some(next)
    }

    /// Picks the next drawer of the round and opens a fresh turn for it
    pub fn assign_next_drawer(&mut self) -> Option<PlayerInfo> {
        let (index, drawer_id) = self.round.next_drawer(&self.rotation)?;
        self.round.assign_drawer(index, drawer_id.clone());
        self.turn = Turn::new(drawer_id.clone());
        self.turn_time_remaining = None;

        for participant in self.participants.values_mut() {
            participant.is_drawing = participant.id == drawer_id;
        }
        self.participants.get(&drawer_id).map(Participant::info)
    }

    pub fn clear_drawing_flags(&mut self) {
        for participant in self.participants.values_mut() {
            participant.is_drawing = false;
        }
    }

    pub fn snapshot(&self) -> GameSnapshot {
        let mut disconnected: Vec<PlayerId> = self.held.keys().cloned().collect();
        disconnected.sort();

        GameSnapshot {
            id: self.id.clone(),
            players: self
                .rotation
                .iter()
                .filter_map(|id| self.participants.get(id))
                .map(Participant::info)
                .collect(),
            player_order: self.rotation.clone(),
            disconnected,
            options: self.config.options(),
            status: self.status,
            round: self.round.info(),
            turn: self.turn.info(),
            turn_time_remaining: self.turn_time_remaining,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::Word;

    fn state_with(players: &[&str]) -> SessionState {
        let mut state = SessionState::new("s1".to_string(), SessionConfig::default());
        for id in players {
            state
                .add_participant(id.to_string(), id.to_uppercase(), ConnectionRef::none())
                .unwrap();
        }
        state
    }

    #[test]
    fn test_first_joiner_is_host() {
        let state = state_with(&["a", "b"]);
        assert!(state.is_host("a"));
        assert!(!state.is_host("b"));
        assert_eq!(state.rotation, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_everyone_away_needs_someone_held() {
        let mut state = state_with(&["a", "b"]);
        assert!(!state.everyone_away());

        for id in ["a", "b"] {
            let (participant, position) = state.detach(id).unwrap();
            state.hold(participant, position);
        }
        assert!(state.everyone_away());
        // Held host is still host but cannot act until it is back
        assert!(!state.is_host("a"));
        assert!(state.held["a"].participant.is_host);

        let epoch = state.held["b"].epoch;
        state.release_held("b", epoch).unwrap();
        assert!(state.everyone_away());
        state.restore("a", ConnectionRef::none()).unwrap();
        assert!(!state.everyone_away());
        assert!(state.is_host("a"));
    }

    #[test]
    fn test_colors_are_handed_out_in_order() {
        let state = state_with(&["a", "b"]);
        assert_eq!(state.participants["a"].color, PLAYER_COLORS[0]);
        assert_eq!(state.participants["b"].color, PLAYER_COLORS[1]);
    }

    #[test]
    fn test_join_rules() {
        let mut state = state_with(&["a"]);
        assert_eq!(
            state.add_participant("a".to_string(), "A".to_string(), ConnectionRef::none()),
            Err(SessionError::AlreadyJoined("a".to_string()))
        );

        state.removed.insert("x".to_string());
        assert_eq!(
            state.add_participant("x".to_string(), "X".to_string(), ConnectionRef::none()),
            Err(SessionError::Removed("x".to_string()))
        );

        state.status = Status::InProgress;
        assert_eq!(
            state.add_participant("c".to_string(), "C".to_string(), ConnectionRef::none()),
            Err(SessionError::NotJoinable)
        );
    }

    #[test]
    fn test_session_full() {
        let mut state = state_with(&["a", "b", "c", "d", "e", "f", "g", "h"]);
        assert_eq!(
            state.add_participant("i".to_string(), "I".to_string(), ConnectionRef::none()),
            Err(SessionError::SessionFull(8))
        );
    }

    #[test]
    fn test_fallback_color_after_palette_runs_out() {
        let config = SessionConfig {
            max_players: 10,
            ..SessionConfig::default()
        };
        let mut state = SessionState::new("s1".to_string(), config);
        for i in 0..9 {
            state
                .add_participant(format!("p{}", i), "P".to_string(), ConnectionRef::none())
                .unwrap();
        }
        assert_eq!(state.participants["p8"].color, FALLBACK_COLOR);
    }

    #[test]
    fn test_detach_and_restore_keeps_position() {
        let mut state = state_with(&["a", "b", "c"]);
        let (participant, position) = state.detach("b").unwrap();
        assert_eq!(position, 1);
        assert_eq!(state.rotation, vec!["a".to_string(), "c".to_string()]);
        assert!(!state.is_active("b"));

        let epoch = state.hold(participant, position);
        assert!(state.held.contains_key("b"));
        assert_eq!(state.snapshot().disconnected, vec!["b".to_string()]);

        let restored = state.restore("b", ConnectionRef::none()).unwrap();
        assert!(restored.connected);
        assert_eq!(
            state.rotation,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
        // Already back, the grace period must not drop it
        assert!(state.release_held("b", epoch).is_none());
        assert!(state.is_active("b"));
    }

    #[test]
    fn test_restore_clamps_position() {
        let mut state = state_with(&["a", "b", "c"]);
        let (participant, position) = state.detach("c").unwrap();
        state.hold(participant, position);
        state.detach("b");

        state.restore("c", ConnectionRef::none()).unwrap();
        assert_eq!(state.rotation, vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_stale_epoch_is_ignored() {
        let mut state = state_with(&["a", "b"]);
        let (participant, position) = state.detach("b").unwrap();
        let first = state.hold(participant, position);
        state.restore("b", ConnectionRef::none());

        let (participant, position) = state.detach("b").unwrap();
        let second = state.hold(participant, position);
        assert_ne!(first, second);

        assert!(state.release_held("b", first).is_none());
        let released = state.release_held("b", second).unwrap();
        assert_eq!(released.id, "b");
        assert!(state.held.is_empty());
    }

    #[test]
    fn test_host_promotion_follows_rotation() {
        let mut state = state_with(&["a", "b", "c"]);
        let (participant, position) = state.detach("a").unwrap();
        let epoch = state.hold(participant, position);

        // A held host keeps the role
        assert_eq!(state.promote_host_if_needed(), None);

        state.release_held("a", epoch);
        assert_eq!(state.promote_host_if_needed(), Some("b".to_string()));
        assert!(state.is_host("b"));
    }

    #[test]
    fn test_reconnect_mid_drawing_adds_guesser() {
        let mut state = state_with(&["a", "b", "c"]);
        state.status = Status::InProgress;
        state.round.begin();
        state.assign_next_drawer();
        state.turn.set_word(Word::new("house", "things"));
        state.turn.begin_drawing(state.rotation.clone());

        let (participant, position) = state.detach("c").unwrap();
        state.hold(participant, position);
        state.turn.guessed.remove("c");

        state.restore("c", ConnectionRef::none());
        assert_eq!(state.turn.guessed.get("c"), Some(&false));
    }

    #[test]
    fn test_assign_next_drawer_sets_flags() {
        let mut state = state_with(&["a", "b"]);
        state.round.begin();

        let drawer = state.assign_next_drawer().unwrap();
        assert_eq!(drawer.id, "a");
        assert!(state.participants["a"].is_drawing);
        assert!(!state.participants["b"].is_drawing);
        assert_eq!(state.turn.drawer_id.as_deref(), Some("a"));

        state.round.mark_drawn("a");
        assert_eq!(state.assign_next_drawer().unwrap().id, "b");
        assert!(!state.participants["a"].is_drawing);
    }

    #[test]
    fn test_snapshot_follows_rotation() {
        let state = state_with(&["b", "a"]);
        let snapshot = state.snapshot();
        let ids: Vec<_> = snapshot.players.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(snapshot.status, Status::NotStarted);
        assert_eq!(snapshot.options.max_players, 8);
    }
}
