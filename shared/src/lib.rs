use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

pub type PlayerId = String;
pub type SessionId = String;

pub const MASK_CHAR: char = '_';
pub const FALLBACK_COLOR: &str = "#FFFFFF";
pub const PLAYER_COLORS: [&str; 8] = [
    "#FF0000", "#00FF00", "#0000FF", "#FFFF00", "#FF00FF", "#00FFFF", "#FFA500", "#800080",
];

/// Inbound `type` tags recognised by the session loop.
pub mod tags {
    pub const REQUEST_GAME_STATE: &str = "requestGameState";
    pub const PLAYER_GUESS: &str = "playerGuess";
    pub const START_TIMER: &str = "startTimer";
    pub const STOP_TIMER: &str = "stopTimer";
    pub const SELECT_WORD: &str = "selectWord";
    pub const PLAYER_READY: &str = "playerReady";
    pub const PLAYER_TOGGLE_READY: &str = "playerToggleReady";
    pub const CURSOR_UPDATE: &str = "cursorUpdate";
    pub const REMOVE_PLAYER: &str = "removePlayer";
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Word {
    pub word: String,
    #[serde(default)]
    pub category: String,
}

impl Word {
    pub fn new(word: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            word: word.into(),
            category: category.into(),
        }
    }

    /// Length in characters, which is also the length of the reveal buffer.
    pub fn len(&self) -> usize {
        self.word.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.word.is_empty()
    }

    /// The word with every character hidden, as shown to guessers.
    pub fn masked(&self) -> String {
        self.word.chars().map(|_| MASK_CHAR).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerKind {
    #[serde(rename = "startGameCountdown")]
    GameStart,
    #[serde(rename = "turnTimer")]
    Turn,
    #[serde(rename = "selectWordTimer")]
    WordSelection,
}

impl TimerKind {
    pub const fn tag(&self) -> &'static str {
        match self {
            TimerKind::GameStart => "startGameCountdown",
            TimerKind::Turn => "turnTimer",
            TimerKind::WordSelection => "selectWordTimer",
        }
    }
}

impl fmt::Display for TimerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Status {
    #[default]
    NotStarted,
    InProgress,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TurnPhase {
    #[default]
    WordSelection,
    Drawing,
}

/// Public view of a participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    pub id: PlayerId,
    pub username: String,
    pub is_host: bool,
    pub connected: bool,
    pub ready: bool,
    pub score: u32,
    pub color: String,
    pub is_drawing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOptions {
    pub turn_time_limit: u32,
    pub word_select_time_limit: u32,
    pub round_limit: u32,
    pub max_players: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundInfo {
    pub count: u32,
    pub players_drawn: Vec<PlayerId>,
    pub current_drawer_id: Option<PlayerId>,
}

/// Turn state as every participant may see it. The secret word and the
/// drawer's candidate list are never part of this view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnInfo {
    pub drawer_id: Option<PlayerId>,
    pub phase: TurnPhase,
    pub is_selecting_word: bool,
    pub word_length: Option<usize>,
    pub revealed_letters: Vec<Option<char>>,
    pub players_guessed_correctly: HashMap<PlayerId, bool>,
}

/// Point-in-time copy of a session, ordered by the drawing rotation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSnapshot {
    pub id: SessionId,
    pub players: Vec<PlayerInfo>,
    pub player_order: Vec<PlayerId>,
    pub disconnected: Vec<PlayerId>,
    pub options: GameOptions,
    pub status: Status,
    pub round: RoundInfo,
    pub turn: TurnInfo,
    pub turn_time_remaining: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedLetter {
    pub index: usize,
    pub letter: char,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackKind {
    Correct,
    Close,
    Miss,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuessFeedback {
    pub player_id: PlayerId,
    pub username: String,
    pub color: String,
    pub text: String,
    pub kind: FeedbackKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cursor {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// Every message the session sends, encoded as a `{type, payload}` envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    GameState(GameSnapshot),
    PlayerJoined {
        player: PlayerInfo,
    },
    PlayerLeft {
        player: PlayerInfo,
    },
    PlayerRemoved {
        player: PlayerInfo,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    PlayerReconnected {
        player: PlayerInfo,
    },
    DrawingPlayerChanged {
        player: PlayerInfo,
    },
    /// The drawer receives the word, everyone else only the mask
    WordSelected {
        word: Option<Word>,
        masked: String,
        is_selecting_word: bool,
    },
    RevealedLetters {
        letters: Vec<RevealedLetter>,
    },
    ScoreUpdated {
        player_id: PlayerId,
        score: u32,
    },
    TimerTick {
        timer_type: TimerKind,
        time_remaining: u32,
    },
    OpenSelectWordModal {
        selectable_words: Vec<Word>,
        is_selecting_word: bool,
    },
    TurnEnded {
        drawer_id: Option<PlayerId>,
        word: Option<Word>,
    },
    GameEnded {
        message: String,
    },
    PlayerGuess(GuessFeedback),
    CursorUpdate {
        player_id: PlayerId,
        cursor: Cursor,
    },
    Notification {
        level: NotificationLevel,
        message: String,
    },
}

impl ServerMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            ServerMessage::GameState(_) => "gameState",
            ServerMessage::PlayerJoined { .. } => "playerJoined",
            ServerMessage::PlayerLeft { .. } => "playerLeft",
            ServerMessage::PlayerRemoved { .. } => "playerRemoved",
            ServerMessage::PlayerDisconnected { .. } => "playerDisconnected",
            ServerMessage::PlayerReconnected { .. } => "playerReconnected",
            ServerMessage::DrawingPlayerChanged { .. } => "drawingPlayerChanged",
            ServerMessage::WordSelected { .. } => "wordSelected",
            ServerMessage::RevealedLetters { .. } => "revealedLetters",
            ServerMessage::ScoreUpdated { .. } => "scoreUpdated",
            ServerMessage::TimerTick { .. } => "timerTick",
            ServerMessage::OpenSelectWordModal { .. } => "openSelectWordModal",
            ServerMessage::TurnEnded { .. } => "turnEnded",
            ServerMessage::GameEnded { .. } => "gameEnded",
            ServerMessage::PlayerGuess(_) => "playerGuess",
            ServerMessage::CursorUpdate { .. } => "cursorUpdate",
            ServerMessage::Notification { .. } => "notification",
        }
    }
}

/// Raw inbound envelope. The payload stays untyped until the session's
/// event registry picks a decoder for the tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl ClientMessage {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn guess(guess: impl Into<String>) -> Self {
        Self::new(
            tags::PLAYER_GUESS,
            serde_json::json!({ "guess": guess.into() }),
        )
    }

    pub fn select_word(word: &Word) -> Self {
        Self::new(tags::SELECT_WORD, serde_json::json!({ "word": word }))
    }

    pub fn start_timer(kind: TimerKind) -> Self {
        Self::new(tags::START_TIMER, serde_json::json!({ "timerType": kind }))
    }

    pub fn stop_timer(kind: TimerKind) -> Self {
        Self::new(tags::STOP_TIMER, serde_json::json!({ "timerType": kind }))
    }

    pub fn remove_player(player_id: impl Into<String>) -> Self {
        Self::new(
            tags::REMOVE_PLAYER,
            serde_json::json!({ "playerId": player_id.into() }),
        )
    }

    pub fn request_game_state() -> Self {
        Self::new(tags::REQUEST_GAME_STATE, Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GuessPayload {
    pub guess: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerPayload {
    pub timer_type: TimerKind,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SelectWordPayload {
    pub word: Word,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePlayerPayload {
    pub player_id: PlayerId,
}

/// Decoded inbound client event
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    RequestGameState,
    Guess(GuessPayload),
    StartTimer(TimerPayload),
    StopTimer(TimerPayload),
    SelectWord(SelectWordPayload),
    Ready,
    ToggleReady,
    CursorUpdate(Cursor),
    RemovePlayer(RemovePlayerPayload),
}
