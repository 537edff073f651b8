//! Error types for the session engine
//!
//! None of these are fatal to a running session. Caller-facing failures are
//! returned synchronously, malformed input is logged and dropped.

use shared::{PlayerId, SessionId};
use thiserror::Error;

/// Failures reported to whoever asked the session to do something
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("session is full ({0} players)")]
    SessionFull(usize),

    #[error("session {0} not found")]
    NotFound(SessionId),

    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("session is not accepting new players")]
    NotJoinable,

    #[error("player {0} already joined")]
    AlreadyJoined(PlayerId),

    #[error("player {0} cannot reconnect")]
    NotReconnectable(PlayerId),

    #[error("player {0} was removed from the session")]
    Removed(PlayerId),

    #[error("only the host can do that")]
    Unauthorized,

    #[error("invalid target player {0}")]
    InvalidTarget(PlayerId),

    #[error("game has already started")]
    AlreadyStarted,

    #[error("need at least {0} players to start")]
    NotEnoughPlayers(usize),

    #[error("invalid session config: {0}")]
    Config(#[from] ConfigError),

    #[error("session has shut down")]
    Closed,
}

/// Inbound events that could not be turned into an `InboundEvent`
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unknown event type: {0}")]
    UnknownType(String),

    #[error("malformed {kind} payload: {source}")]
    Decode {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WordStoreError {
    #[error("word store has no words left")]
    Exhausted,

    #[error("word store failure: {0}")]
    Backend(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be at least one second")]
    ZeroDuration(&'static str),

    #[error("round_limit must be at least 1")]
    ZeroRounds,

    #[error("max_players must be at least 2, got {0}")]
    TooFewPlayers(usize),

    #[error("word_choices must be at least 1")]
    NoWordChoices,

    #[error("queue capacities must be non-zero")]
    ZeroQueue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(
            SessionError::SessionFull(8).to_string(),
            "session is full (8 players)"
        );
        assert_eq!(
            SessionError::Removed("p2".to_string()).to_string(),
            "player p2 was removed from the session"
        );
        assert_eq!(
            EventError::UnknownType("dance".to_string()).to_string(),
            "unknown event type: dance"
        );
    }

    #[test]
    fn test_decode_error_keeps_source() {
        let source = serde_json::from_str::<u32>("\"x\"").unwrap_err();
        let error = EventError::Decode {
            kind: "playerGuess".to_string(),
            source,
        };
        assert!(error.to_string().starts_with("malformed playerGuess payload"));
        assert!(std::error::Error::source(&error).is_some());
    }
}
