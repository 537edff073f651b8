//! Per-session configuration
//!
//! Timer lengths are whole seconds because every countdown ticks once per
//! second and the tick count is what clients see.

use crate::error::ConfigError;
use serde::Deserialize;
use shared::GameOptions;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Drawing phase length in seconds
    pub turn_duration: u32,
    /// Time the drawer gets to pick a word, in seconds
    pub word_selection_duration: u32,
    /// Number of rounds before the game ends
    pub round_limit: u32,
    /// Maximum number of active participants
    pub max_players: usize,
    /// Pre-game countdown started by the host, in seconds
    pub start_countdown: u32,
    /// Pause between the countdown finishing and the first round
    pub start_delay_ms: u64,
    /// How long a disconnected participant may take to come back
    pub grace_period_ms: u64,
    /// Candidate words offered to the drawer
    pub word_choices: usize,
    /// Awarded to the drawer when every guesser found the word
    pub drawer_bonus: u32,
    /// Per-recipient outbound queue length before the recipient is dropped
    pub outbound_queue: usize,
    /// Capacity of the session's inbound channel
    pub input_queue: usize,
    /// Upper bound on waiting for timer tasks during shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            turn_duration: 60,
            word_selection_duration: 10,
            round_limit: 3,
            max_players: 8,
            start_countdown: 5,
            start_delay_ms: 2_000,
            grace_period_ms: 30_000,
            word_choices: 3,
            drawer_bonus: 100,
            outbound_queue: 64,
            input_queue: 256,
            shutdown_timeout_ms: 2_000,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.turn_duration == 0 {
            return Err(ConfigError::ZeroDuration("turn_duration"));
        }
        if self.word_selection_duration == 0 {
            return Err(ConfigError::ZeroDuration("word_selection_duration"));
        }
        if self.start_countdown == 0 {
            return Err(ConfigError::ZeroDuration("start_countdown"));
        }
        if self.round_limit == 0 {
            return Err(ConfigError::ZeroRounds);
        }
        if self.max_players < 2 {
            return Err(ConfigError::TooFewPlayers(self.max_players));
        }
        if self.word_choices == 0 {
            return Err(ConfigError::NoWordChoices);
        }
        if self.outbound_queue == 0 || self.input_queue == 0 {
            return Err(ConfigError::ZeroQueue);
        }
        Ok(())
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_millis(self.start_delay_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// The subset of the configuration clients get to see
    pub fn options(&self) -> GameOptions {
        GameOptions {
            turn_time_limit: self.turn_duration,
            word_select_time_limit: self.word_selection_duration,
            round_limit: self.round_limit,
            max_players: self.max_players,
        }
    }
}
