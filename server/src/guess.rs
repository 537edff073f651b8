//! Guess evaluation and scoring
//!
//! Guesses are compared case-insensitively after trimming. A wrong guess
//! within `CLOSE_DISTANCE` edits of the word counts as close; its text is
//! then only shown to the guesser.

use crate::game::SessionState;
use shared::PlayerId;

/// Edit distance at or below which a wrong guess counts as close
pub const CLOSE_DISTANCE: usize = 2;
/// Points for a correct guess at the very start of a turn
pub const MAX_GUESS_POINTS: f64 = 100.0;

pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Levenshtein distance counted in characters
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Points for guessing with `remaining` of `total` seconds left
pub fn score_for(remaining: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    let remaining = remaining.min(total) as f64;
    (MAX_GUESS_POINTS * remaining / total as f64).round() as u32
}

/// Why a guess had no effect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnknownPlayer,
    Drawer,
    NoActiveTurn,
    AlreadyGuessed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuessOutcome {
    Ignored(IgnoreReason),
    Correct {
        points: u32,
        score: u32,
        /// Set when this guess completed the turn
        drawer_bonus: Option<(PlayerId, u32)>,
    },
    Close {
        distance: usize,
    },
    Miss,
}

impl GuessOutcome {
    pub fn ends_turn(&self) -> bool {
        matches!(
            self,
            GuessOutcome::Correct {
                drawer_bonus: Some(_),
                ..
            }
        )
    }
}

impl SessionState {
    /// Checks a guess against the current word and applies the scoring.
    /// `remaining` is the turn timer's time left, `None` outside drawing.
    pub fn evaluate_guess(
        &mut self,
        player_id: &str,
        guess: &str,
        remaining: Option<u32>,
        drawer_bonus: u32,
    ) -> GuessOutcome {
        if !self.participants.contains_key(player_id) {
            return GuessOutcome::Ignored(IgnoreReason::UnknownPlayer);
        }
        if self.turn.is_drawer(player_id) {
            return GuessOutcome::Ignored(IgnoreReason::Drawer);
        }
        let (Some(remaining), Some(word)) = (remaining, self.turn.word.as_ref()) else {
            return GuessOutcome::Ignored(IgnoreReason::NoActiveTurn);
        };
        if self.turn.ending {
            return GuessOutcome::Ignored(IgnoreReason::NoActiveTurn);
        }
        if self.turn.has_guessed(player_id) {
            return GuessOutcome::Ignored(IgnoreReason::AlreadyGuessed);
        }

        let target = normalize(&word.word);
        let attempt = normalize(guess);
        if attempt != target {
            let distance = levenshtein(&attempt, &target);
            return if distance <= CLOSE_DISTANCE {
                GuessOutcome::Close { distance }
            } else {
                GuessOutcome::Miss
            };
        }

        self.turn.mark_guessed(player_id);
        let points = score_for(remaining, self.config.turn_duration);
        let score = match self.participants.get_mut(player_id) {
            Some(participant) => {
                participant.score += points;
                participant.score
            }
            None => points,
        };

        let mut bonus = None;
        if self.turn.all_guessed(&self.rotation) {
            if let Some(drawer_id) = self.turn.drawer_id.clone() {
                if let Some(drawer) = self.participants.get_mut(&drawer_id) {
                    drawer.score += drawer_bonus;
                    bonus = Some((drawer_id, drawer.score));
                }
            }
        }

        GuessOutcome::Correct {
            points,
            score,
            drawer_bonus: bonus,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::network::ConnectionRef;
    use shared::{Status, Word};

    fn drawing_state(word: &str) -> SessionState {
        let mut state = SessionState::new("s1".to_string(), SessionConfig::default());
        for id in ["d", "a", "b"] {
            state
                .add_participant(id.to_string(), id.to_string(), ConnectionRef::none())
                .unwrap();
        }
        state.status = Status::InProgress;
        state.round.begin();
        state.assign_next_drawer();
        state.turn.set_word(Word::new(word, "test"));
        let rotation = state.rotation.clone();
        state.turn.begin_drawing(rotation);
        state
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("house", "house"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
        assert_eq!(levenshtein("hous", "house"), 1);
        assert_eq!(levenshtein("café", "cafe"), 1);
    }

    #[test]
    fn test_score_scales_with_time_left() {
        assert_eq!(score_for(60, 60), 100);
        assert_eq!(score_for(30, 60), 50);
        assert_eq!(score_for(1, 60), 2);
        assert_eq!(score_for(0, 60), 0);
        assert_eq!(score_for(10, 0), 0);
    }

    #[test]
    fn test_correct_guess_scores_once() {
        let mut state = drawing_state("House");

        let outcome = state.evaluate_guess("a", "  house ", Some(45), 100);
        assert_eq!(
            outcome,
            GuessOutcome::Correct {
                points: 75,
                score: 75,
                drawer_bonus: None
            }
        );
        assert_eq!(
            state.evaluate_guess("a", "house", Some(40), 100),
            GuessOutcome::Ignored(IgnoreReason::AlreadyGuessed)
        );
        assert_eq!(state.participants["a"].score, 75);
    }

    #[test]
    fn test_close_and_miss() {
        let mut state = drawing_state("house");
        assert_eq!(
            state.evaluate_guess("a", "hose", Some(30), 100),
            GuessOutcome::Close { distance: 1 }
        );
        assert_eq!(
            state.evaluate_guess("a", "garden", Some(30), 100),
            GuessOutcome::Miss
        );
        assert!(!state.turn.has_guessed("a"));
    }

    #[test]
    fn test_drawer_and_outsiders_are_ignored() {
        let mut state = drawing_state("house");
        assert_eq!(
            state.evaluate_guess("d", "house", Some(30), 100),
            GuessOutcome::Ignored(IgnoreReason::Drawer)
        );
        assert_eq!(
            state.evaluate_guess("zz", "house", Some(30), 100),
            GuessOutcome::Ignored(IgnoreReason::UnknownPlayer)
        );
        assert_eq!(
            state.evaluate_guess("a", "house", None, 100),
            GuessOutcome::Ignored(IgnoreReason::NoActiveTurn)
        );
    }

    #[test]
    fn test_last_guesser_triggers_drawer_bonus() {
        let mut state = drawing_state("house");
        let first = state.evaluate_guess("a", "house", Some(60), 100);
        assert!(!first.ends_turn());

        let last = state.evaluate_guess("b", "HOUSE", Some(30), 100);
        assert_eq!(
            last,
            GuessOutcome::Correct {
                points: 50,
                score: 50,
                drawer_bonus: Some(("d".to_string(), 100)),
            }
        );
        assert!(last.ends_turn());
        assert_eq!(state.participants["d"].score, 100);
    }
}
