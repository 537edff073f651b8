//! A single drawer's turn: word choice, progressive hints and who guessed
//!
//! Hints follow a square-root curve so early seconds give away more than the
//! late ones, and never exceed 70% of the word. Words of three characters or
//! fewer are never hinted at all.

use rand::Rng;
use shared::{PlayerId, RevealedLetter, TurnInfo, TurnPhase, Word};
use std::collections::HashMap;

/// Share of the word that may be revealed by hints
pub const REVEAL_CAP: f64 = 0.7;
/// Shortest word that gets hints
pub const REVEAL_MIN_LEN: usize = 4;

/// Maximum number of revealed characters for a word of `len` characters
pub fn reveal_cap(len: usize) -> usize {
    if len < REVEAL_MIN_LEN {
        return 0;
    }
    (len as f64 * REVEAL_CAP).floor() as usize
}

/// Characters that should be revealed after `elapsed` of `total` seconds
pub fn reveal_target(len: usize, elapsed: u32, total: u32) -> usize {
    if len < REVEAL_MIN_LEN || total == 0 {
        return 0;
    }
    let progress = (elapsed.min(total) as f64 / total as f64).sqrt();
    let target = (progress * len as f64).floor() as usize;
    target.min(reveal_cap(len))
}

#[derive(Debug, Clone, Default)]
pub struct Turn {
    pub drawer_id: Option<PlayerId>,
    pub word: Option<Word>,
    /// One slot per character of the word, `None` while hidden
    pub revealed: Vec<Option<char>>,
    /// Guessers of this turn. Entries only ever flip from false to true.
    pub guessed: HashMap<PlayerId, bool>,
    pub phase: TurnPhase,
    pub is_selecting: bool,
    /// Words offered to the drawer, only while selecting
    pub candidates: Vec<Word>,
    /// Set once the end of this turn has been requested
    pub ending: bool,
}

impl Turn {
    pub fn new(drawer_id: PlayerId) -> Self {
        Self {
            drawer_id: Some(drawer_id),
            ..Self::default()
        }
    }

    pub fn is_drawer(&self, player_id: &str) -> bool {
        self.drawer_id.as_deref() == Some(player_id)
    }

    /// Locks in the chosen word and hides every character
    pub fn set_word(&mut self, word: Word) {
        self.revealed = vec![None; word.len()];
        self.word = Some(word);
        self.is_selecting = false;
        self.candidates.clear();
    }

    /// Enters the drawing phase. Every guesser starts out without a correct guess.
    pub fn begin_drawing<I>(&mut self, guessers: I)
    where
        I: IntoIterator<Item = PlayerId>,
    {
        self.phase = TurnPhase::Drawing;
        self.is_selecting = false;
        self.guessed = guessers
            .into_iter()
            .filter(|id| !self.is_drawer(id))
            .map(|id| (id, false))
            .collect();
        if let Some(word) = &self.word {
            self.revealed = vec![None; word.len()];
        }
    }

    /// Adds a guesser mid-turn, keeping an earlier correct guess
    pub fn add_guesser(&mut self, player_id: PlayerId) {
        if !self.is_drawer(&player_id) {
            self.guessed.entry(player_id).or_insert(false);
        }
    }

    pub fn has_guessed(&self, player_id: &str) -> bool {
        self.guessed.get(player_id).copied().unwrap_or(false)
    }

    /// Returns false when the player had already guessed correctly
    pub fn mark_guessed(&mut self, player_id: &str) -> bool {
        if self.has_guessed(player_id) {
            return false;
        }
        self.guessed.insert(player_id.to_string(), true);
        true
    }

    /// True when at least one guesser is in `rotation` and all of them guessed
    pub fn all_guessed(&self, rotation: &[PlayerId]) -> bool {
        let mut guessers = rotation.iter().filter(|id| !self.is_drawer(id)).peekable();
        if guessers.peek().is_none() {
            return false;
        }
        guessers.all(|id| self.has_guessed(id))
    }

    pub fn revealed_count(&self) -> usize {
        self.revealed.iter().filter(|slot| slot.is_some()).count()
    }

    /// Reveals enough random hidden characters to reach the target for
    /// `elapsed` seconds into the turn. Spaces go first. Returns only the
    /// characters revealed by this call, sorted by index.
    pub fn reveal_progress<R: Rng>(
        &mut self,
        elapsed: u32,
        total: u32,
        rng: &mut R,
    ) -> Vec<RevealedLetter> {
        let Some(word) = &self.word else {
            return Vec::new();
        };
        let letters: Vec<char> = word.word.chars().collect();
        if self.revealed.len() != letters.len() {
            self.revealed = vec![None; letters.len()];
        }

        let target = reveal_target(letters.len(), elapsed, total);
        let current = self.revealed_count();
        if current >= target {
            return Vec::new();
        }

        let (mut spaces, mut others): (Vec<usize>, Vec<usize>) = self
            .revealed
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(index, _)| index)
            .partition(|&index| letters[index].is_whitespace());

        let mut budget = target - current;
        let mut delta = Vec::with_capacity(budget);
        for pool in [&mut spaces, &mut others] {
            while budget > 0 && !pool.is_empty() {
                let index = pool.swap_remove(rng.gen_range(0..pool.len()));
                self.revealed[index] = Some(letters[index]);
                delta.push(RevealedLetter {
                    index,
                    letter: letters[index],
                });
                budget -= 1;
            }
        }

        delta.sort_by_key(|letter| letter.index);
        delta
    }

    pub fn info(&self) -> TurnInfo {
        TurnInfo {
            drawer_id: self.drawer_id.clone(),
            phase: self.phase,
            is_selecting_word: self.is_selecting,
            word_length: self.word.as_ref().map(Word::len),
            revealed_letters: self.revealed.clone(),
            players_guessed_correctly: self.guessed.clone(),
        }
    }
}
