//! Word sources for the drawer's choice

use crate::error::WordStoreError;
use async_trait::async_trait;
use rand::seq::SliceRandom;
use shared::Word;
use std::collections::HashSet;

#[async_trait]
pub trait WordStore: Send + Sync {
    /// Up to `count` distinct random words
    async fn fetch_random_words(&self, count: usize) -> Result<Vec<Word>, WordStoreError>;
}

/// A fixed in-memory word list
#[derive(Debug, Clone)]
pub struct StaticWordStore {
    words: Vec<Word>,
}

impl StaticWordStore {
    pub fn new(words: Vec<Word>) -> Self {
        Self { words }
    }

    pub fn builtin() -> Self {
        const BUILTIN: &[(&str, &str)] = &[
            ("apple", "food"),
            ("banana", "food"),
            ("ice cream", "food"),
            ("pizza", "food"),
            ("sandwich", "food"),
            ("elephant", "animals"),
            ("giraffe", "animals"),
            ("penguin", "animals"),
            ("octopus", "animals"),
            ("butterfly", "animals"),
            ("lighthouse", "places"),
            ("castle", "places"),
            ("volcano", "places"),
            ("library", "places"),
            ("bicycle", "things"),
            ("umbrella", "things"),
            ("telescope", "things"),
            ("guitar", "things"),
            ("rocket", "things"),
            ("snowman", "things"),
            ("hot air balloon", "things"),
            ("rainbow", "nature"),
            ("waterfall", "nature"),
            ("mountain", "nature"),
        ];
        Self::new(
            BUILTIN
                .iter()
                .map(|(word, category)| Word::new(*word, *category))
                .collect(),
        )
    }

    pub fn words(&self) -> &[Word] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for StaticWordStore {
    fn default() -> Self {
        Self::builtin()
    }
}

#[async_trait]
impl WordStore for StaticWordStore {
    async fn fetch_random_words(&self, count: usize) -> Result<Vec<Word>, WordStoreError> {
        if self.words.is_empty() {
            return Err(WordStoreError::Exhausted);
        }
        let words = self
            .words
            .choose_multiple(&mut rand::thread_rng(), count)
            .cloned()
            .collect();
        Ok(words)
    }
}

/// Picks `count` distinct candidates, preferring words not played yet in
/// this session. Falls back to played words when there are not enough new ones.
pub fn pick_candidates(fetched: Vec<Word>, used: &HashSet<String>, count: usize) -> Vec<Word> {
    let mut seen = HashSet::new();
    let (fresh, played): (Vec<Word>, Vec<Word>) = fetched
        .into_iter()
        .filter(|word| !word.is_empty() && seen.insert(word.word.to_lowercase()))
        .partition(|word| !used.contains(&word.word.to_lowercase()));

    fresh.into_iter().chain(played).take(count).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<Word> {
        list.iter().map(|w| Word::new(*w, "test")).collect()
    }

    #[tokio::test]
    async fn test_static_store_returns_distinct_words() {
        let store = StaticWordStore::builtin();
        let fetched = store.fetch_random_words(3).await.unwrap();
        assert_eq!(fetched.len(), 3);

        let unique: HashSet<_> = fetched.iter().map(|w| w.word.clone()).collect();
        assert_eq!(unique.len(), 3);
    }

    #[tokio::test]
    async fn test_small_store_returns_what_it_has() {
        let store = StaticWordStore::new(words(&["one", "two"]));
        assert_eq!(store.fetch_random_words(5).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_is_exhausted() {
        let store = StaticWordStore::new(Vec::new());
        assert_eq!(
            store.fetch_random_words(3).await,
            Err(WordStoreError::Exhausted)
        );
    }

    #[test]
    fn test_pick_candidates_prefers_unplayed_words() {
        let used: HashSet<String> = ["apple".to_string()].into_iter().collect();
        let picked = pick_candidates(words(&["apple", "pear", "plum", "fig"]), &used, 3);
        assert_eq!(picked, words(&["pear", "plum", "fig"]));
    }

    #[test]
    fn test_pick_candidates_falls_back_to_played_words() {
        let used: HashSet<String> = ["apple".to_string(), "pear".to_string()]
            .into_iter()
            .collect();
        let picked = pick_candidates(words(&["apple", "pear", "plum"]), &used, 3);
        assert_eq!(picked.len(), 3);
        assert_eq!(picked[0].word, "plum");
    }

    #[test]
    fn test_pick_candidates_drops_duplicates() {
        let picked = pick_candidates(words(&["Fig", "fig", "kiwi"]), &HashSet::new(), 3);
        assert_eq!(picked, words(&["Fig", "kiwi"]));
    }
}
