//! Round bookkeeping: which rotation members already drew and who draws now

use shared::{PlayerId, RoundInfo};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Round {
    /// 1-based once the first round starts, 0 before
    pub count: u32,
    /// Position of the drawer within the rotation
    pub drawer_index: usize,
    pub drawer_id: Option<PlayerId>,
    /// Ids that drew this round, in drawing order
    pub drawn: Vec<PlayerId>,
}

impl Round {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the very first round sets the counter
    pub fn begin(&mut self) {
        if self.count == 0 {
            self.count = 1;
        }
    }

    /// Clears per-round tracking and moves on to the next round
    pub fn advance(&mut self) {
        self.count += 1;
        self.drawer_index = 0;
        self.drawer_id = None;
        self.drawn.clear();
    }

    pub fn has_drawn(&self, player_id: &str) -> bool {
        self.drawn.iter().any(|id| id == player_id)
    }

    pub fn mark_drawn(&mut self, player_id: &str) {
        if !self.has_drawn(player_id) {
            self.drawn.push(player_id.to_string());
        }
    }

    /// Drops a participant that left for good
    pub fn forget(&mut self, player_id: &str) {
        self.drawn.retain(|id| id != player_id);
    }

    /// The round is over once every rotation member has drawn
    pub fn is_complete(&self, rotation: &[PlayerId]) -> bool {
        rotation.iter().all(|id| self.has_drawn(id))
    }

    /// First rotation member, in rotation order, that has not drawn yet
    pub fn next_drawer(&self, rotation: &[PlayerId]) -> Option<(usize, PlayerId)> {
        rotation
            .iter()
            .enumerate()
            .find(|(_, id)| !self.has_drawn(id))
            .map(|(index, id)| (index, id.clone()))
    }

    pub fn assign_drawer(&mut self, index: usize, player_id: PlayerId) {
        self.drawer_index = index;
        self.drawer_id = Some(player_id);
    }

    /// Keeps `drawer_index` pointing at the drawer after the rotation changed.
    /// A drawer that is no longer in the rotation leaves the index clamped.
    pub fn reindex(&mut self, rotation: &[PlayerId]) {
        let position = self
            .drawer_id
            .as_ref()
            .and_then(|drawer| rotation.iter().position(|id| id == drawer));

        self.drawer_index = match position {
            Some(index) => index,
            None => self.drawer_index.min(rotation.len().saturating_sub(1)),
        };
    }

    pub fn info(&self) -> RoundInfo {
        RoundInfo {
            count: self.count,
            players_drawn: self.drawn.clone(),
            current_drawer_id: self.drawer_id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rotation(ids: &[&str]) -> Vec<PlayerId> {
        ids.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn test_begin_only_sets_first_round() {
        let mut round = Round::new();
        round.begin();
        assert_eq!(round.count, 1);

        round.advance();
        round.begin();
        assert_eq!(round.count, 2);
    }

    #[test]
    fn test_each_member_draws_once_in_rotation_order() {
        let order = rotation(&["c", "a", "b"]);
        let mut round = Round::new();
        round.begin();

        let mut visited = Vec::new();
        while let Some((index, id)) = round.next_drawer(&order) {
            round.assign_drawer(index, id.clone());
            assert_eq!(order[round.drawer_index], id);
            round.mark_drawn(&id);
            visited.push(id);
        }

        assert_eq!(visited, order);
        assert!(round.is_complete(&order));
    }

    #[test]
    fn test_mark_drawn_is_idempotent() {
        let mut round = Round::new();
        round.mark_drawn("a");
        round.mark_drawn("a");
        assert_eq!(round.drawn, vec!["a".to_string()]);
    }

    #[test]
    fn test_round_not_complete_until_everyone_drew() {
        let order = rotation(&["a", "b"]);
        let mut round = Round::new();
        round.mark_drawn("a");
        assert!(!round.is_complete(&order));
        round.mark_drawn("b");
        assert!(round.is_complete(&order));
    }

    #[test]
    fn test_advance_resets_tracking() {
        let mut round = Round::new();
        round.begin();
        round.assign_drawer(2, "c".to_string());
        round.mark_drawn("c");

        round.advance();
        assert_eq!(round.count, 2);
        assert_eq!(round.drawer_index, 0);
        assert!(round.drawer_id.is_none());
        assert!(round.drawn.is_empty());
    }

    #[test]
    fn test_reindex_follows_drawer() {
        let mut round = Round::new();
        round.assign_drawer(2, "c".to_string());

        round.reindex(&rotation(&["b", "c"]));
        assert_eq!(round.drawer_index, 1);

        round.reindex(&rotation(&["x", "a", "b", "c"]));
        assert_eq!(round.drawer_index, 3);

        round.reindex(&rotation(&["a"]));
        assert_eq!(round.drawer_index, 0);
    }

    #[test]
    fn test_forget_removes_from_drawn() {
        let mut round = Round::new();
        round.mark_drawn("a");
        round.mark_drawn("b");
        round.forget("a");
        assert!(!round.has_drawn("a"));
        assert!(round.has_drawn("b"));
    }

    #[test]
    fn test_empty_rotation_has_no_drawer() {
        let round = Round::new();
        assert!(round.next_drawer(&[]).is_none());
        assert!(round.is_complete(&[]));
    }
}
