//! Player registry: the bounded collection of connected players.
//!
//! Each player carries its identity, display name, readiness flag, the
//! hand dealt for the current round and the outbound line channel of its
//! connection. Ids are stable and monotonically assigned, never reused
//! or reassigned, so callers may cache them across removals.
//!
//! The registry is guarded by the server context's readers-writer lock;
//! counts and broadcast iteration run under the read guard, structural
//! mutations (join, leave, readiness, names, hands) under the write
//! guard. When the game engine's lock is also needed, it is always
//! acquired first.

use log::info;
use shared::{Card, MAX_NAME_LEN, NO_CARD};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc::UnboundedSender;

/// A connected player.
#[derive(Debug)]
pub struct Player {
    /// Stable identifier assigned by the registry.
    pub id: u32,
    /// Display name; defaults to `player<id>` until the client sets one.
    pub name: String,
    /// Willingness to begin the next game or round. Meaningless while a
    /// round is in progress.
    pub ready: bool,
    /// Cards dealt for the current round; played slots hold `NO_CARD`.
    /// Empty outside of a round.
    pub hand: Vec<Card>,
    /// Outbound line channel drained by the connection's writer task.
    line_tx: UnboundedSender<String>,
}

impl Player {
    /// Queues one line for this player's connection. Returns false if the
    /// writer task is gone (connection already closed).
    pub fn send_line(&self, line: String) -> bool {
        self.line_tx.send(line).is_ok()
    }

    /// Number of unplayed cards left in the hand.
    pub fn cards_left(&self) -> usize {
        self.hand.iter().filter(|&&c| c != NO_CARD).count()
    }
}

/// Outcome of a readiness update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyChange {
    Changed,
    NoOp,
    NotFound,
}

/// Why a display name was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameError {
    Empty,
    TooLong,
    NotOneWord,
    UnknownPlayer,
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::Empty => write!(f, "name must not be empty"),
            NameError::TooLong => write!(f, "name must be at most {} characters", MAX_NAME_LEN),
            NameError::NotOneWord => write!(f, "name must be a single word"),
            NameError::UnknownPlayer => write!(f, "unknown player"),
        }
    }
}

/// Bounded collection of connected players.
pub struct PlayerRegistry {
    players: HashMap<u32, Player>,
    next_player_id: u32,
    max_players: usize,
}

impl PlayerRegistry {
    pub fn new(max_players: usize) -> Self {
        Self {
            players: HashMap::new(),
            next_player_id: 1,
            max_players,
        }
    }

    /// Adds a player bound to the given line channel. Returns the new id,
    /// or `None` once the registry holds `max_players` players.
    pub fn add_player(&mut self, line_tx: UnboundedSender<String>) -> Option<u32> {
        if self.players.len() >= self.max_players {
            return None;
        }

        let id = self.next_player_id;
        self.next_player_id += 1;

        let player = Player {
            id,
            name: format!("player{}", id),
            ready: false,
            hand: Vec::new(),
            line_tx,
        };
        info!("Player {} joined ({}/{})", id, self.players.len() + 1, self.max_players);
        self.players.insert(id, player);

        Some(id)
    }

    /// Removes a player by id. Ids of the remaining players are untouched.
    pub fn remove_player(&mut self, id: u32) -> bool {
        if let Some(player) = self.players.remove(&id) {
            info!("Player {} ({}) left", player.id, player.name);
            true
        } else {
            false
        }
    }

    pub fn get(&self, id: u32) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Updates a player's readiness flag. No-op if already in the
    /// requested state.
    pub fn set_ready(&mut self, id: u32, state: bool) -> ReadyChange {
        match self.players.get_mut(&id) {
            None => ReadyChange::NotFound,
            Some(player) if player.ready == state => ReadyChange::NoOp,
            Some(player) => {
                player.ready = state;
                ReadyChange::Changed
            }
        }
    }

    /// Clears every readiness flag, e.g. when a round or game ends.
    pub fn reset_ready(&mut self) {
        for player in self.players.values_mut() {
            player.ready = false;
        }
    }

    /// Sets a player's display name. Names are a single word of at most
    /// `MAX_NAME_LEN` characters so they survive the wire format.
    pub fn set_name(&mut self, id: u32, name: &str) -> Result<(), NameError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(NameError::Empty);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::TooLong);
        }
        if name.split_whitespace().count() != 1 {
            return Err(NameError::NotOneWord);
        }
        match self.players.get_mut(&id) {
            Some(player) => {
                player.name = name.to_string();
                Ok(())
            }
            None => Err(NameError::UnknownPlayer),
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Number of players currently flagged ready.
    pub fn ready_count(&self) -> usize {
        self.players.values().filter(|p| p.ready).count()
    }

    /// Player ids in ascending order. Gives the deal a deterministic
    /// iteration order for a given deck.
    pub fn ids(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.players.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterates over all players; the substrate for broadcast.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// Allocates every player an empty hand of `size` slots.
    pub fn give_hands(&mut self, size: usize) {
        for player in self.players.values_mut() {
            player.hand = vec![NO_CARD; size];
        }
    }

    /// Releases all hands at the end of a round.
    pub fn clear_hands(&mut self) {
        for player in self.players.values_mut() {
            player.hand.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn registry_with(max: usize, count: usize) -> PlayerRegistry {
        let mut registry = PlayerRegistry::new(max);
        for _ in 0..count {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.add_player(tx).unwrap();
        }
        registry
    }

    #[test]
    fn test_add_player_assigns_sequential_ids() {
        let mut registry = PlayerRegistry::new(3);
        let (tx, _rx) = mpsc::unbounded_channel();
        let (tx2, _rx2) = mpsc::unbounded_channel();

        assert_eq!(registry.add_player(tx), Some(1));
        assert_eq!(registry.add_player(tx2), Some(2));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity_enforced() {
        let mut registry = registry_with(2, 2);
        assert!(registry.is_full());

        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(registry.add_player(tx), None);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_ids_stable_across_removal() {
        let mut registry = registry_with(4, 3);
        assert!(registry.remove_player(2));

        // Remaining players keep their ids, a newcomer gets a fresh one
        assert_eq!(registry.ids(), vec![1, 3]);
        let (tx, _rx) = mpsc::unbounded_channel();
        assert_eq!(registry.add_player(tx), Some(4));
        assert_eq!(registry.ids(), vec![1, 3, 4]);
    }

    #[test]
    fn test_remove_unknown_player() {
        let mut registry = registry_with(2, 1);
        assert!(!registry.remove_player(99));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ready_is_idempotent() {
        let mut registry = registry_with(2, 1);

        assert_eq!(registry.set_ready(1, true), ReadyChange::Changed);
        assert_eq!(registry.set_ready(1, true), ReadyChange::NoOp);
        assert_eq!(registry.ready_count(), 1);

        assert_eq!(registry.set_ready(1, false), ReadyChange::Changed);
        assert_eq!(registry.ready_count(), 0);

        assert_eq!(registry.set_ready(42, true), ReadyChange::NotFound);
    }

    #[test]
    fn test_reset_ready() {
        let mut registry = registry_with(3, 3);
        for id in registry.ids() {
            registry.set_ready(id, true);
        }
        assert_eq!(registry.ready_count(), 3);

        registry.reset_ready();
        assert_eq!(registry.ready_count(), 0);
    }

    #[test]
    fn test_set_name_validation() {
        let mut registry = registry_with(2, 1);

        assert_eq!(registry.set_name(1, "  alice  "), Ok(()));
        assert_eq!(registry.get(1).unwrap().name, "alice");

        assert_eq!(registry.set_name(1, ""), Err(NameError::Empty));
        assert_eq!(registry.set_name(1, "two words"), Err(NameError::NotOneWord));
        assert_eq!(
            registry.set_name(1, &"x".repeat(MAX_NAME_LEN + 1)),
            Err(NameError::TooLong)
        );
        assert_eq!(registry.set_name(9, "bob"), Err(NameError::UnknownPlayer));

        // Rejected names leave the previous one in place
        assert_eq!(registry.get(1).unwrap().name, "alice");
    }

    #[test]
    fn test_hand_lifecycle() {
        let mut registry = registry_with(2, 2);
        registry.give_hands(3);

        for player in registry.players() {
            assert_eq!(player.hand, vec![NO_CARD; 3]);
            assert_eq!(player.cards_left(), 0);
        }

        registry.get_mut(1).unwrap().hand[0] = 42;
        assert_eq!(registry.get(1).unwrap().cards_left(), 1);

        registry.clear_hands();
        for player in registry.players() {
            assert!(player.hand.is_empty());
        }
    }

    #[test]
    fn test_send_line_reports_closed_connection() {
        let mut registry = PlayerRegistry::new(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = registry.add_player(tx).unwrap();

        assert!(registry.get(id).unwrap().send_line("hello".to_string()));
        drop(rx);
        assert!(!registry.get(id).unwrap().send_line("anyone there".to_string()));
    }
}
