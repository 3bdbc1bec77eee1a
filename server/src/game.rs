//! The game engine: state machine and round orchestration for The Mind.
//!
//! The engine owns the card queue, the board of accepted plays and the
//! per-game statistics, and cycles through `Lobby → Active → Round →
//! Active → … → Lobby` for the server's lifetime. Every operation runs
//! under the engine's write lock for its full duration; when a player in
//! the registry must be consulted or mutated, the caller passes the
//! already-acquired registry guard, which fixes the lock order to
//! engine-before-registry.
//!
//! The one deliberately split operation is the pre-round countdown: the
//! engine leaves `start_round` in the `Countdown` sub-phase without
//! sleeping, the network layer broadcasts the countdown ticks with no
//! lock held, and `finish_countdown` re-enters the engine only to flip
//! into the playable sub-phase. A round epoch makes stale countdown tasks
//! harmless.

use crate::card_queue::CardQueue;
use crate::messaging;
use crate::registry::{PlayerRegistry, ReadyChange};
use crate::stats::{self, GameStats, RankEntry};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use shared::{Card, ServerEvent, DECK_SIZE, NO_CARD};
use std::fmt;
use std::path::PathBuf;
use std::time::Instant;

const DEFAULT_ROUND: u32 = 1;

/// Sub-phase of an in-progress round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Cards are dealt but plays are not yet open.
    Countdown,
    /// Plays are open.
    Playing,
}

/// The engine's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    /// Waiting for players; no game running.
    Lobby,
    /// Game running, between rounds.
    Active,
    /// A round is in progress.
    Round(RoundPhase),
}

/// Why an engine operation was refused. Surfaced to the requesting
/// player as a message, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    NotAllReady,
    NoPlayers,
    WrongState,
    NotPlayable,
    ReadyLocked,
    DeckExhausted,
    NoSuchCard(u16),
    UnknownPlayer,
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::NotAllReady => write!(f, "not all players are ready"),
            GameError::NoPlayers => write!(f, "there is nobody to play with"),
            GameError::WrongState => write!(f, "that is not possible right now"),
            GameError::NotPlayable => write!(f, "wait for the go signal"),
            GameError::ReadyLocked => write!(f, "readiness cannot change during a round"),
            GameError::DeckExhausted => {
                write!(f, "the deck cannot serve a card to every player")
            }
            GameError::NoSuchCard(card) => write!(f, "you do not have card {}", card),
            GameError::UnknownPlayer => write!(f, "unknown player"),
        }
    }
}

impl std::error::Error for GameError {}

/// Result of an accepted `play_card` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The card matched the queue minimum; play continues.
    Accepted,
    /// The card was the last one; the round is won.
    RoundWon,
    /// The card was out of order; the round is lost. This is the game's
    /// designed failure mode, not a protocol error.
    RoundLost,
}

pub struct GameEngine {
    state: GameState,
    /// Cards per player this round. Strictly positive.
    round: u32,
    /// Accepted plays in order. Its length is the played count.
    board: Vec<Card>,
    queue: CardQueue,
    round_start: Option<Instant>,
    /// Bumped on every round start; lets a countdown task detect that
    /// the round it was started for is gone.
    round_epoch: u64,
    /// Present from game start to game end.
    stats: Option<GameStats>,
    data_dir: PathBuf,
}

impl GameEngine {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            state: GameState::Lobby,
            round: DEFAULT_ROUND,
            board: Vec::new(),
            queue: CardQueue::new(),
            round_start: None,
            round_epoch: 0,
            stats: None,
            data_dir,
        }
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    pub fn round(&self) -> u32 {
        self.round
    }

    /// Accepted plays so far this round, in play order.
    pub fn board(&self) -> &[Card] {
        &self.board
    }

    pub fn played_count(&self) -> usize {
        self.board.len()
    }

    /// The only card that may legally be played next.
    pub fn next_card(&self) -> Option<Card> {
        self.queue.peek()
    }

    pub fn round_epoch(&self) -> u64 {
        self.round_epoch
    }

    /// Starts a new game from the lobby and immediately deals the first
    /// round. Requires every connected player to be ready.
    pub fn start_game(
        &mut self,
        registry: &mut PlayerRegistry,
        initiator: u32,
    ) -> Result<(), GameError> {
        if self.state != GameState::Lobby {
            return Err(GameError::WrongState);
        }
        if registry.is_empty() {
            return Err(GameError::NoPlayers);
        }
        if registry.ready_count() != registry.len() {
            return Err(GameError::NotAllReady);
        }
        if self.round * registry.len() as u32 > u32::from(DECK_SIZE) {
            return Err(GameError::DeckExhausted);
        }

        self.stats = Some(GameStats::new(registry.len()));
        self.state = GameState::Active;

        let starter = player_name(registry, initiator);
        info!("{} started a game with {} players", starter, registry.len());
        messaging::broadcast(
            registry,
            None,
            &ServerEvent::GameStarted { starter, players: registry.len() },
        );

        self.start_round(registry, initiator)
    }

    /// Deals the next round. Valid between rounds only; requires every
    /// player to be ready again. On success the engine is in the
    /// `Countdown` sub-phase and the caller is expected to drive the
    /// countdown and call [`finish_countdown`](Self::finish_countdown).
    pub fn start_round(
        &mut self,
        registry: &mut PlayerRegistry,
        initiator: u32,
    ) -> Result<(), GameError> {
        if self.state != GameState::Active {
            return Err(GameError::WrongState);
        }
        if registry.is_empty() {
            return Err(GameError::NoPlayers);
        }
        if registry.ready_count() != registry.len() {
            return Err(GameError::NotAllReady);
        }
        // The round cap in end_round keeps this unreachable in a running
        // game, but the lobby population is only bounded by max_players
        if self.round * registry.len() as u32 > u32::from(DECK_SIZE) {
            return Err(GameError::DeckExhausted);
        }

        let mut deck: Vec<Card> = (1..=DECK_SIZE).collect();
        deck.shuffle(&mut rand::thread_rng());
        self.begin_round(registry, initiator, &deck);
        Ok(())
    }

    /// Shared tail of `start_round`: state flip, announcement and deal
    /// from an already-shuffled deck.
    fn begin_round(&mut self, registry: &mut PlayerRegistry, initiator: u32, deck: &[Card]) {
        self.board = Vec::with_capacity(self.round as usize * registry.len());
        self.queue.reset();
        self.round_epoch += 1;
        self.state = GameState::Round(RoundPhase::Countdown);

        let starter = player_name(registry, initiator);
        info!("{} started round {} ({} players)", starter, self.round, registry.len());
        messaging::broadcast(
            registry,
            None,
            &ServerEvent::RoundStarted { starter, level: self.round },
        );
        self.deal_from_deck(registry, deck);
    }

    /// Assigns the first `round × players` cards of the deck round-robin,
    /// mirrors each into the queue and tells every player their cards
    /// privately. The queue is sorted once at the end.
    fn deal_from_deck(&mut self, registry: &mut PlayerRegistry, deck: &[Card]) {
        let ids = registry.ids();
        registry.give_hands(self.round as usize);

        let mut cards = deck.iter().copied();
        'deal: for slot in 0..self.round as usize {
            for &id in &ids {
                let card = match cards.next() {
                    Some(card) => card,
                    None => break 'deal,
                };
                self.queue.enqueue(card);
                if let Some(player) = registry.get_mut(id) {
                    player.hand[slot] = card;
                    messaging::send_to(player, &ServerEvent::CardDealt(card));
                }
            }
        }
        // Unconditional: peek must be the minimum however the loop ended
        self.queue.sort_ascending();
    }

    /// Opens the round for plays. Called by the countdown task once the
    /// ticks have been sent; a stale epoch (the round was aborted, or a
    /// new one started) makes this a no-op.
    pub fn finish_countdown(&mut self, registry: &PlayerRegistry, epoch: u64) {
        if epoch != self.round_epoch || self.state != GameState::Round(RoundPhase::Countdown) {
            debug!("Ignoring stale countdown (epoch {})", epoch);
            return;
        }
        self.state = GameState::Round(RoundPhase::Playing);
        self.round_start = Some(Instant::now());
        messaging::broadcast(registry, None, &ServerEvent::Go);
    }

    /// Attempts to play `card` for `player_id`.
    ///
    /// Any card other than the queue minimum loses the round for
    /// everyone, even if the player's own hand was otherwise correct.
    /// This is the central rule of the game.
    pub fn play_card(
        &mut self,
        registry: &mut PlayerRegistry,
        player_id: u32,
        card: u16,
    ) -> Result<PlayOutcome, GameError> {
        match self.state {
            GameState::Round(RoundPhase::Playing) => {}
            GameState::Round(RoundPhase::Countdown) => return Err(GameError::NotPlayable),
            _ => return Err(GameError::WrongState),
        }
        if card < 1 || card > u16::from(DECK_SIZE) {
            return Err(GameError::NoSuchCard(card));
        }
        let card = card as Card;

        // Clearing the slot up front prevents replaying the same card
        let name = {
            let player = registry.get_mut(player_id).ok_or(GameError::UnknownPlayer)?;
            let slot = player
                .hand
                .iter()
                .position(|&held| held == card)
                .ok_or(GameError::NoSuchCard(u16::from(card)))?;
            player.hand[slot] = NO_CARD;
            player.name.clone()
        };

        messaging::broadcast(
            registry,
            None,
            &ServerEvent::CardPlayed { player: name.clone(), card },
        );
        let reaction = self.round_start.map(|start| start.elapsed()).unwrap_or_default();

        if self.queue.peek() != Some(card) {
            info!("{} played {} out of order; round {} lost", name, card, self.round);
            if let Some(stats) = self.stats.as_mut() {
                stats.record_losing_card(card, reaction);
            }
            self.end_round(registry, false);
            return Ok(PlayOutcome::RoundLost);
        }

        if let Some(stats) = self.stats.as_mut() {
            stats.record_card(card, reaction);
        }
        if let Some(accepted) = self.queue.dequeue() {
            self.board.push(accepted);
        }

        if self.queue.is_empty() {
            info!("Round {} won after {} plays", self.round, self.board.len());
            self.end_round(registry, true);
            return Ok(PlayOutcome::RoundWon);
        }
        Ok(PlayOutcome::Accepted)
    }

    /// Closes the current round and returns to the between-rounds state.
    ///
    /// On a win the difficulty rises only while the 99-card deck can
    /// still serve every player; running out of headroom caps the level
    /// and is not an error. On a loss the difficulty resets to 1.
    ///
    /// Public because the connection handler must force a loss when a
    /// player disconnects mid-round, before calling [`end_game`](Self::end_game).
    pub fn end_round(&mut self, registry: &mut PlayerRegistry, win: bool) {
        if win {
            messaging::broadcast(registry, None, &ServerEvent::RoundWon(self.round));
            if let Some(stats) = self.stats.as_mut() {
                stats.record_round(self.round, true);
            }
            if (self.round + 1) * registry.len() as u32 <= u32::from(DECK_SIZE) {
                self.round += 1;
            }
        } else {
            messaging::broadcast(registry, None, &ServerEvent::RoundLost(self.round));
            if let Some(stats) = self.stats.as_mut() {
                stats.record_round(self.round, false);
            }
            self.round = DEFAULT_ROUND;
        }

        registry.clear_hands();
        registry.reset_ready();
        self.board.clear();
        self.queue.reset();
        self.round_start = None;
        self.state = GameState::Active;
        messaging::broadcast(
            registry,
            None,
            &ServerEvent::ReadyCount { ready: 0, total: registry.len() },
        );
    }

    /// Ends the game and returns everyone to the lobby. Flushes the
    /// statistics to disk and broadcasts the leaderboard; persistence
    /// failures are logged and ignored.
    ///
    /// `abrupt` marks a disconnect-driven end: the initiator is excluded
    /// from the farewell broadcasts since their connection is going away.
    pub fn end_game(&mut self, registry: &mut PlayerRegistry, initiator: Option<u32>, abrupt: bool) {
        if self.state == GameState::Lobby {
            return;
        }
        if let GameState::Round(_) = self.state {
            warn!("Game ended with a round in progress; counting it as lost");
            self.end_round(registry, false);
        }

        let by = initiator
            .and_then(|id| registry.get(id))
            .map(|p| p.name.clone())
            .unwrap_or_else(|| "server".to_string());
        let exclude = if abrupt { initiator } else { None };

        info!("Game ended by {}", by);
        messaging::broadcast(registry, exclude, &ServerEvent::GameEnded { by });
        self.flush_stats(registry, exclude);

        self.round = DEFAULT_ROUND;
        self.state = GameState::Lobby;
        registry.reset_ready();
    }

    /// Updates a player's readiness. Rejected mid-round; the flag means
    /// nothing there and silently flipping it would confuse the next
    /// round's start checks.
    pub fn set_ready(
        &mut self,
        registry: &mut PlayerRegistry,
        player_id: u32,
        state: bool,
    ) -> Result<ReadyChange, GameError> {
        if let GameState::Round(_) = self.state {
            return Err(GameError::ReadyLocked);
        }
        let change = registry.set_ready(player_id, state);
        if change == ReadyChange::Changed {
            messaging::broadcast(
                registry,
                None,
                &ServerEvent::ReadyCount {
                    ready: registry.ready_count(),
                    total: registry.len(),
                },
            );
        }
        Ok(change)
    }

    fn flush_stats(&mut self, registry: &PlayerRegistry, exclude: Option<u32>) {
        let accumulator = match self.stats.take() {
            Some(stats) => stats,
            None => return,
        };
        let player_count = accumulator.player_count();
        let mut names: Vec<String> = registry.players().map(|p| p.name.clone()).collect();
        names.sort_unstable();
        let summary = accumulator.finalize(names);

        match stats::persist_summary(&self.data_dir, &summary) {
            Ok(file) => {
                messaging::broadcast(registry, exclude, &ServerEvent::StatsFile(file));
            }
            Err(e) => warn!("Failed to persist game summary: {}", e),
        }
        if let Err(e) = stats::append_ranking(&self.data_dir, &RankEntry::from_summary(&summary)) {
            warn!("Failed to append ranking entry: {}", e);
        }
        match stats::top10(&self.data_dir, player_count) {
            Ok(entries) => {
                for (i, entry) in entries.iter().enumerate() {
                    messaging::broadcast(
                        registry,
                        exclude,
                        &ServerEvent::LeaderboardEntry {
                            rank: i + 1,
                            players: entry.player_count,
                            best_level: entry.best_level,
                            date: entry.date,
                            names: entry.players.join(","),
                        },
                    );
                }
            }
            Err(e) => warn!("Failed to read ranking file: {}", e),
        }
    }
}

fn player_name(registry: &PlayerRegistry, id: u32) -> String {
    registry
        .get(id)
        .map(|p| p.name.clone())
        .unwrap_or_else(|| "server".to_string())
}
