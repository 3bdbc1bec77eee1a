//! Decision logic for the robot player.
//!
//! The strategy is the human one: wait in proportion to the distance
//! between your lowest card and the last card played, then play. A big
//! gap means someone else probably holds a smaller card, so wait longer;
//! a gap of one means play immediately. The brain is pure state plus
//! event handling so it can be tested without a socket; the binary wires
//! it to TCP and adds timing jitter.

use shared::{Card, ServerEvent, NO_CARD};
use std::time::Duration;

/// What the connection loop should do in response to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reaction {
    /// Write this line to the server.
    Send(String),
    /// The game is over; close the connection and exit.
    Quit,
}

pub struct BotBrain {
    name: String,
    /// Sorted ascending; the front is always the next candidate.
    hand: Vec<Card>,
    /// Highest card seen on the board this round, `NO_CARD` before any.
    last_played: Card,
    /// True between `go` and the round's end.
    playing: bool,
    /// True while our own play is on the wire but not yet echoed back.
    in_flight: bool,
    wait_ms_per_gap: u64,
}

impl BotBrain {
    pub fn new(name: String, wait_ms_per_gap: u64) -> Self {
        Self {
            name,
            hand: Vec::new(),
            last_played: NO_CARD,
            playing: false,
            in_flight: false,
            wait_ms_per_gap,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Feeds one server event through the brain and returns what to do.
    pub fn observe(&mut self, event: &ServerEvent) -> Vec<Reaction> {
        match event {
            ServerEvent::Welcome => vec![
                Reaction::Send(self.name.clone()),
                Reaction::Send("ready".to_string()),
            ],
            ServerEvent::RoundStarted { .. } => {
                self.hand.clear();
                self.last_played = NO_CARD;
                self.playing = false;
                self.in_flight = false;
                Vec::new()
            }
            ServerEvent::CardDealt(card) => {
                let at = self.hand.partition_point(|&held| held < *card);
                self.hand.insert(at, *card);
                Vec::new()
            }
            ServerEvent::Go => {
                self.playing = true;
                Vec::new()
            }
            ServerEvent::CardPlayed { player, card } => {
                self.in_flight = false;
                self.last_played = *card;
                if player == &self.name {
                    self.hand.retain(|&held| held != *card);
                }
                Vec::new()
            }
            ServerEvent::RoundWon(_) | ServerEvent::RoundLost(_) => {
                self.playing = false;
                self.in_flight = false;
                self.hand.clear();
                vec![Reaction::Send("ready".to_string())]
            }
            ServerEvent::GameEnded { .. } => vec![Reaction::Quit],
            _ => Vec::new(),
        }
    }

    /// The card to play next and how long to wait first, if a play is
    /// due at all.
    pub fn next_play(&self) -> Option<(Card, Duration)> {
        if !self.playing || self.in_flight {
            return None;
        }
        let card = *self.hand.first()?;
        let gap = u64::from(card.saturating_sub(self.last_played).max(1));
        Some((card, Duration::from_millis(gap * self.wait_ms_per_gap)))
    }

    /// Called when the connection loop has written the candidate card.
    /// Suppresses further candidates until the server echoes the play.
    pub fn mark_sent(&mut self) {
        self.in_flight = true;
    }
}
