//! Per-game statistics accumulator and its persistence.
//!
//! A [`GameStats`] is created when a game starts and accumulates card
//! plays (with reaction times), losing cards and round results until the
//! game ends, when it is finalized into a serializable [`GameSummary`].
//! Summaries land as JSON files in the data directory; one compact
//! [`RankEntry`] per game is appended to a JSON-lines ranking file that
//! `top10` reads back for the leaderboard.
//!
//! Persistence is an opaque side effect from the engine's point of view:
//! failures are reported as errors for the caller to log, and never block
//! gameplay.

use serde::{Deserialize, Serialize};
use shared::Card;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// One dealt round and how it went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub level: u32,
    pub won: bool,
}

/// Accumulates statistics over one game.
#[derive(Debug)]
pub struct GameStats {
    player_count: usize,
    /// How often each card value was played, indexed by card.
    cards: [u32; 100],
    /// Running average reaction time per card, in milliseconds.
    avg_reaction_ms: [f64; 100],
    /// How often each card value lost a round.
    losing_cards: [u32; 100],
    rounds: Vec<RoundRecord>,
}

impl GameStats {
    pub fn new(player_count: usize) -> Self {
        Self {
            player_count,
            cards: [0; 100],
            avg_reaction_ms: [0.0; 100],
            losing_cards: [0; 100],
            rounds: Vec::new(),
        }
    }

    pub fn player_count(&self) -> usize {
        self.player_count
    }

    /// Records an accepted play and folds its reaction time into the
    /// running average for that card.
    pub fn record_card(&mut self, card: Card, reaction: Duration) {
        let slot = card as usize;
        if slot >= self.cards.len() {
            return;
        }
        self.cards[slot] += 1;
        let n = f64::from(self.cards[slot]);
        let ms = reaction.as_millis() as f64;
        self.avg_reaction_ms[slot] = ((n - 1.0) * self.avg_reaction_ms[slot] + ms) / n;
    }

    /// Records the card that lost a round. Counts as a play too.
    pub fn record_losing_card(&mut self, card: Card, reaction: Duration) {
        let slot = card as usize;
        if slot >= self.losing_cards.len() {
            return;
        }
        self.losing_cards[slot] += 1;
        self.record_card(card, reaction);
    }

    /// Records a finished round at the given level.
    pub fn record_round(&mut self, level: u32, won: bool) {
        self.rounds.push(RoundRecord { level, won });
    }

    pub fn rounds_played(&self) -> u32 {
        self.rounds.len() as u32
    }

    pub fn rounds_won(&self) -> u32 {
        self.rounds.iter().filter(|r| r.won).count() as u32
    }

    /// Highest level won this game, 0 if none.
    pub fn best_level(&self) -> u32 {
        self.rounds.iter().filter(|r| r.won).map(|r| r.level).max().unwrap_or(0)
    }

    /// Consumes the accumulator into its persisted form.
    pub fn finalize(self, players: Vec<String>) -> GameSummary {
        GameSummary {
            player_count: self.player_count,
            players,
            finished_at: epoch_secs(),
            rounds_played: self.rounds_played(),
            rounds_won: self.rounds_won(),
            best_level: self.best_level(),
            rounds: self.rounds,
            cards: self.cards.to_vec(),
            avg_reaction_ms: self.avg_reaction_ms.to_vec(),
            losing_cards: self.losing_cards.to_vec(),
        }
    }
}

/// The finalized, serializable record of one game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSummary {
    pub player_count: usize,
    pub players: Vec<String>,
    pub finished_at: u64,
    pub rounds_played: u32,
    pub rounds_won: u32,
    pub best_level: u32,
    pub rounds: Vec<RoundRecord>,
    pub cards: Vec<u32>,
    pub avg_reaction_ms: Vec<f64>,
    pub losing_cards: Vec<u32>,
}

/// Compact leaderboard entry, one JSON line per game in the ranking file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub player_count: usize,
    pub best_level: u32,
    pub players: Vec<String>,
    pub date: u64,
}

impl RankEntry {
    pub fn from_summary(summary: &GameSummary) -> Self {
        Self {
            player_count: summary.player_count,
            best_level: summary.best_level,
            players: summary.players.clone(),
            date: summary.finished_at,
        }
    }
}

const RANKING_FILE: &str = "ranking.jsonl";

/// Writes the summary as a JSON file in the data directory and returns
/// the file name (for the download notice sent to players).
pub fn persist_summary(data_dir: &Path, summary: &GameSummary) -> io::Result<String> {
    fs::create_dir_all(data_dir)?;
    let name = format!("game-{}-{}p.json", summary.finished_at, summary.player_count);
    let json = serde_json::to_string_pretty(summary)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    fs::write(data_dir.join(&name), json)?;
    Ok(name)
}

/// Appends one leaderboard entry to the ranking file.
pub fn append_ranking(data_dir: &Path, entry: &RankEntry) -> io::Result<()> {
    fs::create_dir_all(data_dir)?;
    let json = serde_json::to_string(entry)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(data_dir.join(RANKING_FILE))?;
    writeln!(file, "{}", json)?;
    Ok(())
}

/// The ten best games on record for the given player count, best level
/// first (most recent first among ties). Unparseable lines are skipped.
pub fn top10(data_dir: &Path, player_count: usize) -> io::Result<Vec<RankEntry>> {
    let path = data_dir.join(RANKING_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let contents = fs::read_to_string(path)?;
    let mut entries: Vec<RankEntry> = contents
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .filter(|entry: &RankEntry| entry.player_count == player_count)
        .collect();
    entries.sort_by(|a, b| b.best_level.cmp(&a.best_level).then(b.date.cmp(&a.date)));
    entries.truncate(10);
    Ok(entries)
}

/// Seconds since the Unix epoch; 0 if the clock is before it.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}
