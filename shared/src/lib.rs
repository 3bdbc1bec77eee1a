//! Wire protocol shared between The Mind server and its clients.
//!
//! The protocol is line-oriented UTF-8: one command or event per line.
//! Clients send [`Command`] lines; the server answers with [`ServerEvent`]
//! lines. Events form a closed set of structured variants: the game
//! engine never formats text itself, it hands an event to the messaging
//! boundary, which serializes it with [`ServerEvent::to_line`]. Automated
//! clients parse the same lines back with [`ServerEvent::parse`].

/// A card value. Legal plays are in `1..=DECK_SIZE`.
pub type Card = u8;

/// The deck holds the cards 1 through 99, each exactly once.
pub const DECK_SIZE: u8 = 99;

/// Sentinel for an empty hand slot. Never a legal play value.
pub const NO_CARD: Card = 0;

/// Display names are a single word within these bounds.
pub const MAX_NAME_LEN: usize = 32;

/// One line of client input, parsed.
///
/// Any line that parses as a non-negative integer is a play attempt; the
/// server decides whether the value is an actual card. Everything else
/// that is not a known keyword becomes `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Ready,
    Unready,
    Start,
    Stop,
    AddRobot,
    Play(u16),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Self {
        let trimmed = line.trim();
        match trimmed {
            "ready" => Command::Ready,
            "unready" => Command::Unready,
            "start" => Command::Start,
            "stop" => Command::Stop,
            "addrobot" => Command::AddRobot,
            _ => match trimmed.parse::<u16>() {
                Ok(value) => Command::Play(value),
                Err(_) => Command::Unknown(trimmed.to_string()),
            },
        }
    }
}

/// One line of server output, structured.
///
/// `CardDealt` is sent privately to the receiving player; everything else
/// is broadcast (possibly excluding one player). The line format is a
/// leading tag followed by space-separated fields; `Error` and `Info`
/// carry free text after the tag.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Welcome,
    Joined(String),
    Left(String),
    ReadyCount { ready: usize, total: usize },
    GameStarted { starter: String, players: usize },
    RoundStarted { starter: String, level: u32 },
    CardDealt(Card),
    Countdown(u8),
    Go,
    CardPlayed { player: String, card: Card },
    RoundWon(u32),
    RoundLost(u32),
    GameEnded { by: String },
    LeaderboardEntry { rank: usize, players: usize, best_level: u32, date: u64, names: String },
    StatsFile(String),
    Error(String),
    Info(String),
}

impl ServerEvent {
    /// Serializes the event to its single-line wire form (without the
    /// trailing newline).
    pub fn to_line(&self) -> String {
        match self {
            ServerEvent::Welcome => "welcome".to_string(),
            ServerEvent::Joined(name) => format!("joined {}", name),
            ServerEvent::Left(name) => format!("left {}", name),
            ServerEvent::ReadyCount { ready, total } => format!("ready-count {} {}", ready, total),
            ServerEvent::GameStarted { starter, players } => {
                format!("game-started {} {}", starter, players)
            }
            ServerEvent::RoundStarted { starter, level } => {
                format!("round-started {} {}", starter, level)
            }
            ServerEvent::CardDealt(card) => format!("card {}", card),
            ServerEvent::Countdown(n) => format!("countdown {}", n),
            ServerEvent::Go => "go".to_string(),
            ServerEvent::CardPlayed { player, card } => format!("played {} {}", player, card),
            ServerEvent::RoundWon(level) => format!("round-won {}", level),
            ServerEvent::RoundLost(level) => format!("round-lost {}", level),
            ServerEvent::GameEnded { by } => format!("game-ended {}", by),
            ServerEvent::LeaderboardEntry { rank, players, best_level, date, names } => {
                format!("rank {} {} {} {} {}", rank, players, best_level, date, names)
            }
            ServerEvent::StatsFile(name) => format!("stats-file {}", name),
            ServerEvent::Error(text) => format!("error {}", text),
            ServerEvent::Info(text) => format!("info {}", text),
        }
    }

    /// Parses a wire line back into an event. Returns `None` for lines
    /// that are not part of the protocol.
    pub fn parse(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        let (tag, rest) = match trimmed.split_once(' ') {
            Some((tag, rest)) => (tag, rest.trim()),
            None => (trimmed, ""),
        };
        match tag {
            "welcome" => Some(ServerEvent::Welcome),
            "joined" if !rest.is_empty() => Some(ServerEvent::Joined(rest.to_string())),
            "left" if !rest.is_empty() => Some(ServerEvent::Left(rest.to_string())),
            "ready-count" => {
                let (ready, total) = rest.split_once(' ')?;
                Some(ServerEvent::ReadyCount {
                    ready: ready.parse().ok()?,
                    total: total.trim().parse().ok()?,
                })
            }
            "game-started" => {
                let (starter, players) = rest.split_once(' ')?;
                Some(ServerEvent::GameStarted {
                    starter: starter.to_string(),
                    players: players.trim().parse().ok()?,
                })
            }
            "round-started" => {
                let (starter, level) = rest.split_once(' ')?;
                Some(ServerEvent::RoundStarted {
                    starter: starter.to_string(),
                    level: level.trim().parse().ok()?,
                })
            }
            "card" => Some(ServerEvent::CardDealt(rest.parse().ok()?)),
            "countdown" => Some(ServerEvent::Countdown(rest.parse().ok()?)),
            "go" => Some(ServerEvent::Go),
            "played" => {
                let (player, card) = rest.split_once(' ')?;
                Some(ServerEvent::CardPlayed {
                    player: player.to_string(),
                    card: card.trim().parse().ok()?,
                })
            }
            "round-won" => Some(ServerEvent::RoundWon(rest.parse().ok()?)),
            "round-lost" => Some(ServerEvent::RoundLost(rest.parse().ok()?)),
            "game-ended" if !rest.is_empty() => {
                Some(ServerEvent::GameEnded { by: rest.to_string() })
            }
            "rank" => {
                let mut fields = rest.splitn(5, ' ');
                let rank = fields.next()?.parse().ok()?;
                let players = fields.next()?.parse().ok()?;
                let best_level = fields.next()?.parse().ok()?;
                let date = fields.next()?.parse().ok()?;
                let names = fields.next()?.to_string();
                Some(ServerEvent::LeaderboardEntry { rank, players, best_level, date, names })
            }
            "stats-file" if !rest.is_empty() => Some(ServerEvent::StatsFile(rest.to_string())),
            "error" => Some(ServerEvent::Error(rest.to_string())),
            "info" => Some(ServerEvent::Info(rest.to_string())),
            _ => None,
        }
    }
}
