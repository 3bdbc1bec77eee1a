//! Server engine for The Mind, a cooperative card game played over TCP.
//!
//! Players connect with any line-oriented client (netcat works), ready
//! up and try to empty their hands by playing cards in globally
//! ascending order without communicating. The server is the sole
//! authority: it deals, validates every play against the sorted card
//! queue and decides when a round is won or lost.
//!
//! The crate is organized around a small set of modules:
//!
//! - [`card_queue`]: the sorted queue of dealt cards whose minimum is
//!   the only legal play
//! - [`registry`]: connected players, their hands and readiness
//! - [`game`]: the state machine driving lobby, rounds and scoring
//! - [`messaging`]: typed events fanned out over per-player channels
//! - [`stats`]: reaction-time statistics and the persistent leaderboard
//! - [`network`]: TCP plumbing, command dispatch and the file download
//!   side channel

pub mod card_queue;
pub mod game;
pub mod messaging;
pub mod network;
pub mod registry;
pub mod stats;
