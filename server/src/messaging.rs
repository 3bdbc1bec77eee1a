//! Messaging boundary between the game engine and player connections.
//!
//! The engine hands structured [`ServerEvent`]s to this module; the event
//! is serialized once and queued on each player's line channel. Sends
//! never block (the per-connection writer task drains the channel onto
//! the socket), so broadcasting is safe while the engine and registry
//! locks are held. A closed connection simply drops the line.

use crate::registry::{Player, PlayerRegistry};
use log::debug;
use shared::ServerEvent;

/// Sends one event privately to a single player.
pub fn send_to(player: &Player, event: &ServerEvent) {
    if !player.send_line(event.to_line()) {
        debug!("Dropped event for player {}: connection closed", player.id);
    }
}

/// Broadcasts one event to every player, optionally excluding one.
pub fn broadcast(registry: &PlayerRegistry, exclude: Option<u32>, event: &ServerEvent) {
    let line = event.to_line();
    for player in registry.players() {
        if Some(player.id) == exclude {
            continue;
        }
        if !player.send_line(line.clone()) {
            debug!("Dropped broadcast for player {}: connection closed", player.id);
        }
    }
}
