//! Integration tests for the game server
//!
//! These tests validate cross-component interactions and real TCP behavior.

use server::game::{GameEngine, GameState, PlayOutcome, RoundPhase};
use server::network::{self, ServerConfig, ServerContext};
use server::registry::PlayerRegistry;
use shared::{Card, Command, ServerEvent};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn temp_data_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("themind-it-{}-{}", tag, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// WIRE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Tests that client command lines parse to the expected commands
    #[test]
    fn command_lines_parse() {
        assert_eq!(Command::parse("ready"), Command::Ready);
        assert_eq!(Command::parse("  start "), Command::Start);
        assert_eq!(Command::parse("42"), Command::Play(42));
        assert_eq!(Command::parse("addrobot"), Command::AddRobot);
        assert_eq!(
            Command::parse("dance"),
            Command::Unknown("dance".to_string())
        );
    }

    /// Tests event serialization round-trip for the line protocol
    #[test]
    fn event_lines_roundtrip() {
        let events = vec![
            ServerEvent::Welcome,
            ServerEvent::ReadyCount { ready: 2, total: 3 },
            ServerEvent::RoundStarted { starter: "alice".to_string(), level: 4 },
            ServerEvent::CardDealt(17),
            ServerEvent::CardPlayed { player: "bob".to_string(), card: 17 },
            ServerEvent::RoundWon(4),
            ServerEvent::GameEnded { by: "alice".to_string() },
            ServerEvent::Error("not all players are ready".to_string()),
        ];
        for event in events {
            let line = event.to_line();
            assert_eq!(ServerEvent::parse(&line), Some(event), "line was {:?}", line);
        }
    }
}

/// ENGINE TESTS over the public API only
mod engine_tests {
    use super::*;

    fn ready_registry(count: usize) -> (PlayerRegistry, Vec<u32>) {
        let mut registry = PlayerRegistry::new(count);
        let mut ids = Vec::new();
        for _ in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            // The taps are dropped; sends to closed channels are ignored
            drop(rx);
            ids.push(registry.add_player(tx).unwrap());
        }
        for &id in &ids {
            registry.set_ready(id, true);
        }
        (registry, ids)
    }

    fn holder_of(registry: &PlayerRegistry, card: Card) -> u32 {
        registry
            .players()
            .find(|p| p.hand.contains(&card))
            .map(|p| p.id)
            .expect("nobody holds that card")
    }

    /// Tests a full randomly-dealt round, played strictly ascending
    #[test]
    fn random_round_won_in_queue_order() {
        let dir = temp_data_dir("random-win");
        let (mut registry, ids) = ready_registry(3);
        let mut engine = GameEngine::new(dir.clone());

        engine.start_game(&mut registry, ids[0]).unwrap();
        assert_eq!(engine.state(), GameState::Round(RoundPhase::Countdown));
        engine.finish_countdown(&registry, engine.round_epoch());
        assert_eq!(engine.state(), GameState::Round(RoundPhase::Playing));

        let mut previous = 0u8;
        let mut last = PlayOutcome::Accepted;
        while engine.state() == GameState::Round(RoundPhase::Playing) {
            let card = engine.next_card().unwrap();
            assert!(card > previous, "queue must serve cards in ascending order");
            previous = card;
            let holder = holder_of(&registry, card);
            last = engine
                .play_card(&mut registry, holder, u16::from(card))
                .unwrap();
        }

        assert_eq!(last, PlayOutcome::RoundWon);
        assert_eq!(engine.round(), 2);
        let _ = std::fs::remove_dir_all(&dir);
    }

    /// Tests that one out-of-order play loses the round for everyone
    #[test]
    fn one_wrong_card_loses_the_round() {
        let dir = temp_data_dir("random-loss");
        let (mut registry, ids) = ready_registry(2);
        let mut engine = GameEngine::new(dir.clone());

        engine.start_game(&mut registry, ids[0]).unwrap();
        engine.finish_countdown(&registry, engine.round_epoch());

        // With one card per player, the highest card is never legal first
        let highest = registry
            .players()
            .flat_map(|p| p.hand.iter().copied())
            .max()
            .unwrap();
        let holder = holder_of(&registry, highest);
        let outcome = engine
            .play_card(&mut registry, holder, u16::from(highest))
            .unwrap();

        assert_eq!(outcome, PlayOutcome::RoundLost);
        assert_eq!(engine.round(), 1);
        assert_eq!(engine.state(), GameState::Active);
        assert_eq!(engine.next_card(), None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}

/// FULL SERVER TESTS over real TCP
mod server_tests {
    use super::*;

    struct TestClient {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        write_half: OwnedWriteHalf,
    }

    impl TestClient {
        async fn connect(port: u16, name: &str) -> TestClient {
            let stream = timeout(WAIT, TcpStream::connect(("127.0.0.1", port)))
                .await
                .expect("connect timed out")
                .expect("connect failed");
            let (read_half, write_half) = stream.into_split();
            let mut client = TestClient {
                lines: BufReader::new(read_half).lines(),
                write_half,
            };
            assert_eq!(client.next_event().await, ServerEvent::Welcome);
            client.send(name).await;
            client
        }

        async fn send(&mut self, line: &str) {
            self.write_half
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .expect("send failed");
        }

        async fn next_event(&mut self) -> ServerEvent {
            loop {
                let line = timeout(WAIT, self.lines.next_line())
                    .await
                    .expect("read timed out")
                    .expect("read failed")
                    .expect("server closed the connection");
                if let Some(event) = ServerEvent::parse(&line) {
                    return event;
                }
            }
        }

        /// Reads events until one satisfies the predicate.
        async fn wait_for<F: Fn(&ServerEvent) -> bool>(&mut self, pred: F) -> ServerEvent {
            loop {
                let event = self.next_event().await;
                if pred(&event) {
                    return event;
                }
            }
        }

        async fn dealt_card(&mut self) -> Card {
            match self.wait_for(|e| matches!(e, ServerEvent::CardDealt(_))).await {
                ServerEvent::CardDealt(card) => card,
                _ => unreachable!(),
            }
        }
    }

    /// Finds two adjacent free ports for the game and download listeners.
    fn free_port_pair() -> u16 {
        for _ in 0..16 {
            let first = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let port = first.local_addr().unwrap().port();
            if port < u16::MAX && std::net::TcpListener::bind(("127.0.0.1", port + 1)).is_ok() {
                return port;
            }
        }
        panic!("no adjacent free port pair found");
    }

    fn spawn_server(tag: &str, max_players: usize) -> (u16, PathBuf, Arc<ServerContext>) {
        let port = free_port_pair();
        let data_dir = temp_data_dir(tag);
        let ctx = Arc::new(ServerContext::new(ServerConfig {
            host: "127.0.0.1".to_string(),
            port,
            max_players,
            data_dir: data_dir.clone(),
            countdown_step: Duration::from_millis(10),
            bot_bin: "themind-bot".to_string(),
        }));
        let server_ctx = Arc::clone(&ctx);
        tokio::spawn(async move {
            let _ = network::run(server_ctx).await;
        });
        (port, data_dir, ctx)
    }

    /// Tests a complete round over TCP: join, ready, countdown, plays in
    /// ascending order, win, stop, leaderboard on disk
    #[tokio::test]
    async fn two_players_win_a_round() {
        let (port, data_dir, _ctx) = spawn_server("tcp-win", 4);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut alice = TestClient::connect(port, "alice").await;
        let mut bob = TestClient::connect(port, "bob").await;

        alice.send("ready").await;
        bob.send("ready").await;
        alice
            .wait_for(|e| matches!(e, ServerEvent::ReadyCount { ready: 2, .. }))
            .await;

        alice.send("start").await;
        alice
            .wait_for(|e| matches!(e, ServerEvent::GameStarted { .. }))
            .await;

        let alice_card = alice.dealt_card().await;
        let bob_card = bob.dealt_card().await;
        assert_ne!(alice_card, bob_card);

        alice.wait_for(|e| *e == ServerEvent::Go).await;
        bob.wait_for(|e| *e == ServerEvent::Go).await;

        // Both cards in ascending order, each from its holder
        let (first, second) = if alice_card < bob_card {
            alice.send(&alice_card.to_string()).await;
            bob.wait_for(|e| matches!(e, ServerEvent::CardPlayed { .. })).await;
            bob.send(&bob_card.to_string()).await;
            (alice_card, bob_card)
        } else {
            bob.send(&bob_card.to_string()).await;
            alice.wait_for(|e| matches!(e, ServerEvent::CardPlayed { .. })).await;
            alice.send(&alice_card.to_string()).await;
            (bob_card, alice_card)
        };
        assert!(first < second);

        assert_eq!(
            alice.wait_for(|e| matches!(e, ServerEvent::RoundWon(_))).await,
            ServerEvent::RoundWon(1)
        );
        bob.wait_for(|e| matches!(e, ServerEvent::RoundWon(_))).await;

        alice.send("stop").await;
        bob.wait_for(|e| matches!(e, ServerEvent::GameEnded { .. })).await;

        // The win is on the persistent leaderboard
        let entry = alice
            .wait_for(|e| matches!(e, ServerEvent::LeaderboardEntry { .. }))
            .await;
        match entry {
            ServerEvent::LeaderboardEntry { rank, players, best_level, .. } => {
                assert_eq!(rank, 1);
                assert_eq!(players, 2);
                assert_eq!(best_level, 1);
            }
            _ => unreachable!(),
        }
        assert!(data_dir.join("ranking.jsonl").exists());
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    /// Tests that a wrong first card loses the round for both players
    #[tokio::test]
    async fn wrong_card_over_tcp_loses() {
        let (port, data_dir, _ctx) = spawn_server("tcp-loss", 4);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut alice = TestClient::connect(port, "alice").await;
        let mut bob = TestClient::connect(port, "bob").await;
        alice.send("ready").await;
        bob.send("ready").await;
        bob.wait_for(|e| matches!(e, ServerEvent::ReadyCount { ready: 2, .. }))
            .await;
        bob.send("start").await;

        let alice_card = alice.dealt_card().await;
        let bob_card = bob.dealt_card().await;
        alice.wait_for(|e| *e == ServerEvent::Go).await;
        bob.wait_for(|e| *e == ServerEvent::Go).await;

        // The holder of the higher card jumps the gun
        if alice_card > bob_card {
            alice.send(&alice_card.to_string()).await;
        } else {
            bob.send(&bob_card.to_string()).await;
        }

        assert_eq!(
            alice.wait_for(|e| matches!(e, ServerEvent::RoundLost(_))).await,
            ServerEvent::RoundLost(1)
        );
        bob.wait_for(|e| matches!(e, ServerEvent::RoundLost(_))).await;
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    /// Tests that a full server refuses the extra connection with one line
    #[tokio::test]
    async fn full_server_refuses_connections() {
        let (port, data_dir, _ctx) = spawn_server("tcp-full", 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _alice = TestClient::connect(port, "alice").await;

        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        let (read_half, _write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let line = timeout(WAIT, lines.next_line())
            .await
            .expect("read timed out")
            .expect("read failed")
            .expect("connection closed without a refusal");
        assert_eq!(
            ServerEvent::parse(&line),
            Some(ServerEvent::Error("server full".to_string()))
        );
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    /// Tests that the shutdown notice reaches a connected socket before
    /// the server returns
    #[tokio::test]
    async fn shutdown_notice_reaches_clients() {
        let (port, data_dir, ctx) = spawn_server("tcp-shutdown", 4);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut alice = TestClient::connect(port, "alice").await;
        network::announce_shutdown(&ctx).await;

        alice
            .wait_for(|e| *e == ServerEvent::Info("server shutting down".to_string()))
            .await;
        let _ = std::fs::remove_dir_all(&data_dir);
    }

    /// Tests that a mid-round disconnect ends the game for the survivor
    #[tokio::test]
    async fn disconnect_mid_round_ends_the_game() {
        let (port, data_dir, _ctx) = spawn_server("tcp-disconnect", 4);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut alice = TestClient::connect(port, "alice").await;
        let mut bob = TestClient::connect(port, "bob").await;
        alice.send("ready").await;
        bob.send("ready").await;
        alice
            .wait_for(|e| matches!(e, ServerEvent::ReadyCount { ready: 2, .. }))
            .await;
        alice.send("start").await;
        alice.wait_for(|e| *e == ServerEvent::Go).await;

        drop(bob);

        alice.wait_for(|e| *e == ServerEvent::Left("bob".to_string())).await;
        alice.wait_for(|e| matches!(e, ServerEvent::RoundLost(_))).await;
        alice.wait_for(|e| matches!(e, ServerEvent::GameEnded { .. })).await;
        let _ = std::fs::remove_dir_all(&data_dir);
    }
}
