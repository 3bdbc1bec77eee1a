//! Connection handling and command dispatch.
//!
//! One tokio task per connection reads newline-delimited commands; a
//! paired writer task drains that player's outbound channel so that
//! broadcasts never block on a slow socket. A second listener on the
//! next port serves statistics files to anyone who asks.
//!
//! Lock order is engine before registry, always. Dispatch acquires both,
//! calls one engine operation, and releases; nothing holds a lock across
//! an await on the network.

use crate::game::{GameEngine, GameState, RoundPhase};
use crate::messaging;
use crate::registry::PlayerRegistry;
use log::{debug, error, info, warn};
use shared::{Command, ServerEvent};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{mpsc, RwLock};

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_players: usize,
    pub data_dir: PathBuf,
    /// Pause between countdown ticks. One second in production, a few
    /// milliseconds in tests.
    pub countdown_step: Duration,
    /// Binary spawned for the `robot` command.
    pub bot_bin: String,
}

/// Everything a connection task needs, shared behind an `Arc`.
pub struct ServerContext {
    pub engine: RwLock<GameEngine>,
    pub registry: RwLock<PlayerRegistry>,
    pub config: ServerConfig,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            engine: RwLock::new(GameEngine::new(config.data_dir.clone())),
            registry: RwLock::new(PlayerRegistry::new(config.max_players)),
            config,
        }
    }
}

/// Binds the game port and the download port right above it, then
/// accepts connections until ctrl-c.
pub async fn run(ctx: Arc<ServerContext>) -> Result<(), Box<dyn Error>> {
    let addr = format!("{}:{}", ctx.config.host, ctx.config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Server listening on {}", addr);

    let download_addr = format!("{}:{}", ctx.config.host, ctx.config.port + 1);
    let download_listener = TcpListener::bind(&download_addr).await?;
    info!("Serving statistics files on {}", download_addr);
    {
        let data_dir = ctx.config.data_dir.clone();
        tokio::spawn(serve_downloads(download_listener, data_dir));
    }

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!("Connection from {}", peer);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_new_connection(ctx, stream).await;
                });
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                announce_shutdown(&ctx).await;
                return Ok(());
            }
        }
    }
}

/// Queues the shutdown notice on every connection and waits long enough
/// for the writer tasks to put it on the wire before the runtime is
/// torn down.
pub async fn announce_shutdown(ctx: &ServerContext) {
    {
        let registry = ctx.registry.read().await;
        messaging::broadcast(
            &registry,
            None,
            &ServerEvent::Info("server shutting down".to_string()),
        );
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
}

/// Admits the connection if the lobby has room, or writes one refusal
/// line and drops it.
async fn handle_new_connection(ctx: Arc<ServerContext>, stream: TcpStream) {
    let (read_half, mut write_half) = stream.into_split();

    let admission = {
        let engine = ctx.engine.read().await;
        let mut registry = ctx.registry.write().await;
        if engine.state() != GameState::Lobby {
            Err("a game is already running, come back later")
        } else {
            let (line_tx, line_rx) = mpsc::unbounded_channel();
            match registry.add_player(line_tx) {
                Some(id) => Ok((id, line_rx)),
                None => Err("server full"),
            }
        }
    };

    match admission {
        Ok((player_id, line_rx)) => {
            tokio::spawn(write_lines(write_half, line_rx));
            handle_client(ctx, player_id, read_half).await;
        }
        Err(reason) => refuse(&mut write_half, reason).await,
    }
}

async fn refuse(write_half: &mut OwnedWriteHalf, reason: &str) {
    let line = format!("{}\n", ServerEvent::Error(reason.to_string()).to_line());
    if let Err(e) = write_half.write_all(line.as_bytes()).await {
        debug!("Could not deliver refusal: {}", e);
    }
    let _ = write_half.shutdown().await;
}

/// Drains one player's outbound channel onto their socket. Ends when the
/// socket breaks or the player is dropped from the registry.
async fn write_lines(mut write_half: OwnedWriteHalf, mut line_rx: UnboundedReceiver<String>) {
    while let Some(line) = line_rx.recv().await {
        let framed = format!("{}\n", line);
        if write_half.write_all(framed.as_bytes()).await.is_err() {
            break;
        }
    }
}

/// The per-connection read loop: name exchange first, then commands
/// until the stream ends.
async fn handle_client(ctx: Arc<ServerContext>, player_id: u32, read_half: OwnedReadHalf) {
    {
        let registry = ctx.registry.read().await;
        if let Some(player) = registry.get(player_id) {
            messaging::send_to(player, &ServerEvent::Welcome);
        }
    }

    let mut lines = BufReader::new(read_half).lines();

    // The first line names the player; a bad name keeps the default.
    match lines.next_line().await {
        Ok(Some(line)) => {
            let mut registry = ctx.registry.write().await;
            if let Err(e) = registry.set_name(player_id, &line) {
                debug!("Player {} keeps default name: {}", player_id, e);
            }
            let name = registry
                .get(player_id)
                .map(|p| p.name.clone())
                .unwrap_or_default();
            info!("{} joined", name);
            messaging::broadcast(&registry, None, &ServerEvent::Joined(name));
            messaging::broadcast(
                &registry,
                None,
                &ServerEvent::ReadyCount {
                    ready: registry.ready_count(),
                    total: registry.len(),
                },
            );
        }
        _ => {
            disconnect(ctx, player_id).await;
            return;
        }
    }

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                dispatch(&ctx, player_id, Command::parse(&line)).await;
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Read error for player {}: {}", player_id, e);
                break;
            }
        }
    }

    disconnect(ctx, player_id).await;
}

async fn dispatch(ctx: &Arc<ServerContext>, player_id: u32, command: Command) {
    match command {
        Command::Ready => set_ready(ctx, player_id, true).await,
        Command::Unready => set_ready(ctx, player_id, false).await,
        Command::Start => start(ctx, player_id).await,
        Command::Play(card) => play(ctx, player_id, card).await,
        Command::Stop => stop(ctx, player_id).await,
        Command::AddRobot => add_robot(ctx, player_id).await,
        Command::Unknown(text) => {
            debug!("Unknown command from player {}: {:?}", player_id, text);
            send_error(ctx, player_id, &format!("unknown command: {}", text)).await;
        }
    }
}

async fn set_ready(ctx: &Arc<ServerContext>, player_id: u32, state: bool) {
    let mut engine = ctx.engine.write().await;
    let mut registry = ctx.registry.write().await;
    if let Err(e) = engine.set_ready(&mut registry, player_id, state) {
        if let Some(player) = registry.get(player_id) {
            messaging::send_to(player, &ServerEvent::Error(e.to_string()));
        }
    }
}

/// `start` begins a game from the lobby and the next round between
/// rounds. On success the countdown task is spawned with the round's
/// epoch so an aborted round cannot be opened late.
async fn start(ctx: &Arc<ServerContext>, player_id: u32) {
    let epoch = {
        let mut engine = ctx.engine.write().await;
        let mut registry = ctx.registry.write().await;
        let outcome = match engine.state() {
            GameState::Lobby => engine.start_game(&mut registry, player_id),
            GameState::Active => engine.start_round(&mut registry, player_id),
            GameState::Round(_) => Err(crate::game::GameError::WrongState),
        };
        match outcome {
            Ok(()) => engine.round_epoch(),
            Err(e) => {
                if let Some(player) = registry.get(player_id) {
                    messaging::send_to(player, &ServerEvent::Error(e.to_string()));
                }
                return;
            }
        }
    };
    spawn_countdown(Arc::clone(ctx), epoch);
}

/// Ticks 3, 2, 1 with no engine lock held, then flips the round open.
/// The epoch check makes a tick or the final flip a no-op if the round
/// died in the meantime.
fn spawn_countdown(ctx: Arc<ServerContext>, epoch: u64) {
    tokio::spawn(async move {
        for tick in (1..=3u8).rev() {
            {
                let engine = ctx.engine.read().await;
                if engine.round_epoch() != epoch
                    || engine.state() != GameState::Round(RoundPhase::Countdown)
                {
                    return;
                }
                let registry = ctx.registry.read().await;
                messaging::broadcast(&registry, None, &ServerEvent::Countdown(tick));
            }
            tokio::time::sleep(ctx.config.countdown_step).await;
        }
        let mut engine = ctx.engine.write().await;
        let registry = ctx.registry.read().await;
        engine.finish_countdown(&registry, epoch);
    });
}

async fn play(ctx: &Arc<ServerContext>, player_id: u32, card: u16) {
    let mut engine = ctx.engine.write().await;
    let mut registry = ctx.registry.write().await;
    // Accepted plays and round results are broadcast by the engine
    if let Err(e) = engine.play_card(&mut registry, player_id, card) {
        if let Some(player) = registry.get(player_id) {
            messaging::send_to(player, &ServerEvent::Error(e.to_string()));
        }
    }
}

async fn stop(ctx: &Arc<ServerContext>, player_id: u32) {
    let mut engine = ctx.engine.write().await;
    let mut registry = ctx.registry.write().await;
    if engine.state() == GameState::Lobby {
        if let Some(player) = registry.get(player_id) {
            messaging::send_to(player, &ServerEvent::Error("no game is running".to_string()));
        }
        return;
    }
    engine.end_game(&mut registry, Some(player_id), false);
}

/// Spawns the bot binary as a separate process; it connects over TCP
/// like any other player.
async fn add_robot(ctx: &Arc<ServerContext>, player_id: u32) {
    let bot_name = {
        let engine = ctx.engine.read().await;
        let registry = ctx.registry.read().await;
        if engine.state() != GameState::Lobby {
            drop(registry);
            drop(engine);
            send_error(ctx, player_id, "robots can only join in the lobby").await;
            return;
        }
        if registry.is_full() {
            drop(registry);
            drop(engine);
            send_error(ctx, player_id, "server full").await;
            return;
        }
        format!("robot{}", registry.len())
    };

    let spawned = tokio::process::Command::new(&ctx.config.bot_bin)
        .arg("--host")
        .arg(&ctx.config.host)
        .arg("--port")
        .arg(ctx.config.port.to_string())
        .arg("--name")
        .arg(&bot_name)
        .spawn();
    match spawned {
        Ok(_) => info!("Spawned {}", bot_name),
        Err(e) => {
            warn!("Could not spawn {} ({}): {}", ctx.config.bot_bin, bot_name, e);
            send_error(ctx, player_id, "could not start a robot").await;
        }
    }
}

async fn send_error(ctx: &Arc<ServerContext>, player_id: u32, text: &str) {
    let registry = ctx.registry.read().await;
    if let Some(player) = registry.get(player_id) {
        messaging::send_to(player, &ServerEvent::Error(text.to_string()));
    }
}

/// A departure mid-round loses the round for everyone and ends the game;
/// a departure between rounds ends the game with the rounds played so
/// far. Lobby departures just leave.
async fn disconnect(ctx: Arc<ServerContext>, player_id: u32) {
    let mut engine = ctx.engine.write().await;
    let mut registry = ctx.registry.write().await;

    let name = match registry.get(player_id) {
        Some(player) => player.name.clone(),
        None => return,
    };
    info!("{} left", name);
    messaging::broadcast(&registry, Some(player_id), &ServerEvent::Left(name));

    match engine.state() {
        GameState::Round(_) => {
            engine.end_round(&mut registry, false);
            engine.end_game(&mut registry, Some(player_id), true);
        }
        GameState::Active => {
            engine.end_game(&mut registry, Some(player_id), true);
        }
        GameState::Lobby => {}
    }

    registry.remove_player(player_id);
    messaging::broadcast(
        &registry,
        Some(player_id),
        &ServerEvent::ReadyCount {
            ready: registry.ready_count(),
            total: registry.len(),
        },
    );
}

/// The download side channel: one request line, one file, done.
async fn serve_downloads(listener: TcpListener, data_dir: PathBuf) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Download request from {}", peer);
                let data_dir = data_dir.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_download(stream, data_dir).await {
                        debug!("Download from {} failed: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                error!("Download listener accept failed: {}", e);
                return;
            }
        }
    }
}

async fn handle_download(mut stream: TcpStream, data_dir: PathBuf) -> std::io::Result<()> {
    let (read_half, mut write_half) = stream.split();
    let mut lines = BufReader::new(read_half).lines();

    let request = match lines.next_line().await? {
        Some(line) => line,
        None => return Ok(()),
    };
    let file_name = match parse_download_request(&request) {
        Some(name) => name.to_string(),
        None => {
            write_half
                .write_all(b"error invalid file request\n")
                .await?;
            return Ok(());
        }
    };

    match tokio::fs::File::open(data_dir.join(&file_name)).await {
        Ok(mut file) => {
            tokio::io::copy(&mut file, &mut write_half).await?;
            write_half.shutdown().await?;
        }
        Err(e) => {
            debug!("No such stats file {:?}: {}", file_name, e);
            write_half.write_all(b"error no such file\n").await?;
        }
    }
    Ok(())
}

/// Accepts `getfile <name>` for a bare file name. Anything that could
/// escape the data directory is rejected.
fn parse_download_request(line: &str) -> Option<&str> {
    let name = line.trim().strip_prefix("getfile ")?.trim();
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return None;
    }
    Some(name)
}
