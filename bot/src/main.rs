use bot::{BotBrain, Reaction};
use clap::Parser;
use log::{debug, info};
use rand::Rng;
use shared::ServerEvent;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::Instant;

/// Robot player for The Mind. Connects like any human client, readies
/// up automatically and plays its lowest card after a wait proportional
/// to the gap from the last card on the board.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server address to connect to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port
    #[clap(short, long, default_value = "4242")]
    port: u16,
    /// Display name
    #[clap(short, long, default_value = "robot")]
    name: String,
    /// Milliseconds of waiting per point of card gap
    #[clap(short, long, default_value = "100")]
    wait_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let stream = TcpStream::connect((args.host.as_str(), args.port)).await?;
    info!("{} connected to {}:{}", args.name, args.host, args.port);

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut brain = BotBrain::new(args.name, args.wait_ms);

    // The pending play, if the brain has one queued up.
    let mut planned: Option<(u8, Instant)> = None;

    loop {
        if planned.is_none() {
            if let Some((card, delay)) = brain.next_play() {
                // Jitter so two robots with the same gap do not collide
                let factor = rand::thread_rng().gen_range(0.9..1.1);
                planned = Some((card, Instant::now() + delay.mul_f64(factor)));
            }
        }
        let fire_at = planned.map(|(_, at)| at).unwrap_or_else(Instant::now);

        tokio::select! {
            line = lines.next_line() => {
                let line = match line? {
                    Some(line) => line,
                    None => {
                        info!("Server closed the connection");
                        return Ok(());
                    }
                };
                let event = match ServerEvent::parse(&line) {
                    Some(event) => event,
                    None => {
                        debug!("Ignoring line: {:?}", line);
                        continue;
                    }
                };
                for reaction in brain.observe(&event) {
                    match reaction {
                        Reaction::Send(text) => {
                            write_half.write_all(format!("{}\n", text).as_bytes()).await?;
                        }
                        Reaction::Quit => {
                            info!("Game over, leaving");
                            return Ok(());
                        }
                    }
                }
                // Whatever was planned may be stale now
                planned = None;
            }
            _ = tokio::time::sleep_until(fire_at), if planned.is_some() => {
                if let Some((card, _)) = planned.take() {
                    debug!("Playing {}", card);
                    brain.mark_sent();
                    write_half.write_all(format!("{}\n", card).as_bytes()).await?;
                }
            }
        }
    }
}
