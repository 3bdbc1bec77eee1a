use clap::Parser;
use server::network::{self, ServerConfig, ServerContext};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Server for The Mind. Listens for line-oriented TCP clients and
/// serves statistics files on the next port up.
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Server IP address to bind to
    #[clap(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
    /// Server port to listen on (port + 1 serves statistics files)
    #[clap(short, long, default_value = "4242")]
    port: u16,
    /// Maximum number of players, robots included. The deck holds 99
    /// cards, so 99 players is the hard ceiling.
    #[clap(short, long, default_value = "4", value_parser = clap::value_parser!(u16).range(1..=99))]
    max_players: u16,
    /// Directory for game summaries and the ranking file
    #[clap(short, long, default_value = "data")]
    data_dir: PathBuf,
    /// Milliseconds between countdown ticks
    #[clap(long, default_value = "1000")]
    countdown_ms: u64,
    /// Binary spawned for the `robot` command
    #[clap(long, default_value = "themind-bot")]
    bot_bin: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let ctx = Arc::new(ServerContext::new(ServerConfig {
        host: args.host,
        port: args.port,
        max_players: usize::from(args.max_players),
        data_dir: args.data_dir,
        countdown_step: Duration::from_millis(args.countdown_ms),
        bot_bin: args.bot_bin,
    }));

    network::run(ctx).await
}
