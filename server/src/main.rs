use clap::Parser;
use log::{error, info};
use server::network::Server;
use server::session::Session;
use shared::{GameConfig, DEFAULT_PORT};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about = "Authoritative coin collector server", long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Simulation ticks per second
    #[arg(short, long, default_value_t = shared::TICK_RATE)]
    tick_rate: u32,

    /// Artificial delay applied on each network hop, in milliseconds
    #[arg(short, long, default_value_t = shared::SIMULATED_LATENCY_MS)]
    latency: u64,

    /// Players required to start a match
    #[arg(long, default_value_t = shared::MIN_PLAYERS)]
    min_players: usize,

    /// Lobby capacity
    #[arg(long, default_value_t = shared::MAX_PLAYERS)]
    max_players: usize,

    /// Match length in seconds
    #[arg(short, long, default_value_t = shared::MATCH_DURATION_SECS)]
    duration: f32,

    /// Countdown before a match starts, in seconds
    #[arg(long, default_value_t = shared::COUNTDOWN_SECS)]
    countdown: u32,

    /// Seconds between coin spawns
    #[arg(long, default_value_t = shared::COIN_SPAWN_INTERVAL_SECS)]
    coin_interval: f32,

    /// Maximum coins on the field at once
    #[arg(long, default_value_t = shared::MAX_COINS)]
    max_coins: usize,

    /// Coins placed when a match starts
    #[arg(long, default_value_t = shared::INITIAL_COINS)]
    initial_coins: usize,

    /// Silence after which a connection is dropped, in milliseconds
    #[arg(long, default_value_t = shared::HEARTBEAT_TIMEOUT_MS)]
    heartbeat_timeout: u64,

    /// Seed for reproducible coin placement
    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn game_config(&self) -> GameConfig {
        GameConfig {
            min_players: self.min_players,
            max_players: self.max_players,
            tick_rate: self.tick_rate,
            latency: Duration::from_millis(self.latency),
            coin_spawn_interval_secs: self.coin_interval,
            max_coins: self.max_coins,
            initial_coins: self.initial_coins,
            match_duration_secs: self.duration,
            countdown_secs: self.countdown,
            heartbeat_timeout: Duration::from_millis(self.heartbeat_timeout),
            ..GameConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = args.game_config();
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e.into());
    }

    info!(
        "Starting server: {}-{} players, {:.0}s matches",
        config.min_players, config.max_players, config.match_duration_secs
    );

    let session = match args.seed {
        Some(seed) => Session::with_seed(config, seed),
        None => Session::new(config),
    };
    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(&address, session).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
    }

    Ok(())
}
