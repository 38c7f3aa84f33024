use clap::Parser;
use client::game::{ClientGame, ClientPhase};
use client::input::{read_control_keys, read_direction_keys};
use client::network::{NetworkEvent, NetworkHandle};
use client::rendering::Renderer;
use client::ClientConfig;
use log::{error, info};
use macroquad::prelude::{get_frame_time, next_frame, Conf};
use shared::{get_timestamp, WORLD_HEIGHT, WORLD_WIDTH};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server WebSocket URL
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8765")]
    server: String,

    /// Display name; the server picks one when omitted
    #[arg(short = 'n', long, default_value = "")]
    name: String,

    /// Artificial delay on each client hop in milliseconds
    #[arg(short = 'l', long, default_value_t = shared::SIMULATED_LATENCY_MS)]
    latency: u64,

    /// How far in the past remote players are drawn, in milliseconds
    #[arg(long, default_value_t = shared::INTERPOLATION_DELAY_MS)]
    interpolation_delay: u64,

    /// Longest extrapolation past the newest snapshot, in milliseconds
    #[arg(long, default_value_t = shared::MAX_EXTRAPOLATION_MS)]
    max_extrapolation: u64,

    /// Reconciliation error in pixels that snaps instead of blending
    #[arg(long, default_value_t = client::SNAP_THRESHOLD)]
    snap_threshold: f32,

    /// Blend rate for reconciliation errors in pixels per second
    #[arg(long, default_value_t = client::CORRECTION_RATE)]
    correction_rate: f32,
}

impl Args {
    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            server_url: self.server.clone(),
            player_name: self.name.clone(),
            latency: Duration::from_millis(self.latency),
            interpolation_delay_ms: self.interpolation_delay,
            max_extrapolation_ms: self.max_extrapolation,
            snap_threshold: self.snap_threshold,
            correction_rate: self.correction_rate,
            ..ClientConfig::default()
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Coin Collector".to_owned(),
        window_width: WORLD_WIDTH as i32,
        window_height: WORLD_HEIGHT as i32,
        window_resizable: false,
        ..Default::default()
    }
}

fn connect(config: &ClientConfig, game: &mut ClientGame) -> Option<NetworkHandle> {
    match NetworkHandle::spawn(&config.server_url, config.latency) {
        Ok(handle) => Some(handle),
        Err(e) => {
            error!("Failed to start network thread: {}", e);
            game.handle_disconnected(&e.to_string());
            None
        }
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();
    let config = args.client_config();

    info!("Starting client...");
    info!("Connecting to: {}", config.server_url);
    info!("Simulating {}ms latency per hop", config.latency.as_millis());
    info!("Controls: WASD or arrows to move, Space to play again, Esc to quit");
    info!("Press 1/2/3 to toggle Prediction/Reconciliation/Interpolation");

    let mut game = ClientGame::new(&config);
    let mut renderer = Renderer::new(WORLD_WIDTH, WORLD_HEIGHT);
    let mut network = connect(&config, &mut game);

    loop {
        let now = Instant::now();
        let local_ms = get_timestamp();

        if let Some(handle) = network.as_mut() {
            while let Some(event) = handle.try_recv() {
                match event {
                    NetworkEvent::Connected => {
                        handle.send(game.handle_connected());
                    }
                    NetworkEvent::Message(message) => game.handle_message(message, now, local_ms),
                    NetworkEvent::Disconnected(reason) => game.handle_disconnected(&reason),
                }
            }
        }

        let controls = read_control_keys();
        if controls.quit {
            break;
        }
        if controls.rejoin && game.phase() == ClientPhase::Disconnected {
            info!("Reconnecting to {}", config.server_url);
            // Dropping the old handle joins its finished thread
            drop(network.take());
            network = connect(&config, &mut game);
        }

        let mut outgoing = game.frame(read_direction_keys(), get_frame_time(), now, local_ms);
        outgoing.extend(game.apply_controls(&controls));
        if let Some(handle) = network.as_ref() {
            for message in outgoing {
                handle.send(message);
            }
        }

        let frame = game.render_frame(now, local_ms);
        renderer.render(&frame);

        next_frame().await;
    }

    if let Some(mut handle) = network.take() {
        handle.shutdown();
    }
    info!("Client closed");
}
