use clap::Parser;
use log::{error, info};
use server::commands;
use server::config::{RaceDefinition, RaceSettings, TRAILING_FRAMES};
use server::network::SNAPSHOT_QUEUE_LEN;
use server::wind::WindModel;
use server::{Race, RaceDriver, Server};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, RwLock};

/// Main-method of the race server.
/// Loads the race, then runs the connection listener and the race driver side by side.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value_t = shared::DEFAULT_PORT)]
        port: u16,
        /// Race definition file; the bundled race is used when omitted
        #[clap(short, long)]
        race_file: Option<PathBuf>,
        /// How the wind evolves during the race
        #[clap(short, long, value_enum, default_value = "shifting")]
        wind: WindModel,
        /// Seed for the random wind models
        #[clap(long)]
        wind_seed: Option<u64>,
        /// Multiplier applied to boat movement
        #[clap(long, default_value_t = 1.0)]
        time_scale: f64,
        /// Frame period in milliseconds
        #[clap(long, default_value_t = shared::FRAME_PERIOD_MS)]
        tick_ms: u64,
        /// Start the race this many seconds after launch
        #[clap(short, long)]
        start_in: Option<u64>,
        /// Snapshots published after the finish
        #[clap(long, default_value_t = TRAILING_FRAMES)]
        trailing_frames: u32,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let settings = RaceSettings {
        time_scale: args.time_scale,
        frame_period: Duration::from_millis(args.tick_ms.max(1)),
        trailing_frames: args.trailing_frames,
        wind_model: args.wind,
        wind_seed: args.wind_seed,
        forced_start: args.start_in.map(Duration::from_secs),
    };

    let definition = RaceDefinition::load(args.race_file.as_deref())?;
    let race = Race::from_definition(&definition, &settings, shared::now_millis())?;
    info!(
        "Race {} at {} with {} roster boats",
        definition.race_id,
        definition.regatta.course_name,
        definition.boats.len()
    );
    if settings.forced_start.is_none() {
        info!("No start time forced; the start is pushed back until --start-in is given");
    }

    // Shared race state with read-write lock
    let race = Arc::new(RwLock::new(race));
    let (commands_tx, commands_rx) = commands::channel();
    let (snapshots, _) = broadcast::channel(SNAPSHOT_QUEUE_LEN);

    let address = format!("{}:{}", args.host, args.port);
    let server = Server::bind(
        &address,
        Arc::clone(&race),
        commands_tx.clone(),
        snapshots.clone(),
    )
    .await?;

    let driver = RaceDriver::new(race, (commands_tx, commands_rx), snapshots, &settings);
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    // Spawn connection listener; it stops once told to shut down
    let mut server_handle = tokio::spawn(server.serve(async move {
        let _ = shutdown_rx.await;
    }));

    // Spawn race driver
    let mut driver_handle = tokio::spawn(driver.run());

    // Handle shutdown gracefully
    let mut server_done = false;
    tokio::select! {
        result = &mut server_handle => {
            server_done = true;
            if let Err(e) = result {
                error!("Network task panicked: {}", e);
            }
            driver_handle.abort();
        }
        result = &mut driver_handle => {
            match result {
                Ok(()) => info!("Race over, closing connections"),
                Err(e) => error!("Race driver panicked: {}", e),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            driver_handle.abort();
        }
    }

    if !server_done {
        let _ = shutdown_tx.send(());
        if let Err(e) = server_handle.await {
            error!("Network task panicked: {}", e);
        }
    }

    Ok(())
}
