use clap::Parser;
use client::autopilot::Autopilot;
use client::game::RaceView;
use client::network::RaceClient;
use log::{info, warn};
use shared::{RaceStatus, RequestToJoinKind};
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "127.0.0.1:4942")]
    server: String,

    /// Join as a spectator instead of a participant
    #[arg(long)]
    spectate: bool,

    /// Sail the boat automatically once the race starts
    #[arg(short = 'a', long)]
    autopilot: bool,

    /// Milliseconds between autopilot VMG requests
    #[arg(long, default_value = "2000")]
    vmg_interval: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let kind = if args.spectate {
        RequestToJoinKind::Spectator
    } else {
        RequestToJoinKind::Participant
    };

    info!("Connecting to: {}", args.server);
    let mut client = RaceClient::connect(&args.server, kind).await?;
    let mut view = RaceView::new();
    let mut autopilot = (args.autopilot && client.is_participant())
        .then(|| Autopilot::new(Duration::from_millis(args.vmg_interval)));

    let mut helm = interval(Duration::from_millis(250));
    helm.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            message = client.next_message() => {
                let Some(message) = message? else {
                    info!("Server closed the connection");
                    break;
                };
                if let Some(status) = view.apply(message) {
                    info!("Race is now {:?}", status);
                    if status == RaceStatus::Finished {
                        log_standings(&view);
                    }
                }
            }
            _ = helm.tick(), if autopilot.is_some() => {
                let actions = autopilot
                    .as_mut()
                    .map(|pilot| pilot.next_actions(view.status(), Instant::now()))
                    .unwrap_or_default();
                for action in actions {
                    if let Err(e) = client.send_action(action).await {
                        warn!("Failed to send {:?}: {}", action, e);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, leaving the race");
                break;
            }
        }
    }

    Ok(())
}

fn log_standings(view: &RaceView) {
    for (place, source_id) in view.standings().into_iter().enumerate() {
        if let Some(boat) = view.boat(source_id) {
            info!(
                "{}. boat {} leg {} health {} collisions {}",
                place + 1,
                source_id,
                boat.leg_number,
                boat.health.unwrap_or(0),
                boat.collisions
            );
        }
    }
}
