//! The loop that advances the race and publishes a snapshot every frame.
//!
//! A race runs through three phases. Before the start the driver keeps the
//! clock and status current and may push the start back. Once boats are on
//! the line it counts down to the gun. While racing it applies queued
//! commands, moves the boats and feeds collisions back as commands. After the
//! finish it keeps publishing the final state for a while so late clients
//! still see the result.

use crate::commands::{self, Command, CommandReceiver, CommandSender};
use crate::config::RaceSettings;
use crate::network::SnapshotSender;
use crate::race::{CollisionEvent, Race};
use crate::snapshot::SnapshotEncoder;
use log::{debug, info, trace};
use shared::{now_millis, RaceStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::{sleep_until, Instant};

pub struct RaceDriver {
    race: Arc<RwLock<Race>>,
    commands_rx: CommandReceiver,
    /// Collision commands are fed back through the same queue as client actions
    commands_tx: CommandSender,
    snapshots: SnapshotSender,
    encoder: SnapshotEncoder,
    frame_period: Duration,
    trailing_frames: u32,
}

impl RaceDriver {
    pub fn new(
        race: Arc<RwLock<Race>>,
        commands: (CommandSender, CommandReceiver),
        snapshots: SnapshotSender,
        settings: &RaceSettings,
    ) -> Self {
        let (commands_tx, commands_rx) = commands;
        Self {
            race,
            commands_rx,
            commands_tx,
            snapshots,
            encoder: SnapshotEncoder::new(),
            frame_period: settings.frame_period,
            trailing_frames: settings.trailing_frames,
        }
    }

    /// Runs the race from the lobby to the last trailing snapshot
    pub async fn run(mut self) {
        self.run_prestart().await;
        self.race.write().await.initialise_boats();
        self.run_countdown().await;
        self.run_race().await;
        self.run_trailing().await;
        info!("Race driver finished");
    }

    async fn run_prestart(&mut self) {
        let lock = Arc::clone(&self.race);
        debug!("Waiting for the warning signal");
        loop {
            let frame_start = Instant::now();
            {
                let mut race = lock.write().await;
                if !matches!(
                    race.status(),
                    RaceStatus::Prestart | RaceStatus::Warning
                ) {
                    break;
                }

                let now = now_millis();
                race.update_race_time(now);
                race.delay_start(now);
                race.update_status();
                race.set_boats_time_next_mark(now);
                self.publish(&race, &[]);
            }
            self.pace(frame_start).await;
        }
    }

    async fn run_countdown(&mut self) {
        let lock = Arc::clone(&self.race);
        debug!("Counting down to the start");
        loop {
            let frame_start = Instant::now();
            {
                let mut race = lock.write().await;
                race.update_race_time(now_millis());
                race.update_status();
                let start_time = race.clock().start_time();
                race.set_boats_time_next_mark(start_time);

                if race.status() == RaceStatus::Started {
                    race.set_boats_racing();
                    info!(
                        "Race {} started with {} boats",
                        race.race_id(),
                        race.boats().len()
                    );
                    break;
                }

                self.publish(&race, &[]);
                race.evolve_wind();
            }
            self.pace(frame_start).await;
        }
    }

    async fn run_race(&mut self) {
        let lock = Arc::clone(&self.race);
        let mut previous_frame = Instant::now();
        loop {
            let frame_start = Instant::now();
            let period_ms = frame_start.duration_since(previous_frame).as_millis() as i64;
            previous_frame = frame_start;

            {
                let mut race = lock.write().await;
                if !self.race_frame(&mut race, period_ms) {
                    break;
                }
            }
            self.pace(frame_start).await;
        }
    }

    /// Runs one racing frame; false once the race has finished
    fn race_frame(&mut self, race: &mut Race, period_ms: i64) -> bool {
        if race.status() == RaceStatus::Finished {
            return false;
        }

        race.apply_commands(commands::drain(&mut self.commands_rx));
        race.advance_manoeuvres();
        race.update_race_time(now_millis());

        let collisions = if race.active_boat_count() > 0 {
            race.simulate_tick(period_ms)
        } else {
            race.finish();
            Vec::new()
        };

        // the frame that retires the last boat is still published
        if race.status() != RaceStatus::Finished {
            race.evolve_wind();
            self.publish(race, &collisions);
            for event in &collisions {
                // the receiver is owned by this driver
                let _ = self.commands_tx.send(Command::collision(event.source_id));
            }
        }
        true
    }

    async fn run_trailing(&mut self) {
        let lock = Arc::clone(&self.race);
        debug!("Publishing {} trailing frames", self.trailing_frames);
        for _ in 0..self.trailing_frames {
            let frame_start = Instant::now();
            {
                let race = lock.read().await;
                self.publish(&race, &[]);
            }
            self.pace(frame_start).await;
        }
    }

    fn publish(&mut self, race: &Race, collisions: &[CollisionEvent]) {
        let snapshot = Arc::new(self.encoder.encode(race, collisions));
        if self.snapshots.send(snapshot).is_err() {
            trace!("No connections to receive the snapshot");
        }
    }

    /// Sleeps out the rest of the frame; a frame that overran does not sleep
    async fn pace(&self, frame_start: Instant) {
        sleep_until(frame_start + self.frame_period).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RaceDefinition, DEFAULT_RACE};
    use crate::course::tests::simple_course;
    use crate::network::SNAPSHOT_QUEUE_LEN;
    use crate::race::tests::race_with;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Bearing, BoatStatus, GpsCoordinate, Message, YachtEventCode};
    use tokio::sync::broadcast;

    const NOW: i64 = 1_700_000_000_000;

    fn settings(forced_start: Duration) -> RaceSettings {
        RaceSettings {
            frame_period: Duration::from_millis(1),
            trailing_frames: 3,
            forced_start: Some(forced_start),
            ..RaceSettings::default()
        }
    }

    fn race_status(snapshot: &crate::snapshot::Snapshot) -> Option<RaceStatus> {
        snapshot.messages.iter().find_map(|m| match m {
            Message::RaceStatus(status) => Some(status.status),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_empty_race_finishes_and_trails() {
        let definition = RaceDefinition::from_toml_str(DEFAULT_RACE).unwrap();
        let settings = settings(Duration::ZERO);
        let race = Race::from_definition(&definition, &settings, now_millis()).unwrap();
        let race = Arc::new(RwLock::new(race));
        let (snapshots, mut snapshots_rx) = broadcast::channel(SNAPSHOT_QUEUE_LEN);

        let driver = RaceDriver::new(Arc::clone(&race), commands::channel(), snapshots, &settings);
        tokio::time::timeout(Duration::from_secs(5), driver.run())
            .await
            .expect("driver should end once the empty race finishes");

        assert_eq!(race.read().await.status(), RaceStatus::Finished);

        let mut statuses = Vec::new();
        while let Ok(snapshot) = snapshots_rx.try_recv() {
            statuses.push(race_status(&snapshot));
        }
        // the race is already started when built, so only the trailing frames go out
        assert_eq!(statuses, vec![Some(RaceStatus::Finished); 3]);
    }

    #[tokio::test]
    async fn test_boats_race_after_forced_start() {
        let definition = RaceDefinition::from_toml_str(DEFAULT_RACE).unwrap();
        let settings = settings(Duration::from_millis(50));
        let race = Race::from_definition(&definition, &settings, now_millis()).unwrap();
        let race = Arc::new(RwLock::new(race));
        race.write().await.add_boat(101).unwrap();
        let (snapshots, mut snapshots_rx) = broadcast::channel(1024);

        let driver = RaceDriver::new(Arc::clone(&race), commands::channel(), snapshots, &settings);
        let handle = tokio::spawn(driver.run());

        let mut saw_started = false;
        for _ in 0..1000 {
            match snapshots_rx.recv().await {
                Ok(snapshot) if race_status(&snapshot) == Some(RaceStatus::Started) => {
                    saw_started = true;
                    break;
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        assert!(saw_started);
        assert_eq!(
            race.read().await.boat(101).unwrap().status,
            BoatStatus::Racing
        );

        handle.abort();
    }

    /// Boat 101 sits 10 m behind boat 102 on the same heading, both stopped
    fn race_with_boats_in_line() -> Race {
        let mut race = race_with(simple_course(), NOW - 60_000);
        race.add_boat(101).unwrap();
        race.add_boat(102).unwrap();
        race.set_boats_racing();
        let origin = GpsCoordinate::new(32.0, -64.0).destination(300.0, Bearing::from_degrees(0.0));
        for (source_id, distance) in [(101, 0.0), (102, 10.0)] {
            let boat = race.boat_mut(source_id).unwrap();
            boat.position = origin.destination(distance, Bearing::from_degrees(0.0));
            boat.heading = Bearing::from_degrees(0.0);
            boat.speed_from_polar = false;
        }
        race
    }

    #[tokio::test]
    async fn test_collision_is_queued_and_recoils_next_frame() {
        let race = Arc::new(RwLock::new(race_with_boats_in_line()));
        let (snapshots, mut snapshots_rx) = broadcast::channel(SNAPSHOT_QUEUE_LEN);
        let mut driver = RaceDriver::new(
            Arc::clone(&race),
            commands::channel(),
            snapshots,
            &RaceSettings::default(),
        );
        let mut race = race.write().await;

        assert!(driver.race_frame(&mut race, 16));
        let hit = race.boat(101).unwrap();
        assert!(hit.colliding);
        assert_approx_eq!(hit.health, 95.0);
        let impact = hit.position;

        let snapshot = snapshots_rx.try_recv().unwrap();
        let events: Vec<u32> = snapshot
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::YachtEvent(e) if e.event == YachtEventCode::Collision => {
                    Some(e.source_id)
                }
                _ => None,
            })
            .collect();
        assert_eq!(events, vec![101]);

        let queued = commands::drain(&mut driver.commands_rx);
        assert_eq!(queued, vec![Command::collision(101)]);
        driver.commands_tx.send(queued[0]).unwrap();

        assert!(driver.race_frame(&mut race, 16));
        let recoiling = race.boat(101).unwrap();
        assert_approx_eq!(impact.distance_to(&recoiling.position), 3.0, 1e-6);
        assert_approx_eq!(impact.bearing_to(&recoiling.position).degrees(), 180.0, 1e-3);
        assert!(recoiling.colliding);
        assert_approx_eq!(recoiling.health, 95.0);
        assert_eq!(race.boat(102).unwrap().health, 100.0);
        // the recoiling boat is not probed again
        assert!(commands::drain(&mut driver.commands_rx).is_empty());
    }

    #[tokio::test]
    async fn test_collision_in_last_frame_is_still_published() {
        let mut race = race_with_boats_in_line();
        race.boat_mut(102).unwrap().status = BoatStatus::Finished;
        // the impact takes boat 101 below the health needed to keep racing
        race.boat_mut(101).unwrap().health = 5.5;
        let race = Arc::new(RwLock::new(race));
        let (snapshots, mut snapshots_rx) = broadcast::channel(SNAPSHOT_QUEUE_LEN);
        let mut driver = RaceDriver::new(
            Arc::clone(&race),
            commands::channel(),
            snapshots,
            &RaceSettings::default(),
        );
        let mut race = race.write().await;

        assert!(driver.race_frame(&mut race, 16));
        assert_eq!(race.active_boat_count(), 0);
        let snapshot = snapshots_rx.try_recv().unwrap();
        assert!(snapshot
            .messages
            .iter()
            .any(|m| matches!(m, Message::YachtEvent(e) if e.source_id == 101)));
        assert_eq!(
            commands::drain(&mut driver.commands_rx),
            vec![Command::collision(101)]
        );

        assert!(driver.race_frame(&mut race, 16));
        assert_eq!(race.status(), RaceStatus::Finished);
        assert!(!driver.race_frame(&mut race, 16));
    }
}
