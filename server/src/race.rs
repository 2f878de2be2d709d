//! Authoritative race state: boats, course, wind and clock.
//!
//! The [`Race`] is owned behind a `RwLock` shared by the driver loop and the
//! connection tasks. Only the driver advances time and physics; connections
//! take the write lock briefly to add or remove their boat.

use crate::boat::Boat;
use crate::clock::{status_for, RaceClock};
use crate::collider::{ColliderKind, ColliderRegistry, Collision};
use crate::commands::{self, Command};
use crate::config::{BoatDefinition, RaceDefinition, RaceSettings, RegattaDefinition};
use crate::course::{is_between, is_on_side, Course};
use crate::error::{AllocationError, ConfigError};
use crate::polars::PolarTable;
use crate::wind::{build_generator, Wind, WindGenerator};
use log::{debug, info, warn};
use shared::geo::{is_inside_boundary, passes_line};
use shared::{BoatStatus, RaceStatus, RaceType};
use std::time::Duration;

/// A start closer than this is pushed back unless the race was force-started
pub const MINIMUM_START_DELAY_MS: i64 = 5 * 60 * 1000;
pub const RESCHEDULED_START_DELAY_MS: i64 = 10 * 60 * 1000;

/// Health lost per tick outside the course boundary
pub const BOUNDARY_HEALTH_LOSS: f64 = 0.1;
pub const MARK_COLLISION_DAMAGE: f64 = 10.0;
pub const BOAT_COLLISION_DAMAGE: f64 = 5.0;

/// Exponent applied to the health fraction when scaling polar speed
const HEALTH_SPEED_EXPONENT: f64 = 0.3;

/// A collision detected during a tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CollisionEvent {
    pub source_id: u32,
    pub collision: Collision,
}

/// Everything needed to build a [`Race`]
pub struct RaceSetup {
    pub race_id: u32,
    pub race_type: RaceType,
    pub regatta: RegattaDefinition,
    pub roster: Vec<BoatDefinition>,
    pub course: Course,
    pub polars: PolarTable,
    pub wind_generator: Box<dyn WindGenerator>,
    pub start_time: i64,
    pub force_started: bool,
    pub time_scale: f64,
}

pub struct Race {
    race_id: u32,
    race_type: RaceType,
    regatta: RegattaDefinition,
    roster: Vec<BoatDefinition>,
    course: Course,
    polars: PolarTable,
    boats: Vec<Boat>,
    clock: RaceClock,
    status: RaceStatus,
    wind: Wind,
    wind_generator: Box<dyn WindGenerator>,
    time_scale: f64,
    force_started: bool,
    /// Bumped whenever the participants or the start time change
    revision: u32,
}

impl Race {
    pub fn new(setup: RaceSetup, now_ms: i64) -> Self {
        let wind = setup.wind_generator.baseline();
        let mut race = Self {
            race_id: setup.race_id,
            race_type: setup.race_type,
            regatta: setup.regatta,
            roster: setup.roster,
            course: setup.course,
            polars: setup.polars,
            boats: Vec::new(),
            clock: RaceClock::new(setup.start_time, now_ms),
            status: RaceStatus::NotActive,
            wind,
            wind_generator: setup.wind_generator,
            time_scale: setup.time_scale,
            force_started: setup.force_started,
            revision: 0,
        };
        race.update_status();
        race
    }

    pub fn from_definition(
        definition: &RaceDefinition,
        settings: &RaceSettings,
        now_ms: i64,
    ) -> Result<Self, ConfigError> {
        let start_delay = settings.forced_start.unwrap_or_else(|| definition.start_delay());
        let setup = RaceSetup {
            race_id: definition.race_id,
            race_type: definition.race_type.into(),
            regatta: definition.regatta.clone(),
            roster: definition.boats.clone(),
            course: definition.build_course()?,
            polars: definition.polar_table()?,
            wind_generator: build_generator(
                settings.wind_model,
                definition.baseline_wind(),
                settings.wind_seed,
                now_ms,
            ),
            start_time: now_ms + start_delay.as_millis() as i64,
            force_started: settings.forced_start.is_some(),
            time_scale: settings.time_scale,
        };
        Ok(Self::new(setup, now_ms))
    }

    pub fn race_id(&self) -> u32 {
        self.race_id
    }

    pub fn race_type(&self) -> RaceType {
        self.race_type
    }

    pub fn regatta(&self) -> &RegattaDefinition {
        &self.regatta
    }

    pub fn roster(&self) -> &[BoatDefinition] {
        &self.roster
    }

    pub fn course(&self) -> &Course {
        &self.course
    }

    pub fn polars(&self) -> &PolarTable {
        &self.polars
    }

    pub fn boats(&self) -> &[Boat] {
        &self.boats
    }

    pub fn boat(&self, source_id: u32) -> Option<&Boat> {
        self.boats.iter().find(|b| b.source_id == source_id)
    }

    pub fn boat_mut(&mut self, source_id: u32) -> Option<&mut Boat> {
        self.boats.iter_mut().find(|b| b.source_id == source_id)
    }

    pub fn clock(&self) -> &RaceClock {
        &self.clock
    }

    pub fn status(&self) -> RaceStatus {
        self.status
    }

    pub fn wind(&self) -> Wind {
        self.wind
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub fn is_force_started(&self) -> bool {
        self.force_started
    }

    /// Participants may only join before the warning signal ends
    pub fn is_joining_open(&self) -> bool {
        matches!(self.status, RaceStatus::Prestart | RaceStatus::Warning)
    }

    pub fn participant_ids(&self) -> Vec<u32> {
        self.boats.iter().map(|b| b.source_id).collect()
    }

    pub fn update_race_time(&mut self, now_ms: i64) {
        self.clock.set_time(now_ms);
    }

    /// Moves through the countdown statuses; has no effect once started
    pub fn update_status(&mut self) {
        if matches!(self.status, RaceStatus::Started | RaceStatus::Finished) {
            return;
        }
        let status = status_for(self.clock.time_to_start_ms());
        if status != self.status {
            info!("Race {} is now {:?}", self.race_id, status);
            self.status = status;
        }
    }

    pub fn finish(&mut self) {
        if self.status != RaceStatus::Finished {
            info!("Race {} finished", self.race_id);
            self.status = RaceStatus::Finished;
        }
    }

    /// Pushes an imminent start back so participants have time to join
    pub fn delay_start(&mut self, now_ms: i64) {
        let time_to_start = self.clock.start_time() - now_ms;
        if !self.force_started && time_to_start > 0 && time_to_start < MINIMUM_START_DELAY_MS {
            self.clock.set_start_time(now_ms + RESCHEDULED_START_DELAY_MS);
            self.revision += 1;
            info!(
                "Race {} start delayed by {} ms",
                self.race_id, RESCHEDULED_START_DELAY_MS
            );
        }
    }

    pub fn force_start(&mut self, delay: Duration, now_ms: i64) {
        self.clock.set_start_time(now_ms + delay.as_millis() as i64);
        self.force_started = true;
        self.revision += 1;
        info!("Race {} forced to start in {:?}", self.race_id, delay);
    }

    /// Adds the roster boat `source_id` at the start line
    pub fn add_boat(&mut self, source_id: u32) -> Result<(), AllocationError> {
        let definition = self
            .roster
            .iter()
            .find(|d| d.source_id == source_id)
            .ok_or(AllocationError::UnknownSourceId(source_id))?;

        let position = self.course.start_line().midpoint();
        let boat = Boat::new(definition, position, self.clock.current_time());
        info!("Boat {} ({}) joined race {}", source_id, boat.name, self.race_id);
        self.boats.push(boat);
        self.revision += 1;
        Ok(())
    }

    pub fn remove_boat(&mut self, source_id: u32) -> Option<Boat> {
        let idx = self.boats.iter().position(|b| b.source_id == source_id)?;
        let boat = self.boats.remove(idx);
        self.revision += 1;
        info!("Boat {} left race {}", source_id, self.race_id);
        Some(boat)
    }

    /// Spreads the boats evenly along the start line facing the first mark
    pub fn initialise_boats(&mut self) {
        let start = self.course.start_line();
        let from = start.mark1.position;
        let to = start
            .mark2
            .as_ref()
            .map(|m| m.position)
            .unwrap_or(from);
        let width = from.distance_to(&to);
        let along = from.bearing_to(&to);
        let spacing = width / (self.boats.len() + 1) as f64;
        let target = self.course.end_mark(0).map(|m| m.midpoint());

        for (i, boat) in self.boats.iter_mut().enumerate() {
            boat.position = from.destination(spacing * (i + 1) as f64, along);
            if let Some(target) = target {
                boat.heading = boat.position.bearing_to(&target);
            }
            boat.leg = 0;
            boat.rounding_stage = 0;
            boat.speed = 0.0;
            boat.status = BoatStatus::Prestart;
            boat.time_since_tack_change = 0;
        }
        debug!("Placed {} boats on the start line", self.boats.len());
    }

    pub fn set_boats_racing(&mut self) {
        for boat in &mut self.boats {
            boat.status = BoatStatus::Racing;
        }
    }

    pub fn set_boats_time_next_mark(&mut self, time_ms: i64) {
        for boat in &mut self.boats {
            boat.estimated_time_at_next_mark = time_ms;
        }
    }

    /// Boats still racing with health left; the race ends when this reaches zero
    pub fn active_boat_count(&self) -> usize {
        self.boats.iter().filter(|b| b.is_active()).count()
    }

    /// Applies drained commands in order; commands for absent boats are dropped
    pub fn apply_commands(&mut self, queued: Vec<Command>) {
        let wind = self.wind;
        for command in queued {
            match self.boats.iter_mut().find(|b| b.source_id == command.source_id) {
                Some(boat) => commands::apply(boat, command.kind, wind, &self.polars),
                None => debug!(
                    "Dropping {:?} for departed boat {}",
                    command.kind, command.source_id
                ),
            }
        }
    }

    pub fn advance_manoeuvres(&mut self) {
        let wind = self.wind;
        for boat in &mut self.boats {
            commands::advance(boat);
            commands::hold_vmg(boat, wind, &self.polars);
        }
    }

    /// Advances every racing boat by one tick and probes it for collisions
    pub fn simulate_tick(&mut self, period_ms: i64) -> Vec<CollisionEvent> {
        let mut events = Vec::new();
        for idx in 0..self.boats.len() {
            if self.boats[idx].status != BoatStatus::Racing {
                continue;
            }
            self.update_position(idx, period_ms);
            if let Some(event) = self.probe_collision(idx) {
                events.push(event);
            }
        }
        events
    }

    /// Moves one boat along its heading and applies rounding and boundary rules
    pub fn update_position(&mut self, idx: usize, period_ms: i64) {
        let duration = self.clock.duration_ms();
        let now = self.clock.current_time();
        let wind = self.wind;
        let Some(boat) = self.boats.get_mut(idx) else {
            return;
        };
        let finished = self.course.is_finish_leg(boat.leg);

        if !finished && duration >= period_ms && !boat.colliding {
            if boat.speed_from_polar {
                let speed = self.polars.boat_speed(wind, boat.heading);
                if speed > 0.0 {
                    boat.speed = speed * (boat.health / 100.0).powf(HEALTH_SPEED_EXPONENT);
                }
            }
            let distance = boat.meters_travelled(period_ms) * self.time_scale;

            check_position(&self.course, boat, duration);
            boat.move_forwards(distance);
            boat.time_since_tack_change += period_ms;
        }

        if !finished && !is_inside_boundary(&boat.position, self.course.boundary()) {
            boat.adjust_health(-BOUNDARY_HEALTH_LOSS);
        }

        if let Some(target) = self.course.end_mark(boat.leg).map(|m| m.midpoint()) {
            boat.update_estimated_time(&target, now);
        }
    }

    /// Probes one boat against the marks and the other boats' current positions
    fn probe_collision(&mut self, idx: usize) -> Option<CollisionEvent> {
        let boat = self.boats.get(idx)?;
        if boat.colliding {
            return None;
        }

        let mut registry = ColliderRegistry::new();
        for mark in self.course.marks() {
            registry.add_mark(mark);
        }
        for other in self.boats.iter().filter(|b| b.source_id != boat.source_id) {
            registry.add_boat(other);
        }

        let collision = registry.ray_cast(boat.source_id, &boat.position, boat.heading)?;
        let boat = &mut self.boats[idx];
        let damage = match collision.kind {
            ColliderKind::Mark => MARK_COLLISION_DAMAGE,
            ColliderKind::Boat => BOAT_COLLISION_DAMAGE,
        };
        boat.adjust_health(-damage);
        boat.colliding = true;
        warn!(
            "Boat {} hit {:?} {} (health {:.1})",
            boat.source_id, collision.kind, collision.source_id, boat.health
        );

        Some(CollisionEvent {
            source_id: boat.source_id,
            collision,
        })
    }

    pub fn evolve_wind(&mut self) {
        let now = self.clock.current_time();
        self.wind = self.wind_generator.next_wind(self.wind, now);
    }
}

/// Advances the rounding stage of `boat` and records a finish.
///
/// One routine serves both rounding sides: `sign` is +1 for port roundings
/// and -1 for starboard roundings.
pub fn check_position(course: &Course, boat: &mut Boat, race_duration_ms: i64) {
    if let (Some(data), Some(end)) = (course.rounding_data(boat.leg), course.end_mark(boat.leg)) {
        let sign = end.rounding.sign();
        let mark = &data.mark.position;
        let on_side = is_on_side(&boat.position, boat.heading, mark, sign);

        match boat.rounding_stage {
            0 => {
                let gate_check = match &end.mark2 {
                    None => true,
                    Some(mark2) => is_between(
                        &boat.position,
                        boat.heading,
                        &end.mark1.position,
                        &mark2.position,
                    ),
                };
                if on_side
                    && passes_line(mark, &data.check1, &boat.position, data.leg_bearing)
                    && gate_check
                    && is_between(&boat.position, boat.heading, mark, &data.check1)
                {
                    boat.rounding_stage = 1;
                    if boat.leg + 1 >= course.leg_count() {
                        boat.rounding_stage = 2;
                    }
                    debug!("Boat {} passed the first rounding check", boat.source_id);
                }
            }
            1 => {
                let direction = mark.bearing_to(&data.check2).offset(-90.0 * sign);
                if on_side
                    && passes_line(mark, &data.check2, &boat.position, direction)
                    && is_between(&boat.position, boat.heading, mark, &data.check2)
                {
                    boat.rounding_stage = 2;
                    debug!("Boat {} passed the second rounding check", boat.source_id);
                }
            }
            _ => {
                boat.rounding_stage = 0;
                boat.leg += 1;
                info!(
                    "Boat {} started leg {} ({})",
                    boat.source_id,
                    boat.leg,
                    course.leg_name(boat.leg)
                );
            }
        }
    }

    if course.is_finish_leg(boat.leg) && boat.status != BoatStatus::Finished {
        boat.finish_time = Some(race_duration_ms);
        boat.speed = 0.0;
        boat.status = BoatStatus::Finished;
        info!("Boat {} finished in {} ms", boat.source_id, race_duration_ms);
    }
}
