//! A participant's boat and its kinematic helpers.

use crate::commands::Manoeuvres;
use crate::config::BoatDefinition;
use crate::wind::Wind;
use shared::geo::{KNOTS_TO_METERS_PER_SECOND, METERS_PER_NAUTICAL_MILE, MILLIS_PER_HOUR};
use shared::{Bearing, BoatStatus, GpsCoordinate};

pub const MAX_HEALTH: f64 = 100.0;

/// Kinematic and race state of one participant
#[derive(Debug, Clone)]
pub struct Boat {
    pub source_id: u32,
    pub name: String,
    pub short_name: String,
    pub country: String,
    pub position: GpsCoordinate,
    pub heading: Bearing,
    /// Knots
    pub speed: f64,
    /// 0 to 100
    pub health: f64,
    pub leg: usize,
    /// 0 before rounding, 1 once past the first checkpoint, 2 once past the second
    pub rounding_stage: u8,
    pub time_since_tack_change: i64,
    pub status: BoatStatus,
    pub sails_out: bool,
    pub auto_vmg: bool,
    /// Whether speed is taken from the polar table each tick
    pub speed_from_polar: bool,
    pub colliding: bool,
    /// Race duration in milliseconds when the boat finished
    pub finish_time: Option<i64>,
    /// Milliseconds since the unix epoch
    pub estimated_time_at_next_mark: i64,
    pub manoeuvres: Manoeuvres,
}

impl Boat {
    pub fn new(definition: &BoatDefinition, position: GpsCoordinate, now_ms: i64) -> Self {
        Self {
            source_id: definition.source_id,
            name: definition.name.clone(),
            short_name: definition.short_name.clone(),
            country: definition.country.clone(),
            position,
            heading: Bearing::from_degrees(0.0),
            speed: 0.0,
            health: MAX_HEALTH,
            leg: 0,
            rounding_stage: 0,
            time_since_tack_change: 0,
            status: BoatStatus::Prestart,
            sails_out: true,
            auto_vmg: false,
            speed_from_polar: true,
            colliding: false,
            finish_time: None,
            estimated_time_at_next_mark: now_ms,
            manoeuvres: Manoeuvres::default(),
        }
    }

    /// Adds `delta` to health, keeping it within 0 to 100
    pub fn adjust_health(&mut self, delta: f64) {
        self.health = (self.health + delta).clamp(0.0, MAX_HEALTH);
    }

    /// Racing and healthy enough to keep the race alive
    pub fn is_active(&self) -> bool {
        self.status == BoatStatus::Racing && self.health >= 1.0
    }

    /// Metres covered at the current speed over `period_ms`
    pub fn meters_travelled(&self, period_ms: i64) -> f64 {
        self.speed * period_ms as f64 / MILLIS_PER_HOUR * METERS_PER_NAUTICAL_MILE
    }

    pub fn move_forwards(&mut self, meters: f64) {
        self.position = self.position.destination(meters, self.heading);
    }

    /// Heading relative to the wind, in (-180, 180]; 0 is head to wind
    pub fn true_wind_angle(&self, wind: Wind) -> f64 {
        self.heading.relative_to(wind.direction)
    }

    /// Speed component towards `target`, in knots
    pub fn velocity_towards(&self, target: &GpsCoordinate) -> f64 {
        let bearing = self.position.bearing_to(target);
        self.speed * (self.heading.radians() - bearing.radians()).cos()
    }

    /// Refreshes the estimated arrival at `target`; only while making way towards it
    pub fn update_estimated_time(&mut self, target: &GpsCoordinate, now_ms: i64) {
        let velocity = self.velocity_towards(target) * KNOTS_TO_METERS_PER_SECOND;
        if velocity > 0.0 {
            let millis = 1000.0 * self.position.distance_to(target) / velocity;
            self.estimated_time_at_next_mark = now_ms + millis as i64;
        }
    }
}
