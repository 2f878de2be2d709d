//! Wind state and the generators that evolve it once per tick.

use clap::ValueEnum;
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use shared::Bearing;

/// True wind: the bearing it blows from and its speed in knots
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wind {
    pub direction: Bearing,
    pub speed: f64,
}

impl Wind {
    pub fn new(direction_degrees: f64, speed: f64) -> Self {
        Self {
            direction: Bearing::from_degrees(direction_degrees),
            speed,
        }
    }
}

/// Produces the wind for each tick from the wind of the previous tick
pub trait WindGenerator: Send + Sync {
    fn baseline(&self) -> Wind;

    fn next_wind(&mut self, current: Wind, now_ms: i64) -> Wind;
}

/// Selects a wind generator from configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindModel {
    Constant,
    Random,
    Shifting,
}

pub fn build_generator(
    model: WindModel,
    baseline: Wind,
    seed: Option<u64>,
    now_ms: i64,
) -> Box<dyn WindGenerator> {
    let rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    match model {
        WindModel::Constant => Box::new(ConstantWind { baseline }),
        WindModel::Random => Box::new(RandomWind::new(baseline, rng)),
        WindModel::Shifting => Box::new(ShiftingWind::new(baseline, rng, now_ms)),
    }
}

pub struct ConstantWind {
    baseline: Wind,
}

impl ConstantWind {
    pub fn new(baseline: Wind) -> Self {
        Self { baseline }
    }
}

impl WindGenerator for ConstantWind {
    fn baseline(&self) -> Wind {
        self.baseline
    }

    fn next_wind(&mut self, _current: Wind, _now_ms: i64) -> Wind {
        self.baseline
    }
}

/// Small random steps, clamped to a band around the baseline
pub struct RandomWind {
    baseline: Wind,
    /// Allowed deviation from the baseline direction in degrees
    bearing_band: f64,
    speed_bounds: (f64, f64),
    change_chance: f64,
    speed_step: f64,
    bearing_step: f64,
    rng: StdRng,
}

impl RandomWind {
    pub fn new(baseline: Wind, rng: StdRng) -> Self {
        Self {
            baseline,
            bearing_band: 20.0,
            speed_bounds: ((baseline.speed - 4.0).max(0.0), baseline.speed + 4.0),
            change_chance: 0.2,
            speed_step: 0.1,
            bearing_step: 0.5,
            rng,
        }
    }

    fn step(&mut self, current: f64, lower: f64, upper: f64, amount: f64) -> f64 {
        if self.rng.gen::<f64>() >= self.change_chance {
            return current;
        }
        let delta = self.rng.gen_range(-amount..=amount);
        (current + delta).clamp(lower, upper)
    }
}

impl WindGenerator for RandomWind {
    fn baseline(&self) -> Wind {
        self.baseline
    }

    fn next_wind(&mut self, current: Wind, _now_ms: i64) -> Wind {
        let (low_speed, high_speed) = self.speed_bounds;
        let speed = self.step(current.speed, low_speed, high_speed, self.speed_step);

        let offset = current.direction.relative_to(self.baseline.direction);
        let band = self.bearing_band;
        let offset = self.step(offset, -band, band, self.bearing_step);

        Wind {
            direction: self.baseline.direction.offset(offset),
            speed,
        }
    }
}

/// Oscillating wind with periodic persistent shifts
pub struct ShiftingWind {
    baseline: Wind,
    bearing_variance: f64,
    speed_variance: f64,
    oscillation_variance: f64,
    oscillation_period_ms: f64,
    shift_period_ms: i64,
    shift_degrees: f64,
    shift_this_race: bool,
    shift_anticlockwise: bool,
    shifted_so_far: f64,
    /// Accumulated persistent shift the oscillation is centred on
    centre_offset: f64,
    anticlockwise: bool,
    last_change: Option<i64>,
    last_oscillation_reset: i64,
    last_shift: i64,
    rng: StdRng,
}

impl ShiftingWind {
    pub fn new(baseline: Wind, mut rng: StdRng, now_ms: i64) -> Self {
        let shift_this_race = rng.gen_bool(0.5);
        let anticlockwise = rng.gen_bool(0.5);
        Self {
            baseline,
            bearing_variance: 5.0,
            speed_variance: 5.0,
            oscillation_variance: 0.25,
            oscillation_period_ms: 60_000.0,
            shift_period_ms: 60_000,
            shift_degrees: 7.0,
            shift_this_race,
            shift_anticlockwise: false,
            shifted_so_far: 0.0,
            centre_offset: 0.0,
            anticlockwise,
            last_change: None,
            last_oscillation_reset: now_ms,
            last_shift: now_ms,
            rng,
        }
    }

    fn oscillate(&mut self, direction: Bearing, now_ms: i64) -> Bearing {
        let since_change = (now_ms - self.last_change.unwrap_or(now_ms)).max(0) as f64;
        let mut change = since_change * 2.0 * self.bearing_variance / self.oscillation_period_ms;
        change = (1.0 - self.oscillation_variance) * change
            + 2.0 * self.oscillation_variance * change * self.rng.gen::<f64>();

        if (now_ms - self.last_oscillation_reset) as f64 >= self.oscillation_period_ms {
            self.last_oscillation_reset = now_ms;
            self.anticlockwise = !self.anticlockwise;
        }

        let centre = self.baseline.direction.offset(self.centre_offset);
        let offset = direction.relative_to(centre);
        let next = if self.anticlockwise {
            offset - change
        } else {
            offset + change
        };

        if next.abs() > self.bearing_variance {
            self.anticlockwise = !self.anticlockwise;
            self.last_oscillation_reset = now_ms;
            direction
        } else {
            centre.offset(next)
        }
    }

    fn shift(&mut self, direction: Bearing, now_ms: i64) -> Bearing {
        if now_ms - self.last_shift < self.shift_period_ms {
            return direction;
        }

        self.shifted_so_far += self.shift_degrees;
        if self.shifted_so_far >= 180.0 {
            self.shift_anticlockwise = self.rng.gen_bool(0.5);
            self.shifted_so_far = 0.0;
        }
        self.last_shift = now_ms;

        let delta = if self.shift_anticlockwise {
            -self.shift_degrees
        } else {
            self.shift_degrees
        };
        self.centre_offset += delta;
        debug!("Wind shifted by {:.0} degrees", delta);
        direction.offset(delta)
    }
}

impl WindGenerator for ShiftingWind {
    fn baseline(&self) -> Wind {
        self.baseline
    }

    fn next_wind(&mut self, current: Wind, now_ms: i64) -> Wind {
        let mut direction = self.oscillate(current.direction, now_ms);
        if self.shift_this_race {
            direction = self.shift(direction, now_ms);
        }

        let offset = (direction.degrees() - self.baseline.direction.degrees()).to_radians();
        let speed = (self.baseline.speed + offset.sin() * self.speed_variance).max(0.0);
        self.last_change = Some(now_ms);

        Wind { direction, speed }
    }
}
