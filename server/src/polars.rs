//! Boat velocity model built from a tabulated polar chart.
//!
//! Samples give boat speed for (true wind speed, true wind angle) pairs with
//! angles in [0, 180]. Because the curve is symmetric each sample is mirrored to
//! 360 - angle, and every row is densified so each integer degree has a value.
//! Lookups binary search the ordered wind-speed and angle axes and interpolate
//! linearly between the nearest entries below and above, first in angle then
//! in wind speed.

use crate::error::ConfigError;
use crate::wind::Wind;
use serde::Deserialize;
use shared::Bearing;

/// One wind-speed row of the input chart
#[derive(Debug, Clone, Deserialize)]
pub struct PolarSamples {
    pub wind_speed: f64,
    /// `[true wind angle, boat speed]` pairs
    pub samples: Vec<[f64; 2]>,
}

#[derive(Debug, Clone)]
struct PolarRow {
    wind_speed: f64,
    /// (angle, boat speed), sorted by angle, angles in [0, 360)
    points: Vec<(f64, f64)>,
}

impl PolarRow {
    fn speed_at(&self, angle: f64) -> f64 {
        let idx = self.points.partition_point(|(a, _)| *a <= angle);

        let (low_angle, low_speed) = if idx == 0 {
            let (a, s) = self.points[self.points.len() - 1];
            (a - 360.0, s)
        } else {
            self.points[idx - 1]
        };
        if low_angle == angle {
            return low_speed;
        }

        let (high_angle, high_speed) = if idx == self.points.len() {
            let (a, s) = self.points[0];
            (a + 360.0, s)
        } else {
            self.points[idx]
        };

        let span = high_angle - low_angle;
        if span <= 0.0 {
            return low_speed;
        }
        low_speed + (high_speed - low_speed) * (angle - low_angle) / span
    }

    /// Fills every integer degree missing between tabulated angles
    fn densify(&mut self) {
        let count = self.points.len();
        let mut filled = Vec::new();

        for i in 0..count {
            let (low_angle, low_speed) = self.points[i];
            let (mut high_angle, high_speed) = self.points[(i + 1) % count];
            if i + 1 == count {
                high_angle += 360.0;
            }

            let slope = (high_speed - low_speed) / (high_angle - low_angle);
            let mut degree = low_angle.floor() + 1.0;
            while degree < high_angle {
                filled.push((degree.rem_euclid(360.0), low_speed + slope * (degree - low_angle)));
                degree += 1.0;
            }
        }

        self.points.extend(filled);
        self.points
            .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
        self.points.dedup_by(|later, earlier| later.0 == earlier.0);
    }
}

/// Immutable polar table shared by every boat in a race
#[derive(Debug, Clone)]
pub struct PolarTable {
    rows: Vec<PolarRow>,
}

impl PolarTable {
    pub fn from_samples(input: &[PolarSamples]) -> Result<Self, ConfigError> {
        if input.is_empty() {
            return Err(ConfigError::Invalid("polar table has no rows".to_string()));
        }

        let mut rows: Vec<PolarRow> = Vec::new();
        for row in input {
            if !row.wind_speed.is_finite() || row.wind_speed < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "invalid polar wind speed {}",
                    row.wind_speed
                )));
            }

            let idx = match rows.iter().position(|r| r.wind_speed == row.wind_speed) {
                Some(idx) => idx,
                None => {
                    rows.push(PolarRow {
                        wind_speed: row.wind_speed,
                        points: Vec::new(),
                    });
                    rows.len() - 1
                }
            };
            let target = &mut rows[idx];

            for [angle, speed] in &row.samples {
                if !(0.0..=180.0).contains(angle) || !speed.is_finite() || *speed < 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "invalid polar sample ({}, {}) at {} kn",
                        angle, speed, row.wind_speed
                    )));
                }
                target.points.push((*angle, *speed));
                target.points.push(((360.0 - angle).rem_euclid(360.0), *speed));
            }
        }

        for row in &mut rows {
            if row.points.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "polar row at {} kn has no samples",
                    row.wind_speed
                )));
            }
            // Stable sort keeps the first sample given for a repeated angle
            row.points
                .sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
            row.points.dedup_by(|later, earlier| later.0 == earlier.0);
            row.densify();
        }
        rows.sort_by(|a, b| {
            a.wind_speed
                .partial_cmp(&b.wind_speed)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(Self { rows })
    }

    /// Boat speed in knots for a wind speed and a wind-relative angle in degrees
    pub fn speed(&self, wind_speed: f64, true_wind_angle: f64) -> f64 {
        let angle = Bearing::from_degrees(true_wind_angle).degrees();
        let idx = self.rows.partition_point(|r| r.wind_speed <= wind_speed);

        let below = if idx > 0 { self.rows.get(idx - 1) } else { None };
        let above = self.rows.get(idx);

        match (below, above) {
            (Some(low), _) if low.wind_speed == wind_speed => low.speed_at(angle),
            (Some(low), Some(high)) => {
                let low_speed = low.speed_at(angle);
                let high_speed = high.speed_at(angle);
                let fraction = (wind_speed - low.wind_speed) / (high.wind_speed - low.wind_speed);
                low_speed + (high_speed - low_speed) * fraction
            }
            (Some(only), None) | (None, Some(only)) => only.speed_at(angle),
            (None, None) => 0.0,
        }
    }

    /// Boat speed for a heading under the given wind
    pub fn boat_speed(&self, wind: Wind, heading: Bearing) -> f64 {
        self.speed(wind.speed, heading.degrees() - wind.direction.degrees())
    }

    fn nearest_row(&self, wind_speed: f64) -> &PolarRow {
        let idx = self.rows.partition_point(|r| r.wind_speed <= wind_speed);
        match (idx.checked_sub(1).and_then(|i| self.rows.get(i)), self.rows.get(idx)) {
            (Some(low), Some(high)) => {
                if wind_speed - low.wind_speed <= high.wind_speed - wind_speed {
                    low
                } else {
                    high
                }
            }
            (Some(only), None) | (None, Some(only)) => only,
            (None, None) => &self.rows[0],
        }
    }

    /// Heading and speed with the best boat speed in the boat's current
    /// wind-relative quadrant, taken from the row nearest the wind speed.
    pub fn best_vmg(&self, wind: Wind, heading: Bearing) -> (Bearing, f64) {
        let row = self.nearest_row(wind.speed);
        let relative = Bearing::from_degrees(heading.degrees() - wind.direction.degrees()).degrees();
        let quadrant_start = (relative / 90.0).floor() * 90.0;
        let quadrant_end = quadrant_start + 90.0;

        let mut best: Option<(f64, f64)> = None;
        let mut last_tie: Option<f64> = None;
        for &(angle, speed) in row
            .points
            .iter()
            .filter(|(a, _)| *a >= quadrant_start && *a < quadrant_end)
        {
            match best {
                Some((_, best_speed)) if speed == best_speed => last_tie = Some(angle),
                Some((_, best_speed)) if speed < best_speed => {}
                _ => {
                    best = Some((angle, speed));
                    last_tie = None;
                }
            }
        }

        let (mut angle, mut speed) = best.unwrap_or((relative, row.speed_at(relative)));
        if let Some(tie) = last_tie {
            // Equal speeds across a range: steer for the middle of it
            let middle = (angle + tie) / 2.0;
            if let Some(&(a, s)) = row.points.iter().min_by(|x, y| {
                (x.0 - middle)
                    .abs()
                    .partial_cmp(&(y.0 - middle).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }) {
                angle = a;
                speed = s;
            }
        }

        (wind.direction.offset(angle), speed)
    }
}
