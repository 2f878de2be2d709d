//! Course topology: marks, compound marks, legs and the precomputed
//! checkpoints used to decide when a boat has rounded a mark.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use shared::{Bearing, GpsCoordinate};

/// Rounding distance used for single marks, in metres
pub const SINGLE_MARK_ROUNDING_DISTANCE: f64 = 400.0;

/// Side a compound mark must be kept on. Gates rounded "SP" are treated as
/// port roundings and "PS" as starboard roundings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundingSide {
    Port,
    Starboard,
    Sp,
    Ps,
}

impl RoundingSide {
    pub fn is_port(self) -> bool {
        matches!(self, RoundingSide::Port | RoundingSide::Sp)
    }

    /// +1 for port roundings, -1 for starboard roundings
    pub fn sign(self) -> f64 {
        if self.is_port() {
            1.0
        } else {
            -1.0
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mark {
    pub source_id: u32,
    pub name: String,
    pub position: GpsCoordinate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompoundMark {
    pub id: u32,
    pub name: String,
    pub mark1: Mark,
    pub mark2: Option<Mark>,
    pub rounding: RoundingSide,
    midpoint: GpsCoordinate,
}

impl CompoundMark {
    pub fn new(id: u32, name: &str, mark1: Mark, mark2: Option<Mark>, rounding: RoundingSide) -> Self {
        let midpoint = match &mark2 {
            Some(mark2) => mark1.position.midpoint(&mark2.position),
            None => mark1.position,
        };
        Self {
            id,
            name: name.to_string(),
            mark1,
            mark2,
            rounding,
            midpoint,
        }
    }

    pub fn midpoint(&self) -> GpsCoordinate {
        self.midpoint
    }

    pub fn marks(&self) -> impl Iterator<Item = &Mark> {
        std::iter::once(&self.mark1).chain(self.mark2.iter())
    }

    /// Gate width, or a fixed distance for a single mark
    pub fn rounding_distance(&self) -> f64 {
        match &self.mark2 {
            Some(mark2) => self.mark1.position.distance_to(&mark2.position),
            None => SINGLE_MARK_ROUNDING_DISTANCE,
        }
    }

    /// The gate mark a boat arriving on `bearing` rounds, given the rounding side
    pub fn mark_for_rounding(&self, bearing: Bearing) -> &Mark {
        let mark2 = match &self.mark2 {
            Some(mark2) => mark2,
            None => return &self.mark1,
        };

        let (west, east) = if self.mark1.position.longitude < mark2.position.longitude {
            (&self.mark1, mark2)
        } else {
            (mark2, &self.mark1)
        };
        let (north, south) = if self.mark1.position.latitude > mark2.position.latitude {
            (&self.mark1, mark2)
        } else {
            (mark2, &self.mark1)
        };

        let port = self.rounding.is_port();
        let degrees = bearing.degrees();
        if degrees > 315.0 || degrees <= 45.0 {
            if port {
                west
            } else {
                east
            }
        } else if degrees <= 135.0 {
            if port {
                north
            } else {
                south
            }
        } else if degrees <= 225.0 {
            if port {
                east
            } else {
                west
            }
        } else if port {
            south
        } else {
            north
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leg {
    pub number: usize,
    pub name: String,
    /// Index into the course sequence
    pub start: usize,
    pub end: usize,
}

/// Checkpoints for rounding the end mark of one leg
#[derive(Debug, Clone, PartialEq)]
pub struct RoundingData {
    pub leg_bearing: Bearing,
    pub next_leg_bearing: Bearing,
    pub mark: Mark,
    pub check1: GpsCoordinate,
    pub check2: GpsCoordinate,
}

/// Whether `mark` lies on the port side of a boat at `position` heading `heading`
pub fn is_port_side(position: &GpsCoordinate, heading: Bearing, mark: &GpsCoordinate) -> bool {
    let towards = position.bearing_to(mark).degrees();
    let heading = heading.degrees();

    if towards > 315.0 || towards <= 45.0 {
        heading <= 180.0
    } else if towards <= 135.0 {
        (90.0..=270.0).contains(&heading)
    } else if towards <= 225.0 {
        heading >= 180.0
    } else {
        heading <= 90.0 || heading >= 270.0
    }
}

/// Whether `mark` lies on the side given by `side` (+1 port, -1 starboard)
pub fn is_on_side(position: &GpsCoordinate, heading: Bearing, mark: &GpsCoordinate, side: f64) -> bool {
    is_port_side(position, heading, mark) == (side > 0.0)
}

/// Whether a boat lies between two marks: one to port and the other to starboard
pub fn is_between(position: &GpsCoordinate, heading: Bearing, a: &GpsCoordinate, b: &GpsCoordinate) -> bool {
    is_port_side(position, heading, a) != is_port_side(position, heading, b)
}

#[derive(Debug, Clone)]
pub struct Course {
    sequence: Vec<CompoundMark>,
    legs: Vec<Leg>,
    rounding: Vec<RoundingData>,
    boundary: Vec<GpsCoordinate>,
}

impl Course {
    /// Builds legs between consecutive compound marks of `sequence`
    pub fn new(sequence: Vec<CompoundMark>, boundary: Vec<GpsCoordinate>) -> Result<Self, ConfigError> {
        if sequence.len() < 2 {
            return Err(ConfigError::Invalid(
                "a course needs at least two compound marks".to_string(),
            ));
        }
        if boundary.len() < 3 {
            return Err(ConfigError::Invalid(
                "the course boundary needs at least three points".to_string(),
            ));
        }

        let legs: Vec<Leg> = (0..sequence.len() - 1)
            .map(|i| Leg {
                number: i,
                name: format!("{} to {}", sequence[i].name, sequence[i + 1].name),
                start: i,
                end: i + 1,
            })
            .collect();

        let mut course = Self {
            sequence,
            legs,
            rounding: Vec::new(),
            boundary,
        };
        course.rounding = (0..course.legs.len())
            .map(|i| course.rounding_data_for(i))
            .collect();
        Ok(course)
    }

    fn rounding_data_for(&self, leg_number: usize) -> RoundingData {
        let leg = &self.legs[leg_number];
        let end = &self.sequence[leg.end];
        let offset = 90.0 * end.rounding.sign();

        let leg_bearing = self.sequence[leg.start].midpoint().bearing_to(&end.midpoint());
        let mark = end.mark_for_rounding(leg_bearing).clone();
        let distance = end.rounding_distance();

        let check1 = match &end.mark2 {
            None => mark.position.destination(distance, leg_bearing.offset(offset)),
            Some(mark2) if *mark2 == mark => end.mark1.position,
            Some(mark2) => mark2.position,
        };

        let (next_leg_bearing, check2) = match self.legs.get(leg_number + 1) {
            Some(next) => {
                let next_bearing = self.sequence[next.start]
                    .midpoint()
                    .bearing_to(&self.sequence[next.end].midpoint());
                let check2 = mark
                    .position
                    .destination(distance, next_bearing.offset(offset));
                (next_bearing, check2)
            }
            None => (leg_bearing, check1),
        };

        RoundingData {
            leg_bearing,
            next_leg_bearing,
            mark,
            check1,
            check2,
        }
    }

    /// Number of real legs; the finish leg comes after these
    pub fn leg_count(&self) -> usize {
        self.legs.len()
    }

    pub fn leg(&self, number: usize) -> Option<&Leg> {
        self.legs.get(number)
    }

    pub fn is_finish_leg(&self, number: usize) -> bool {
        number >= self.legs.len()
    }

    pub fn leg_name(&self, number: usize) -> &str {
        self.legs
            .get(number)
            .map(|leg| leg.name.as_str())
            .unwrap_or("Finish")
    }

    pub fn rounding_data(&self, leg_number: usize) -> Option<&RoundingData> {
        self.rounding.get(leg_number)
    }

    /// End compound mark of a leg, `None` on the finish leg
    pub fn end_mark(&self, leg_number: usize) -> Option<&CompoundMark> {
        self.legs.get(leg_number).map(|leg| &self.sequence[leg.end])
    }

    pub fn start_line(&self) -> &CompoundMark {
        &self.sequence[0]
    }

    pub fn sequence(&self) -> &[CompoundMark] {
        &self.sequence
    }

    pub fn boundary(&self) -> &[GpsCoordinate] {
        &self.boundary
    }

    /// Every physical mark on the course, once
    pub fn marks(&self) -> Vec<&Mark> {
        let mut marks: Vec<&Mark> = Vec::new();
        for compound in &self.sequence {
            for mark in compound.marks() {
                if !marks.iter().any(|m| m.source_id == mark.source_id) {
                    marks.push(mark);
                }
            }
        }
        marks
    }
}
