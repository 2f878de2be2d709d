//! Race definition loading and runtime settings.
//!
//! A race definition is a TOML document describing the regatta, the marks and
//! compound marks of the course, the boundary polygon, the participant roster
//! and the polar samples. A default definition is compiled into the binary and
//! used whenever no file is given on the command line.

use crate::course::{CompoundMark, Course, Mark, RoundingSide};
use crate::error::ConfigError;
use crate::polars::{PolarSamples, PolarTable};
use crate::wind::{Wind, WindModel};
use log::info;
use serde::{Deserialize, Serialize};
use shared::{GpsCoordinate, RaceType, FRAME_PERIOD_MS};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Race definition used when none is supplied
pub const DEFAULT_RACE: &str = include_str!("../race.toml");

/// Snapshots published after the race finishes
pub const TRAILING_FRAMES: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceKind {
    Match,
    Fleet,
}

impl From<RaceKind> for RaceType {
    fn from(kind: RaceKind) -> Self {
        match kind {
            RaceKind::Match => RaceType::MatchRace,
            RaceKind::Fleet => RaceType::FleetRace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegattaDefinition {
    pub id: u32,
    pub name: String,
    pub course_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub utc_offset: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WindDefinition {
    pub direction: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarkDefinition {
    pub source_id: u32,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompoundMarkDefinition {
    pub id: u32,
    pub name: String,
    pub marks: Vec<u32>,
    pub rounding: RoundingSide,
}

/// One entry of the participant roster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoatDefinition {
    pub source_id: u32,
    pub name: String,
    pub short_name: String,
    pub country: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceDefinition {
    pub race_id: u32,
    pub race_type: RaceKind,
    /// Seconds from server start to the scheduled race start
    pub start_delay_seconds: u64,
    pub boundary: Vec<[f64; 2]>,
    /// Compound mark ids in the order they are sailed
    pub course: Vec<u32>,
    pub regatta: RegattaDefinition,
    pub wind: WindDefinition,
    pub marks: Vec<MarkDefinition>,
    pub compound_marks: Vec<CompoundMarkDefinition>,
    pub boats: Vec<BoatDefinition>,
    pub polars: Vec<PolarSamples>,
}

impl RaceDefinition {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let definition: RaceDefinition = toml::from_str(input)?;
        definition.validate()?;
        Ok(definition)
    }

    /// Loads the definition at `path`, or the embedded default when `None`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                info!("Loaded race definition from {}", path.display());
                Self::from_toml_str(&contents)
            }
            None => Self::from_toml_str(DEFAULT_RACE),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.boats.is_empty() {
            return Err(ConfigError::Invalid("the roster is empty".to_string()));
        }

        let mut seen = HashSet::new();
        for boat in &self.boats {
            if boat.source_id == 0 {
                return Err(ConfigError::Invalid(format!(
                    "boat {} uses the reserved source id 0",
                    boat.name
                )));
            }
            if !seen.insert(boat.source_id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate boat source id {}",
                    boat.source_id
                )));
            }
        }

        for compound in &self.compound_marks {
            if compound.marks.is_empty() || compound.marks.len() > 2 {
                return Err(ConfigError::Invalid(format!(
                    "compound mark {} must have one or two marks",
                    compound.id
                )));
            }
            for id in &compound.marks {
                if !self.marks.iter().any(|m| m.source_id == *id) {
                    return Err(ConfigError::Invalid(format!(
                        "compound mark {} refers to unknown mark {}",
                        compound.id, id
                    )));
                }
            }
        }

        for id in &self.course {
            if !self.compound_marks.iter().any(|c| c.id == *id) {
                return Err(ConfigError::Invalid(format!(
                    "course refers to unknown compound mark {}",
                    id
                )));
            }
        }

        if self.polars.is_empty() {
            return Err(ConfigError::Invalid("no polar samples".to_string()));
        }
        Ok(())
    }

    fn mark(&self, source_id: u32) -> Result<Mark, ConfigError> {
        self.marks
            .iter()
            .find(|m| m.source_id == source_id)
            .map(|m| Mark {
                source_id: m.source_id,
                name: m.name.clone(),
                position: GpsCoordinate::new(m.latitude, m.longitude),
            })
            .ok_or_else(|| ConfigError::Invalid(format!("unknown mark {}", source_id)))
    }

    fn compound_mark(&self, id: u32) -> Result<CompoundMark, ConfigError> {
        let definition = self
            .compound_marks
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown compound mark {}", id)))?;

        let mark1 = self.mark(definition.marks[0])?;
        let mark2 = match definition.marks.get(1) {
            Some(id) => Some(self.mark(*id)?),
            None => None,
        };
        Ok(CompoundMark::new(
            definition.id,
            &definition.name,
            mark1,
            mark2,
            definition.rounding,
        ))
    }

    pub fn build_course(&self) -> Result<Course, ConfigError> {
        let sequence = self
            .course
            .iter()
            .map(|id| self.compound_mark(*id))
            .collect::<Result<Vec<_>, _>>()?;
        let boundary = self
            .boundary
            .iter()
            .map(|[lat, lon]| GpsCoordinate::new(*lat, *lon))
            .collect();
        Course::new(sequence, boundary)
    }

    pub fn polar_table(&self) -> Result<PolarTable, ConfigError> {
        PolarTable::from_samples(&self.polars)
    }

    pub fn baseline_wind(&self) -> Wind {
        Wind::new(self.wind.direction, self.wind.speed)
    }

    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_seconds)
    }
}

/// Runtime knobs that do not belong to the race definition
#[derive(Debug, Clone)]
pub struct RaceSettings {
    /// Multiplier applied to distance travelled per tick
    pub time_scale: f64,
    pub frame_period: Duration,
    pub trailing_frames: u32,
    pub wind_model: WindModel,
    pub wind_seed: Option<u64>,
    /// Start the race this long after launch instead of the definition's delay
    pub forced_start: Option<Duration>,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            time_scale: 1.0,
            frame_period: Duration::from_millis(FRAME_PERIOD_MS),
            trailing_frames: TRAILING_FRAMES,
            wind_model: WindModel::Shifting,
            wind_seed: None,
            forced_start: None,
        }
    }
}
