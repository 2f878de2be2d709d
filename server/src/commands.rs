//! Command bridge between connection tasks and the race simulation.
//!
//! Connections push [`Command`]s into one shared unbounded queue. The driver
//! drains the whole queue at the start of each race tick and applies every
//! command in enqueue order. Commands that change a boat's heading or speed
//! over several ticks leave a manoeuvre on the boat, which the driver steps
//! once per tick through [`advance`].

use crate::boat::Boat;
use crate::polars::PolarTable;
use crate::wind::Wind;
use log::debug;
use shared::{Bearing, BoatAction, GpsCoordinate};
use tokio::sync::mpsc;

/// Degrees turned per tick by heading manoeuvres
pub const TURN_STEP_DEGREES: f64 = 3.0;
/// Knots gained or lost per tick while trimming sails
pub const SPEED_STEP_KNOTS: f64 = 0.5;
/// Metres pushed back per tick after a collision
pub const RECOIL_STEP_METERS: f64 = 3.0;
/// Distance a colliding boat is pushed back before it may sail again
pub const RECOIL_DISTANCE_METERS: f64 = 60.0;
/// Minimum time since the last tack before VMG may pick a new heading
pub const VMG_TACK_PERIOD_MS: i64 = 1000;
/// Automatic VMG ignores best headings closer than this to the current one
pub const VMG_RETARGET_DEGREES: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Action(BoatAction),
    /// Queued by the driver when a boat hits something
    Collision,
}

/// An intent for one boat
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    pub source_id: u32,
    pub kind: CommandKind,
}

impl Command {
    pub fn action(source_id: u32, action: BoatAction) -> Self {
        Self {
            source_id,
            kind: CommandKind::Action(action),
        }
    }

    pub fn collision(source_id: u32) -> Self {
        Self {
            source_id,
            kind: CommandKind::Collision,
        }
    }
}

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub fn channel() -> (CommandSender, CommandReceiver) {
    mpsc::unbounded_channel()
}

/// Takes every command currently queued, in enqueue order
pub fn drain(receiver: &mut CommandReceiver) -> Vec<Command> {
    let mut commands = Vec::new();
    while let Ok(command) = receiver.try_recv() {
        commands.push(command);
    }
    commands
}

/// Heading change spread over several ticks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Turn {
    pub goal: Bearing,
    /// +1 clockwise, -1 anticlockwise
    pub direction: f64,
    pub remaining: f64,
}

impl Turn {
    /// Turn from `heading` to `goal` along the shorter rotation
    pub fn towards(heading: Bearing, goal: Bearing) -> Self {
        let delta = goal.relative_to(heading);
        Self {
            goal,
            direction: if delta < 0.0 { -1.0 } else { 1.0 },
            remaining: delta.abs(),
        }
    }
}

/// Acceleration towards the polar speed, or deceleration to a stop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedChange {
    pub goal: f64,
    pub sails_out: bool,
}

/// Push-back after a collision
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recoil {
    pub origin: GpsCoordinate,
    pub bearing: Bearing,
}

/// Manoeuvres in progress on one boat. A new manoeuvre replaces the
/// previous one of the same kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Manoeuvres {
    pub turn: Option<Turn>,
    pub speed: Option<SpeedChange>,
    pub recoil: Option<Recoil>,
}

/// Applies one command to `boat` under the current wind
pub fn apply(boat: &mut Boat, kind: CommandKind, wind: Wind, polars: &PolarTable) {
    match kind {
        CommandKind::Action(BoatAction::Upwind) => turn_once(boat, wind, true),
        CommandKind::Action(BoatAction::Downwind) => turn_once(boat, wind, false),
        CommandKind::Action(BoatAction::TackGybe) => {
            boat.auto_vmg = false;
            let twa = boat.true_wind_angle(wind);
            let goal = wind.direction.offset(-twa);
            boat.manoeuvres.turn = Some(Turn::towards(boat.heading, goal));
            boat.time_since_tack_change = 0;
        }
        CommandKind::Action(BoatAction::Vmg) => {
            boat.auto_vmg = !boat.auto_vmg;
            if boat.time_since_tack_change > VMG_TACK_PERIOD_MS {
                let (goal, _) = polars.best_vmg(wind, boat.heading);
                boat.manoeuvres.turn = Some(Turn::towards(boat.heading, goal));
            } else {
                debug!(
                    "Boat {} tacked {} ms ago, keeping heading",
                    boat.source_id, boat.time_since_tack_change
                );
            }
        }
        CommandKind::Action(BoatAction::SailsIn) => trim_sails(boat, false, wind, polars),
        CommandKind::Action(BoatAction::SailsOut) => trim_sails(boat, true, wind, polars),
        CommandKind::Action(BoatAction::ToggleSails) => {
            let sails_out = !boat.sails_out;
            trim_sails(boat, sails_out, wind, polars)
        }
        CommandKind::Action(BoatAction::ZoomIn) | CommandKind::Action(BoatAction::ZoomOut) => {}
        CommandKind::Collision => {
            boat.speed_from_polar = false;
            boat.manoeuvres.recoil = Some(Recoil {
                origin: boat.position,
                bearing: boat.heading.offset(-180.0),
            });
        }
    }
}

fn turn_once(boat: &mut Boat, wind: Wind, upwind: bool) {
    boat.auto_vmg = false;
    boat.manoeuvres.turn = None;

    let twa = boat.true_wind_angle(wind);
    let side = if twa < 0.0 { -1.0 } else { 1.0 };
    boat.heading = if upwind {
        if twa.abs() <= TURN_STEP_DEGREES {
            wind.direction
        } else {
            boat.heading.offset(-side * TURN_STEP_DEGREES)
        }
    } else if twa.abs() + TURN_STEP_DEGREES >= 180.0 {
        wind.direction.offset(180.0)
    } else {
        boat.heading.offset(side * TURN_STEP_DEGREES)
    };
}

fn trim_sails(boat: &mut Boat, sails_out: bool, wind: Wind, polars: &PolarTable) {
    boat.sails_out = sails_out;
    boat.speed_from_polar = false;
    let goal = if sails_out {
        polars.boat_speed(wind, boat.heading)
    } else {
        0.0
    };
    boat.manoeuvres.speed = Some(SpeedChange { goal, sails_out });
}

/// Steps every manoeuvre in progress on `boat` by one tick
pub fn advance(boat: &mut Boat) {
    if let Some(mut turn) = boat.manoeuvres.turn {
        if turn.remaining > 0.0 {
            boat.heading = boat.heading.offset(turn.direction * TURN_STEP_DEGREES);
            turn.remaining -= TURN_STEP_DEGREES;
            boat.manoeuvres.turn = Some(turn);
        } else {
            boat.heading = turn.goal;
            boat.manoeuvres.turn = None;
        }
    }

    if let Some(change) = boat.manoeuvres.speed {
        if !boat.colliding {
            boat.speed_from_polar = false;
            if change.sails_out && boat.speed < change.goal {
                boat.speed = (boat.speed + SPEED_STEP_KNOTS).min(change.goal);
            } else if !change.sails_out && boat.speed > change.goal {
                boat.speed = (boat.speed - SPEED_STEP_KNOTS).max(0.0);
            } else {
                if change.sails_out {
                    boat.speed_from_polar = true;
                }
                boat.manoeuvres.speed = None;
            }
        }
    }

    if let Some(recoil) = boat.manoeuvres.recoil {
        if recoil.origin.distance_to(&boat.position) < RECOIL_DISTANCE_METERS {
            boat.speed_from_polar = false;
            boat.position = boat.position.destination(RECOIL_STEP_METERS, recoil.bearing);
        } else {
            boat.manoeuvres.recoil = None;
            boat.speed_from_polar = true;
            boat.colliding = false;
        }
    }
}

/// Keeps a boat on automatic VMG steering for the best heading as the wind moves.
///
/// Runs after [`advance`] each tick. A turn already in progress is left alone.
pub fn hold_vmg(boat: &mut Boat, wind: Wind, polars: &PolarTable) {
    if !boat.auto_vmg
        || boat.manoeuvres.turn.is_some()
        || boat.time_since_tack_change <= VMG_TACK_PERIOD_MS
    {
        return;
    }
    let (goal, _) = polars.best_vmg(wind, boat.heading);
    if goal.relative_to(boat.heading).abs() >= VMG_RETARGET_DEGREES {
        debug!(
            "Boat {} bearing away to {:.1} on automatic VMG",
            boat.source_id,
            goal.degrees()
        );
        boat.manoeuvres.turn = Some(Turn::towards(boat.heading, goal));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boat::tests::definition;
    use crate::polars::PolarSamples;
    use assert_approx_eq::assert_approx_eq;

    fn polars() -> PolarTable {
        PolarTable::from_samples(&[PolarSamples {
            wind_speed: 12.0,
            samples: vec![
                [0.0, 0.0],
                [30.0, 11.0],
                [45.0, 14.0],
                [90.0, 20.0],
                [135.0, 18.0],
                [175.0, 12.0],
            ],
        }])
        .unwrap()
    }

    fn boat(heading: f64) -> Boat {
        let mut boat = Boat::new(&definition(101), GpsCoordinate::new(32.0, -64.0), 0);
        boat.heading = Bearing::from_degrees(heading);
        boat
    }

    #[test]
    fn test_drain_preserves_order() {
        let (tx, mut rx) = channel();
        tx.send(Command::action(101, BoatAction::SailsIn)).unwrap();
        tx.send(Command::action(102, BoatAction::Vmg)).unwrap();
        tx.send(Command::collision(101)).unwrap();

        let commands = drain(&mut rx);
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0], Command::action(101, BoatAction::SailsIn));
        assert_eq!(commands[2].kind, CommandKind::Collision);
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_upwind_and_downwind_turn_three_degrees() {
        let wind = Wind::new(0.0, 12.0);
        let polars = polars();

        let mut starboard_tack = boat(60.0);
        starboard_tack.auto_vmg = true;
        apply(&mut starboard_tack, CommandKind::Action(BoatAction::Upwind), wind, &polars);
        assert_approx_eq!(starboard_tack.heading.degrees(), 57.0);
        assert!(!starboard_tack.auto_vmg);

        let mut port_tack = boat(300.0);
        apply(&mut port_tack, CommandKind::Action(BoatAction::Upwind), wind, &polars);
        assert_approx_eq!(port_tack.heading.degrees(), 303.0);

        apply(&mut port_tack, CommandKind::Action(BoatAction::Downwind), wind, &polars);
        apply(&mut port_tack, CommandKind::Action(BoatAction::Downwind), wind, &polars);
        assert_approx_eq!(port_tack.heading.degrees(), 297.0);
    }

    #[test]
    fn test_upwind_stops_head_to_wind() {
        let wind = Wind::new(0.0, 12.0);
        let mut head_to_wind = boat(2.0);
        apply(&mut head_to_wind, CommandKind::Action(BoatAction::Upwind), wind, &polars());
        assert_approx_eq!(head_to_wind.heading.degrees(), 0.0);
    }

    #[test]
    fn test_tack_mirrors_across_wind() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(45.0);
        boat.time_since_tack_change = 5_000;
        apply(&mut boat, CommandKind::Action(BoatAction::TackGybe), wind, &polars());
        assert_eq!(boat.time_since_tack_change, 0);

        let turn = boat.manoeuvres.turn.unwrap();
        assert_approx_eq!(turn.goal.degrees(), 315.0);
        assert_eq!(turn.direction, -1.0);

        let mut ticks = 0;
        while boat.manoeuvres.turn.is_some() {
            advance(&mut boat);
            ticks += 1;
            assert!(ticks < 100);
        }
        assert_approx_eq!(boat.heading.degrees(), 315.0);
        assert_eq!(ticks, 31);
    }

    #[test]
    fn test_new_turn_replaces_previous() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(45.0);
        apply(&mut boat, CommandKind::Action(BoatAction::TackGybe), wind, &polars());
        advance(&mut boat);
        apply(&mut boat, CommandKind::Action(BoatAction::Downwind), wind, &polars());
        assert!(boat.manoeuvres.turn.is_none());
        assert_approx_eq!(boat.heading.degrees(), 45.0);
    }

    #[test]
    fn test_vmg_waits_after_tack() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(60.0);
        boat.time_since_tack_change = 200;
        apply(&mut boat, CommandKind::Action(BoatAction::Vmg), wind, &polars());
        assert!(boat.auto_vmg);
        assert!(boat.manoeuvres.turn.is_none());

        boat.time_since_tack_change = 1_500;
        apply(&mut boat, CommandKind::Action(BoatAction::Vmg), wind, &polars());
        assert!(!boat.auto_vmg);
        let turn = boat.manoeuvres.turn.unwrap();
        assert_approx_eq!(turn.goal.degrees(), 89.0);
    }

    #[test]
    fn test_auto_vmg_follows_wind_shift() {
        let polars = polars();
        let mut boat = boat(89.0);
        boat.time_since_tack_change = 5_000;

        hold_vmg(&mut boat, Wind::new(0.0, 12.0), &polars);
        assert!(boat.manoeuvres.turn.is_none());

        boat.auto_vmg = true;
        // already on the best heading
        hold_vmg(&mut boat, Wind::new(0.0, 12.0), &polars);
        assert!(boat.manoeuvres.turn.is_none());

        hold_vmg(&mut boat, Wind::new(20.0, 12.0), &polars);
        let turn = boat.manoeuvres.turn.unwrap();
        assert_approx_eq!(turn.goal.degrees(), 109.0);
        assert_eq!(turn.direction, 1.0);
    }

    #[test]
    fn test_auto_vmg_turns_once_tack_settles() {
        let wind = Wind::new(0.0, 12.0);
        let polars = polars();
        let mut boat = boat(60.0);
        boat.time_since_tack_change = 200;
        apply(&mut boat, CommandKind::Action(BoatAction::Vmg), wind, &polars);
        hold_vmg(&mut boat, wind, &polars);
        assert!(boat.manoeuvres.turn.is_none());

        boat.time_since_tack_change = 1_200;
        hold_vmg(&mut boat, wind, &polars);
        assert_approx_eq!(boat.manoeuvres.turn.unwrap().goal.degrees(), 89.0);
    }

    #[test]
    fn test_sails_in_decelerates_to_stop() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(90.0);
        boat.speed = 1.2;
        apply(&mut boat, CommandKind::Action(BoatAction::SailsIn), wind, &polars());
        assert!(!boat.sails_out);
        assert!(!boat.speed_from_polar);

        advance(&mut boat);
        assert_approx_eq!(boat.speed, 0.7);
        advance(&mut boat);
        advance(&mut boat);
        assert_eq!(boat.speed, 0.0);
        advance(&mut boat);
        assert!(boat.manoeuvres.speed.is_none());
        assert!(!boat.speed_from_polar);
    }

    #[test]
    fn test_sails_out_accelerates_then_follows_polar() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(90.0);
        boat.sails_out = false;
        apply(&mut boat, CommandKind::Action(BoatAction::ToggleSails), wind, &polars());
        assert!(boat.sails_out);

        for _ in 0..40 {
            advance(&mut boat);
        }
        assert_approx_eq!(boat.speed, 20.0);
        advance(&mut boat);
        assert!(boat.speed_from_polar);
        assert!(boat.manoeuvres.speed.is_none());
    }

    #[test]
    fn test_sails_hold_while_colliding() {
        let wind = Wind::new(0.0, 12.0);
        let mut boat = boat(90.0);
        boat.colliding = true;
        apply(&mut boat, CommandKind::Action(BoatAction::SailsOut), wind, &polars());
        advance(&mut boat);
        assert_eq!(boat.speed, 0.0);
    }

    #[test]
    fn test_collision_recoil() {
        let mut boat = boat(0.0);
        let origin = boat.position;
        boat.colliding = true;
        apply(&mut boat, CommandKind::Collision, Wind::new(0.0, 12.0), &polars());

        for _ in 0..19 {
            advance(&mut boat);
        }
        assert_approx_eq!(origin.distance_to(&boat.position), 57.0, 1e-6);
        assert_approx_eq!(origin.bearing_to(&boat.position).degrees(), 180.0, 1e-3);
        assert!(boat.colliding);

        let mut ticks = 0;
        while boat.manoeuvres.recoil.is_some() {
            advance(&mut boat);
            ticks += 1;
            assert!(ticks < 5);
        }
        assert!(origin.distance_to(&boat.position) >= 60.0 - 1e-6);
        assert!(!boat.colliding);
        assert!(boat.speed_from_polar);
        assert!(boat.manoeuvres.recoil.is_none());
    }

    #[test]
    fn test_zoom_is_ignored() {
        let mut boat = boat(90.0);
        apply(&mut boat, CommandKind::Action(BoatAction::ZoomIn), Wind::new(0.0, 12.0), &polars());
        assert_eq!(boat.manoeuvres, Manoeuvres::default());
        assert_approx_eq!(boat.heading.degrees(), 90.0);
    }
}
