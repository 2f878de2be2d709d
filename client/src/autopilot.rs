//! A simple helmsman that sails the boat without a human at the controls

use shared::{BoatAction, RaceStatus};
use std::time::{Duration, Instant};

/// Sets the sails at the gun and then keeps asking for the best VMG heading
pub struct Autopilot {
    vmg_period: Duration,
    sails_set: bool,
    last_vmg: Option<Instant>,
}

impl Autopilot {
    pub fn new(vmg_period: Duration) -> Self {
        Self {
            vmg_period,
            sails_set: false,
            last_vmg: None,
        }
    }

    /// Actions to send at `now`; nothing until the race has started
    pub fn next_actions(&mut self, status: Option<RaceStatus>, now: Instant) -> Vec<BoatAction> {
        if status != Some(RaceStatus::Started) {
            return Vec::new();
        }

        let mut actions = Vec::new();
        if !self.sails_set {
            self.sails_set = true;
            actions.push(BoatAction::SailsOut);
        }

        let due = self
            .last_vmg
            .map_or(true, |last| now.duration_since(last) >= self.vmg_period);
        if due {
            self.last_vmg = Some(now);
            actions.push(BoatAction::Vmg);
        }
        actions
    }
}
