//! The client's picture of the race, rebuilt from server messages.

use log::{debug, info};
use shared::{
    BoatLocation, BoatStatus, DeviceKind, Document, DocumentKind, Message, RaceStatus,
    RaceStatusMessage, YachtEventCode,
};
use std::collections::HashMap;

/// What the client knows about one boat
#[derive(Debug, Clone, Default)]
pub struct BoatView {
    pub location: Option<BoatLocation>,
    pub health: Option<u8>,
    pub status: Option<BoatStatus>,
    pub leg_number: u32,
    pub estimated_time_at_next_mark: i64,
    pub collisions: u32,
}

#[derive(Debug, Default)]
pub struct RaceView {
    pub race: Option<RaceStatusMessage>,
    pub boats: HashMap<u32, BoatView>,
    pub marks: HashMap<u32, BoatLocation>,
    pub documents: HashMap<DocumentKind, Document>,
    pub last_heartbeat: Option<u32>,
}

impl RaceView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> Option<RaceStatus> {
        self.race.as_ref().map(|r| r.status)
    }

    pub fn boat(&self, source_id: u32) -> Option<&BoatView> {
        self.boats.get(&source_id)
    }

    /// Folds one server message into the view.
    ///
    /// Returns the new race status when this message changed it.
    pub fn apply(&mut self, message: Message) -> Option<RaceStatus> {
        match message {
            Message::Heartbeat { sequence } => {
                self.last_heartbeat = Some(sequence);
            }
            Message::BoatLocation(location) => match location.device {
                DeviceKind::RacingYacht => {
                    let source_id = location.source_id;
                    self.boats.entry(source_id).or_default().location = Some(location);
                }
                DeviceKind::Mark => {
                    self.marks.insert(location.source_id, location);
                }
            },
            Message::BoatState { source_id, health } => {
                self.boats.entry(source_id).or_default().health = Some(health);
            }
            Message::RaceStatus(race) => {
                for entry in &race.boats {
                    let boat = self.boats.entry(entry.source_id).or_default();
                    boat.status = Some(entry.status);
                    boat.leg_number = entry.leg_number;
                    boat.estimated_time_at_next_mark = entry.estimated_time_at_next_mark;
                }
                let previous = self.status();
                let status = race.status;
                self.race = Some(race);
                if previous != Some(status) {
                    return Some(status);
                }
            }
            Message::YachtEvent(event) => {
                if event.event == YachtEventCode::Collision {
                    self.boats.entry(event.source_id).or_default().collisions += 1;
                    info!("Boat {} collided", event.source_id);
                }
            }
            Message::Document(document) => {
                debug!(
                    "Received {:?} document revision {}",
                    document.kind, document.sequence
                );
                self.documents.insert(document.kind, document);
            }
            other => debug!("Ignoring {} from the server", other.name()),
        }
        None
    }

    /// Boats ordered by progress: furthest leg first, then earliest arrival at the next mark
    pub fn standings(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.boats.keys().copied().collect();
        ids.sort_by(|a, b| {
            let (a_boat, b_boat) = (&self.boats[a], &self.boats[b]);
            b_boat
                .leg_number
                .cmp(&a_boat.leg_number)
                .then(
                    a_boat
                        .estimated_time_at_next_mark
                        .cmp(&b_boat.estimated_time_at_next_mark),
                )
                .then(a.cmp(b))
        });
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{BoatStatusEntry, RaceType, YachtEvent};

    fn status(status: RaceStatus, boats: Vec<BoatStatusEntry>) -> Message {
        Message::RaceStatus(RaceStatusMessage {
            version: 2,
            timestamp: 1_000,
            race_id: 7,
            status,
            start_time: 2_000,
            wind_direction: 300.0,
            wind_speed_knots: 12.0,
            race_type: RaceType::FleetRace,
            boats,
        })
    }

    fn entry(source_id: u32, leg_number: u32, eta: i64) -> BoatStatusEntry {
        BoatStatusEntry {
            source_id,
            status: BoatStatus::Racing,
            leg_number,
            estimated_time_at_next_mark: eta,
        }
    }

    fn location(source_id: u32, device: DeviceKind) -> Message {
        Message::BoatLocation(BoatLocation {
            source_id,
            sequence: 1,
            device,
            latitude: 32.0,
            longitude: -64.0,
            heading: 90.0,
            speed_knots: 11.0,
            timestamp: 1_000,
        })
    }

    #[test]
    fn test_status_change_is_reported_once() {
        let mut view = RaceView::new();
        assert_eq!(view.apply(status(RaceStatus::Warning, vec![])), Some(RaceStatus::Warning));
        assert_eq!(view.apply(status(RaceStatus::Warning, vec![])), None);
        assert_eq!(view.apply(status(RaceStatus::Started, vec![])), Some(RaceStatus::Started));
        assert_eq!(view.status(), Some(RaceStatus::Started));
    }

    #[test]
    fn test_locations_split_boats_and_marks() {
        let mut view = RaceView::new();
        view.apply(location(101, DeviceKind::RacingYacht));
        view.apply(location(122, DeviceKind::Mark));
        view.apply(Message::BoatState {
            source_id: 101,
            health: 75,
        });

        let boat = view.boat(101).unwrap();
        assert_eq!(boat.health, Some(75));
        assert_eq!(boat.location.as_ref().unwrap().speed_knots, 11.0);
        assert!(view.marks.contains_key(&122));
        assert!(view.boat(122).is_none());
    }

    #[test]
    fn test_collisions_are_counted() {
        let mut view = RaceView::new();
        let event = Message::YachtEvent(YachtEvent {
            timestamp: 1_000,
            sequence: 1,
            race_id: 7,
            source_id: 102,
            event: YachtEventCode::Collision,
        });
        view.apply(event.clone());
        view.apply(event);
        assert_eq!(view.boat(102).unwrap().collisions, 2);
    }

    #[test]
    fn test_documents_keep_latest_revision() {
        let mut view = RaceView::new();
        for sequence in [1, 2] {
            view.apply(Message::Document(Document {
                kind: DocumentKind::Boats,
                sequence,
                body: "[]".to_string(),
            }));
        }
        view.apply(Message::Heartbeat { sequence: 4 });

        assert_eq!(view.documents[&DocumentKind::Boats].sequence, 2);
        assert_eq!(view.last_heartbeat, Some(4));
    }

    #[test]
    fn test_standings_order() {
        let mut view = RaceView::new();
        view.apply(status(
            RaceStatus::Started,
            vec![entry(101, 1, 9_000), entry(102, 2, 20_000), entry(103, 1, 5_000)],
        ));
        assert_eq!(view.standings(), vec![102, 103, 101]);
    }
}
