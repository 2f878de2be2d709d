//! Turns the race state into the messages broadcast after every tick.

use crate::config::BoatDefinition;
use crate::course::RoundingSide;
use crate::race::{CollisionEvent, Race};
use chrono::{FixedOffset, TimeZone};
use log::{error, trace};
use serde::Serialize;
use shared::protocol::RACE_STATUS_VERSION;
use shared::{
    BoatLocation, BoatStatusEntry, DeviceKind, Document, DocumentKind, Message, RaceStatusMessage,
    YachtEvent, YachtEventCode,
};
use std::sync::Arc;

/// Every message describing the race at one tick.
///
/// Documents are shared by every snapshot of the same revision; connections
/// forward them only when `revision` differs from the last one they sent.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub messages: Vec<Message>,
    pub documents: Arc<Vec<Document>>,
    pub revision: u32,
}

#[derive(Serialize)]
struct MarkDocument<'a> {
    source_id: u32,
    name: &'a str,
    latitude: f64,
    longitude: f64,
}

#[derive(Serialize)]
struct CompoundMarkDocument<'a> {
    id: u32,
    name: &'a str,
    rounding: RoundingSide,
    marks: Vec<MarkDocument<'a>>,
}

#[derive(Serialize)]
struct RaceDocument<'a> {
    race_id: u32,
    race_type: &'static str,
    start_time: Option<String>,
    participants: Vec<u32>,
    compound_marks: Vec<CompoundMarkDocument<'a>>,
    legs: Vec<&'a str>,
    boundary: Vec<[f64; 2]>,
}

/// Keeps the sequence counters and the rendered documents between ticks
#[derive(Debug, Default)]
pub struct SnapshotEncoder {
    location_sequence: u32,
    event_sequence: u32,
    documents: Arc<Vec<Document>>,
    documents_revision: Option<u32>,
}

impl SnapshotEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, race: &Race, collisions: &[CollisionEvent]) -> Snapshot {
        if self.documents_revision != Some(race.revision()) {
            self.documents = Arc::new(render_documents(race));
            self.documents_revision = Some(race.revision());
        }

        let now = race.clock().current_time();
        let mut messages = Vec::with_capacity(race.boats().len() * 2 + race.course().marks().len() + 1);

        for boat in race.boats() {
            messages.push(Message::BoatLocation(BoatLocation {
                source_id: boat.source_id,
                sequence: self.next_location_sequence(),
                device: DeviceKind::RacingYacht,
                latitude: boat.position.latitude,
                longitude: boat.position.longitude,
                heading: boat.heading.degrees(),
                speed_knots: boat.speed,
                timestamp: now,
            }));
            messages.push(Message::BoatState {
                source_id: boat.source_id,
                health: boat.health.round().clamp(0.0, 100.0) as u8,
            });
        }

        for mark in race.course().marks() {
            messages.push(Message::BoatLocation(BoatLocation {
                source_id: mark.source_id,
                sequence: self.next_location_sequence(),
                device: DeviceKind::Mark,
                latitude: mark.position.latitude,
                longitude: mark.position.longitude,
                heading: 0.0,
                speed_knots: 0.0,
                timestamp: now,
            }));
        }

        let wind = race.wind();
        messages.push(Message::RaceStatus(RaceStatusMessage {
            version: RACE_STATUS_VERSION,
            timestamp: now,
            race_id: race.race_id(),
            status: race.status(),
            start_time: race.clock().start_time(),
            wind_direction: wind.direction.degrees(),
            wind_speed_knots: wind.speed,
            race_type: race.race_type(),
            boats: race
                .boats()
                .iter()
                .map(|boat| BoatStatusEntry {
                    source_id: boat.source_id,
                    status: boat.status,
                    leg_number: boat.leg as u32,
                    estimated_time_at_next_mark: boat.estimated_time_at_next_mark,
                })
                .collect(),
        }));

        for event in collisions {
            self.event_sequence = self.event_sequence.wrapping_add(1);
            trace!(
                "Collision event {} for boat {}",
                self.event_sequence,
                event.source_id
            );
            messages.push(Message::YachtEvent(YachtEvent {
                timestamp: now,
                sequence: self.event_sequence,
                race_id: race.race_id(),
                source_id: event.source_id,
                event: YachtEventCode::Collision,
            }));
        }

        Snapshot {
            messages,
            documents: Arc::clone(&self.documents),
            revision: race.revision(),
        }
    }

    fn next_location_sequence(&mut self) -> u32 {
        self.location_sequence = self.location_sequence.wrapping_add(1);
        self.location_sequence
    }
}

fn format_start_time(start_ms: i64, utc_offset_hours: i32) -> Option<String> {
    let offset = FixedOffset::east_opt(utc_offset_hours * 3600)?;
    let time = offset.timestamp_millis_opt(start_ms).single()?;
    Some(time.to_rfc3339())
}

/// Renders the race, boats and regatta documents; a document that fails to
/// render is logged and left out
fn render_documents(race: &Race) -> Vec<Document> {
    let course = race.course();
    let race_document = RaceDocument {
        race_id: race.race_id(),
        race_type: match race.race_type() {
            shared::RaceType::MatchRace => "match",
            shared::RaceType::FleetRace => "fleet",
        },
        start_time: format_start_time(race.clock().start_time(), race.regatta().utc_offset),
        participants: race.participant_ids(),
        compound_marks: course
            .sequence()
            .iter()
            .map(|compound| CompoundMarkDocument {
                id: compound.id,
                name: &compound.name,
                rounding: compound.rounding,
                marks: compound
                    .marks()
                    .map(|m| MarkDocument {
                        source_id: m.source_id,
                        name: &m.name,
                        latitude: m.position.latitude,
                        longitude: m.position.longitude,
                    })
                    .collect(),
            })
            .collect(),
        legs: (0..course.leg_count()).map(move |i| course.leg_name(i)).collect(),
        boundary: course
            .boundary()
            .iter()
            .map(|p| [p.latitude, p.longitude])
            .collect(),
    };

    let participants: Vec<&BoatDefinition> = race
        .roster()
        .iter()
        .filter(|d| race.boat(d.source_id).is_some())
        .collect();

    let rendered = [
        (DocumentKind::Race, serde_json::to_string(&race_document)),
        (DocumentKind::Boats, serde_json::to_string(&participants)),
        (DocumentKind::Regatta, serde_json::to_string(race.regatta())),
    ];

    rendered
        .into_iter()
        .filter_map(|(kind, body)| match body {
            Ok(body) => Some(Document {
                kind,
                sequence: race.revision(),
                body,
            }),
            Err(e) => {
                error!("Failed to render {:?} document: {}", kind, e);
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collider::{ColliderKind, Collision};
    use crate::course::tests::simple_course;
    use crate::race::tests::race_with;
    use shared::{BoatStatus, RaceStatus};

    const NOW: i64 = 1_700_000_000_000;

    fn locations(snapshot: &Snapshot) -> Vec<&BoatLocation> {
        snapshot
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::BoatLocation(location) => Some(location),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_snapshot_contents() {
        let mut race = race_with(simple_course(), NOW + 600_000);
        race.add_boat(101).unwrap();
        race.add_boat(102).unwrap();
        race.update_status();

        let mut encoder = SnapshotEncoder::new();
        let snapshot = encoder.encode(&race, &[]);

        let locations = locations(&snapshot);
        // two boats and five marks
        assert_eq!(locations.len(), 7);
        assert_eq!(locations[0].device, DeviceKind::RacingYacht);
        assert_eq!(locations[2].device, DeviceKind::Mark);
        let sequences: Vec<u32> = locations.iter().map(|l| l.sequence).collect();
        assert_eq!(sequences, (1..=7).collect::<Vec<u32>>());

        let states = snapshot
            .messages
            .iter()
            .filter(|m| matches!(m, Message::BoatState { health: 100, .. }))
            .count();
        assert_eq!(states, 2);

        let status = snapshot
            .messages
            .iter()
            .find_map(|m| match m {
                Message::RaceStatus(status) => Some(status),
                _ => None,
            })
            .unwrap();
        assert_eq!(status.version, 2);
        assert_eq!(status.race_id, 42);
        assert_eq!(status.status, RaceStatus::Prestart);
        assert_eq!(status.start_time, NOW + 600_000);
        assert_eq!(status.boats.len(), 2);
        assert_eq!(status.boats[0].status, BoatStatus::Prestart);
    }

    #[test]
    fn test_location_sequence_continues_across_ticks() {
        let mut race = race_with(simple_course(), NOW + 600_000);
        race.add_boat(101).unwrap();
        let mut encoder = SnapshotEncoder::new();

        encoder.encode(&race, &[]);
        let second = encoder.encode(&race, &[]);
        assert_eq!(locations(&second)[0].sequence, 7);
    }

    #[test]
    fn test_documents_follow_revision() {
        let mut race = race_with(simple_course(), NOW + 600_000);
        race.add_boat(101).unwrap();
        let mut encoder = SnapshotEncoder::new();

        let first = encoder.encode(&race, &[]);
        assert_eq!(first.revision, 1);
        assert_eq!(first.documents.len(), 3);
        assert!(first.documents.iter().all(|d| d.sequence == 1));

        let boats = first
            .documents
            .iter()
            .find(|d| d.kind == DocumentKind::Boats)
            .unwrap();
        let parsed: Vec<BoatDefinition> = serde_json::from_str(&boats.body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].source_id, 101);

        // same revision: the rendered documents are shared, not rendered again
        let repeat = encoder.encode(&race, &[]);
        assert!(Arc::ptr_eq(&first.documents, &repeat.documents));

        race.add_boat(102).unwrap();
        let second = encoder.encode(&race, &[]);
        assert_eq!(second.revision, 2);
        assert!(!Arc::ptr_eq(&first.documents, &second.documents));
        let race_doc = second
            .documents
            .iter()
            .find(|d| d.kind == DocumentKind::Race)
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&race_doc.body).unwrap();
        assert_eq!(value["participants"], serde_json::json!([101, 102]));
        assert_eq!(value["race_type"], "fleet");
        assert!(value["start_time"].as_str().unwrap().starts_with("2023-11-14T"));
    }

    #[test]
    fn test_collision_events_are_sequenced() {
        let mut race = race_with(simple_course(), NOW + 600_000);
        race.add_boat(101).unwrap();
        let mut encoder = SnapshotEncoder::new();
        let event = CollisionEvent {
            source_id: 101,
            collision: Collision {
                source_id: 3,
                kind: ColliderKind::Mark,
                distance: 4.0,
            },
        };

        encoder.encode(&race, &[event]);
        let snapshot = encoder.encode(&race, &[event, event]);
        let sequences: Vec<u32> = snapshot
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::YachtEvent(e) => Some(e.sequence),
                _ => None,
            })
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[test]
    fn test_start_time_uses_regatta_offset() {
        let formatted = format_start_time(0, -3).unwrap();
        assert_eq!(formatted, "1969-12-31T21:00:00-03:00");
    }
}
