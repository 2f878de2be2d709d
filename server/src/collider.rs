//! Collision probe against the marks and boats on the course.

use crate::boat::Boat;
use crate::course::Mark;
use shared::{Bearing, GpsCoordinate};

/// Distance within which a boat touches a collider, in metres
pub const PROBE_RADIUS_METERS: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderKind {
    Mark,
    Boat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collider {
    pub source_id: u32,
    pub kind: ColliderKind,
    pub position: GpsCoordinate,
}

/// What a probing boat hit
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Collision {
    pub source_id: u32,
    pub kind: ColliderKind,
    pub distance: f64,
}

#[derive(Debug, Default)]
pub struct ColliderRegistry {
    colliders: Vec<Collider>,
}

impl ColliderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_mark(&mut self, mark: &Mark) {
        self.colliders.push(Collider {
            source_id: mark.source_id,
            kind: ColliderKind::Mark,
            position: mark.position,
        });
    }

    pub fn add_boat(&mut self, boat: &Boat) {
        self.colliders.push(Collider {
            source_id: boat.source_id,
            kind: ColliderKind::Boat,
            position: boat.position,
        });
    }

    /// Finds the first collider within the probe radius of a boat.
    ///
    /// Marks count from any direction. Another boat only counts when it lies
    /// ahead of `heading`; a boat struck from behind is left to the boat behind.
    pub fn ray_cast(
        &self,
        source_id: u32,
        position: &GpsCoordinate,
        heading: Bearing,
    ) -> Option<Collision> {
        self.colliders
            .iter()
            .filter(|c| !(c.kind == ColliderKind::Boat && c.source_id == source_id))
            .find_map(|collider| {
                let distance = position.distance_to(&collider.position);
                if distance > PROBE_RADIUS_METERS {
                    return None;
                }
                if collider.kind == ColliderKind::Boat {
                    let relative = position
                        .bearing_to(&collider.position)
                        .relative_to(heading)
                        .abs();
                    if relative >= 90.0 {
                        return None;
                    }
                }
                Some(Collision {
                    source_id: collider.source_id,
                    kind: collider.kind,
                    distance,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boat::tests::definition;

    fn origin() -> GpsCoordinate {
        GpsCoordinate::new(32.0, -64.0)
    }

    #[test]
    fn test_mark_within_radius() {
        let mut registry = ColliderRegistry::new();
        registry.add_mark(&Mark {
            source_id: 122,
            name: "PRO".to_string(),
            position: origin().destination(10.0, Bearing::from_degrees(200.0)),
        });

        let hit = registry
            .ray_cast(101, &origin(), Bearing::from_degrees(0.0))
            .unwrap();
        assert_eq!(hit.source_id, 122);
        assert_eq!(hit.kind, ColliderKind::Mark);

        let far = origin().destination(20.0, Bearing::from_degrees(0.0));
        assert!(registry.ray_cast(101, &far, Bearing::from_degrees(0.0)).is_none());
    }

    #[test]
    fn test_boat_ahead_collides() {
        let mut registry = ColliderRegistry::new();
        let ahead = Boat::new(
            &definition(102),
            origin().destination(12.0, Bearing::from_degrees(30.0)),
            0,
        );
        registry.add_boat(&ahead);

        let hit = registry.ray_cast(101, &origin(), Bearing::from_degrees(0.0));
        assert_eq!(hit.map(|c| c.source_id), Some(102));
    }

    #[test]
    fn test_boat_behind_is_ignored() {
        let mut registry = ColliderRegistry::new();
        let behind = Boat::new(
            &definition(102),
            origin().destination(5.0, Bearing::from_degrees(180.0)),
            0,
        );
        registry.add_boat(&behind);

        assert!(registry
            .ray_cast(101, &origin(), Bearing::from_degrees(0.0))
            .is_none());
    }

    #[test]
    fn test_own_boat_is_ignored() {
        let mut registry = ColliderRegistry::new();
        let own = Boat::new(&definition(101), origin(), 0);
        registry.add_boat(&own);
        assert!(registry
            .ray_cast(101, &origin(), Bearing::from_degrees(0.0))
            .is_none());

        // the same boat is still an obstacle for everyone else
        let astern = origin().destination(5.0, Bearing::from_degrees(180.0));
        let hit = registry.ray_cast(102, &astern, Bearing::from_degrees(0.0));
        assert_eq!(hit.map(|c| c.source_id), Some(101));
    }
}
