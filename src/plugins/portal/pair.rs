use bevy::prelude::*;

use super::{
    entity::{Portal, PortalColor, PortalError, PortalVisuals},
    geometry::{portal_to_portal, ViewCamera},
};
use crate::plugins::physics::PhysicsWorld;

/// What [`PortalPair::place_portal`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    Created,
    Moved,
}

/// The two portals of the game, each of them possibly not placed yet.
#[derive(Debug, Default, Resource)]
pub struct PortalPair {
    portals: [Option<Portal>; 2],
}

impl PortalPair {
    pub fn get(&self, color: PortalColor) -> Option<&Portal> {
        self.portals[color.index()].as_ref()
    }

    /// Live portals, blue first.
    pub fn iter(&self) -> impl Iterator<Item = &Portal> {
        self.portals.iter().flatten()
    }

    pub fn is_linked(&self) -> bool {
        self.portals.iter().all(Option::is_some)
    }

    pub fn portal_for_sensor(&self, sensor: Entity) -> Option<&Portal> {
        self.iter().find(|portal| portal.visuals.sensor == sensor)
    }

    pub fn destination_of(&self, color: PortalColor) -> Result<&Portal, PortalError> {
        self.get(color)
            .and_then(|portal| portal.destination)
            .and_then(|destination| self.get(destination))
            .ok_or(PortalError::NoDestination(color))
    }

    /// Camera looking out of the destination of the `color` portal.
    pub fn destination_camera(
        &self,
        color: PortalColor,
        source: &ViewCamera,
    ) -> Result<ViewCamera, PortalError> {
        let destination = self.destination_of(color)?;
        let portal = self.get(color).ok_or(PortalError::NoDestination(color))?;
        Ok(portal.destination_camera(destination, source))
    }

    /// Transformation carrying anything going into the `color` portal out of its destination.
    pub fn teleport_transform(&self, color: PortalColor) -> Result<Transform, PortalError> {
        let destination = self.destination_of(color)?;
        let portal = self.get(color).ok_or(PortalError::NoDestination(color))?;
        Ok(portal_to_portal(&portal.transform, &destination.transform))
    }

    /// Create or move the `color` portal. `spawn_visuals` is only called when the portal did not
    /// exist yet.
    pub fn place_portal(
        &mut self,
        pose: Transform,
        host: Entity,
        color: PortalColor,
        spawn_visuals: impl FnOnce(PortalColor) -> PortalVisuals,
    ) -> PlacementOutcome {
        let slot = &mut self.portals[color.index()];
        let outcome = if let Some(portal) = slot {
            portal.transform = pose;
            portal.host_collider = host;
            PlacementOutcome::Moved
        } else {
            *slot = Some(Portal::new(color, pose, host, spawn_visuals(color)));
            PlacementOutcome::Created
        };
        if outcome == PlacementOutcome::Created && self.is_linked() {
            self.link();
        }
        outcome
    }

    fn link(&mut self) {
        for color in PortalColor::ALL {
            if let Some(portal) = &mut self.portals[color.index()] {
                portal.set_destination(color.other());
            }
        }
        info!("Portals linked");
    }

    /// Bring the scene up to date with the portals: `sync_visuals` refreshes the visual
    /// transforms, sensors are moved through the physics world.
    pub fn per_frame_sync(
        &self,
        physics: &mut impl PhysicsWorld,
        mut sync_visuals: impl FnMut(&Portal),
    ) {
        for portal in self.iter() {
            sync_visuals(portal);
            portal.update_sensor_pose(physics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::portal::{
        entity::tests::{facing, visuals},
        placement::tests::BoxWorld,
    };

    const WALL: Entity = Entity::from_raw(100);

    fn blue_pose() -> Transform {
        facing(Vec3::ZERO, Vec3::Z)
    }

    fn orange_pose() -> Transform {
        facing(Vec3::new(0., 0., 20.), Vec3::NEG_Z)
    }

    #[test]
    fn single_portal_has_no_destination() {
        let mut pair = PortalPair::default();
        let outcome = pair.place_portal(blue_pose(), WALL, PortalColor::Blue, |_| visuals(1));
        assert_eq!(outcome, PlacementOutcome::Created);
        assert!(!pair.is_linked());

        let blue = pair.get(PortalColor::Blue).expect("blue portal");
        assert_eq!(blue.destination, None);
        assert!(blue.overlay_visible);
        assert_eq!(
            pair.destination_of(PortalColor::Blue),
            Err(PortalError::NoDestination(PortalColor::Blue))
        );
        let camera = ViewCamera::perspective(Transform::IDENTITY, 1., 1., 0.1);
        assert_eq!(
            pair.destination_camera(PortalColor::Blue, &camera),
            Err(PortalError::NoDestination(PortalColor::Blue))
        );
    }

    #[test]
    fn second_color_links_both_portals() {
        let mut pair = PortalPair::default();
        pair.place_portal(blue_pose(), WALL, PortalColor::Blue, |_| visuals(1));
        pair.place_portal(orange_pose(), WALL, PortalColor::Orange, |_| visuals(2));

        assert!(pair.is_linked());
        for color in PortalColor::ALL {
            let portal = pair.get(color).expect("portal");
            assert_eq!(portal.destination, Some(color.other()));
            assert!(!portal.overlay_visible);
        }
        assert_eq!(
            pair.destination_of(PortalColor::Blue).map(|p| p.color),
            Ok(PortalColor::Orange)
        );
    }

    #[test]
    fn reshooting_moves_without_respawning() {
        let mut pair = PortalPair::default();
        pair.place_portal(blue_pose(), WALL, PortalColor::Blue, |_| visuals(1));
        pair.place_portal(orange_pose(), WALL, PortalColor::Orange, |_| visuals(2));

        let other_wall = Entity::from_raw(101);
        let moved = facing(Vec3::new(5., 0., 0.), Vec3::X);
        let outcome = pair.place_portal(moved, other_wall, PortalColor::Blue, |_| {
            panic!("visuals must not be spawned twice")
        });

        assert_eq!(outcome, PlacementOutcome::Moved);
        let blue = pair.get(PortalColor::Blue).expect("blue portal");
        assert_eq!(blue.transform, moved);
        assert_eq!(blue.host_collider, other_wall);
        assert_eq!(blue.visuals, visuals(1));
        assert_eq!(blue.destination, Some(PortalColor::Orange));
    }

    #[test]
    fn sync_refreshes_every_live_portal() {
        let mut pair = PortalPair::default();
        pair.place_portal(blue_pose(), WALL, PortalColor::Blue, |_| visuals(1));
        let mut world = BoxWorld::default();

        let mut synced = Vec::new();
        pair.per_frame_sync(&mut world, |portal| synced.push(portal.color));
        assert_eq!(synced, vec![PortalColor::Blue]);

        pair.place_portal(orange_pose(), WALL, PortalColor::Orange, |_| visuals(2));
        synced.clear();
        pair.per_frame_sync(&mut world, |portal| synced.push(portal.color));
        assert_eq!(synced, PortalColor::ALL.to_vec());
    }

    #[test]
    fn sensors_resolve_to_their_portal() {
        let mut pair = PortalPair::default();
        pair.place_portal(blue_pose(), WALL, PortalColor::Blue, |_| visuals(1));
        pair.place_portal(orange_pose(), WALL, PortalColor::Orange, |_| visuals(2));
        let orange_sensor = visuals(2).sensor;
        assert_eq!(
            pair.portal_for_sensor(orange_sensor).map(|p| p.color),
            Some(PortalColor::Orange)
        );
        assert!(pair.portal_for_sensor(WALL).is_none());
    }
}
