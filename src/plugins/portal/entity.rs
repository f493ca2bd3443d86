//! Portal entities, independent from how they are spawned in the scene.

use bevy::prelude::*;
use thiserror::Error;

use super::geometry::{plane_of, through_portal, ViewCamera};
use crate::plugins::physics::PhysicsWorld;

pub const PORTAL_WIDTH: f32 = 2.;
pub const PORTAL_HEIGHT: f32 = 3.;
/// Depth of the trigger volume in front of a portal.
pub const SENSOR_DEPTH: f32 = 1.;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalColor {
    Blue,
    Orange,
}

impl PortalColor {
    pub const ALL: [PortalColor; 2] = [PortalColor::Blue, PortalColor::Orange];

    pub fn index(self) -> usize {
        match self {
            PortalColor::Blue => 0,
            PortalColor::Orange => 1,
        }
    }

    pub fn other(self) -> PortalColor {
        match self {
            PortalColor::Blue => PortalColor::Orange,
            PortalColor::Orange => PortalColor::Blue,
        }
    }

    /// Overlay tint for an unlinked portal.
    pub fn tint(self) -> Color {
        match self {
            PortalColor::Blue => Color::rgb(0.1, 0.4, 1.),
            PortalColor::Orange => Color::rgb(1., 0.5, 0.05),
        }
    }
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PortalError {
    #[error("the {0:?} portal has no destination")]
    NoDestination(PortalColor),
}

/// Scene entities backing a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortalVisuals {
    /// Trigger volume detecting travelers.
    pub sensor: Entity,
    /// Solid colored mesh shown while unlinked.
    pub overlay: Entity,
    /// Mesh showing the view through the portal once linked.
    pub view: Entity,
    /// Same mesh, as seen by the portal cameras.
    pub nested_view: Entity,
    /// Render-to-texture camera feeding the view mesh.
    pub camera: Entity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portal {
    pub color: PortalColor,
    /// Faces into the host surface, see [`Portal::outward_normal`].
    pub transform: Transform,
    pub destination: Option<PortalColor>,
    pub host_collider: Entity,
    pub visuals: PortalVisuals,
    pub overlay_visible: bool,
}

impl Portal {
    pub fn new(
        color: PortalColor,
        transform: Transform,
        host_collider: Entity,
        visuals: PortalVisuals,
    ) -> Self {
        Portal {
            color,
            transform,
            destination: None,
            host_collider,
            visuals,
            overlay_visible: true,
        }
    }

    /// Link to `destination`. Once linked, the overlay gives way to the view through the portal.
    pub fn set_destination(&mut self, destination: PortalColor) {
        self.destination = Some(destination);
        self.overlay_visible = false;
    }

    /// Direction pointing away from the host surface.
    pub fn outward_normal(&self) -> Vec3 {
        self.transform.back()
    }

    pub fn corners(&self) -> [Vec3; 4] {
        let (half_width, half_height) = (PORTAL_WIDTH / 2., PORTAL_HEIGHT / 2.);
        [
            Vec3::new(-half_width, -half_height, 0.),
            Vec3::new(half_width, -half_height, 0.),
            Vec3::new(half_width, half_height, 0.),
            Vec3::new(-half_width, half_height, 0.),
        ]
        .map(|corner| self.transform * corner)
    }

    /// Whether a point, projected on the portal plane, falls inside the opening (with `margin`
    /// extra room on each side).
    pub fn frames(&self, point: Vec3, margin: f32) -> bool {
        let local = self.transform.compute_matrix().inverse().transform_point3(point);
        local.x.abs() <= PORTAL_WIDTH / 2. + margin && local.y.abs() <= PORTAL_HEIGHT / 2. + margin
    }

    /// Camera looking out of `destination` the same way `source` looks into this portal, clipped
    /// by the destination plane.
    pub fn destination_camera(&self, destination: &Portal, source: &ViewCamera) -> ViewCamera {
        let transform = through_portal(&self.transform, &destination.transform, &source.transform);
        source
            .moved_to(transform)
            .with_clip_plane(plane_of(&destination.transform))
    }

    pub fn is_visible_from_camera(&self, camera: &ViewCamera) -> bool {
        // Portals are one sided.
        let to_camera = camera.transform.translation - self.transform.translation;
        to_camera.dot(self.outward_normal()) > 0.
            && camera.frustum().intersects_polygon(&self.corners())
    }

    pub fn sensor_pose(&self) -> Transform {
        Transform {
            translation: self.transform.translation + self.outward_normal() * SENSOR_DEPTH / 2.,
            ..self.transform
        }
    }

    pub fn update_sensor_pose(&self, physics: &mut impl PhysicsWorld) {
        physics.place_sensor(
            self.visuals.sensor,
            self.sensor_pose(),
            self.destination.is_some(),
        );
    }
}
