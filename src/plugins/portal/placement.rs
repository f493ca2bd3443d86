//! Validation of portal shots: find where a portal lands and whether it fits there.

use bevy::prelude::*;

use super::entity::{PortalColor, PORTAL_HEIGHT, PORTAL_WIDTH};
use crate::plugins::physics::{PhysicsWorld, RayFilter, RayHit};

/// Distance between an accepted portal and its host surface.
pub const PLANE_OFFSET: f32 = 0.1;
/// Inset of the corner probes.
pub const CORNER_BIAS: f32 = 0.02;
/// Edge probes start this far inside the host.
const EDGE_PROBE_DEPTH: f32 = 0.05;
/// Corner probes start this far in front of the host...
const CORNER_PROBE_HEIGHT: f32 = 0.2;
/// ...and look this far behind it.
const CORNER_PROBE_REACH: f32 = 1.;
const MAX_SHOT_DISTANCE: f32 = 1000.;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimRay {
    pub origin: Vec3,
    pub direction: Vec3,
}

/// Request to shoot a portal, sent by the input systems.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlacementRequest {
    pub ray: AimRay,
    pub color: PortalColor,
    /// Collider of whoever shoots, ignored by the aim ray.
    pub shooter: Option<Entity>,
}

/// What a collider is, as far as portal placement is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Surface {
    PortalHost,
    Portal(PortalColor),
    Other,
}

pub trait SurfaceLookup {
    fn surface(&self, entity: Entity) -> Surface;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NothingHit,
    NotAHost(Entity),
    /// The corner with this index does not rest on anything.
    CornerOffHost(usize),
    CornerOnBothPortals(usize),
    CornerOnOtherPortal(usize),
    /// The corner rests on something else than the host.
    CornerBlocked(usize),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    Accepted { pose: Transform, host: Entity },
    Rejected(Rejection),
}

pub fn validate_placement(
    world: &impl PhysicsWorld,
    surfaces: &impl SurfaceLookup,
    request: &PlacementRequest,
) -> Placement {
    let direction = request.ray.direction.normalize_or_zero();
    let Some(hit) = world.cast_ray(
        request.ray.origin,
        direction,
        MAX_SHOT_DISTANCE,
        RayFilter::scene().excluding(request.shooter),
    ) else {
        return Placement::Rejected(Rejection::NothingHit);
    };
    if surfaces.surface(hit.entity) != Surface::PortalHost {
        return Placement::Rejected(Rejection::NotAHost(hit.entity));
    }

    let mut pose = candidate_pose(&hit, direction);
    pose.translation -= overhang(world, hit.entity, &pose);

    if let Err(rejection) = check_corners(world, surfaces, hit.entity, &pose, request.color) {
        return Placement::Rejected(rejection);
    }

    pose.translation += pose.back() * PLANE_OFFSET;
    Placement::Accepted {
        pose,
        host: hit.entity,
    }
}

/// Portal pose at the impact point, facing into the surface. Portals stand upright on walls. On
/// floors and ceilings their top points where the shot was going.
fn candidate_pose(hit: &RayHit, aim: Vec3) -> Transform {
    let normal = hit.normal.normalize();
    let up = if normal.y.abs() > 0.99 {
        let along_surface = aim - normal * aim.dot(normal);
        if along_surface.length_squared() > 1e-6 {
            along_surface.normalize()
        } else {
            Vec3::Z
        }
    } else {
        Vec3::Y
    };
    Transform::from_translation(hit.point).looking_at(hit.point - normal, up)
}

/// Sum of the distances by which each edge of the portal hangs over the border of its host, as
/// a world space offset pointing outwards.
fn overhang(world: &impl PhysicsWorld, host: Entity, pose: &Transform) -> Vec3 {
    let edges = [
        (pose.right(), PORTAL_WIDTH / 2.),
        (pose.left(), PORTAL_WIDTH / 2.),
        (pose.up(), PORTAL_HEIGHT / 2.),
        (pose.down(), PORTAL_HEIGHT / 2.),
    ];
    edges
        .into_iter()
        .filter_map(|(axis, half_extent)| {
            let probe = pose.translation + axis * half_extent + pose.forward() * EDGE_PROBE_DEPTH;
            // A probe still inside the host hits at distance zero.
            world
                .cast_ray(probe, -axis, half_extent, RayFilter::only(host))
                .map(|hit| axis * hit.toi)
        })
        .sum()
}

fn check_corners(
    world: &impl PhysicsWorld,
    surfaces: &impl SurfaceLookup,
    host: Entity,
    pose: &Transform,
    color: PortalColor,
) -> Result<(), Rejection> {
    let (half_width, half_height) = (
        PORTAL_WIDTH / 2. - CORNER_BIAS,
        PORTAL_HEIGHT / 2. - CORNER_BIAS,
    );
    let corners = [
        Vec3::new(-half_width, -half_height, 0.),
        Vec3::new(half_width, -half_height, 0.),
        Vec3::new(half_width, half_height, 0.),
        Vec3::new(-half_width, half_height, 0.),
    ];

    for (index, corner) in corners.into_iter().enumerate() {
        let probe = *pose * corner + pose.back() * CORNER_PROBE_HEIGHT;
        let hits = world.cast_ray_all(
            probe,
            pose.forward(),
            CORNER_PROBE_HEIGHT + CORNER_PROBE_REACH,
            RayFilter::scene().with_sensors(),
        );
        let on_portal =
            |wanted| hits.iter().any(|hit| surfaces.surface(hit.entity) == Surface::Portal(wanted));
        let (on_same, on_other) = (on_portal(color), on_portal(color.other()));

        match hits.first() {
            None => return Err(Rejection::CornerOffHost(index)),
            Some(_) if on_same && on_other => return Err(Rejection::CornerOnBothPortals(index)),
            // Overlapping the portal being moved is fine.
            Some(_) if on_same => {}
            Some(_) if on_other => return Err(Rejection::CornerOnOtherPortal(index)),
            Some(nearest) if nearest.entity != host => {
                return Err(Rejection::CornerBlocked(index))
            }
            Some(_) => {}
        }
    }
    Ok(())
}
