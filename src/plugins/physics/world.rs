//! Narrow view of the physics world used by the portal systems, and its implementation on top of
//! the rapier context.

use bevy::{ecs::system::SystemParam, prelude::*};
use bevy_rapier3d::prelude::*;

use super::{ALL_GROUPS, PLAYER_GROUP, TRAVELERS_GROUP};

/// Result of a ray cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    pub entity: Entity,
    pub toi: f32,
    pub point: Vec3,
    pub normal: Vec3,
}

/// Which colliders a ray cast considers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RayFilter {
    /// Only this collider is considered.
    pub only: Option<Entity>,
    /// This collider is ignored.
    pub exclude: Option<Entity>,
    pub include_sensors: bool,
}

impl RayFilter {
    /// Every solid collider in the scene.
    pub fn scene() -> Self {
        RayFilter::default()
    }

    pub fn only(entity: Entity) -> Self {
        RayFilter {
            only: Some(entity),
            ..default()
        }
    }

    pub fn excluding(self, entity: Option<Entity>) -> Self {
        RayFilter {
            exclude: entity,
            ..self
        }
    }

    pub fn with_sensors(self) -> Self {
        RayFilter {
            include_sensors: true,
            ..self
        }
    }

    /// Whether the filter lets `entity` through, sensors aside.
    pub fn accepts(&self, entity: Entity) -> bool {
        self.only.map_or(true, |only| only == entity) && self.exclude != Some(entity)
    }
}

/// Outcome of a movement correction.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveOutcome {
    /// Movement that can actually be performed without going through obstacles.
    pub translation: Vec3,
    pub grounded: bool,
}

pub trait PhysicsWorld {
    /// First hit along the ray, up to `max_toi` times its direction.
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_toi: f32, filter: RayFilter)
        -> Option<RayHit>;

    /// Every hit along the ray, nearest first.
    fn cast_ray_all(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_toi: f32,
        filter: RayFilter,
    ) -> Vec<RayHit>;

    /// Turn collision response with a collider on or off.
    fn set_collider_enabled(&mut self, collider: Entity, enabled: bool);

    /// Move a sensor volume, and let it detect travelers or not.
    fn place_sensor(&mut self, sensor: Entity, pose: Transform, enabled: bool);

    /// Slide `body` placed at `pose` by `desired`, ignoring sensors and disabled colliders.
    fn correct_movement(&mut self, body: Entity, pose: &Transform, desired: Vec3) -> MoveOutcome;
}

#[derive(SystemParam)]
pub struct RapierWorld<'w, 's> {
    context: ResMut<'w, RapierContext>,
    groups: Query<'w, 's, &'static mut CollisionGroups>,
    sensors: Query<'w, 's, &'static mut Transform, With<Sensor>>,
    colliders: Query<'w, 's, &'static Collider>,
}

impl<'w, 's> RapierWorld<'w, 's> {
    fn with_query_filter<R>(&self, filter: RayFilter, f: impl FnOnce(QueryFilter) -> R) -> R {
        let accepts = |entity| filter.accepts(entity);
        let mut query_filter = QueryFilter::new().predicate(&accepts);
        if !filter.include_sensors {
            query_filter = query_filter.exclude_sensors();
        }
        f(query_filter)
    }
}

impl<'w, 's> PhysicsWorld for RapierWorld<'w, 's> {
    fn cast_ray(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_toi: f32,
        filter: RayFilter,
    ) -> Option<RayHit> {
        self.with_query_filter(filter, |query_filter| {
            self.context
                .cast_ray_and_get_normal(origin, direction, max_toi, true, query_filter)
                .map(|(entity, intersection)| RayHit {
                    entity,
                    toi: intersection.toi,
                    point: intersection.point,
                    normal: intersection.normal,
                })
        })
    }

    fn cast_ray_all(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_toi: f32,
        filter: RayFilter,
    ) -> Vec<RayHit> {
        let mut hits = Vec::new();
        self.with_query_filter(filter, |query_filter| {
            self.context.intersections_with_ray(
                origin,
                direction,
                max_toi,
                true,
                query_filter,
                |entity, intersection| {
                    hits.push(RayHit {
                        entity,
                        toi: intersection.toi,
                        point: intersection.point,
                        normal: intersection.normal,
                    });
                    true
                },
            );
        });
        hits.sort_by(|a, b| a.toi.total_cmp(&b.toi));
        hits
    }

    fn set_collider_enabled(&mut self, collider: Entity, enabled: bool) {
        match self.groups.get_mut(collider) {
            Ok(mut groups) => {
                groups.filters = if enabled { ALL_GROUPS } else { Group::NONE };
            }
            Err(_) => warn!("Collider {collider:?} has no collision groups, cannot toggle it"),
        }
    }

    fn place_sensor(&mut self, sensor: Entity, pose: Transform, enabled: bool) {
        // Only write on change, rapier re-syncs every collider whose transform changed.
        if let Ok(mut transform) = self.sensors.get_mut(sensor) {
            if *transform != pose {
                *transform = pose;
            }
        }
        if let Ok(mut groups) = self.groups.get_mut(sensor) {
            let filters = if enabled { TRAVELERS_GROUP } else { Group::NONE };
            if groups.filters != filters {
                groups.filters = filters;
            }
        }
    }

    fn correct_movement(&mut self, body: Entity, pose: &Transform, desired: Vec3) -> MoveOutcome {
        let Ok(collider) = self.colliders.get(body) else {
            return MoveOutcome {
                translation: desired,
                grounded: false,
            };
        };
        // The body has to stay out of its own way.
        let not_self = |entity| entity != body;
        let filter = QueryFilter::new()
            .exclude_sensors()
            .groups(CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS).into())
            .predicate(&not_self);
        let output = self.context.move_shape(
            desired,
            collider,
            pose.translation,
            pose.rotation,
            0.,
            &MoveShapeOptions::default(),
            filter,
            |_| {},
        );
        MoveOutcome {
            translation: output.effective_translation,
            grounded: output.grounded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_keeps_only_requested_collider() {
        let host = Entity::from_raw(1);
        let other = Entity::from_raw(2);
        let filter = RayFilter::only(host);
        assert!(filter.accepts(host));
        assert!(!filter.accepts(other));
    }

    #[test]
    fn filter_drops_excluded_collider() {
        let shooter = Entity::from_raw(7);
        let filter = RayFilter::scene().excluding(Some(shooter));
        assert!(!filter.accepts(shooter));
        assert!(filter.accepts(Entity::from_raw(8)));
        assert!(!filter.include_sensors);
        assert!(filter.with_sensors().include_sensors);
    }
}
