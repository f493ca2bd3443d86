//! Teleportation of entities going through portals.
//!
//! A traveler touching the sensor of a linked portal starts crossing it: the wall hosting the
//! portal stops colliding so the traveler can get into the opening. Once its center goes past
//! the portal plane, it is moved out of the destination portal. The crossing ends when the
//! traveler leaves the sensor.

use std::collections::HashMap;

use bevy::prelude::*;

use super::{
    entity::{PortalColor, PortalError},
    geometry::{normalized, signed_distance},
    pair::PortalPair,
};
use crate::plugins::physics::PhysicsWorld;

/// Distance from the portal plane below which a traveler is considered through.
pub const CROSSING_EPSILON: f32 = 0.01;
/// Room around the opening within which a traveler's center still counts as going through it.
pub const OPENING_MARGIN: f32 = 0.3;

/// Start or end of an overlap between two colliders, one of them possibly a portal sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorContact {
    pub a: Entity,
    pub b: Entity,
    pub started: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub portal: PortalColor,
    /// Host collider disabled for the duration of the crossing.
    pub host: Entity,
    pub teleported: bool,
    /// Portal entered on the other side, taking over once this crossing ends.
    pub pending: Option<PortalColor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleportState {
    Idle,
    Crossing(Crossing),
}

/// Where a traveler goes after passing through a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Relocation {
    pub entity: Entity,
    pub from: PortalColor,
    pub to: PortalColor,
    pub transform: Transform,
    /// Rotation from the source to the destination frame, for velocities and look directions.
    pub rotation: Quat,
}

#[derive(Debug, Default, Resource)]
pub struct Teleporter {
    crossings: HashMap<Entity, Crossing>,
    /// Number of crossings keeping each host collider disabled.
    disabled_hosts: HashMap<Entity, usize>,
}

impl Teleporter {
    pub fn state(&self, entity: Entity) -> TeleportState {
        self.crossings
            .get(&entity)
            .map_or(TeleportState::Idle, |crossing| TeleportState::Crossing(*crossing))
    }

    /// Entities currently crossing a portal.
    pub fn travelers(&self) -> impl Iterator<Item = Entity> + '_ {
        self.crossings.keys().copied()
    }

    pub fn on_contact(
        &mut self,
        contact: SensorContact,
        pair: &PortalPair,
        physics: &mut impl PhysicsWorld,
        is_traveler: impl Fn(Entity) -> bool,
    ) {
        let (portal, traveler) = match (
            pair.portal_for_sensor(contact.a),
            pair.portal_for_sensor(contact.b),
        ) {
            (Some(portal), None) => (portal, contact.b),
            (None, Some(portal)) => (portal, contact.a),
            _ => return,
        };
        if !is_traveler(traveler) {
            return;
        }

        if contact.started {
            self.enter(traveler, portal.color, portal.host_collider, physics);
        } else {
            self.exit(traveler, portal.color, pair, physics);
        }
    }

    fn enter(
        &mut self,
        traveler: Entity,
        color: PortalColor,
        host: Entity,
        physics: &mut impl PhysicsWorld,
    ) {
        match self.crossings.get_mut(&traveler) {
            None => self.begin(traveler, color, host, physics),
            Some(crossing) if crossing.portal == color => {
                debug!("{traveler:?} already crossing the {color:?} portal");
            }
            Some(crossing) if crossing.teleported => {
                debug!("{traveler:?} came out of the {color:?} portal");
                crossing.pending = Some(color);
            }
            Some(crossing) => {
                debug!(
                    "{traveler:?} touched the {color:?} portal while crossing the {:?} one",
                    crossing.portal
                );
            }
        }
    }

    fn begin(
        &mut self,
        traveler: Entity,
        color: PortalColor,
        host: Entity,
        physics: &mut impl PhysicsWorld,
    ) {
        info!("{traveler:?} entering the {color:?} portal");
        let count = self.disabled_hosts.entry(host).or_default();
        *count += 1;
        if *count == 1 {
            physics.set_collider_enabled(host, false);
        }
        self.crossings.insert(
            traveler,
            Crossing {
                portal: color,
                host,
                teleported: false,
                pending: None,
            },
        );
    }

    fn exit(
        &mut self,
        traveler: Entity,
        color: PortalColor,
        pair: &PortalPair,
        physics: &mut impl PhysicsWorld,
    ) {
        let Some(crossing) = self.crossings.get(&traveler).copied() else {
            return;
        };
        if crossing.portal != color {
            if crossing.pending == Some(color) {
                if let Some(crossing) = self.crossings.get_mut(&traveler) {
                    crossing.pending = None;
                }
            }
            return;
        }

        info!("{traveler:?} left the {color:?} portal");
        self.crossings.remove(&traveler);
        self.release_host(crossing.host, physics);
        if let Some(next) = crossing.pending.and_then(|next| pair.get(next)) {
            self.begin(traveler, next.color, next.host_collider, physics);
        }
    }

    fn release_host(&mut self, host: Entity, physics: &mut impl PhysicsWorld) {
        if let Some(count) = self.disabled_hosts.get_mut(&host) {
            *count -= 1;
            if *count == 0 {
                self.disabled_hosts.remove(&host);
                physics.set_collider_enabled(host, true);
            }
        }
    }

    /// Check whether `entity` made it through the portal it is crossing, and where it has to go
    /// if it did. A crossing teleports at most once.
    pub fn advance(
        &mut self,
        entity: Entity,
        pose: &Transform,
        pair: &PortalPair,
    ) -> Result<Option<Relocation>, PortalError> {
        let Some(crossing) = self.crossings.get_mut(&entity) else {
            return Ok(None);
        };
        if crossing.teleported {
            return Ok(None);
        }
        let Some(portal) = pair.get(crossing.portal) else {
            return Ok(None);
        };
        if signed_distance(&portal.transform, pose.translation) > CROSSING_EPSILON
            || !portal.frames(pose.translation, OPENING_MARGIN)
        {
            return Ok(None);
        }

        let to = portal.destination.ok_or(PortalError::NoDestination(portal.color))?;
        let transform = pair.teleport_transform(portal.color)?;
        crossing.teleported = true;
        info!("Teleporting {entity:?} from the {:?} portal", portal.color);
        Ok(Some(Relocation {
            entity,
            from: portal.color,
            to,
            transform: normalized(&(transform * *pose)),
            rotation: transform.rotation,
        }))
    }
}
