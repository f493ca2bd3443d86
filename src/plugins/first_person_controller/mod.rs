//! This module contains the first person controller plugin.
//!
//! The player is a kinematic capsule: input produces a desired movement which is corrected
//! against the scene by the physics world before being applied. Yaw turns the whole body, pitch
//! only turns the camera anchor.

use std::f32::consts::FRAC_PI_2;

use bevy::{
    prelude::*,
    reflect::FromReflect,
    render::{camera::Projection, view::RenderLayers},
};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use iyes_loopless::prelude::*;
use leafwing_input_manager::prelude::*;

use crate::{
    plugins::{
        clock::{tick_due, FrameClock},
        input::{default_input_map, Actions},
        physics::*,
        portal::{PortalTeleport, PORTAL_LAYER},
    },
    util::config::{GameConfig, PlayerConfig},
};

const PLAYER_HALF_HEIGHT: f32 = 0.5;
const PLAYER_RADIUS: f32 = 0.4;
const PITCH_LIMIT: f32 = 0.9 * FRAC_PI_2;
/// Rate at which movement dies down once no direction key is held.
const STOP_RATE: f32 = 5.;
const GRAVITY: f32 = 9.81;

#[derive(Debug)]
/// First person controller plugin, which registers the required systems to use the first person
/// controller also provided by this module.
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.register_type::<FirstPersonCamera>()
            .add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(
                process_look_inputs
                    .label(FirstPersonLabels::ProcessInputs)
                    .after(FirstPersonLabels::SpawnControllers),
            )
            .add_system(
                move_controllers
                    .run_if(tick_due)
                    .label(FirstPersonLabels::Move)
                    .after(FirstPersonLabels::ProcessInputs),
            );
    }
}

#[derive(Debug, SystemLabel)]
/// Labels for the first person controller systems.
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
    Move,
}

#[derive(Debug, Component)]
/// First person controller component.
pub struct FirstPersonController {
    pub yaw: Angle<f32>,
    pub pitch: Angle<f32>,
    pub camera_anchor: Entity,
    /// Smoothed horizontal velocity: it slides to a stop once no key is held.
    pub last_movement: Vec3,
    pub vertical_speed: f32,
    pub grounded: bool,
}

impl FirstPersonController {
    pub fn new(camera_anchor: Entity) -> Self {
        FirstPersonController {
            yaw: Angle::zero(),
            pitch: Angle::zero(),
            camera_anchor,
            last_movement: Vec3::ZERO,
            vertical_speed: 0.,
            grounded: false,
        }
    }

    pub fn body_rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw.radians)
    }

    pub fn anchor_rotation(&self) -> Quat {
        Quat::from_rotation_x(self.pitch.radians)
    }

    pub fn look_direction(&self) -> Vec3 {
        self.body_rotation() * self.anchor_rotation() * Vec3::NEG_Z
    }

    /// Turn the body and the camera anchor to the current yaw and pitch.
    pub fn orient(&self, body: &mut Transform, anchor: &mut Transform) {
        body.rotation = self.body_rotation();
        anchor.rotation = self.anchor_rotation();
    }

    /// Turn the controller after going through a portal rotating everything by `rotation`.
    /// Returns the velocity the controller had, in the new frame. The smoothed movement starts
    /// over, only the vertical part of that velocity is kept.
    pub fn realign(&mut self, rotation: Quat) -> Vec3 {
        let (yaw, pitch) = look_angles(rotation * self.look_direction());
        self.yaw = yaw;
        self.pitch = pitch;
        let velocity = rotation * (self.last_movement + Vec3::Y * self.vertical_speed);
        self.last_movement = Vec3::ZERO;
        self.vertical_speed = velocity.y;
        velocity
    }
}

/// Yaw and pitch looking along `look`. The pitch is clamped.
pub fn look_angles(look: Vec3) -> (Angle<f32>, Angle<f32>) {
    let look = look.normalize_or_zero();
    let yaw = if look.x == 0. && look.z == 0. {
        0.
    } else {
        (-look.x).atan2(-look.z)
    };
    let pitch = look.y.clamp(-1., 1.).asin().clamp(-PITCH_LIMIT, PITCH_LIMIT);
    (Angle::radians(yaw), Angle::radians(pitch))
}

fn horizontal(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0., v.z)
}

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
/// Marker trait for first person cameras
pub struct FirstPersonCamera;

#[derive(Debug, Component, Default)]
pub struct FirstPersonControllerSpawner;

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

fn spawn_controller(
    mut commands: Commands,
    config: Option<Res<GameConfig>>,
    spawners_query: Query<Entity, With<FirstPersonControllerSpawner>>,
) {
    let eye_height = config
        .map_or_else(|| PlayerConfig::default().eye_height, |config| config.player.eye_height);

    for id in &spawners_query {
        let camera_anchor = commands
            .spawn((
                SpatialBundle::from(Transform::from_translation(Vec3::Y * eye_height)),
                Name::from("Camera anchor"),
            ))
            .id();

        let camera = commands
            .spawn((
                Camera3dBundle {
                    projection: Projection::Perspective(PerspectiveProjection {
                        fov: std::f32::consts::FRAC_PI_4,
                        near: 0.05,
                        far: 1000.,
                        ..default()
                    }),
                    ..default()
                },
                RenderLayers::default().with(PORTAL_LAYER),
                Name::from("Player camera"),
                FirstPersonCamera,
            ))
            .id();

        commands.entity(camera_anchor).push_children(&[camera]);

        commands
            .entity(id)
            .insert((
                InputManagerBundle {
                    action_state: ActionState::default(),
                    input_map: default_input_map(),
                },
                RigidBody::KinematicPositionBased,
                Collider::capsule_y(PLAYER_HALF_HEIGHT, PLAYER_RADIUS),
                ActiveCollisionTypes::all(),
                CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
                Name::from("Player"),
                PortalTeleport,
                FirstPersonController::new(camera_anchor),
            ))
            .add_child(camera_anchor)
            .remove::<FirstPersonControllerSpawner>();
        info!("Spawned player {id:?}");
    }
}

/// Process mouse movement. We handle the rotation components separately:
/// * Rotation around the vertical axis (e.g. aiming left or right) is applied to the player
///   root node.
/// * Rotation around the horizontal axis (e.g. aiming up or down) is applied to the camera
///   anchor in order to keep the vertical orientation neutral on the root node.
fn process_look_inputs(
    config: Option<Res<GameConfig>>,
    mut player_query: Query<
        (&ActionState<Actions>, &mut FirstPersonController, &mut Transform),
        Without<Sensor>,
    >,
    mut anchor_query: Query<&mut Transform, (Without<FirstPersonController>, Without<Sensor>)>,
) {
    let sensitivity = config.map_or_else(
        || PlayerConfig::default().look_sensitivity,
        |config| config.player.look_sensitivity,
    );

    for (input_state, mut controller, mut transform) in &mut player_query {
        if let Some(mouse_movement) = input_state.axis_pair(Actions::Aim) {
            controller.yaw -= Angle::radians(mouse_movement.x() * sensitivity);
            controller.yaw = controller.yaw.signed();
            let pitch = controller.pitch.radians - mouse_movement.y() * sensitivity;
            controller.pitch = Angle::radians(pitch.clamp(-PITCH_LIMIT, PITCH_LIMIT));
        }

        let body_rotation = controller.body_rotation();
        if transform.rotation != body_rotation {
            transform.rotation = body_rotation;
        }
        if let Ok(mut anchor_transform) = anchor_query.get_mut(controller.camera_anchor) {
            anchor_transform.rotation = controller.anchor_rotation();
        }
    }
}

/// Walk, fall and jump, one tick at a time.
fn move_controllers(
    clock: Res<FrameClock>,
    config: Option<Res<GameConfig>>,
    mut physics: RapierWorld,
    mut player_query: Query<
        (
            Entity,
            &ActionState<Actions>,
            &mut FirstPersonController,
            &mut Transform,
        ),
        Without<Sensor>,
    >,
) {
    let player_config = config.map_or_else(PlayerConfig::default, |config| config.player.clone());
    let dt = clock.delta();

    for (entity, input_state, mut controller, mut transform) in &mut player_query {
        let forward = horizontal(transform.forward()).normalize_or_zero();
        let left = horizontal(transform.left()).normalize_or_zero();
        let axis = |positive: Actions, negative: Actions| -> f32 {
            match (input_state.pressed(positive), input_state.pressed(negative)) {
                (true, false) => 1.,
                (false, true) => -1.,
                _ => 0.,
            }
        };
        let wish = forward * axis(Actions::Forward, Actions::Backwards)
            + left * axis(Actions::StrafeLeft, Actions::StrafeRight);

        controller.last_movement = if wish == Vec3::ZERO {
            controller
                .last_movement
                .lerp(Vec3::ZERO, (STOP_RATE * dt).min(1.))
        } else {
            wish.normalize() * player_config.speed
        };

        if controller.grounded && input_state.just_pressed(Actions::Jump) {
            controller.vertical_speed = player_config.jump_speed;
        } else {
            controller.vertical_speed -= GRAVITY * dt;
        }

        let desired = (controller.last_movement + Vec3::Y * controller.vertical_speed) * dt;
        let outcome = physics.correct_movement(entity, &transform, desired);
        transform.translation += outcome.translation;
        controller.grounded = outcome.grounded;
        if outcome.grounded && controller.vertical_speed < 0. {
            controller.vertical_speed = 0.;
        }
    }
}
