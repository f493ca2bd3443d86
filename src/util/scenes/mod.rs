use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::{physics::*, portal::{PortalHost, PortalTeleport}};

/// Setup a closed room of specified size, with a floor, four walls and a ceiling, all of them
/// able to host portals.
pub fn make_portal_room(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    length: f32,
    height: f32,
) {
    const WALL_THICKNESS: f32 = 1.;

    let walls_materials = [
        materials.add(StandardMaterial::from(Color::rgb(0.75, 0.75, 0.72))),
        materials.add(StandardMaterial::from(Color::rgb(0.65, 0.67, 0.7))),
        materials.add(StandardMaterial::from(Color::rgb(0.75, 0.75, 0.72))),
        materials.add(StandardMaterial::from(Color::rgb(0.65, 0.67, 0.7))),
    ];
    let ground_material = materials.add(StandardMaterial::from(Color::DARK_GRAY));

    let half_len = length / 2.;
    let wall_mesh = meshes.add(
        shape::Box {
            min_x: -half_len,
            max_x: half_len,
            min_y: -height / 2.,
            max_y: height / 2.,
            min_z: -WALL_THICKNESS / 2.,
            max_z: WALL_THICKNESS / 2.,
        }
        .into(),
    );
    let ground_mesh = meshes.add(
        shape::Box {
            min_x: -half_len * 1.1,
            max_x: half_len * 1.1,
            min_y: -WALL_THICKNESS / 2.,
            max_y: WALL_THICKNESS / 2.,
            min_z: -half_len * 1.1,
            max_z: half_len * 1.1,
        }
        .into(),
    );

    commands.spawn((
        PbrBundle {
            mesh: ground_mesh.clone(),
            material: ground_material.clone(),
            transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
            ..default()
        },
        Name::from("Ground"),
        RigidBody::Fixed,
        Collider::cuboid(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
        PortalHost,
    ));

    for (i, mat) in walls_materials.into_iter().enumerate() {
        let mut transform = Transform::from_xyz(0., height / 2., -(half_len + WALL_THICKNESS / 2.));
        transform.rotate_around(
            Vec3::new(0., height / 2., 0.),
            Quat::from_axis_angle(Vec3::Y, i as f32 * FRAC_PI_2),
        );
        commands.spawn((
            PbrBundle {
                mesh: wall_mesh.clone(),
                material: mat,
                transform,
                ..default()
            },
            Name::from(format!("Wall_{}", i)),
            RigidBody::Fixed,
            Collider::cuboid(half_len, height / 2., WALL_THICKNESS / 2.),
            CollisionGroups::new(WALLS_GROUP, ALL_GROUPS),
            PortalHost,
        ));
    }

    commands.spawn((
        PbrBundle {
            mesh: ground_mesh,
            material: ground_material,
            transform: Transform::from_xyz(0., height + WALL_THICKNESS / 2., 0.),
            ..default()
        },
        Name::from("Ceiling"),
        RigidBody::Fixed,
        Collider::cuboid(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1),
        CollisionGroups::new(GROUND_GROUP, ALL_GROUPS),
        PortalHost,
    ));
}

/// Dynamic box that can go through portals.
pub fn spawn_crate(
    commands: &mut Commands,
    meshes: &mut ResMut<Assets<Mesh>>,
    materials: &mut ResMut<Assets<StandardMaterial>>,
    position: Vec3,
) {
    const SIZE: f32 = 0.8;

    commands.spawn((
        PbrBundle {
            mesh: meshes.add(shape::Cube { size: SIZE }.into()),
            material: materials.add(StandardMaterial::from(Color::rgb(0.6, 0.4, 0.2))),
            transform: Transform::from_translation(position),
            ..default()
        },
        Name::from("Crate"),
        RigidBody::Dynamic,
        Collider::cuboid(SIZE / 2., SIZE / 2., SIZE / 2.),
        CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
        ActiveCollisionTypes::all(),
        Velocity::zero(),
        Ccd::enabled(),
        PortalTeleport,
    ));
}
