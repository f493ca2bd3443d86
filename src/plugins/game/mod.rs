use std::f32::consts::*;

use crate::{
    plugins::*,
    util::{
        config::{ConfigError, GameConfig},
        scenes::{make_portal_room, spawn_crate},
    },
};

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

const ROOM_SIZE: f32 = 20.;

#[derive(Debug)]
/// Main game plugin, responsible for loading the other game plugins and bootstrapping the game.
pub struct GamePlugin {
    pub config: GameConfig,
    /// Why the configuration file could not be used, if it could not.
    pub config_error: Option<ConfigError>,
}

impl Plugin for GamePlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(DefaultPlugins.set(WindowPlugin {
            window: self.config.window.descriptor(),
            ..default()
        }));
        if let Some(err) = &self.config_error {
            warn!("Using the default configuration: {err}");
        }

        // Read by the plugins below when they get built.
        app.insert_resource(self.config.clone());

        app.add_plugin(RapierPhysicsPlugin::<NoUserData>::default());
        app.add_plugin(physics::PhysicsPlugin);
        app.add_plugin(clock::ClockPlugin);
        app.add_plugin(input::InputPlugin);
        app.add_plugin(first_person_controller::FirstPersonControllerPlugin);
        app.add_plugin(portal::PortalPlugin);

        #[cfg(feature = "devel")]
        {
            app.add_plugin(debug::DebugPlugin);
        }

        app.add_startup_system(setup);
    }
}

/// Perform game initialization
fn setup(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    make_portal_room(&mut commands, &mut meshes, &mut materials, ROOM_SIZE, ROOM_SIZE);
    spawn_crate(&mut commands, &mut meshes, &mut materials, Vec3::new(3., 0.5, -3.));

    // Light
    commands.spawn(DirectionalLightBundle {
        directional_light: DirectionalLight {
            color: Color::ANTIQUE_WHITE,
            illuminance: 20_000.,
            shadows_enabled: true,
            ..default()
        },
        transform: Transform {
            translation: Vec3::Y * 5.,
            rotation: Quat::from_euler(EulerRot::YXZ, FRAC_PI_4, -FRAC_PI_4, 0.),
            scale: Vec3::ONE,
        },
        ..default()
    });
    commands.insert_resource(AmbientLight {
        color: Color::WHITE,
        brightness: 0.3,
    });

    // Spawn player
    commands.spawn(first_person_controller::FirstPersonControllerBundle {
        spatial: SpatialBundle::from(Transform::from_xyz(0., 1., 5.)),
        ..default()
    });
}
