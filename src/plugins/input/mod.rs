use bevy::{
    prelude::*,
    window::{CursorGrabMode, Windows},
};
use leafwing_input_manager::prelude::*;

use super::{
    first_person_controller::{FirstPersonCamera, FirstPersonController},
    portal::{
        entity::PortalColor,
        placement::{AimRay, PlacementRequest},
    },
};

#[derive(Debug)]
pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(InputManagerPlugin::<Actions>::default())
            .add_event::<PlacementRequest>()
            .add_startup_system(toggle_on_start)
            .add_system(toggle_mouse_capture)
            .add_system(fire_portals.label(InputLabels::FirePortals));
    }
}

#[derive(Debug, SystemLabel)]
pub enum InputLabels {
    FirePortals,
}

#[derive(Actionlike, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actions {
    Forward,
    Backwards,
    StrafeLeft,
    StrafeRight,
    Jump,
    Aim,
    FireBlue,
    FireOrange,
    ToggleDebug,
}

pub fn default_input_map() -> InputMap<Actions> {
    let mut input_map = InputMap::default();
    input_map
        .insert(KeyCode::W, Actions::Forward)
        .insert(KeyCode::Z, Actions::Forward)
        .insert(KeyCode::Up, Actions::Forward)
        .insert(KeyCode::S, Actions::Backwards)
        .insert(KeyCode::Down, Actions::Backwards)
        .insert(KeyCode::A, Actions::StrafeLeft)
        .insert(KeyCode::Q, Actions::StrafeLeft)
        .insert(KeyCode::Left, Actions::StrafeLeft)
        .insert(KeyCode::D, Actions::StrafeRight)
        .insert(KeyCode::Right, Actions::StrafeRight)
        .insert(KeyCode::Space, Actions::Jump)
        .insert(DualAxis::mouse_motion(), Actions::Aim)
        .insert(MouseButton::Left, Actions::FireBlue)
        .insert(MouseButton::Right, Actions::FireOrange)
        .insert(KeyCode::F3, Actions::ToggleDebug);
    input_map
}

fn set_cursor_captured(windows: &mut Windows, captured: bool) {
    if let Some(window) = windows.get_primary_mut() {
        window.set_cursor_visibility(!captured);
        window.set_cursor_grab_mode(if captured {
            CursorGrabMode::Locked
        } else {
            CursorGrabMode::None
        });
    }
}

fn cursor_captured(windows: &Windows) -> bool {
    windows
        .get_primary()
        .map_or(false, |window| window.cursor_grab_mode() != CursorGrabMode::None)
}

fn toggle_on_start(mut windows: ResMut<Windows>) {
    set_cursor_captured(&mut windows, true);
}

fn toggle_mouse_capture(mut windows: ResMut<Windows>, keys: Res<Input<KeyCode>>) {
    if keys.just_pressed(KeyCode::Tab) {
        let captured = cursor_captured(&windows);
        set_cursor_captured(&mut windows, !captured);
    }
}

/// Shoot portals where the player looks. Clicks only count while the cursor is captured.
fn fire_portals(
    windows: Res<Windows>,
    players: Query<(Entity, &ActionState<Actions>), With<FirstPersonController>>,
    cameras: Query<&GlobalTransform, With<FirstPersonCamera>>,
    mut requests: EventWriter<PlacementRequest>,
) {
    if !cursor_captured(&windows) {
        return;
    }
    let Ok(camera) = cameras.get_single() else {
        return;
    };
    for (player, actions) in &players {
        let shots = [
            (Actions::FireBlue, PortalColor::Blue),
            (Actions::FireOrange, PortalColor::Orange),
        ];
        for (action, color) in shots {
            if actions.just_pressed(action) {
                debug!("Shooting the {color:?} portal");
                requests.send(PlacementRequest {
                    ray: AimRay {
                        origin: camera.translation(),
                        direction: camera.forward(),
                    },
                    color,
                    shooter: Some(player),
                });
            }
        }
    }
}
