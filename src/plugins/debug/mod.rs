//! Development overlay, drawn with debug lines: portal outlines, sensor volumes and the frusta
//! of the portal cameras. Toggled with F3.

pub mod draw;

use bevy::prelude::*;
use bevy_prototype_debug_lines::{DebugLines, DebugLinesPlugin};
use leafwing_input_manager::prelude::*;

use super::{
    input::Actions,
    portal::{
        camera_projection::PortalCameraProjection,
        geometry::ViewCamera,
        pair::PortalPair,
        teleport::{TeleportState, Teleporter},
        PortalCamera, PortalLabels, PortalStages, PortalTeleport,
    },
};

/// How far the portal camera frusta are drawn.
const FRUSTUM_DRAW_DISTANCE: f32 = 5.;

#[derive(Debug)]
/// Development plugin intended for debug builds use.
pub struct DebugPlugin;

impl Plugin for DebugPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(DebugLinesPlugin::with_depth_test(true))
            .init_resource::<DebugDraw>()
            .add_system(toggle_debug_draw)
            .add_system_to_stage(
                PortalStages::Teleport,
                draw_portals.after(PortalLabels::ComposeViews),
            );
    }
}

#[derive(Debug, Default, Resource)]
pub struct DebugDraw(pub bool);

fn toggle_debug_draw(mut debug_draw: ResMut<DebugDraw>, actions: Query<&ActionState<Actions>>) {
    if actions
        .iter()
        .any(|action_state| action_state.just_pressed(Actions::ToggleDebug))
    {
        debug_draw.0 = !debug_draw.0;
        info!("Debug drawing {}", if debug_draw.0 { "on" } else { "off" });
    }
}

fn draw_portals(
    debug_draw: Res<DebugDraw>,
    pair: Res<PortalPair>,
    teleporter: Res<Teleporter>,
    travelers: Query<(Entity, &Transform), With<PortalTeleport>>,
    cameras: Query<(&Camera, &Transform, &PortalCameraProjection), With<PortalCamera>>,
    mut lines: ResMut<DebugLines>,
) {
    if !debug_draw.0 {
        return;
    }
    for portal in pair.iter() {
        draw::draw_portal(portal, &mut lines);
    }
    // Link whoever is crossing to the portal it goes through.
    for (entity, transform) in &travelers {
        if let TeleportState::Crossing(crossing) = teleporter.state(entity) {
            if let Some(portal) = pair.get(crossing.portal) {
                lines.line_colored(
                    transform.translation,
                    portal.transform.translation,
                    0.,
                    portal.color.tint(),
                );
            }
        }
    }
    for (camera, transform, projection) in &cameras {
        if camera.is_active {
            let view = ViewCamera::perspective(
                *transform,
                projection.fov,
                projection.aspect_ratio,
                projection.near,
            );
            draw::draw_camera_frustum(&view, FRUSTUM_DRAW_DISTANCE, &mut lines);
        }
    }
}
