use bevy::{math::Vec4Swizzles, prelude::*};
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::portal::{
    entity::{Portal, SENSOR_DEPTH},
    geometry::ViewCamera,
};

/// Draw the frustum of `camera` up to `far`. The near plane is drawn black, the far one white.
pub fn draw_camera_frustum(camera: &ViewCamera, far: f32, lines: &mut DebugLines) {
    const NEAR_COLOR: Color = Color::BLACK;
    const FAR_COLOR: Color = Color::WHITE;

    // Portal cameras have no far plane, draw a finite one.
    let projection = Mat4::perspective_rh(camera.fov, camera.aspect_ratio, camera.near, far);
    let inv_viewprojection = (projection * camera.view_matrix()).inverse();

    let corners = [
        Vec4::new(-1., -1., 0., 1.),
        Vec4::new(1., -1., 0., 1.),
        Vec4::new(-1., 1., 0., 1.),
        Vec4::new(1., 1., 0., 1.),
        Vec4::new(-1., -1., 1., 1.),
        Vec4::new(1., -1., 1., 1.),
        Vec4::new(-1., 1., 1., 1.),
        Vec4::new(1., 1., 1., 1.),
    ]
    .map(|v| {
        let vh = inv_viewprojection * v;
        vh.xyz() / vh.w
    });

    // Depth lines
    for i in 0..4 {
        lines.line_gradient(corners[i], corners[i + 4], 0., NEAR_COLOR, FAR_COLOR);
    }

    for (offset, color) in [(0, NEAR_COLOR), (4, FAR_COLOR)] {
        for (a, b) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
            lines.line_colored(corners[offset + a], corners[offset + b], 0., color);
        }
    }
}

/// Outline of the portal opening, and the box of its sensor.
pub fn draw_portal(portal: &Portal, lines: &mut DebugLines) {
    let color = portal.color.tint();
    let corners = portal.corners();
    let depth = portal.outward_normal() * SENSOR_DEPTH;
    for i in 0..4 {
        let (a, b) = (corners[i], corners[(i + 1) % 4]);
        lines.line_colored(a, b, 0., color);
        lines.line_colored(a + depth, b + depth, 0., color * 0.5);
        lines.line_colored(a, a + depth, 0., color * 0.5);
    }
}
