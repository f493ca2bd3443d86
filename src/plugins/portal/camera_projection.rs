use std::f32::consts::FRAC_PI_4;

use bevy::{prelude::*, render::camera::CameraProjection};

use super::geometry::{oblique_projection, ViewCamera};

/// Camera projection which allows for an oblique near clipping plane, used for rendering portal virtual cameras.
#[derive(Debug, Component, Clone, Reflect)]
#[reflect(Component)]
pub struct PortalCameraProjection {
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
    /// View space plane replacing the near plane.
    #[reflect(ignore)]
    pub clip_plane: Option<Vec4>,
}

impl Default for PortalCameraProjection {
    fn default() -> Self {
        PortalCameraProjection {
            fov: FRAC_PI_4,
            aspect_ratio: 16. / 9.,
            near: 0.05,
            far: 1000.,
            clip_plane: None,
        }
    }
}

impl PortalCameraProjection {
    /// Take over the lens and clip plane of a portal view.
    pub fn follow(&mut self, view: &ViewCamera) {
        self.fov = view.fov;
        self.aspect_ratio = view.aspect_ratio;
        self.near = view.near;
        self.clip_plane = view.clip_plane;
    }
}

impl CameraProjection for PortalCameraProjection {
    fn get_projection_matrix(&self) -> Mat4 {
        let projection = Mat4::perspective_infinite_reverse_rh(self.fov, self.aspect_ratio, self.near);
        match self.clip_plane {
            Some(clip_plane) => oblique_projection(projection, clip_plane),
            None => projection,
        }
    }

    // The aspect ratio follows the main camera, not the render target.
    fn update(&mut self, _width: f32, _height: f32) {}

    fn far(&self) -> f32 {
        self.far
    }
}
