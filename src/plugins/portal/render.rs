//! Recursive stencil rendering of nested portal views.
//!
//! Each visible portal marks its silhouette in the stencil buffer, then the scene seen through it
//! is drawn only where the stencil value matches the current recursion depth. Portals seen
//! through portals recurse until the maximum depth is reached.

use bevy::prelude::*;

use super::{entity::PortalColor, geometry::ViewCamera, pair::PortalPair};

pub const DEFAULT_MAX_RECURSION: u8 = 1;
const FULL_MASK: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunc {
    Always,
    Less,
    Equal,
    NotEqual,
    LessOrEqual,
}

impl CompareFunc {
    /// Whether an incoming value passes the test against the stored one.
    pub fn passes<T: PartialOrd>(self, incoming: T, stored: T) -> bool {
        match self {
            CompareFunc::Always => true,
            CompareFunc::Less => incoming < stored,
            CompareFunc::Equal => incoming == stored,
            CompareFunc::NotEqual => incoming != stored,
            CompareFunc::LessOrEqual => incoming <= stored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StencilOp {
    Keep,
    Increment,
    Decrement,
}

/// Which part of the scene a draw call renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawSubset {
    /// The whole scene, portal overlays excluded.
    Scene,
    /// The opening of a single portal.
    Silhouette(PortalColor),
}

/// Render target with color, depth and stencil buffers, driven through raw buffer state
/// commands.
pub trait StencilSurface {
    /// Clear every buffer, stencil to zero.
    fn clear(&mut self);
    fn clear_depth(&mut self);
    fn color_mask(&mut self, enabled: bool);
    fn depth_mask(&mut self, enabled: bool);
    fn depth_test(&mut self, enabled: bool);
    fn depth_func(&mut self, func: CompareFunc);
    fn stencil_test(&mut self, enabled: bool);
    fn stencil_func(&mut self, func: CompareFunc, reference: u8, mask: u8);
    /// Operations applied when the stencil test fails, when the depth test fails, and when both
    /// pass.
    fn stencil_op(&mut self, stencil_fail: StencilOp, depth_fail: StencilOp, pass: StencilOp);
    fn stencil_write_mask(&mut self, mask: u8);
    fn draw(&mut self, camera: &ViewCamera, subset: DrawSubset);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Resource)]
pub struct PortalRenderer {
    pub max_recursion: u8,
}

impl Default for PortalRenderer {
    fn default() -> Self {
        PortalRenderer {
            max_recursion: DEFAULT_MAX_RECURSION,
        }
    }
}

impl PortalRenderer {
    pub fn render_frame(
        &self,
        surface: &mut impl StencilSurface,
        pair: &PortalPair,
        camera: &ViewCamera,
    ) {
        surface.clear();
        self.render_level(surface, pair, camera, 0);
    }

    fn render_level(
        &self,
        surface: &mut impl StencilSurface,
        pair: &PortalPair,
        camera: &ViewCamera,
        depth: u8,
    ) {
        let visible: Vec<PortalColor> = pair
            .iter()
            .filter(|portal| portal.destination.is_some() && portal.is_visible_from_camera(camera))
            .map(|portal| portal.color)
            .collect();

        for &color in &visible {
            let virtual_camera = match pair.destination_camera(color, camera) {
                Ok(virtual_camera) => virtual_camera,
                Err(err) => {
                    error!("Skipping portal view: {err}");
                    continue;
                }
            };

            // Mark the portal opening: every pixel of the silhouette fails the test and gets
            // incremented.
            surface.color_mask(false);
            surface.depth_mask(false);
            surface.depth_test(false);
            surface.stencil_test(true);
            surface.stencil_func(CompareFunc::NotEqual, depth, FULL_MASK);
            surface.stencil_op(StencilOp::Increment, StencilOp::Keep, StencilOp::Keep);
            surface.stencil_write_mask(FULL_MASK);
            surface.draw(camera, DrawSubset::Silhouette(color));

            if depth == self.max_recursion {
                surface.color_mask(true);
                surface.depth_mask(true);
                surface.clear_depth();
                surface.depth_test(true);
                surface.stencil_test(true);
                surface.stencil_write_mask(0);
                surface.stencil_func(CompareFunc::Equal, depth + 1, FULL_MASK);
                surface.draw(&virtual_camera, DrawSubset::Scene);
            } else {
                self.render_level(surface, pair, &virtual_camera, depth + 1);
            }

            // Unmark the opening.
            surface.color_mask(false);
            surface.depth_mask(false);
            surface.stencil_test(true);
            surface.stencil_write_mask(FULL_MASK);
            surface.stencil_func(CompareFunc::NotEqual, depth + 1, FULL_MASK);
            surface.stencil_op(StencilOp::Decrement, StencilOp::Keep, StencilOp::Keep);
            surface.draw(camera, DrawSubset::Silhouette(color));
        }

        // Portal openings go in the depth buffer only, so the scene pass below leaves the views
        // drawn through them alone.
        surface.stencil_test(false);
        surface.stencil_write_mask(0);
        surface.color_mask(false);
        surface.depth_test(true);
        surface.depth_mask(true);
        surface.depth_func(CompareFunc::Always);
        surface.clear_depth();
        for &color in &visible {
            surface.draw(camera, DrawSubset::Silhouette(color));
        }

        surface.depth_func(CompareFunc::Less);
        surface.stencil_test(true);
        surface.stencil_write_mask(0);
        surface.stencil_func(CompareFunc::LessOrEqual, depth, FULL_MASK);
        surface.color_mask(true);
        surface.depth_mask(true);
        surface.draw(camera, DrawSubset::Scene);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::plugins::portal::entity::{
        tests::{facing, visuals},
        Portal,
    };

    const WIDTH: usize = 12;
    const SCENE_DEPTH: f32 = 0.9;
    const PORTAL_DEPTH: f32 = 0.5;

    #[derive(Debug, Clone, Copy)]
    struct State {
        color_mask: bool,
        depth_mask: bool,
        depth_test: bool,
        depth_func: CompareFunc,
        stencil_test: bool,
        stencil_func: (CompareFunc, u8, u8),
        stencil_ops: (StencilOp, StencilOp, StencilOp),
        stencil_write_mask: u8,
    }

    impl Default for State {
        fn default() -> Self {
            State {
                color_mask: true,
                depth_mask: true,
                depth_test: true,
                depth_func: CompareFunc::Less,
                stencil_test: false,
                stencil_func: (CompareFunc::Always, 0, FULL_MASK),
                stencil_ops: (StencilOp::Keep, StencilOp::Keep, StencilOp::Keep),
                stencil_write_mask: FULL_MASK,
            }
        }
    }

    /// One row of pixels across the middle of the screen. Pixel colors record the position of
    /// the camera that drew them. The main camera gets fixed silhouettes, any other camera sees
    /// the portals given to [`SoftwareSurface::projecting`].
    struct SoftwareSurface {
        state: State,
        color: Vec<Option<Vec3>>,
        depth: Vec<f32>,
        stencil: Vec<u8>,
        main_camera: Vec3,
        silhouettes: HashMap<PortalColor, Vec<usize>>,
        portals: Vec<Portal>,
        draws: Vec<DrawSubset>,
        stencil_writes: usize,
    }

    impl SoftwareSurface {
        fn new(main_camera: Vec3) -> Self {
            SoftwareSurface {
                state: State::default(),
                color: vec![Some(Vec3::splat(-1.)); WIDTH],
                depth: vec![0.; WIDTH],
                stencil: vec![0x55; WIDTH],
                main_camera,
                silhouettes: HashMap::from([
                    (PortalColor::Blue, vec![1, 2, 3, 4]),
                    (PortalColor::Orange, vec![7, 8, 9]),
                ]),
                portals: Vec::new(),
                draws: Vec::new(),
                stencil_writes: 0,
            }
        }

        /// Surface where every silhouette is the projection of the actual portal.
        fn projecting(pair: &PortalPair) -> Self {
            SoftwareSurface {
                silhouettes: HashMap::new(),
                portals: pair.iter().cloned().collect(),
                ..SoftwareSurface::new(Vec3::NAN)
            }
        }

        /// Pixels whose ray from `camera` goes through the opening of the `color` portal, in
        /// front of the camera clip plane.
        fn projected_silhouette(&self, camera: &ViewCamera, color: PortalColor) -> Vec<usize> {
            let Some(portal) = self.portals.iter().find(|portal| portal.color == color) else {
                return Vec::new();
            };
            let normal = portal.outward_normal();
            let half_width = (camera.fov / 2.).tan() * camera.aspect_ratio;
            (0..WIDTH)
                .filter(|&pixel| {
                    let x = (2 * pixel + 1) as f32 / WIDTH as f32 - 1.;
                    let view_direction = Vec3::new(x * half_width, 0., -1.);
                    let direction = camera.transform.rotation * view_direction;
                    let facing = direction.dot(normal);
                    if facing >= 0. {
                        return false;
                    }
                    let to_portal = portal.transform.translation - camera.transform.translation;
                    let distance = to_portal.dot(normal) / facing;
                    let clipped = camera.clip_plane.map_or(false, |plane| {
                        plane.dot(Vec4::from((view_direction * distance, 1.))) < 0.
                    });
                    distance > 0.
                        && !clipped
                        && portal.frames(camera.transform.translation + direction * distance, 0.)
                })
                .collect()
        }

        fn apply_stencil_op(&mut self, pixel: usize, op: StencilOp) {
            let old = self.stencil[pixel];
            let new = match op {
                StencilOp::Keep => old,
                StencilOp::Increment => old.saturating_add(1),
                StencilOp::Decrement => old.saturating_sub(1),
            };
            let mask = self.state.stencil_write_mask;
            if new != old && mask != 0 {
                self.stencil[pixel] = (old & !mask) | (new & mask);
                self.stencil_writes += 1;
            }
        }

        fn fragment(&mut self, pixel: usize, depth: f32, color: Vec3) {
            let state = self.state;
            let (fail, depth_fail, pass) = state.stencil_ops;
            if state.stencil_test {
                let (func, reference, mask) = state.stencil_func;
                if !func.passes(reference & mask, self.stencil[pixel] & mask) {
                    self.apply_stencil_op(pixel, fail);
                    return;
                }
            }
            if state.depth_test && !state.depth_func.passes(depth, self.depth[pixel]) {
                if state.stencil_test {
                    self.apply_stencil_op(pixel, depth_fail);
                }
                return;
            }
            if state.stencil_test {
                self.apply_stencil_op(pixel, pass);
            }
            if state.color_mask {
                self.color[pixel] = Some(color);
            }
            // Like GL, depth is only written while depth testing.
            if state.depth_test && state.depth_mask {
                self.depth[pixel] = depth;
            }
        }
    }

    impl StencilSurface for SoftwareSurface {
        fn clear(&mut self) {
            self.color.fill(None);
            self.depth.fill(1.);
            self.stencil.fill(0);
        }

        fn clear_depth(&mut self) {
            self.depth.fill(1.);
        }

        fn color_mask(&mut self, enabled: bool) {
            self.state.color_mask = enabled;
        }

        fn depth_mask(&mut self, enabled: bool) {
            self.state.depth_mask = enabled;
        }

        fn depth_test(&mut self, enabled: bool) {
            self.state.depth_test = enabled;
        }

        fn depth_func(&mut self, func: CompareFunc) {
            self.state.depth_func = func;
        }

        fn stencil_test(&mut self, enabled: bool) {
            self.state.stencil_test = enabled;
        }

        fn stencil_func(&mut self, func: CompareFunc, reference: u8, mask: u8) {
            self.state.stencil_func = (func, reference, mask);
        }

        fn stencil_op(&mut self, stencil_fail: StencilOp, depth_fail: StencilOp, pass: StencilOp) {
            self.state.stencil_ops = (stencil_fail, depth_fail, pass);
        }

        fn stencil_write_mask(&mut self, mask: u8) {
            self.state.stencil_write_mask = mask;
        }

        fn draw(&mut self, camera: &ViewCamera, subset: DrawSubset) {
            let position = camera.transform.translation;
            let (pixels, depth) = match subset {
                DrawSubset::Scene => ((0..WIDTH).collect(), SCENE_DEPTH),
                DrawSubset::Silhouette(color) => {
                    let pixels = match self.silhouettes.get(&color) {
                        Some(pixels) if position.abs_diff_eq(self.main_camera, 1e-4) => {
                            pixels.clone()
                        }
                        _ => self.projected_silhouette(camera, color),
                    };
                    (pixels, PORTAL_DEPTH)
                }
            };
            for pixel in pixels {
                self.fragment(pixel, depth, position);
            }
            self.draws.push(subset);
        }
    }

    const WALL: Entity = Entity::from_raw(100);

    fn main_camera() -> ViewCamera {
        ViewCamera::perspective(facing(Vec3::new(0., 0., 10.), Vec3::NEG_Z), 1.5, 2., 0.1)
    }

    /// Blue opens towards +Z left of the camera, orange opens towards -X on its right.
    fn linked_pair() -> PortalPair {
        let mut pair = PortalPair::default();
        pair.place_portal(
            facing(Vec3::new(-3., 0., 0.), Vec3::NEG_Z),
            WALL,
            PortalColor::Blue,
            |_| visuals(1),
        );
        pair.place_portal(
            facing(Vec3::new(5., 0., 5.), Vec3::X),
            WALL,
            PortalColor::Orange,
            |_| visuals(2),
        );
        pair
    }

    fn pixel_color(surface: &SoftwareSurface, pixel: usize) -> Vec3 {
        surface.color[pixel].expect("every pixel is drawn")
    }

    #[test]
    fn portal_regions_show_their_destination_views() {
        let pair = linked_pair();
        let camera = main_camera();
        let through_blue = pair
            .destination_camera(PortalColor::Blue, &camera)
            .expect("linked")
            .transform
            .translation;
        let through_orange = pair
            .destination_camera(PortalColor::Orange, &camera)
            .expect("linked")
            .transform
            .translation;
        assert!(!through_blue.abs_diff_eq(through_orange, 1e-2));

        for max_recursion in [0, 1, 2] {
            let mut surface = SoftwareSurface::new(camera.transform.translation);
            PortalRenderer { max_recursion }.render_frame(&mut surface, &pair, &camera);

            for pixel in 0..WIDTH {
                let expected = match pixel {
                    1..=4 => through_blue,
                    7..=9 => through_orange,
                    _ => camera.transform.translation,
                };
                assert!(
                    pixel_color(&surface, pixel).abs_diff_eq(expected, 1e-4),
                    "pixel {pixel} at depth {max_recursion}: {} != {expected}",
                    pixel_color(&surface, pixel)
                );
            }
            assert!(surface.stencil.iter().all(|&value| value == 0));
        }
    }

    #[test]
    fn portal_seen_through_itself_shows_the_next_level() {
        // Blue opens towards +Z at the origin, orange faces it from z = 20. Looking at blue from
        // between them shows blue again, further away.
        let mut pair = PortalPair::default();
        pair.place_portal(facing(Vec3::ZERO, Vec3::NEG_Z), WALL, PortalColor::Blue, |_| {
            visuals(1)
        });
        pair.place_portal(
            facing(Vec3::new(0., 0., 20.), Vec3::Z),
            WALL,
            PortalColor::Orange,
            |_| visuals(2),
        );
        let camera = ViewCamera::perspective(facing(Vec3::new(0., 0., 10.), Vec3::NEG_Z), 0.2, 2., 0.1);
        let mut levels = vec![camera];
        for _ in 0..3 {
            let last = levels[levels.len() - 1];
            levels.push(pair.destination_camera(PortalColor::Blue, &last).expect("linked"));
        }
        assert!(levels[1].transform.translation.abs_diff_eq(Vec3::new(0., 0., 30.), 1e-3));
        assert!(levels[2].transform.translation.abs_diff_eq(Vec3::new(0., 0., 50.), 1e-3));

        for max_recursion in [0, 1, 2] {
            let mut surface = SoftwareSurface::projecting(&pair);
            PortalRenderer { max_recursion }.render_frame(&mut surface, &pair, &camera);

            for pixel in 0..WIDTH {
                let level = match pixel {
                    5 | 6 => usize::from(max_recursion) + 1,
                    3..=8 => 1,
                    _ => 0,
                };
                let expected = levels[level].transform.translation;
                assert!(
                    pixel_color(&surface, pixel).abs_diff_eq(expected, 1e-3),
                    "pixel {pixel} at depth {max_recursion}: {} != {expected}",
                    pixel_color(&surface, pixel)
                );
            }
            assert!(surface.stencil.iter().all(|&value| value == 0));
        }
    }

    #[test]
    fn no_portal_renders_like_a_plain_camera() {
        let camera = main_camera();
        let mut pair = PortalPair::default();
        // A lone portal has nowhere to look at.
        pair.place_portal(
            facing(Vec3::new(-3., 0., 0.), Vec3::NEG_Z),
            WALL,
            PortalColor::Blue,
            |_| visuals(1),
        );

        let mut rendered = SoftwareSurface::new(camera.transform.translation);
        PortalRenderer { max_recursion: 0 }.render_frame(&mut rendered, &pair, &camera);

        let mut plain = SoftwareSurface::new(camera.transform.translation);
        plain.clear();
        plain.draw(&camera, DrawSubset::Scene);

        assert_eq!(rendered.color, plain.color);
        assert_eq!(rendered.depth, plain.depth);
        assert_eq!(rendered.stencil_writes, 0);
        assert_eq!(rendered.draws, vec![DrawSubset::Scene]);
    }

    #[test]
    fn frame_starts_from_cleared_buffers() {
        let camera = main_camera();
        let mut surface = SoftwareSurface::new(camera.transform.translation);
        PortalRenderer::default().render_frame(&mut surface, &PortalPair::default(), &camera);
        assert!(surface.stencil.iter().all(|&value| value == 0));
        assert!(surface
            .color
            .iter()
            .all(|color| *color == Some(camera.transform.translation)));
    }

    #[test]
    fn compare_functions() {
        assert!(CompareFunc::Always.passes(3, 1));
        assert!(CompareFunc::Less.passes(0.5, 0.9));
        assert!(!CompareFunc::Less.passes(0.9, 0.9));
        assert!(CompareFunc::LessOrEqual.passes(1, 1));
        assert!(CompareFunc::NotEqual.passes(0, 1));
        assert!(!CompareFunc::Equal.passes(2, 1));
    }
}
