//! Surface used to run the portal renderer on top of bevy's render graph.
//!
//! bevy has no raw stencil state, so instead of masking pixels this surface follows the
//! renderer's commands and records which camera draws the view seen through each outermost
//! portal. Those cameras render to textures, and the portal meshes sample them in screen space,
//! which gives the same pixels the stencil mask would select.
//!
//! Portals seen through a portal are only recorded when the recursion reaches them. Their meshes
//! sample the texture their own camera drew the frame before.

use super::{
    entity::PortalColor,
    geometry::ViewCamera,
    render::{CompareFunc, DrawSubset, StencilOp, StencilSurface},
};

/// Stencil value of pixels seen through exactly one portal.
const FIRST_LEVEL: u8 = 1;

#[derive(Debug, Clone, Default)]
pub struct ViewCompositor {
    stencil_test: bool,
    stencil_func: Option<(CompareFunc, u8)>,
    increments: bool,
    color_mask: bool,
    /// Portal whose opening is currently marked on the main view.
    outermost: Option<PortalColor>,
    views: [Option<ViewCamera>; 2],
    /// `nested[outer][inner]`: the `inner` portal is marked inside the view through `outer`.
    nested: [[bool; 2]; 2],
}

impl ViewCompositor {
    /// Camera showing what lies behind the `color` portal this frame, if it is on screen.
    pub fn view(&self, color: PortalColor) -> Option<&ViewCamera> {
        self.views[color.index()].as_ref()
    }

    /// Portals seen through the `color` portal whose own view gets drawn this frame.
    pub fn nested_views(&self, color: PortalColor) -> impl Iterator<Item = PortalColor> + '_ {
        PortalColor::ALL
            .into_iter()
            .filter(move |inner| self.nested[color.index()][inner.index()])
    }

    fn marks_level(&self, level: u8) -> bool {
        self.stencil_test
            && self.increments
            && self.stencil_func == Some((CompareFunc::NotEqual, level))
    }

    fn selects_first_level(&self) -> bool {
        self.stencil_test
            && matches!(
                self.stencil_func,
                Some((CompareFunc::Equal | CompareFunc::LessOrEqual, FIRST_LEVEL))
            )
    }
}

impl StencilSurface for ViewCompositor {
    fn clear(&mut self) {
        *self = ViewCompositor {
            color_mask: true,
            ..ViewCompositor::default()
        };
    }

    fn clear_depth(&mut self) {}

    fn color_mask(&mut self, enabled: bool) {
        self.color_mask = enabled;
    }

    fn depth_mask(&mut self, _enabled: bool) {}

    fn depth_test(&mut self, _enabled: bool) {}

    fn depth_func(&mut self, _func: CompareFunc) {}

    fn stencil_test(&mut self, enabled: bool) {
        self.stencil_test = enabled;
    }

    fn stencil_func(&mut self, func: CompareFunc, reference: u8, _mask: u8) {
        self.stencil_func = Some((func, reference));
    }

    fn stencil_op(&mut self, stencil_fail: StencilOp, _depth_fail: StencilOp, _pass: StencilOp) {
        self.increments = stencil_fail == StencilOp::Increment;
    }

    fn stencil_write_mask(&mut self, _mask: u8) {}

    fn draw(&mut self, camera: &ViewCamera, subset: DrawSubset) {
        match subset {
            DrawSubset::Silhouette(color) if self.marks_level(0) => {
                self.outermost = Some(color);
            }
            DrawSubset::Silhouette(color) if self.marks_level(FIRST_LEVEL) => {
                if let Some(outer) = self.outermost {
                    self.nested[outer.index()][color.index()] = true;
                }
            }
            DrawSubset::Scene if self.color_mask && self.selects_first_level() => {
                if let Some(color) = self.outermost {
                    self.views[color.index()] = Some(*camera);
                }
            }
            _ => {}
        }
    }
}
