//! Transform math shared by the portal systems: portal to portal frame changes, clip planes,
//! oblique projections and frustum tests.

use std::f32::consts::PI;

use bevy::{math::Vec4Swizzles, prelude::*};

/// Distance below which a near plane normal is considered degenerate.
const DEGENERATE_PLANE: f32 = 1e-6;

/// Half turn around the local vertical axis. Two linked portals face each other, so whatever goes
/// in through the front of one comes out of the front of the other.
pub fn half_turn() -> Mat4 {
    Mat4::from_rotation_y(PI)
}

/// Return a copy of the transform with a renormalized rotation, as required before composing
/// matrices.
pub fn normalized(transform: &Transform) -> Transform {
    Transform {
        rotation: transform.rotation.normalize(),
        ..*transform
    }
}

/// Transformation mapping the frame of `source` onto the frame of `destination`, flipped by a
/// half turn.
pub fn portal_to_portal(source: &Transform, destination: &Transform) -> Transform {
    let matrix = normalized(destination).compute_matrix()
        * half_turn()
        * normalized(source).compute_matrix().inverse();
    normalized(&Transform::from_matrix(matrix))
}

/// Carry `object` through the `source` portal, returning its pose relative to `destination`.
pub fn through_portal(source: &Transform, destination: &Transform, object: &Transform) -> Transform {
    normalized(&(portal_to_portal(source, destination) * normalized(object)))
}

/// Signed distance of `point` from the plane of `pose`, positive on its outward (local +Z) side.
pub fn signed_distance(pose: &Transform, point: Vec3) -> f32 {
    (point - pose.translation).dot(pose.back())
}

/// Homogeneous plane equation of a pose's local XY plane, the normal being the outward normal.
pub fn plane_of(pose: &Transform) -> Vec4 {
    let normal = pose.back();
    Vec4::from((normal, -normal.dot(pose.translation)))
}

/// Express a world space plane in the view space of a camera placed at `camera`.
pub fn plane_to_view_space(plane: Vec4, camera: &Transform) -> Vec4 {
    // Planes transform by the inverse transpose of the point transform. The view matrix is the
    // inverse of the camera matrix, so this boils down to the transposed camera matrix.
    let view_plane = normalized(camera).compute_matrix().transpose() * plane;
    let length = view_plane.xyz().length();
    if length > DEGENERATE_PLANE {
        view_plane / length
    } else {
        view_plane
    }
}

/// Replace the near plane of a reversed-Z perspective projection with an arbitrary view space
/// plane. Points kept by the projection satisfy `clip_plane · p >= 0`.
///
/// Math from Eric Lengyel, "Oblique View Frustum Depth Projection and Clipping", adapted to the
/// reversed depth range bevy uses, where the near plane is `w - z >= 0` and the far plane
/// `z >= 0`.
pub fn oblique_projection(projection: Mat4, clip_plane: Vec4) -> Mat4 {
    let w_row = projection.row(3);
    // Corner of the far plane opposite to the clip plane.
    let far_corner = projection.inverse()
        * Vec4::new(clip_plane.x.signum(), clip_plane.y.signum(), 0., 1.);
    let denominator = clip_plane.dot(far_corner);
    if denominator.abs() < f32::EPSILON {
        return projection;
    }
    let scale = w_row.dot(far_corner) / denominator;
    let depth_row = w_row - clip_plane * scale;

    let mut oblique = projection;
    oblique.x_axis.z = depth_row.x;
    oblique.y_axis.z = depth_row.y;
    oblique.z_axis.z = depth_row.z;
    oblique.w_axis.z = depth_row.w;
    oblique
}

/// A camera as seen by the portal renderer: a world pose and a projection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewCamera {
    pub transform: Transform,
    pub fov: f32,
    pub aspect_ratio: f32,
    pub near: f32,
    /// View space clip plane replacing the near plane, if any.
    pub clip_plane: Option<Vec4>,
    pub projection: Mat4,
}

impl ViewCamera {
    /// Standard reversed-Z infinite perspective camera, matching bevy's `PerspectiveProjection`.
    pub fn perspective(transform: Transform, fov: f32, aspect_ratio: f32, near: f32) -> Self {
        ViewCamera {
            transform: normalized(&transform),
            fov,
            aspect_ratio,
            near,
            clip_plane: None,
            projection: Mat4::perspective_infinite_reverse_rh(fov, aspect_ratio, near),
        }
    }

    /// Same lens placed somewhere else, with the default near plane.
    pub fn moved_to(&self, transform: Transform) -> Self {
        ViewCamera::perspective(transform, self.fov, self.aspect_ratio, self.near)
    }

    /// Clip everything behind the given world space plane.
    pub fn with_clip_plane(mut self, world_plane: Vec4) -> Self {
        let clip_plane = plane_to_view_space(world_plane, &self.transform);
        self.clip_plane = Some(clip_plane);
        self.projection = oblique_projection(self.projection, clip_plane);
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.transform.compute_matrix().inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view_matrix()
    }

    pub fn frustum(&self) -> Frustum {
        Frustum::from_view_projection(self.view_projection())
    }
}

/// Set of world space planes bounding what a camera can see. A point `p` is inside a plane when
/// `plane · (p, 1) >= 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frustum {
    planes: Vec<Vec4>,
}

impl Frustum {
    /// Extract the side and near planes of a reversed-Z view projection matrix. The far plane
    /// sits at infinity and is skipped, as is any plane degenerating to a zero normal.
    pub fn from_view_projection(view_projection: Mat4) -> Self {
        let [x, y, z, w] = [0, 1, 2, 3].map(|i| view_projection.row(i));
        let planes = [w + x, w - x, w + y, w - y, w - z]
            .into_iter()
            .filter_map(|plane| {
                let length = plane.xyz().length();
                (length > DEGENERATE_PLANE).then(|| plane / length)
            })
            .collect();
        Frustum { planes }
    }

    /// Conservative test for a convex polygon: it is rejected only when all of its points lie
    /// outside one of the planes.
    pub fn intersects_polygon(&self, points: &[Vec3]) -> bool {
        self.planes.iter().all(|plane| {
            points
                .iter()
                .any(|point| plane.dot(Vec4::from((*point, 1.))) >= 0.)
        })
    }
}
