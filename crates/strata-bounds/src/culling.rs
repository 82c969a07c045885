//! Plane-based culling volumes in f64 world space.
//!
//! A [`CullingVolume`] is a set of inward-facing planes. Volumes are tested
//! against it with a [`PlaneMask`] so that a child can skip every plane its
//! parent was already found to be completely inside of.

use glam::DVec3;

/// Result of testing a bounding volume against a plane or a set of planes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intersection {
    /// The volume is entirely on the inner side.
    Inside,
    /// The volume is entirely on the outer side.
    Outside,
    /// The volume straddles the plane.
    Intersecting,
}

/// A plane in Hessian normal form.
///
/// `normal.dot(point) + distance >= 0` means the point is on the inner side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    /// Unit normal pointing toward the inside of the volume.
    pub normal: DVec3,
    /// Signed distance term.
    pub distance: f64,
}

impl Plane {
    /// Create a plane from a normal and distance term. The normal is normalized.
    pub fn new(normal: DVec3, distance: f64) -> Self {
        let length = normal.length();
        if length > 0.0 {
            Self {
                normal: normal / length,
                distance: distance / length,
            }
        } else {
            Self { normal, distance }
        }
    }

    /// Build the plane through `point` with the given inward `normal`.
    pub fn from_point_normal(point: DVec3, normal: DVec3) -> Self {
        let normal = normal.normalize_or_zero();
        Self {
            normal,
            distance: -normal.dot(point),
        }
    }

    /// Signed distance from the plane to `point`. Positive is inside.
    pub fn signed_distance(&self, point: DVec3) -> f64 {
        self.normal.dot(point) + self.distance
    }
}

/// Bit set recording which planes of a [`CullingVolume`] a volume straddles.
///
/// A cleared bit means the volume is known to be fully inside that plane, so
/// descendants contained in the volume never have to test it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaneMask(pub u32);

impl PlaneMask {
    /// Entirely outside at least one plane.
    pub const OUTSIDE: PlaneMask = PlaneMask(0xffff_ffff);
    /// Entirely inside every plane.
    pub const INSIDE: PlaneMask = PlaneMask(0);
    /// Nothing known yet; every plane must be tested.
    pub const INDETERMINATE: PlaneMask = PlaneMask(0x7fff_ffff);

    /// Whether the mask says the volume is outside.
    pub fn is_outside(self) -> bool {
        self == Self::OUTSIDE
    }
}

impl Default for PlaneMask {
    fn default() -> Self {
        Self::INDETERMINATE
    }
}

/// Anything that can classify itself against a single plane.
pub trait PlaneTest {
    /// Classify this volume against `plane`.
    fn intersect_plane(&self, plane: &Plane) -> Intersection;
}

/// A convex volume bounded by inward-facing planes, typically a view frustum.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CullingVolume {
    planes: Vec<Plane>,
}

impl CullingVolume {
    /// Create a culling volume from arbitrary planes.
    pub fn from_planes(planes: Vec<Plane>) -> Self {
        Self { planes }
    }

    /// Build the six planes of a perspective frustum.
    ///
    /// Planes are ordered left, right, bottom, top, near, far. `direction` and
    /// `up` must be orthogonal unit vectors.
    pub fn from_perspective(
        position: DVec3,
        direction: DVec3,
        up: DVec3,
        fov_y: f64,
        aspect_ratio: f64,
        near: f64,
        far: f64,
    ) -> Self {
        let top = near * (fov_y * 0.5).tan();
        let bottom = -top;
        let right = top * aspect_ratio;
        let left = -right;

        let right_axis = direction.cross(up).normalize_or_zero();
        let near_center = position + direction * near;
        let far_center = position + direction * far;

        let edge = |offset: DVec3| (near_center + offset - position).normalize_or_zero();

        let left_normal = edge(right_axis * left).cross(up);
        let right_normal = up.cross(edge(right_axis * right));
        let bottom_normal = right_axis.cross(edge(up * bottom));
        let top_normal = edge(up * top).cross(right_axis);

        Self {
            planes: vec![
                Plane::from_point_normal(position, left_normal),
                Plane::from_point_normal(position, right_normal),
                Plane::from_point_normal(position, bottom_normal),
                Plane::from_point_normal(position, top_normal),
                Plane::from_point_normal(near_center, direction),
                Plane::from_point_normal(far_center, -direction),
            ],
        }
    }

    /// The planes of this volume.
    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    /// Classify `volume` against every plane.
    pub fn compute_visibility(&self, volume: &impl PlaneTest) -> Intersection {
        let mut intersecting = false;
        for plane in &self.planes {
            match volume.intersect_plane(plane) {
                Intersection::Outside => return Intersection::Outside,
                Intersection::Intersecting => intersecting = true,
                Intersection::Inside => {}
            }
        }
        if intersecting {
            Intersection::Intersecting
        } else {
            Intersection::Inside
        }
    }

    /// Classify `volume`, skipping the planes `parent_mask` marks as already
    /// fully inside. Returns the mask to hand to contained volumes.
    pub fn compute_visibility_with_plane_mask(
        &self,
        volume: &impl PlaneTest,
        parent_mask: PlaneMask,
    ) -> PlaneMask {
        if parent_mask == PlaneMask::OUTSIDE || parent_mask == PlaneMask::INSIDE {
            return parent_mask;
        }

        let mut mask = PlaneMask::INSIDE.0;
        for (k, plane) in self.planes.iter().enumerate() {
            let flag = if k < 31 { 1u32 << k } else { 0 };
            if k < 31 && parent_mask.0 & flag == 0 {
                continue;
            }
            match volume.intersect_plane(plane) {
                Intersection::Outside => return PlaneMask::OUTSIDE,
                Intersection::Intersecting => mask |= flag,
                Intersection::Inside => {}
            }
        }
        PlaneMask(mask)
    }
}
