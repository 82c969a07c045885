//! Oriented bounding boxes.

use glam::{DMat3, DMat4, DVec3};

use crate::culling::{Intersection, Plane, PlaneTest};
use crate::sphere::BoundingSphere;

/// Slack allowed on each axis by point containment.
const CONTAINMENT_EPSILON: f64 = 1e-8;

/// A box given by its center and three half-axis vectors (the columns of
/// `half_axes`). The axes are usually orthogonal but need not be unit length.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OrientedBoundingBox {
    pub center: DVec3,
    pub half_axes: DMat3,
}

impl OrientedBoundingBox {
    pub fn new(center: DVec3, half_axes: DMat3) -> Self {
        Self { center, half_axes }
    }

    /// Parse the 12-number header form: center followed by the x, y and z
    /// half-axis vectors.
    pub fn from_array(values: &[f64; 12]) -> Self {
        let center = DVec3::new(values[0], values[1], values[2]);
        let x = DVec3::new(values[3], values[4], values[5]);
        let y = DVec3::new(values[6], values[7], values[8]);
        let z = DVec3::new(values[9], values[10], values[11]);
        Self::new(center, DMat3::from_cols(x, y, z))
    }

    /// An axis-aligned box spanning `min..max`.
    pub fn from_min_max(min: DVec3, max: DVec3) -> Self {
        let half = (max - min) * 0.5;
        Self::new(min + half, DMat3::from_diagonal(half))
    }

    pub fn transformed(&self, transform: &DMat4) -> Self {
        let linear = DMat3::from_mat4(*transform);
        Self::new(
            transform.transform_point3(self.center),
            linear * self.half_axes,
        )
    }

    /// The three half-axis vectors.
    pub fn axes(&self) -> [DVec3; 3] {
        [
            self.half_axes.x_axis,
            self.half_axes.y_axis,
            self.half_axes.z_axis,
        ]
    }

    /// Unit directions and half-lengths of the box axes. Degenerate axes are
    /// replaced by a direction perpendicular to the others with zero extent.
    fn frame(&self) -> [(DVec3, f64); 3] {
        let axes = self.axes();
        let mut out = [(DVec3::ZERO, 0.0); 3];
        for (slot, axis) in out.iter_mut().zip(axes) {
            let length = axis.length();
            if length > 0.0 {
                *slot = (axis / length, length);
            }
        }

        let mut degenerate = [0usize; 3];
        let mut count = 0;
        for i in (0..3).filter(|&i| out[i].1 == 0.0) {
            degenerate[count] = i;
            count += 1;
        }
        match count {
            0 => {}
            1 => {
                let i = degenerate[0];
                let a = out[(i + 1) % 3].0;
                let b = out[(i + 2) % 3].0;
                out[i].0 = a.cross(b).normalize_or_zero();
            }
            2 => {
                let keep = 3 - degenerate[0] - degenerate[1];
                let dir = out[keep].0;
                let other = dir.any_orthonormal_vector();
                out[degenerate[0]].0 = other;
                out[degenerate[1]].0 = dir.cross(other);
            }
            _ => {
                out[0].0 = DVec3::X;
                out[1].0 = DVec3::Y;
                out[2].0 = DVec3::Z;
            }
        }
        out
    }

    /// Squared distance from `point` to the box, zero when inside.
    pub fn distance_squared_to(&self, point: DVec3) -> f64 {
        let offset = point - self.center;
        let mut distance_squared = 0.0;
        for (direction, half_length) in self.frame() {
            let d = offset.dot(direction);
            if d < -half_length {
                let excess = d + half_length;
                distance_squared += excess * excess;
            } else if d > half_length {
                let excess = d - half_length;
                distance_squared += excess * excess;
            }
        }
        distance_squared
    }

    pub fn distance_to(&self, point: DVec3) -> f64 {
        self.distance_squared_to(point).sqrt()
    }

    /// Whether `point` is inside or on the box.
    pub fn contains_point(&self, point: DVec3) -> bool {
        let offset = point - self.center;
        self.frame()
            .iter()
            .all(|(direction, half_length)| {
                offset.dot(*direction).abs() <= half_length + CONTAINMENT_EPSILON
            })
    }

    /// Half the extent of the box projected onto `direction` (a unit vector).
    pub fn projected_radius(&self, direction: DVec3) -> f64 {
        let [u, v, w] = self.axes();
        u.dot(direction).abs() + v.dot(direction).abs() + w.dot(direction).abs()
    }

    /// The smallest sphere centered on the box that encloses it.
    pub fn bounding_sphere(&self) -> BoundingSphere {
        let [u, v, w] = self.axes();
        let radius = (u.length_squared() + v.length_squared() + w.length_squared()).sqrt();
        BoundingSphere::new(self.center, radius)
    }
}

impl PlaneTest for OrientedBoundingBox {
    fn intersect_plane(&self, plane: &Plane) -> Intersection {
        let effective_radius = self.projected_radius(plane.normal);
        let d = plane.signed_distance(self.center);
        if d <= -effective_radius {
            Intersection::Outside
        } else if d >= effective_radius {
            Intersection::Inside
        } else {
            Intersection::Intersecting
        }
    }
}
