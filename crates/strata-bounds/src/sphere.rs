//! Bounding spheres.

use glam::{DMat4, DVec3};

use crate::culling::{Intersection, Plane, PlaneTest};

/// A bounding sphere in f64 world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    /// Center of the sphere.
    pub center: DVec3,
    /// Radius of the sphere.
    pub radius: f64,
}

impl BoundingSphere {
    pub fn new(center: DVec3, radius: f64) -> Self {
        Self { center, radius }
    }

    /// Parse a `[cx, cy, cz, r]` header array.
    pub fn from_array(values: &[f64; 4]) -> Self {
        Self::new(DVec3::new(values[0], values[1], values[2]), values[3])
    }

    /// Transform the sphere. The radius is scaled by the largest axis scale
    /// so the result still encloses the transformed volume.
    pub fn transformed(&self, transform: &DMat4) -> Self {
        let center = transform.transform_point3(self.center);
        let scale = transform
            .x_axis
            .truncate()
            .length()
            .max(transform.y_axis.truncate().length())
            .max(transform.z_axis.truncate().length());
        Self::new(center, self.radius * scale)
    }

    /// Distance from `point` to the surface, zero when inside.
    pub fn distance_to(&self, point: DVec3) -> f64 {
        (self.center.distance(point) - self.radius).max(0.0)
    }

    /// Whether `point` lies inside or on the sphere.
    pub fn contains_point(&self, point: DVec3) -> bool {
        self.center.distance_squared(point) <= self.radius * self.radius
    }
}

impl PlaneTest for BoundingSphere {
    fn intersect_plane(&self, plane: &Plane) -> Intersection {
        let d = plane.signed_distance(self.center);
        if d < -self.radius {
            Intersection::Outside
        } else if d < self.radius {
            Intersection::Intersecting
        } else {
            Intersection::Inside
        }
    }
}
