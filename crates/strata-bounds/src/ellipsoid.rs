//! Minimal WGS84 ellipsoid math for placing geographic regions in space.

use glam::{DMat4, DVec3, DVec4};

/// An ellipsoid centered at the origin with per-axis radii.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ellipsoid {
    pub radii: DVec3,
}

impl Ellipsoid {
    /// The WGS84 reference ellipsoid in meters.
    pub const WGS84: Ellipsoid = Ellipsoid {
        radii: DVec3::new(6_378_137.0, 6_378_137.0, 6_356_752.314_245_179),
    };

    /// Surface normal for a geodetic longitude and latitude in radians.
    pub fn geodetic_surface_normal(longitude: f64, latitude: f64) -> DVec3 {
        let cos_lat = latitude.cos();
        DVec3::new(
            cos_lat * longitude.cos(),
            cos_lat * longitude.sin(),
            latitude.sin(),
        )
        .normalize()
    }

    /// Surface normal at a Cartesian position on (or near) the surface.
    pub fn surface_normal_at(&self, position: DVec3) -> DVec3 {
        let inverse_squared = DVec3::ONE / (self.radii * self.radii);
        (position * inverse_squared).normalize_or_zero()
    }

    /// Convert longitude/latitude (radians) and height (meters) to Cartesian.
    pub fn cartographic_to_cartesian(&self, longitude: f64, latitude: f64, height: f64) -> DVec3 {
        let n = Self::geodetic_surface_normal(longitude, latitude);
        let k = self.radii * self.radii * n;
        let gamma = n.dot(k).sqrt();
        k / gamma + n * height
    }

    /// Local east-north-up frame at `origin`, as a transform to world space.
    pub fn east_north_up_to_fixed_frame(&self, origin: DVec3) -> DMat4 {
        let up = self.surface_normal_at(origin);
        let east = if up.x.abs() < 1e-14 && up.y.abs() < 1e-14 {
            // At a pole: pick a stable east.
            DVec3::Y
        } else {
            DVec3::new(-origin.y, origin.x, 0.0).normalize()
        };
        let north = up.cross(east);
        DMat4::from_cols(
            east.extend(0.0),
            north.extend(0.0),
            up.extend(0.0),
            DVec4::new(origin.x, origin.y, origin.z, 1.0),
        )
    }
}
