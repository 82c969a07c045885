//! Geographic bounding regions.
//!
//! A region is a longitude/latitude rectangle (radians) extruded between two
//! heights above the WGS84 ellipsoid. Culling and distance queries go through
//! an oriented box fitted to the region in its local east-north-up frame.

use std::f64::consts::{PI, TAU};

use glam::DVec3;

use crate::culling::{Intersection, Plane, PlaneTest};
use crate::ellipsoid::Ellipsoid;
use crate::oriented_box::OrientedBoundingBox;
use crate::sphere::BoundingSphere;

/// Samples per side when fitting the box to the curved region.
const FIT_SAMPLES: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingRegion {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
    pub minimum_height: f64,
    pub maximum_height: f64,
    oriented_box: OrientedBoundingBox,
}

impl BoundingRegion {
    pub fn new(
        west: f64,
        south: f64,
        east: f64,
        north: f64,
        minimum_height: f64,
        maximum_height: f64,
    ) -> Self {
        let oriented_box = fit_box(west, south, east, north, minimum_height, maximum_height);
        Self {
            west,
            south,
            east,
            north,
            minimum_height,
            maximum_height,
            oriented_box,
        }
    }

    /// Parse a `[west, south, east, north, minHeight, maxHeight]` header array.
    pub fn from_array(values: &[f64; 6]) -> Self {
        Self::new(
            values[0], values[1], values[2], values[3], values[4], values[5],
        )
    }

    /// Longitudinal extent, wrapping across the antimeridian when east < west.
    pub fn width(&self) -> f64 {
        longitude_span(self.west, self.east)
    }

    /// The box fitted to the region.
    pub fn oriented_box(&self) -> &OrientedBoundingBox {
        &self.oriented_box
    }

    pub fn center(&self) -> DVec3 {
        self.oriented_box.center
    }

    pub fn distance_to(&self, point: DVec3) -> f64 {
        self.oriented_box.distance_to(point)
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        self.oriented_box.bounding_sphere()
    }
}

impl PlaneTest for BoundingRegion {
    fn intersect_plane(&self, plane: &Plane) -> Intersection {
        self.oriented_box.intersect_plane(plane)
    }
}

fn longitude_span(west: f64, east: f64) -> f64 {
    if east < west { east - west + TAU } else { east - west }
}

fn fit_box(
    west: f64,
    south: f64,
    east: f64,
    north: f64,
    minimum_height: f64,
    maximum_height: f64,
) -> OrientedBoundingBox {
    let ellipsoid = Ellipsoid::WGS84;
    let width = longitude_span(west, east);
    let mut center_longitude = west + width * 0.5;
    if center_longitude > PI {
        center_longitude -= TAU;
    }
    let center_latitude = (south + north) * 0.5;
    let anchor = ellipsoid.cartographic_to_cartesian(center_longitude, center_latitude, 0.0);
    let enu = ellipsoid.east_north_up_to_fixed_frame(anchor);
    let to_local = enu.inverse();

    let mut min = DVec3::splat(f64::INFINITY);
    let mut max = DVec3::splat(f64::NEG_INFINITY);
    let steps = (FIT_SAMPLES - 1) as f64;
    for i in 0..FIT_SAMPLES {
        let longitude = west + width * (i as f64 / steps);
        for j in 0..FIT_SAMPLES {
            let latitude = south + (north - south) * (j as f64 / steps);
            for height in [minimum_height, maximum_height] {
                let world = ellipsoid.cartographic_to_cartesian(longitude, latitude, height);
                let local = to_local.transform_point3(world);
                min = min.min(local);
                max = max.max(local);
            }
        }
    }

    OrientedBoundingBox::from_min_max(min, max).transformed(&enu)
}
