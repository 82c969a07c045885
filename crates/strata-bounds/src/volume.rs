//! Tagged bounding volume headers and the closed [`BoundingVolume`] enum.

use glam::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

use crate::culling::{CullingVolume, Intersection, Plane, PlaneMask, PlaneTest};
use crate::error::BoundsError;
use crate::oriented_box::OrientedBoundingBox;
use crate::region::BoundingRegion;
use crate::sphere::BoundingSphere;

/// Bounding volume as it appears in a tileset document. When more than one
/// tag is present, `box` wins over `region`, which wins over `sphere`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingVolumeHeader {
    #[serde(rename = "box", default, skip_serializing_if = "Option::is_none")]
    pub oriented_box: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sphere: Option<Vec<f64>>,
}

impl BoundingVolumeHeader {
    pub fn from_box(values: [f64; 12]) -> Self {
        Self {
            oriented_box: Some(values.to_vec()),
            ..Self::default()
        }
    }

    pub fn from_region(values: [f64; 6]) -> Self {
        Self {
            region: Some(values.to_vec()),
            ..Self::default()
        }
    }

    pub fn from_sphere(values: [f64; 4]) -> Self {
        Self {
            sphere: Some(values.to_vec()),
            ..Self::default()
        }
    }
}

fn fixed<const N: usize>(kind: &'static str, values: &[f64]) -> Result<[f64; N], BoundsError> {
    let array: [f64; N] = values.try_into().map_err(|_| BoundsError::InvalidLength {
        kind,
        expected: N,
        actual: values.len(),
    })?;
    if array.iter().any(|v| !v.is_finite()) {
        return Err(BoundsError::NonFinite { kind });
    }
    Ok(array)
}

/// A bounding volume in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BoundingVolume {
    Sphere(BoundingSphere),
    OrientedBox(OrientedBoundingBox),
    /// Regions are already in world space and ignore tile transforms.
    Region(BoundingRegion),
}

impl BoundingVolume {
    /// Parse a header into a volume in the header's own (untransformed) space.
    pub fn from_header_local(header: &BoundingVolumeHeader) -> Result<Self, BoundsError> {
        if let Some(values) = &header.oriented_box {
            let array = fixed::<12>("box", values)?;
            return Ok(Self::OrientedBox(OrientedBoundingBox::from_array(&array)));
        }
        if let Some(values) = &header.region {
            let array = fixed::<6>("region", values)?;
            return Ok(Self::Region(BoundingRegion::from_array(&array)));
        }
        if let Some(values) = &header.sphere {
            let array = fixed::<4>("sphere", values)?;
            return Ok(Self::Sphere(BoundingSphere::from_array(&array)));
        }
        Err(BoundsError::MissingVolume)
    }

    /// Parse a header and place it with `transform`.
    pub fn from_header(
        header: &BoundingVolumeHeader,
        transform: &DMat4,
    ) -> Result<Self, BoundsError> {
        Ok(Self::from_header_local(header)?.transformed(transform))
    }

    pub fn transformed(&self, transform: &DMat4) -> Self {
        match self {
            Self::Sphere(sphere) => Self::Sphere(sphere.transformed(transform)),
            Self::OrientedBox(obb) => Self::OrientedBox(obb.transformed(transform)),
            Self::Region(region) => Self::Region(*region),
        }
    }

    /// Overwrite this volume with `local` placed by `transform`.
    pub fn update_from(&mut self, local: &BoundingVolume, transform: &DMat4) {
        *self = local.transformed(transform);
    }

    pub fn center(&self) -> DVec3 {
        match self {
            Self::Sphere(sphere) => sphere.center,
            Self::OrientedBox(obb) => obb.center,
            Self::Region(region) => region.center(),
        }
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        match self {
            Self::Sphere(sphere) => *sphere,
            Self::OrientedBox(obb) => obb.bounding_sphere(),
            Self::Region(region) => region.bounding_sphere(),
        }
    }

    /// Distance from the camera position to the volume, zero when inside.
    pub fn distance_to_camera(&self, position: DVec3) -> f64 {
        match self {
            Self::Sphere(sphere) => sphere.distance_to(position),
            Self::OrientedBox(obb) => obb.distance_to(position),
            Self::Region(region) => region.distance_to(position),
        }
    }

    /// Classify against the culling volume using the parent's plane mask.
    pub fn compute_visibility_with_plane_mask(
        &self,
        culling: &CullingVolume,
        parent_mask: PlaneMask,
    ) -> PlaneMask {
        culling.compute_visibility_with_plane_mask(self, parent_mask)
    }

    pub fn compute_visible(&self, culling: &CullingVolume) -> Intersection {
        culling.compute_visibility(self)
    }

    /// The oriented box behind a box or region volume.
    pub fn as_oriented_box(&self) -> Option<&OrientedBoundingBox> {
        match self {
            Self::Sphere(_) => None,
            Self::OrientedBox(obb) => Some(obb),
            Self::Region(region) => Some(region.oriented_box()),
        }
    }
}

impl PlaneTest for BoundingVolume {
    fn intersect_plane(&self, plane: &Plane) -> Intersection {
        match self {
            Self::Sphere(sphere) => sphere.intersect_plane(plane),
            Self::OrientedBox(obb) => obb.intersect_plane(plane),
            Self::Region(region) => region.intersect_plane(plane),
        }
    }
}
