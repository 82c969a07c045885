//! Bounding volumes and view culling for hierarchical tile streaming.
//!
//! Everything here works in f64 world space (typically Earth-centered,
//! Earth-fixed meters). Tiles carry one of three volume kinds:
//!
//! - [`BoundingSphere`]: center and radius.
//! - [`OrientedBoundingBox`]: center and three half-axis vectors.
//! - [`BoundingRegion`]: a longitude/latitude rectangle between two heights
//!   on the WGS84 [`Ellipsoid`].
//!
//! [`CullingVolume`] tests volumes against frustum planes and hands back a
//! [`PlaneMask`] so that children skip planes their parent was fully inside.

mod culling;
mod ellipsoid;
mod error;
mod oriented_box;
mod region;
mod sphere;
mod volume;

pub use culling::{CullingVolume, Intersection, Plane, PlaneMask, PlaneTest};
pub use ellipsoid::Ellipsoid;
pub use error::BoundsError;
pub use oriented_box::OrientedBoundingBox;
pub use region::BoundingRegion;
pub use sphere::BoundingSphere;
pub use volume::{BoundingVolume, BoundingVolumeHeader};
