//! Synthetic tile tree and camera flight for the demo.

use glam::DVec3;
use strata_tiles::{BoundingVolumeHeader, CameraState, TileHeader, TilesetDescriptor};

/// Error of the whole synthetic tileset.
const TILESET_ERROR: f64 = 1024.0;

/// A flat quadtree over `[-extent, extent]²` with `levels` levels below the
/// root. Each level halves the geometric error; leaves have none.
pub fn quadtree(extent: f64, levels: u32) -> TilesetDescriptor {
    let root = quadtree_node(DVec3::ZERO, extent, TILESET_ERROR * 0.5, 0, (0, 0), levels);
    TilesetDescriptor::new(TILESET_ERROR, root)
}

fn quadtree_node(center: DVec3, half: f64, error: f64, level: u32, (x, y): (u32, u32), levels: u32) -> TileHeader {
    let thickness = (half * 0.05).max(1.0);
    let volume = BoundingVolumeHeader::from_box([
        center.x, center.y, center.z, half, 0.0, 0.0, 0.0, half, 0.0, 0.0, 0.0, thickness,
    ]);
    let geometric_error = if level == levels { 0.0 } else { error };
    let mut header = TileHeader::new(volume, geometric_error).with_content(format!("tiles/{level}/{x}/{y}.b3dm"));
    if level < levels {
        let quarter = half * 0.5;
        for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            let offset = DVec3::new(
                if dx == 0 { -quarter } else { quarter },
                if dy == 0 { -quarter } else { quarter },
                0.0,
            );
            header = header.with_child(quadtree_node(
                center + offset,
                quarter,
                error * 0.5,
                level + 1,
                (x * 2 + dx, y * 2 + dy),
                levels,
            ));
        }
    }
    header
}

/// A circular flight over the ground plane, looking ahead and down.
#[derive(Clone, Copy, Debug)]
pub struct FlightPath {
    pub radius: f64,
    pub altitude: f64,
    pub speed: f64,
    pub fov_y: f64,
}

impl FlightPath {
    /// Camera at `time` seconds into the flight.
    pub fn camera_at(&self, time: f64) -> CameraState {
        let angle = if self.radius > 0.0 { self.speed * time / self.radius } else { 0.0 };
        let (sin, cos) = angle.sin_cos();
        let position = DVec3::new(self.radius * cos, self.radius * sin, self.altitude);
        let heading = DVec3::new(-sin, cos, 0.0);
        let target = position + heading * (self.altitude * 2.0) - DVec3::Z * self.altitude;
        CameraState::look_at(position, target, DVec3::Z, self.fov_y)
    }
}
