//! Per-frame camera snapshot consumed by traversal.

use glam::DVec3;
use strata_bounds::CullingVolume;

/// Camera parameters for one frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    /// World position of the camera.
    pub position: DVec3,
    /// Unit view direction.
    pub direction: DVec3,
    /// Unit up vector, orthogonal to `direction`.
    pub up: DVec3,
    /// Vertical field of view in radians.
    pub fov_y: f64,
    /// Viewport width over height.
    pub aspect_ratio: f64,
    /// Near plane distance.
    pub near: f64,
    /// Far plane distance.
    pub far: f64,
}

impl CameraState {
    /// Camera at `position` looking at `target`, keeping `up` as close to
    /// the given hint as possible.
    pub fn look_at(position: DVec3, target: DVec3, up_hint: DVec3, fov_y: f64) -> Self {
        let direction = (target - position).normalize_or_zero();
        let right = direction.cross(up_hint).normalize_or_zero();
        let up = right.cross(direction).normalize_or_zero();
        Self {
            position,
            direction,
            up,
            fov_y,
            aspect_ratio: 1.0,
            near: 1.0,
            far: 1.0e9,
        }
    }
}

/// Read-only snapshot of everything traversal needs to know about a frame.
#[derive(Clone, Debug)]
pub struct FrameState {
    /// Monotonic frame counter, starting at 1.
    pub frame_number: u64,
    /// Seconds since the host started, used for content expiration.
    pub time: f64,
    pub camera: CameraState,
    /// Frustum planes for the camera.
    pub culling_volume: CullingVolume,
    /// Drawing buffer height in pixels.
    pub viewport_height: f64,
    /// Device pixel ratio; screen-space errors are divided by it.
    pub pixel_ratio: f64,
    /// `2 * tan(fov_y / 2)`.
    pub sse_denominator: f64,
    /// Whether the camera moved or turned since the previous frame.
    pub camera_changed: bool,
    /// Distance the camera moved since the previous frame.
    pub camera_delta_magnitude: f64,
    /// Distance the camera moved during the previous frame.
    pub camera_delta_magnitude_last_frame: f64,
    /// Seconds since the camera last moved.
    pub time_since_camera_moved: f64,
}

impl FrameState {
    /// Build a snapshot for a camera that has not moved.
    pub fn from_camera(frame_number: u64, time: f64, camera: CameraState, viewport_height: f64) -> Self {
        let culling_volume = CullingVolume::from_perspective(
            camera.position,
            camera.direction,
            camera.up,
            camera.fov_y,
            camera.aspect_ratio,
            camera.near,
            camera.far,
        );
        Self {
            frame_number,
            time,
            camera,
            culling_volume,
            viewport_height,
            pixel_ratio: 1.0,
            sse_denominator: 2.0 * (camera.fov_y * 0.5).tan(),
            camera_changed: false,
            camera_delta_magnitude: 0.0,
            camera_delta_magnitude_last_frame: 0.0,
            time_since_camera_moved: f64::INFINITY,
        }
    }
}

/// Tracks camera motion across frames and produces [`FrameState`]s.
#[derive(Clone, Debug)]
pub struct CameraTracker {
    viewport_height: f64,
    pixel_ratio: f64,
    frame_number: u64,
    previous: Option<CameraState>,
    last_delta: f64,
    last_moved_time: Option<f64>,
}

impl CameraTracker {
    pub fn new(viewport_height: f64) -> Self {
        Self {
            viewport_height,
            pixel_ratio: 1.0,
            frame_number: 0,
            previous: None,
            last_delta: 0.0,
            last_moved_time: None,
        }
    }

    pub fn with_pixel_ratio(mut self, pixel_ratio: f64) -> Self {
        self.pixel_ratio = pixel_ratio;
        self
    }

    /// Advance one frame with the camera at `camera` and the clock at `time`.
    pub fn next_frame(&mut self, camera: CameraState, time: f64) -> FrameState {
        self.frame_number += 1;
        let mut frame = FrameState::from_camera(self.frame_number, time, camera, self.viewport_height);
        frame.pixel_ratio = self.pixel_ratio;

        let (changed, delta) = match &self.previous {
            Some(previous) => (
                previous != &camera,
                previous.position.distance(camera.position),
            ),
            None => (true, 0.0),
        };
        if changed {
            self.last_moved_time = Some(time);
        }

        frame.camera_changed = changed;
        frame.camera_delta_magnitude = delta;
        frame.camera_delta_magnitude_last_frame = self.last_delta;
        frame.time_since_camera_moved = match self.last_moved_time {
            Some(moved) => time - moved,
            None => f64::INFINITY,
        };

        self.previous = Some(camera);
        self.last_delta = delta;
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_at(z: f64) -> CameraState {
        CameraState::look_at(DVec3::new(0.0, 0.0, z), DVec3::ZERO, DVec3::Y, 1.0)
    }

    /// The denominator matches 2 tan(fov/2).
    #[test]
    fn test_sse_denominator() {
        let frame = FrameState::from_camera(1, 0.0, camera_at(10.0), 600.0);
        assert!((frame.sse_denominator - 2.0 * 0.5_f64.tan()).abs() < 1e-12);
    }

    /// The first frame always counts as a camera change.
    #[test]
    fn test_first_frame_changed() {
        let mut tracker = CameraTracker::new(600.0);
        let frame = tracker.next_frame(camera_at(10.0), 0.0);
        assert_eq!(frame.frame_number, 1);
        assert!(frame.camera_changed);
        assert_eq!(frame.time_since_camera_moved, 0.0);
    }

    /// A still camera accumulates time since it last moved.
    #[test]
    fn test_still_camera_accumulates_time() {
        let mut tracker = CameraTracker::new(600.0);
        tracker.next_frame(camera_at(10.0), 0.0);
        let frame = tracker.next_frame(camera_at(10.0), 0.5);
        assert!(!frame.camera_changed);
        assert!((frame.time_since_camera_moved - 0.5).abs() < 1e-12);
        assert_eq!(frame.camera_delta_magnitude, 0.0);
    }

    /// Movement is reported for this frame and carried to the next.
    #[test]
    fn test_delta_magnitude_carries_over() {
        let mut tracker = CameraTracker::new(600.0);
        tracker.next_frame(camera_at(10.0), 0.0);
        let moved = tracker.next_frame(camera_at(14.0), 0.1);
        assert!(moved.camera_changed);
        assert!((moved.camera_delta_magnitude - 4.0).abs() < 1e-12);
        let after = tracker.next_frame(camera_at(14.0), 0.2);
        assert_eq!(after.camera_delta_magnitude, 0.0);
        assert!((after.camera_delta_magnitude_last_frame - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_pixel_ratio_carried() {
        let mut tracker = CameraTracker::new(600.0).with_pixel_ratio(2.0);
        assert_eq!(tracker.next_frame(camera_at(10.0), 0.0).pixel_ratio, 2.0);
    }
}
