//! # Cameras
//!
//! A [`Camera`] places the eye of a viewport. Two implementations cover the engine's needs:
//!
//! - [`FixedCamera`]: explicit position, target and up vector (shadow-map light views,
//!   cut-scenes, tests)
//! - [`OrbitCamera`]: the tabletop camera, orbiting a point on the table with yaw, pitch and a
//!   zoom scale, its translation bounded to the table
//!
//! The table lies in the x-y plane with z pointing up.

use crate::foundation::math::{utils, Mat4, Mat4Ext, Vec3};

/// Eye of a viewport
pub trait Camera {
    /// Eye position in world space
    fn position(&self) -> Vec3;

    /// Point the eye looks at
    fn target(&self) -> Vec3;

    /// Up vector of the eye
    fn up(&self) -> Vec3;

    /// Zoom factor, 1.0 when the camera does not zoom
    fn scale(&self) -> f32 {
        1.0
    }

    /// Normalized view direction
    fn direction(&self) -> Vec3 {
        let forward = self.target() - self.position();
        forward.try_normalize(f32::EPSILON).unwrap_or_else(|| Vec3::new(0.0, 0.0, -1.0))
    }

    /// World to eye transform
    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position(), self.target(), self.up())
    }
}

/// Camera with an explicit eye placement
#[derive(Debug, Clone, PartialEq)]
pub struct FixedCamera {
    position: Vec3,
    target: Vec3,
    up: Vec3,
}

impl FixedCamera {
    /// Camera at `position` looking at `target`
    #[must_use]
    pub const fn new(position: Vec3, target: Vec3, up: Vec3) -> Self {
        Self { position, target, up }
    }

    /// Move the eye
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        log::trace!("Camera position updated to: {:?}", position);
    }

    /// Look at another point with another up vector
    pub fn look_at(&mut self, target: Vec3, up: Vec3) {
        self.target = target;
        self.up = up;
    }
}

impl Camera for FixedCamera {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn target(&self) -> Vec3 {
        self.target
    }

    fn up(&self) -> Vec3 {
        self.up
    }
}

/// Tabletop camera orbiting a point of the table
///
/// Yaw turns around the table's z axis, pitch tilts from the table plane toward the zenith.
/// The eye sits `distance / scale` away from the target, so a larger scale zooms in.
#[derive(Debug, Clone, PartialEq)]
pub struct OrbitCamera {
    target: Vec3,
    yaw: f32,
    pitch: f32,
    scale: f32,
    distance: f32,
    max_translation: (f32, f32),
    scale_range: (f32, f32),
}

impl OrbitCamera {
    const DEFAULT_YAW: f32 = 0.0;
    const DEFAULT_PITCH: f32 = 60.0;
    const DEFAULT_DISTANCE: f32 = 30.0;
    const MIN_PITCH: f32 = 1.0;
    const MAX_PITCH: f32 = 89.0;

    /// Camera whose target stays within `max_x` x `max_y` of the table center and whose scale
    /// stays within `min_scale..=max_scale`
    #[must_use]
    pub fn new(max_x: f32, max_y: f32, max_scale: f32, min_scale: f32) -> Self {
        let (low, high) = if min_scale <= max_scale { (min_scale, max_scale) } else { (max_scale, min_scale) };
        Self {
            target: Vec3::zeros(),
            yaw: Self::DEFAULT_YAW,
            pitch: Self::DEFAULT_PITCH,
            scale: 1.0_f32.clamp(low, high),
            distance: Self::DEFAULT_DISTANCE,
            max_translation: (max_x.abs(), max_y.abs()),
            scale_range: (low, high),
        }
    }

    /// Distance of the eye from the target at scale 1
    #[must_use]
    pub fn with_distance(mut self, distance: f32) -> Self {
        self.distance = distance.max(f32::EPSILON);
        self
    }

    /// Yaw in degrees
    #[must_use]
    pub const fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Pitch in degrees
    #[must_use]
    pub const fn pitch(&self) -> f32 {
        self.pitch
    }

    /// Turn by `yaw` degrees around the table normal and tilt by `pitch` degrees
    pub fn rotate(&mut self, yaw: f32, pitch: f32) {
        self.yaw = (self.yaw + yaw).rem_euclid(360.0);
        self.pitch = (self.pitch + pitch).clamp(Self::MIN_PITCH, Self::MAX_PITCH);
    }

    /// Slide the target across the table, `forward` along the view direction projected on the table
    pub fn translate(&mut self, right: f32, forward: f32) {
        let (sin, cos) = utils::deg_to_rad(self.yaw).sin_cos();
        let dx = right * cos - forward * sin;
        let dy = right * sin + forward * cos;
        let (max_x, max_y) = self.max_translation;
        self.target.x = (self.target.x + dx).clamp(-max_x, max_x);
        self.target.y = (self.target.y + dy).clamp(-max_y, max_y);
    }

    /// Multiply the scale by `factor`, within the configured range
    pub fn zoom(&mut self, factor: f32) {
        let (low, high) = self.scale_range;
        self.scale = (self.scale * factor).clamp(low, high);
    }

    /// Back to the initial placement
    pub fn reset(&mut self) {
        let (low, high) = self.scale_range;
        self.target = Vec3::zeros();
        self.yaw = Self::DEFAULT_YAW;
        self.pitch = Self::DEFAULT_PITCH;
        self.scale = 1.0_f32.clamp(low, high);
    }
}

impl Camera for OrbitCamera {
    fn position(&self) -> Vec3 {
        let (sin_yaw, cos_yaw) = utils::deg_to_rad(self.yaw).sin_cos();
        let (sin_pitch, cos_pitch) = utils::deg_to_rad(self.pitch).sin_cos();
        let distance = self.distance / self.scale;
        // the eye looks along +y at yaw 0
        self.target + Vec3::new(sin_yaw * cos_pitch, -cos_yaw * cos_pitch, sin_pitch) * distance
    }

    fn target(&self) -> Vec3 {
        self.target
    }

    fn up(&self) -> Vec3 {
        Vec3::new(0.0, 0.0, 1.0)
    }

    fn scale(&self) -> f32 {
        self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fixed_camera_direction() {
        let camera = FixedCamera::new(Vec3::new(0.0, 0.0, 10.0), Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(camera.direction(), Vec3::new(0.0, 0.0, -1.0));
        assert_eq!(camera.scale(), 1.0);
    }

    #[test]
    fn test_view_matrix_moves_target_in_front_of_eye() {
        let camera = FixedCamera::new(Vec3::new(0.0, -10.0, 10.0), Vec3::zeros(), Vec3::new(0.0, 0.0, 1.0));
        let target = camera.view_matrix().transform_point(&nalgebra::Point3::origin());
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-5);
        assert_relative_eq!(target.z, -(200.0_f32).sqrt(), epsilon = 1e-4);
    }

    #[test]
    fn test_orbit_zoom_is_clamped() {
        let mut camera = OrbitCamera::new(100.0, 100.0, 2.8, 0.5);
        camera.zoom(10.0);
        assert_relative_eq!(camera.scale(), 2.8);
        camera.zoom(0.01);
        assert_relative_eq!(camera.scale(), 0.5);
    }

    #[test]
    fn test_orbit_distance_follows_scale() {
        let mut camera = OrbitCamera::new(100.0, 100.0, 4.0, 0.25).with_distance(20.0);
        assert_relative_eq!((camera.position() - camera.target()).norm(), 20.0, epsilon = 1e-4);
        camera.zoom(2.0);
        assert_relative_eq!((camera.position() - camera.target()).norm(), 10.0, epsilon = 1e-4);
    }

    #[test]
    fn test_orbit_translation_stays_on_table() {
        let mut camera = OrbitCamera::new(10.0, 5.0, 2.0, 0.5);
        camera.translate(50.0, 50.0);
        assert_relative_eq!(camera.target(), Vec3::new(10.0, 5.0, 0.0));
        camera.reset();
        assert_relative_eq!(camera.target(), Vec3::zeros());
    }

    #[test]
    fn test_orbit_pitch_is_bounded() {
        let mut camera = OrbitCamera::new(10.0, 10.0, 2.0, 0.5);
        camera.rotate(370.0, 200.0);
        assert_relative_eq!(camera.yaw(), 10.0, epsilon = 1e-4);
        assert_relative_eq!(camera.pitch(), 89.0);
        assert!(camera.position().z > camera.target().z);
    }
}
