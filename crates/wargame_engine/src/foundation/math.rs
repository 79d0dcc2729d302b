//! Math utilities and types
//!
//! Provides the nalgebra aliases used throughout the renderer, plus the projection
//! and view helpers the matrix manager builds on.

pub use nalgebra::{Matrix3, Matrix4, Quaternion, Unit, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Quaternion type for rotations
pub type Quat = Unit<Quaternion<f32>>;

/// Clip-space depth convention of a backend
///
/// GL maps the view volume to z in `[-1, 1]`, Vulkan and Direct3D to `[0, 1]`.
/// Vulkan additionally points clip-space y downwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClipSpace {
    /// OpenGL conventions
    #[default]
    NegativeOneToOne,
    /// Direct3D conventions (z in [0, 1], y up)
    ZeroToOne,
    /// Vulkan conventions (z in [0, 1], y down)
    ZeroToOneFlipY,
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;

    /// Radians to degrees conversion factor
    pub const RAD_TO_DEG: f32 = 180.0 / PI;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }

    /// Convert radians to degrees
    pub fn rad_to_deg(radians: f32) -> f32 {
        radians * constants::RAD_TO_DEG
    }

    /// Linear interpolation
    pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
        a + (b - a) * t
    }
}

/// Extension trait for Mat4 with projection and view constructors
pub trait Mat4Ext {
    /// Right-handed perspective projection for the given clip-space convention
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32, clip: ClipSpace) -> Mat4;

    /// Orthographic projection (`glOrtho` semantics, adjusted for the clip-space convention)
    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32, clip: ClipSpace) -> Mat4;

    /// Right-handed look-at view matrix (`gluLookAt` semantics)
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;

    /// Rotation of `angle` radians around an arbitrary axis; a zero axis yields identity
    fn rotation_axis(angle: f32, axis: Vec3) -> Mat4;
}

impl Mat4Ext for Mat4 {
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32, clip: ClipSpace) -> Mat4 {
        let f = 1.0 / (fov_y * 0.5).tan();
        let mut result = Mat4::zeros();
        result[(0, 0)] = f / aspect;
        result[(1, 1)] = f;
        result[(3, 2)] = -1.0;
        match clip {
            ClipSpace::NegativeOneToOne => {
                result[(2, 2)] = (far + near) / (near - far);
                result[(2, 3)] = (2.0 * far * near) / (near - far);
            }
            ClipSpace::ZeroToOne | ClipSpace::ZeroToOneFlipY => {
                result[(2, 2)] = far / (near - far);
                result[(2, 3)] = (far * near) / (near - far);
            }
        }
        if clip == ClipSpace::ZeroToOneFlipY {
            result[(1, 1)] = -f;
        }
        result
    }

    fn orthographic(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32, clip: ClipSpace) -> Mat4 {
        let mut result = Mat4::identity();
        result[(0, 0)] = 2.0 / (right - left);
        result[(1, 1)] = 2.0 / (top - bottom);
        result[(0, 3)] = -(right + left) / (right - left);
        result[(1, 3)] = -(top + bottom) / (top - bottom);
        match clip {
            ClipSpace::NegativeOneToOne => {
                result[(2, 2)] = -2.0 / (far - near);
                result[(2, 3)] = -(far + near) / (far - near);
            }
            ClipSpace::ZeroToOne | ClipSpace::ZeroToOneFlipY => {
                result[(2, 2)] = -1.0 / (far - near);
                result[(2, 3)] = -near / (far - near);
            }
        }
        if clip == ClipSpace::ZeroToOneFlipY {
            result[(1, 1)] = -result[(1, 1)];
            result[(1, 3)] = -result[(1, 3)];
        }
        result
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        let forward = (target - eye).normalize();
        let right = forward.cross(&up).normalize();
        let camera_up = right.cross(&forward);

        let rotation = Mat4::new(
            right.x, right.y, right.z, 0.0,
            camera_up.x, camera_up.y, camera_up.z, 0.0,
            -forward.x, -forward.y, -forward.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        rotation * Mat4::new_translation(&-eye)
    }

    fn rotation_axis(angle: f32, axis: Vec3) -> Mat4 {
        if axis.norm_squared() <= f32::EPSILON {
            return Mat4::identity();
        }
        Mat4::from_axis_angle(&Unit::new_normalize(axis), angle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_perspective_maps_near_and_far_planes() {
        let gl = Mat4::perspective(utils::deg_to_rad(60.0), 1.0, 1.0, 100.0, ClipSpace::NegativeOneToOne);
        let near = gl * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = gl * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, -1.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);

        let vk = Mat4::perspective(utils::deg_to_rad(60.0), 1.0, 1.0, 100.0, ClipSpace::ZeroToOne);
        let near = vk * Vec4::new(0.0, 0.0, -1.0, 1.0);
        let far = vk * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_orthographic_maps_corners() {
        let ortho = Mat4::orthographic(0.0, 800.0, 0.0, 600.0, -1.0, 1.0, ClipSpace::NegativeOneToOne);
        let corner = ortho * Vec4::new(800.0, 600.0, 0.0, 1.0);
        assert_relative_eq!(corner.x, 1.0, epsilon = 1e-6);
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-6);

        let flipped = Mat4::orthographic(0.0, 800.0, 0.0, 600.0, -1.0, 1.0, ClipSpace::ZeroToOneFlipY);
        let corner = flipped * Vec4::new(800.0, 600.0, 0.0, 1.0);
        assert_relative_eq!(corner.y, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_look_at_places_target_on_negative_z() {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros(), Vec3::y());
        let target = view.transform_point(&Point3::origin());
        assert_relative_eq!(target.z, -5.0, epsilon = 1e-6);
        assert_relative_eq!(target.x, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn test_rotation_with_zero_axis_is_identity() {
        assert_eq!(Mat4::rotation_axis(1.0, Vec3::zeros()), Mat4::identity());
    }
}
