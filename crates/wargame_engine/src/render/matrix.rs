//! Matrix manager
//!
//! Model-view stack plus a single projection, the state every draw call consumes.
//! Transforms compose multiplicatively in call order: each one applies in the frame
//! produced by the previous ones, like the fixed-function GL matrix stack.

use crate::foundation::math::{utils, ClipSpace, Mat4, Mat4Ext, Vec3, Vec4};
use crate::render::{RenderError, RenderResult, ViewportRect};

/// Full copy of the matrix state, used to restore it bit-identically
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixSnapshot {
    model_view: Vec<Mat4>,
    projection: Mat4,
}

/// Model-view stack and projection of one renderer
#[derive(Debug, Clone)]
pub struct MatrixManager {
    model_view: Vec<Mat4>,
    projection: Mat4,
    saved: Vec<MatrixSnapshot>,
    generation: u64,
    clip: ClipSpace,
}

impl MatrixManager {
    /// Create a manager with identity matrices for the given clip-space convention
    #[must_use]
    pub fn new(clip: ClipSpace) -> Self {
        Self { model_view: vec![Mat4::identity()], projection: Mat4::identity(), saved: Vec::new(), generation: 0, clip }
    }

    /// Clip-space convention projections are built for
    #[must_use]
    pub const fn clip_space(&self) -> ClipSpace {
        self.clip
    }

    /// Counter bumped by every change to the model-view top or the projection
    ///
    /// Backends compare it against the value they last uploaded to skip redundant uniform writes.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn top_mut(&mut self) -> &mut Mat4 {
        self.touch();
        let last = self.model_view.len() - 1;
        &mut self.model_view[last]
    }

    /// Current model-view matrix
    #[must_use]
    pub fn model_view(&self) -> &Mat4 {
        &self.model_view[self.model_view.len() - 1]
    }

    /// Current projection matrix
    #[must_use]
    pub const fn projection(&self) -> &Mat4 {
        &self.projection
    }

    /// Projection times model-view
    #[must_use]
    pub fn model_view_projection(&self) -> Mat4 {
        self.projection * self.model_view()
    }

    /// Number of entries on the model-view stack (1 when balanced)
    #[must_use]
    pub fn depth(&self) -> usize {
        self.model_view.len()
    }

    /// Push a copy of the current model-view matrix
    pub fn push_matrix(&mut self) {
        let top = *self.model_view();
        self.model_view.push(top);
    }

    /// Restore the model-view matrix saved by the matching push
    ///
    /// # Errors
    /// `InvalidOperation` when there is no matching push; the stack is left untouched.
    pub fn pop_matrix(&mut self) -> RenderResult<()> {
        if self.model_view.len() <= 1 {
            return Err(RenderError::InvalidOperation("pop_matrix without matching push_matrix".to_string()));
        }
        self.model_view.pop();
        self.touch();
        Ok(())
    }

    /// Translate the current frame
    pub fn translate(&mut self, dx: f32, dy: f32, dz: f32) {
        let top = self.top_mut();
        *top *= Mat4::new_translation(&Vec3::new(dx, dy, dz));
    }

    /// Rotate the current frame by `angle` degrees around `axis`
    pub fn rotate(&mut self, angle: f32, axis: Vec3) {
        let top = self.top_mut();
        *top *= Mat4::rotation_axis(utils::deg_to_rad(angle), axis);
    }

    /// Uniformly scale the current frame
    pub fn scale(&mut self, factor: f32) {
        let top = self.top_mut();
        *top *= Mat4::new_scaling(factor);
    }

    /// Replace the current model-view with a view looking from `position` at `target`
    pub fn look_at(&mut self, position: Vec3, target: Vec3, up: Vec3) {
        *self.top_mut() = Mat4::look_at(position, target, up);
    }

    /// Replace the current model-view with identity
    pub fn reset_model_view(&mut self) {
        *self.top_mut() = Mat4::identity();
    }

    /// Replace the current model-view matrix
    pub fn set_model_view(&mut self, matrix: Mat4) {
        *self.top_mut() = matrix;
    }

    /// Replace the projection matrix
    pub fn set_projection(&mut self, matrix: Mat4) {
        self.projection = matrix;
        self.touch();
    }

    /// Perspective projection for a `width` x `height` viewport; `field_of_view` in degrees
    pub fn set_up_viewport(&mut self, width: u32, height: u32, field_of_view: f32, near: f32, far: f32) {
        let aspect = if height == 0 { 1.0 } else { width as f32 / height as f32 };
        let projection = Mat4::perspective(utils::deg_to_rad(field_of_view), aspect, near, far, self.clip);
        self.set_projection(projection);
    }

    /// Orthographic projection with `glOrtho` edges and a `[-1, 1]` depth range
    pub fn set_orthographic_projection(&mut self, left: f32, right: f32, bottom: f32, top: f32) {
        let projection = Mat4::orthographic(left, right, bottom, top, -1.0, 1.0, self.clip);
        self.set_projection(projection);
    }

    /// Full copy of the current state
    #[must_use]
    pub fn snapshot(&self) -> MatrixSnapshot {
        MatrixSnapshot { model_view: self.model_view.clone(), projection: self.projection }
    }

    /// Restore a state taken by [`snapshot`](Self::snapshot)
    pub fn restore(&mut self, snapshot: MatrixSnapshot) {
        self.model_view = snapshot.model_view;
        self.projection = snapshot.projection;
        self.touch();
    }

    /// Save the whole matrix state; pairs with [`restore_matrices`](Self::restore_matrices)
    pub fn save_matrices(&mut self) {
        let snapshot = self.snapshot();
        self.saved.push(snapshot);
    }

    /// Restore the state saved by the matching [`save_matrices`](Self::save_matrices)
    ///
    /// # Errors
    /// `InvalidOperation` when nothing was saved.
    pub fn restore_matrices(&mut self) -> RenderResult<()> {
        let snapshot = self
            .saved
            .pop()
            .ok_or_else(|| RenderError::InvalidOperation("restore_matrices without save_matrices".to_string()))?;
        self.restore(snapshot);
        Ok(())
    }
}

impl Default for MatrixManager {
    fn default() -> Self {
        Self::new(ClipSpace::default())
    }
}

fn ndc_depth(window_z: f32, clip: ClipSpace) -> f32 {
    match clip {
        ClipSpace::NegativeOneToOne => window_z * 2.0 - 1.0,
        ClipSpace::ZeroToOne | ClipSpace::ZeroToOneFlipY => window_z,
    }
}

fn ndc_y_sign(clip: ClipSpace) -> f32 {
    if clip == ClipSpace::ZeroToOneFlipY {
        -1.0
    } else {
        1.0
    }
}

/// Unproject a window point into a world-space ray `(near point, far point)`
///
/// `x` and `y` are pixels relative to the top-left corner of `rect`; window y grows downward.
/// Returns `None` when `view * projection` is not invertible.
#[must_use]
pub fn window_coords_to_world_vector(
    x: i32,
    y: i32,
    rect: ViewportRect,
    view: &Mat4,
    projection: &Mat4,
    clip: ClipSpace,
) -> Option<(Vec3, Vec3)> {
    let width = rect.width.max(1) as f32;
    let height = rect.height.max(1) as f32;
    let ndc_x = 2.0 * x as f32 / width - 1.0;
    let ndc_y = (2.0 * (height - y as f32) / height - 1.0) * ndc_y_sign(clip);
    let inverse = (projection * view).try_inverse()?;

    let unproject = |window_z: f32| {
        let world = inverse * Vec4::new(ndc_x, ndc_y, ndc_depth(window_z, clip), 1.0);
        if world.w.abs() <= f32::EPSILON {
            None
        } else {
            Some(Vec3::new(world.x / world.w, world.y / world.w, world.z / world.w))
        }
    };
    Some((unproject(0.0)?, unproject(1.0)?))
}

/// Project a world point to pixels relative to the top-left corner of `rect`
///
/// Returns `None` for points behind the camera.
#[must_use]
pub fn world_coords_to_window_coords(
    world: Vec3,
    rect: ViewportRect,
    view: &Mat4,
    projection: &Mat4,
    clip: ClipSpace,
) -> Option<(i32, i32)> {
    let clip_pos = projection * view * Vec4::new(world.x, world.y, world.z, 1.0);
    if clip_pos.w <= f32::EPSILON {
        return None;
    }
    let ndc_x = clip_pos.x / clip_pos.w;
    let ndc_y = clip_pos.y / clip_pos.w * ndc_y_sign(clip);
    let width = rect.width as f32;
    let height = rect.height as f32;
    let x = (ndc_x + 1.0) * 0.5 * width;
    let y = height - (ndc_y + 1.0) * 0.5 * height;
    Some((x.round() as i32, y.round() as i32))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_push_pop_restores_model_view() {
        let mut matrices = MatrixManager::default();
        matrices.translate(1.0, 2.0, 3.0);
        let before = *matrices.model_view();

        for i in 0..5 {
            matrices.push_matrix();
            matrices.rotate(30.0 * i as f32, Vec3::new(0.0, 0.0, 1.0));
            matrices.scale(2.0);
        }
        for _ in 0..5 {
            matrices.pop_matrix().unwrap();
        }

        assert_eq!(*matrices.model_view(), before);
        assert_eq!(matrices.depth(), 1);
    }

    #[test]
    fn test_pop_on_empty_stack_is_an_error() {
        let mut matrices = MatrixManager::default();
        assert!(matches!(matrices.pop_matrix(), Err(RenderError::InvalidOperation(_))));
        assert_eq!(matrices.depth(), 1);
    }

    #[test]
    fn test_transforms_apply_in_local_frame() {
        let mut matrices = MatrixManager::default();
        matrices.translate(10.0, 0.0, 0.0);
        matrices.rotate(90.0, Vec3::new(0.0, 0.0, 1.0));
        matrices.translate(1.0, 0.0, 0.0);

        let origin = matrices.model_view() * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(origin.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(origin.y, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_generation_tracks_changes() {
        let mut matrices = MatrixManager::default();
        let start = matrices.generation();
        matrices.push_matrix();
        assert_eq!(matrices.generation(), start);
        matrices.scale(2.0);
        assert!(matrices.generation() > start);
    }

    #[test]
    fn test_save_restore_round_trip() {
        let mut matrices = MatrixManager::default();
        matrices.set_up_viewport(800, 600, 60.0, 1.0, 1000.0);
        matrices.translate(0.0, 0.0, -5.0);
        let before = matrices.snapshot();

        matrices.save_matrices();
        matrices.set_orthographic_projection(0.0, 800.0, 600.0, 0.0);
        matrices.reset_model_view();
        matrices.restore_matrices().unwrap();

        assert_eq!(matrices.snapshot(), before);
        assert!(matrices.restore_matrices().is_err());
    }

    #[test]
    fn test_project_and_unproject_agree() {
        let rect = ViewportRect::new(0, 0, 800, 600);
        for clip in [ClipSpace::NegativeOneToOne, ClipSpace::ZeroToOne, ClipSpace::ZeroToOneFlipY] {
            let mut matrices = MatrixManager::new(clip);
            matrices.set_up_viewport(800, 600, 60.0, 1.0, 1000.0);
            let view = Mat4::look_at(Vec3::new(0.0, -20.0, 20.0), Vec3::zeros(), Vec3::z());

            let (x, y) =
                world_coords_to_window_coords(Vec3::new(2.0, 3.0, 0.0), rect, &view, matrices.projection(), clip)
                    .unwrap();
            let (near, far) = window_coords_to_world_vector(x, y, rect, &view, matrices.projection(), clip).unwrap();

            // Intersect the ray with the table plane z = 0
            let t = near.z / (near.z - far.z);
            let hit = near + (far - near) * t;
            assert_relative_eq!(hit.x, 2.0, epsilon = 0.1);
            assert_relative_eq!(hit.y, 3.0, epsilon = 0.1);
        }
    }

    #[test]
    fn test_window_y_grows_downward() {
        let rect = ViewportRect::new(0, 0, 100, 100);
        let projection = Mat4::orthographic(-1.0, 1.0, -1.0, 1.0, -1.0, 1.0, ClipSpace::NegativeOneToOne);
        let view = Mat4::identity();
        let (_, top) =
            world_coords_to_window_coords(Vec3::new(0.0, 0.9, 0.0), rect, &view, &projection, ClipSpace::NegativeOneToOne)
                .unwrap();
        assert!(top < 50);
    }
}
