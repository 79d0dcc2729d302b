//! # Viewports
//!
//! A viewport is one camera drawing into one rectangle: of the window, or of a texture it owns
//! (offscreen and shadow-map viewports). [`Viewport::draw`] sets projection, camera and depth
//! bias, runs the caller's scene callback and restores the renderer afterwards.
//!
//! Each viewport caches one occlusion query per scene object, created on first use, so two
//! identical objects never share a visibility result.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use slotmap::new_key_type;

use crate::foundation::math::{ClipSpace, Mat4, Vec3};
use crate::render::api::{unwind_matrices, OcclusionQuery, Renderer};
use crate::render::camera::{Camera, FixedCamera};
use crate::render::matrix;
use crate::render::shader::names;
use crate::render::texture::{CachedTexture, TextureBinding};
use crate::render::{CachedTextureType, RenderResult, TextureSlot, ViewportRect};

new_key_type! {
    /// Stable identity of a viewport registered with a game view
    pub struct ViewportKey;

    /// Stable identity of a scene object
    pub struct ObjectKey;
}

/// What a viewport pass asks the scene callback to draw
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewportPass {
    /// Only depth matters (shadow maps): skip colors, blending and decorations
    pub depth_only: bool,
    /// Draw the 2D interface on top
    pub draw_ui: bool,
}

/// Scene callback of [`Viewport::draw`], handed the viewport being drawn
pub type ViewportDrawFn<'a> = dyn FnMut(&mut dyn Renderer, &mut Viewport, ViewportPass) -> RenderResult<()> + 'a;

/// Shadow map as seen from the viewports that receive it
#[derive(Debug, Clone)]
pub struct ShadowSource {
    /// Depth texture of the shadow viewport
    pub texture: TextureBinding,
    /// Light projection times light view
    pub view_projection: Mat4,
}

#[derive(Debug)]
struct Offscreen {
    kind: CachedTextureType,
    width: u32,
    height: u32,
    texture: Option<CachedTexture>,
}

/// Camera, projection and target rectangle of one pass
pub struct Viewport {
    rect: ViewportRect,
    field_of_view: f32,
    near: f32,
    far: f32,
    polygon_offset: Option<(f32, f32)>,
    camera: Box<dyn Camera>,
    offscreen: Option<Offscreen>,
    draw_ui: bool,
    shadow_viewport: Option<ViewportKey>,
    queries: HashMap<ObjectKey, Box<dyn OcclusionQuery>>,
    projection: Mat4,
    view: Mat4,
    clip: ClipSpace,
}

impl Viewport {
    /// Default near clipping plane
    pub const DEFAULT_NEAR: f32 = 1.0;
    /// Default far clipping plane
    pub const DEFAULT_FAR: f32 = 1000.0;

    /// Viewport drawing into `rect` of the window, with the 2D interface on top
    #[must_use]
    pub fn new(rect: ViewportRect, field_of_view: f32) -> Self {
        Self {
            rect,
            field_of_view,
            near: Self::DEFAULT_NEAR,
            far: Self::DEFAULT_FAR,
            polygon_offset: None,
            camera: Box::new(FixedCamera::new(Vec3::new(0.0, -10.0, 10.0), Vec3::zeros(), Vec3::new(0.0, 0.0, 1.0))),
            offscreen: None,
            draw_ui: true,
            shadow_viewport: None,
            queries: HashMap::new(),
            projection: Mat4::identity(),
            view: Mat4::identity(),
            clip: ClipSpace::default(),
        }
    }

    /// Viewport drawing into a `width` x `height` texture of `kind`, created on the first draw
    ///
    /// A depth texture makes every pass depth only.
    #[must_use]
    pub fn offscreen(kind: CachedTextureType, width: u32, height: u32, field_of_view: f32) -> Self {
        Self {
            offscreen: Some(Offscreen { kind, width, height, texture: None }),
            draw_ui: false,
            ..Self::new(ViewportRect::new(0, 0, width, height), field_of_view)
        }
    }

    /// Shadow-map viewport: a depth texture seen from `light_position`, biased against acne
    #[must_use]
    pub fn shadow_map(size: u32, angle: f32, light_position: Vec3) -> Self {
        let mut viewport = Self::offscreen(CachedTextureType::Depth, size, size, angle);
        viewport.set_camera(Box::new(FixedCamera::new(light_position, Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0))));
        viewport.set_polygon_offset(true, 2.0, 500.0);
        viewport.set_clipping_planes(3.0, 300.0);
        viewport
    }

    /// Whether passes draw the 2D interface
    #[must_use]
    pub fn with_ui(mut self, draw_ui: bool) -> Self {
        self.draw_ui = draw_ui;
        self
    }

    /// Camera of the viewport
    #[must_use]
    pub fn camera(&self) -> &dyn Camera {
        self.camera.as_ref()
    }

    /// Mutable camera of the viewport
    pub fn camera_mut(&mut self) -> &mut dyn Camera {
        self.camera.as_mut()
    }

    /// Replace the camera
    pub fn set_camera(&mut self, camera: Box<dyn Camera>) {
        self.camera = camera;
    }

    /// Backing texture of an offscreen viewport, once drawn
    #[must_use]
    pub fn texture(&self) -> Option<&CachedTexture> {
        self.offscreen.as_ref().and_then(|offscreen| offscreen.texture.as_ref())
    }

    /// Whether the viewport draws into a texture
    #[must_use]
    pub const fn is_offscreen(&self) -> bool {
        self.offscreen.is_some()
    }

    /// Projection of the last pass
    #[must_use]
    pub const fn projection_matrix(&self) -> &Mat4 {
        &self.projection
    }

    /// Camera view of the last pass
    #[must_use]
    pub const fn view_matrix(&self) -> &Mat4 {
        &self.view
    }

    /// Depth bias applied during passes; factor and units as in `glPolygonOffset`
    pub fn set_polygon_offset(&mut self, enable: bool, factor: f32, units: f32) {
        self.polygon_offset = enable.then_some((factor, units));
    }

    /// Near and far clipping planes
    pub fn set_clipping_planes(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
    }

    /// Clipping planes as `(near, far)`
    #[must_use]
    pub const fn clipping_planes(&self) -> (f32, f32) {
        (self.near, self.far)
    }

    /// Rectangle of the viewport, bottom-left origin
    #[must_use]
    pub const fn rect(&self) -> ViewportRect {
        self.rect
    }

    /// Left edge
    #[must_use]
    pub const fn x(&self) -> i32 {
        self.rect.x
    }

    /// Bottom edge
    #[must_use]
    pub const fn y(&self) -> i32 {
        self.rect.y
    }

    /// Width in pixels
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.rect.width
    }

    /// Height in pixels
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.rect.height
    }

    /// Whether a pixel, bottom-left origin, lies in the viewport
    #[must_use]
    pub fn point_is_in_viewport(&self, x: i32, y: i32) -> bool {
        self.rect.contains(x, y)
    }

    /// Follow a window resize; offscreen viewports keep their texture size
    pub fn resize(&mut self, width: u32, height: u32) {
        if self.offscreen.is_none() {
            self.rect.width = width;
            self.rect.height = height;
        }
    }

    /// Viewport whose depth texture shadows this one
    pub fn set_shadow_viewport(&mut self, viewport: Option<ViewportKey>) {
        self.shadow_viewport = viewport;
    }

    /// Viewport whose depth texture shadows this one
    #[must_use]
    pub const fn shadow_viewport(&self) -> Option<ViewportKey> {
        self.shadow_viewport
    }

    /// Shadow map this viewport produced, if it is a drawn depth viewport
    #[must_use]
    pub fn shadow_source(&self) -> Option<ShadowSource> {
        let texture = self.texture().filter(|texture| texture.kind() == CachedTextureType::Depth)?;
        Some(ShadowSource { texture: texture.binding(), view_projection: self.projection * self.view })
    }

    /// Bind a shadow map for the draws of the current pass, or disable shadows without one
    ///
    /// Uploads `lightMatrix`, mapping eye-space positions of this viewport to shadow-map
    /// texture coordinates and depth.
    ///
    /// # Errors
    /// Errors of binding the shadow texture.
    pub fn set_up_shadow_map(&self, renderer: &mut dyn Renderer, shadow: Option<&ShadowSource>) -> RenderResult<()> {
        let Some(shadow) = shadow else {
            renderer.shader_manager().set_uniform_i32(names::SHADOWS_ENABLED, 1, 1, &[0]);
            renderer.unbind_texture(TextureSlot::ShadowMap);
            return Ok(());
        };
        renderer.set_texture_binding(&shadow.texture, TextureSlot::ShadowMap)?;
        let light_matrix = light_matrix(&shadow.view_projection, &self.view, self.clip);
        let shaders = renderer.shader_manager();
        shaders.set_uniform_f32(names::LIGHT_MATRIX, 16, 1, light_matrix.as_slice());
        shaders.set_uniform_i32(names::SHADOWS_ENABLED, 1, 1, &[1]);
        Ok(())
    }

    /// Occlusion query of `object` in this viewport, created on first use
    ///
    /// # Errors
    /// Errors of query creation.
    pub fn occlusion_query(&mut self, renderer: &mut dyn Renderer, object: ObjectKey) -> RenderResult<&mut dyn OcclusionQuery> {
        let query = match self.queries.entry(object) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => entry.insert(renderer.create_occlusion_query()?),
        };
        Ok(query.as_mut())
    }

    /// Drop the query of a removed object
    pub fn forget_object(&mut self, object: ObjectKey) {
        self.queries.remove(&object);
    }

    /// Drop every cached query
    pub fn clear_occlusion_queries(&mut self) {
        self.queries.clear();
    }

    /// Unproject a pixel into a world-space `(near, far)` ray
    ///
    /// `x` and `y` are relative to the viewport's top-left corner, y growing downward.
    #[must_use]
    pub fn window_coords_to_world_vector(&self, x: i32, y: i32) -> Option<(Vec3, Vec3)> {
        matrix::window_coords_to_world_vector(x, y, self.rect, &self.view, &self.projection, self.clip)
    }

    /// Project a world point to pixels relative to the viewport's top-left corner
    #[must_use]
    pub fn world_coords_to_window_coords(&self, world: Vec3) -> Option<(i32, i32)> {
        matrix::world_coords_to_window_coords(world, self.rect, &self.view, &self.projection, self.clip)
    }

    /// Draw one pass through `callback`
    ///
    /// Offscreen viewports draw into their texture through `render_to_texture`. Either way the
    /// renderer's viewport rectangle, projection and model-view stack are restored afterwards,
    /// also when the callback fails.
    ///
    /// # Errors
    /// Errors of the callback or of the render target.
    pub fn draw(&mut self, renderer: &mut dyn Renderer, callback: &mut ViewportDrawFn<'_>) -> RenderResult<()> {
        let Some(offscreen) = self.offscreen.as_mut() else {
            let pass = ViewportPass { depth_only: false, draw_ui: self.draw_ui };
            return self.compose(renderer, pass, callback);
        };

        let (kind, width, height) = (offscreen.kind, offscreen.width, offscreen.height);
        let mut texture = match offscreen.texture.take() {
            Some(texture) => texture,
            None => {
                log::debug!("Creating {kind:?} target {width}x{height} for offscreen viewport");
                renderer.create_texture(None, width, height, kind)?
            }
        };
        let pass = ViewportPass { depth_only: kind == CachedTextureType::Depth, draw_ui: self.draw_ui };
        let result = renderer.render_to_texture(&mut texture, width, height, &mut |r| self.compose(r, pass, callback));
        if let Some(offscreen) = self.offscreen.as_mut() {
            offscreen.texture = Some(texture);
        }
        result
    }

    fn compose(&mut self, renderer: &mut dyn Renderer, pass: ViewportPass, callback: &mut ViewportDrawFn<'_>) -> RenderResult<()> {
        let saved = SavedPass {
            rect: renderer.viewport_rect(),
            projection: renderer.projection_matrix(),
            depth: renderer.matrix_depth(),
            polygon_offset: renderer.polygon_offset(),
            lens: (self.field_of_view, self.near, self.far),
        };
        let scope = PassScope { renderer, saved: Some(saved) };

        scope.renderer.set_up_viewport(self.rect, self.field_of_view, self.near, self.far);
        scope.renderer.push_matrix();
        scope.renderer.reset_view_matrix();
        let camera = self.camera.as_ref();
        scope.renderer.look_at(camera.position(), camera.target(), camera.up());
        self.projection = scope.renderer.projection_matrix();
        self.view = scope.renderer.view_matrix();
        self.clip = scope.renderer.clip_space();
        if let Some((factor, units)) = self.polygon_offset {
            scope.renderer.enable_polygon_offset(true, factor, units);
        }

        let result = callback(&mut *scope.renderer, self, pass);
        let restored = scope.finish();
        result.and(restored)
    }
}

/// Renderer state a viewport pass overrides
struct SavedPass {
    rect: ViewportRect,
    projection: Mat4,
    depth: usize,
    polygon_offset: Option<(f32, f32)>,
    lens: (f32, f32, f32),
}

impl SavedPass {
    fn restore(self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        let unwound = unwind_matrices(renderer, self.depth);
        match self.polygon_offset {
            Some((factor, units)) => renderer.enable_polygon_offset(true, factor, units),
            None => renderer.enable_polygon_offset(false, 0.0, 0.0),
        }
        let (field_of_view, near, far) = self.lens;
        renderer.set_up_viewport(self.rect, field_of_view, near, far);
        renderer.set_projection_matrix(self.projection);
        unwound
    }
}

/// Puts the saved pass state back on `finish`, or on drop when the callback unwinds
struct PassScope<'r> {
    renderer: &'r mut dyn Renderer,
    saved: Option<SavedPass>,
}

impl PassScope<'_> {
    fn finish(mut self) -> RenderResult<()> {
        match self.saved.take() {
            Some(saved) => saved.restore(&mut *self.renderer),
            None => Ok(()),
        }
    }
}

impl Drop for PassScope<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            if let Err(err) = saved.restore(&mut *self.renderer) {
                log::error!("Failed to restore renderer after viewport pass: {}", err);
            }
        }
    }
}

/// Shadow-map lookup matrix: eye space of the receiving camera to shadow texture space
fn light_matrix(light_view_projection: &Mat4, camera_view: &Mat4, clip: ClipSpace) -> Mat4 {
    let depth_bias = if clip == ClipSpace::NegativeOneToOne { (0.5, 0.5) } else { (1.0, 0.0) };
    #[rustfmt::skip]
    let bias = Mat4::new(
        0.5, 0.0, 0.0,          0.5,
        0.0, 0.5, 0.0,          0.5,
        0.0, 0.0, depth_bias.0, depth_bias.1,
        0.0, 0.0, 0.0,          1.0,
    );
    let eye_to_world = camera_view.try_inverse().unwrap_or_else(Mat4::identity);
    bias * light_view_projection * eye_to_world
}

impl std::fmt::Debug for Viewport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewport")
            .field("rect", &self.rect)
            .field("field_of_view", &self.field_of_view)
            .field("clipping_planes", &(self.near, self.far))
            .field("offscreen", &self.offscreen)
            .field("queries", &self.queries.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::Vec4;
    use crate::render::HeadlessRenderer;
    use approx::assert_relative_eq;
    use slotmap::SlotMap;

    fn renderer() -> HeadlessRenderer {
        HeadlessRenderer::headless(800, 600).unwrap()
    }

    #[test]
    fn test_draw_restores_renderer_state() {
        let mut renderer = renderer();
        let before_rect = renderer.viewport_rect();
        let before_projection = renderer.projection_matrix();
        let mut viewport = Viewport::new(ViewportRect::new(0, 0, 400, 300), 60.0);
        viewport.set_polygon_offset(true, 1.0, 2.0);

        let mut seen = None;
        viewport
            .draw(&mut renderer, &mut |r, _, pass| {
                seen = Some((r.viewport_rect(), pass));
                r.translate(5.0, 0.0, 0.0);
                Ok(())
            })
            .unwrap();

        assert_eq!(seen, Some((ViewportRect::new(0, 0, 400, 300), ViewportPass { depth_only: false, draw_ui: true })));
        assert_eq!(renderer.viewport_rect(), before_rect);
        assert_eq!(renderer.projection_matrix(), before_projection);
        assert_eq!(renderer.matrix_depth(), 1);
    }

    #[test]
    fn test_failing_callback_still_restores() {
        let mut renderer = renderer();
        renderer.translate(1.0, 2.0, 3.0);
        let before_view = renderer.view_matrix();
        let mut viewport = Viewport::new(ViewportRect::new(10, 10, 100, 100), 45.0);
        viewport.set_polygon_offset(true, 1.0, 4.0);

        let result = viewport.draw(&mut renderer, &mut |r, _, _| {
            r.push_matrix();
            r.translate(9.0, 9.0, 9.0);
            Err(crate::render::RenderError::RenderingFailed("boom".to_string()))
        });

        assert!(matches!(result, Err(crate::render::RenderError::RenderingFailed(_))));
        assert_eq!(renderer.viewport_rect(), ViewportRect::new(0, 0, 800, 600));
        assert_eq!(renderer.matrix_depth(), 1);
        assert_eq!(renderer.view_matrix(), before_view);
        assert_eq!(renderer.polygon_offset(), None);
    }

    #[test]
    fn test_pass_keeps_outer_polygon_offset() {
        let mut renderer = renderer();
        renderer.enable_polygon_offset(true, 3.0, 7.0);
        let mut viewport = Viewport::shadow_map(64, 60.0, Vec3::new(0.0, 0.0, 30.0));

        let mut inside = None;
        viewport
            .draw(&mut renderer, &mut |r, _, _| {
                inside = r.polygon_offset();
                Ok(())
            })
            .unwrap();

        assert_eq!(inside, Some((2.0, 500.0)));
        assert_eq!(renderer.polygon_offset(), Some((3.0, 7.0)));
    }

    #[test]
    fn test_callback_popping_too_far_is_reported() {
        let mut renderer = renderer();
        renderer.push_matrix();
        let mut viewport = Viewport::new(ViewportRect::new(0, 0, 800, 600), 60.0);
        let result = viewport.draw(&mut renderer, &mut |r, _, _| {
            r.pop_matrix()?;
            r.pop_matrix()
        });
        assert!(matches!(result, Err(crate::render::RenderError::InvalidOperation(_))));
        assert_eq!(renderer.matrix_depth(), 1);
    }

    #[test]
    fn test_depth_viewport_is_depth_only() {
        let mut renderer = renderer();
        let mut viewport = Viewport::shadow_map(256, 60.0, Vec3::new(0.0, 0.0, 50.0));
        let mut pass = None;
        viewport
            .draw(&mut renderer, &mut |_, _, p| {
                pass = Some(p);
                Ok(())
            })
            .unwrap();
        assert_eq!(pass, Some(ViewportPass { depth_only: true, draw_ui: false }));
        let texture = viewport.texture().unwrap();
        assert_eq!((texture.kind(), texture.width()), (CachedTextureType::Depth, 256));
        assert!(viewport.shadow_source().is_some());
    }

    #[test]
    fn test_queries_are_per_object() {
        let mut renderer = renderer();
        let mut objects = SlotMap::<ObjectKey, ()>::with_key();
        let (a, b) = (objects.insert(()), objects.insert(()));
        let mut viewport = Viewport::new(ViewportRect::new(0, 0, 800, 600), 60.0);

        let first = viewport.occlusion_query(&mut renderer, a).unwrap() as *const dyn OcclusionQuery as *const u8;
        let again = viewport.occlusion_query(&mut renderer, a).unwrap() as *const dyn OcclusionQuery as *const u8;
        let other = viewport.occlusion_query(&mut renderer, b).unwrap() as *const dyn OcclusionQuery as *const u8;
        assert_eq!(first, again);
        assert_ne!(first, other);
        viewport.forget_object(a);
        assert!(format!("{viewport:?}").contains("queries: 1"));
    }

    #[test]
    fn test_window_coords_round_trip_through_center() {
        let mut renderer = renderer();
        let mut viewport = Viewport::new(ViewportRect::new(0, 0, 800, 600), 60.0);
        viewport.draw(&mut renderer, &mut |_, _, _| Ok(())).unwrap();
        let (near, far) = viewport.window_coords_to_world_vector(400, 300).unwrap();
        let direction = (far - near).normalize();
        assert_relative_eq!(direction, viewport.camera().direction(), epsilon = 1e-3);
        let target = viewport.world_coords_to_window_coords(Vec3::zeros()).unwrap();
        assert_eq!(target, (400, 300));
    }

    #[test]
    fn test_light_matrix_maps_light_center_to_texture_center() {
        let light = FixedCamera::new(Vec3::new(0.0, 0.0, 20.0), Vec3::zeros(), Vec3::new(0.0, 1.0, 0.0));
        let projection = <Mat4 as crate::foundation::math::Mat4Ext>::perspective(1.0, 1.0, 1.0, 100.0, ClipSpace::ZeroToOne);
        let view_projection = projection * light.view_matrix();
        let camera_view = Mat4::new_translation(&Vec3::new(0.0, 0.0, -5.0));
        let matrix = light_matrix(&view_projection, &camera_view, ClipSpace::ZeroToOne);

        let eye = camera_view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        let shadow = matrix * eye;
        assert_relative_eq!(shadow.x / shadow.w, 0.5, epsilon = 1e-5);
        assert_relative_eq!(shadow.y / shadow.w, 0.5, epsilon = 1e-5);
    }

    #[test]
    fn test_resize_skips_offscreen() {
        let mut screen = Viewport::new(ViewportRect::new(0, 0, 100, 100), 60.0);
        let mut texture = Viewport::offscreen(CachedTextureType::RenderTarget, 64, 64, 60.0);
        screen.resize(300, 200);
        texture.resize(300, 200);
        assert_eq!((screen.width(), screen.height()), (300, 200));
        assert_eq!((texture.width(), texture.height()), (64, 64));
        assert!(screen.point_is_in_viewport(299, 199));
    }
}
