//! # Game View
//!
//! Composes the registered viewports into a frame. Every viewport draws the same scene through
//! its own camera, in reverse registration order, so shadow-map viewports registered after the
//! main one are filled before the viewports sampling them.
//!
//! A pass draws, in order:
//!
//! - the skybox (color passes)
//! - the table: landscape strips and decals, cached in a drawing list per pass kind
//! - pieces in view, nearest first, each behind its own occlusion query; a piece hidden last
//!   frame is drawn as its solid bounding box until it shows up again
//! - projectiles and particle effects (color passes)
//! - the selection box (color passes)
//! - the 2D interface, when the viewport asks for it

use slotmap::SlotMap;

use crate::assets::{BoundingProvider, ModelProvider};
use crate::core::ViewConfig;
use crate::foundation::math::{Vec2, Vec3};
use crate::render::camera::OrbitCamera;
use crate::render::drawing_list::DrawingList;
use crate::render::shader::ShaderProgram;
use crate::render::viewport::{ObjectKey, ShadowSource, ViewportPass};
use crate::render::{
    Color, RenderMode, RenderResult, Renderer, TextureFlags, TextureSlot, Viewport, ViewportKey, ViewportRect,
};
use crate::scene::model::{GameModel, GameObject, Landscape, ModelManager};
use crate::scene::skybox::Skybox;
use crate::scene::{ParticleRenderer, UiLayer};

/// Decals float this far above the landscape to win the depth test
const DECAL_LIFT: f32 = 0.001;

/// Color of the selection box
const SELECTION_COLOR: Color = Color::rgb(0.0, 0.0, 1.0);

/// Main camera bounds: table half extents and zoom range
const CAMERA_MAX_TRANSLATION: (f32, f32) = (100.0, 100.0);
const CAMERA_SCALE_RANGE: (f32, f32) = (0.5, 2.8);

/// Table geometry of one pass kind, tagged with the landscape generation it was built from
struct TableList {
    generation: u64,
    list: DrawingList,
}

/// Everything a pass draws, apart from the viewports themselves
struct Scene {
    model: GameModel,
    models: ModelManager,
    bounding: Option<Box<dyn BoundingProvider>>,
    ui: Option<Box<dyn UiLayer>>,
    particles: Option<Box<dyn ParticleRenderer>>,
    skybox: Option<Skybox>,
    table_list: Option<TableList>,
    shadow_table_list: Option<TableList>,
    shader_program: Option<ShaderProgram>,
}

/// The frame composer of the game
pub struct GameView {
    viewports: SlotMap<ViewportKey, Viewport>,
    order: Vec<ViewportKey>,
    main: ViewportKey,
    window_size: (u32, u32),
    scene: Scene,
}

impl GameView {
    /// View of an empty table in a `width` x `height` window
    ///
    /// The main viewport covers the window with an orbit camera configured by `config`.
    #[must_use]
    pub fn new(models: Box<dyn ModelProvider>, width: u32, height: u32, config: &ViewConfig) -> Self {
        let (max_x, max_y) = CAMERA_MAX_TRANSLATION;
        let (min_scale, max_scale) = CAMERA_SCALE_RANGE;
        let mut main_viewport = Viewport::new(ViewportRect::new(0, 0, width, height), config.field_of_view);
        main_viewport.set_camera(Box::new(OrbitCamera::new(max_x, max_y, max_scale, min_scale)));
        main_viewport.set_clipping_planes(config.near_plane, config.far_plane);

        let mut viewports = SlotMap::with_key();
        let main = viewports.insert(main_viewport);
        log::debug!("Game view created for {width}x{height} window");
        Self {
            viewports,
            order: vec![main],
            main,
            window_size: (width, height),
            scene: Scene {
                model: GameModel::new(),
                models: ModelManager::new(models),
                bounding: None,
                ui: None,
                particles: None,
                skybox: None,
                table_list: None,
                shadow_table_list: None,
                shader_program: None,
            },
        }
    }

    // === Viewports ===

    /// Key of the window-covering viewport created with the view
    #[must_use]
    pub const fn main_viewport(&self) -> ViewportKey {
        self.main
    }

    /// Viewport by key
    #[must_use]
    pub fn viewport(&self, key: ViewportKey) -> Option<&Viewport> {
        self.viewports.get(key)
    }

    /// Mutable viewport by key
    pub fn viewport_mut(&mut self, key: ViewportKey) -> Option<&mut Viewport> {
        self.viewports.get_mut(key)
    }

    /// Registered viewports in registration order
    #[must_use]
    pub fn viewport_keys(&self) -> &[ViewportKey] {
        &self.order
    }

    /// Register a viewport; it is drawn before every viewport registered earlier
    pub fn add_viewport(&mut self, viewport: Viewport) -> ViewportKey {
        let key = self.viewports.insert(viewport);
        self.order.push(key);
        key
    }

    /// Unregister a viewport, detaching it from the viewports it shadowed
    ///
    /// The main viewport cannot be removed.
    pub fn remove_viewport(&mut self, key: ViewportKey) -> Option<Viewport> {
        if key == self.main {
            log::warn!("Refusing to remove the main viewport");
            return None;
        }
        let viewport = self.viewports.remove(key)?;
        self.order.retain(|&k| k != key);
        for other in self.viewports.values_mut() {
            if other.shadow_viewport() == Some(key) {
                other.set_shadow_viewport(None);
            }
        }
        Some(viewport)
    }

    /// Give `target` a shadow map rendered from `light_position`, replacing any previous one
    ///
    /// Returns the key of the new shadow viewport, or `None` when `target` is unknown.
    pub fn enable_shadow_map(&mut self, target: ViewportKey, size: u32, angle: f32, light_position: Vec3) -> Option<ViewportKey> {
        if !self.viewports.contains_key(target) {
            return None;
        }
        self.disable_shadow_map(target);
        let shadow = self.add_viewport(Viewport::shadow_map(size, angle, light_position));
        if let Some(viewport) = self.viewports.get_mut(target) {
            viewport.set_shadow_viewport(Some(shadow));
        }
        log::debug!("Shadow map {size}x{size} enabled, light at {light_position:?}");
        Some(shadow)
    }

    /// Remove the shadow viewport of `target`
    pub fn disable_shadow_map(&mut self, target: ViewportKey) {
        let Some(shadow) = self.viewports.get(target).and_then(Viewport::shadow_viewport) else { return };
        self.remove_viewport(shadow);
        if let Some(viewport) = self.viewports.get_mut(target) {
            viewport.set_shadow_viewport(None);
        }
    }

    // === Scene ===

    /// Pieces, landscape and effects on the table
    #[must_use]
    pub const fn model(&self) -> &GameModel {
        &self.scene.model
    }

    /// Mutable game model
    pub fn model_mut(&mut self) -> &mut GameModel {
        &mut self.scene.model
    }

    /// Loaded models
    pub fn model_manager(&mut self) -> &mut ModelManager {
        &mut self.scene.models
    }

    /// Remove a piece and the occlusion queries every viewport kept for it
    pub fn remove_object(&mut self, key: ObjectKey) -> Option<GameObject> {
        for viewport in self.viewports.values_mut() {
            viewport.forget_object(key);
        }
        self.scene.model.remove_object(key)
    }

    /// Source of model bounds, for selection boxes and occluded pieces
    pub fn set_bounding_provider(&mut self, bounding: Box<dyn BoundingProvider>) {
        self.scene.bounding = Some(bounding);
    }

    /// 2D interface drawn on top of viewports that ask for it
    pub fn set_ui(&mut self, ui: Box<dyn UiLayer>) {
        self.scene.ui = Some(ui);
    }

    /// Renderer of particle effects
    pub fn set_particle_renderer(&mut self, particles: Box<dyn ParticleRenderer>) {
        self.scene.particles = Some(particles);
    }

    /// Surround the table with a skybox of edge `size`
    pub fn create_skybox(&mut self, size: f32, faces: [String; 6]) {
        self.scene.skybox = Some(Skybox::new(size, faces));
    }

    /// Program used for the pieces and the table in color passes
    ///
    /// # Errors
    /// Shader compilation errors.
    pub fn new_shader_program(&mut self, renderer: &mut dyn Renderer, vertex: &str, fragment: &str, geometry: &str) -> RenderResult<()> {
        self.scene.shader_program = Some(renderer.shader_manager().new_program(vertex, fragment, geometry)?);
        Ok(())
    }

    // === Window ===

    /// Current window size
    #[must_use]
    pub const fn window_size(&self) -> (u32, u32) {
        self.window_size
    }

    /// Follow a window resize
    ///
    /// # Errors
    /// Errors of the renderer resize.
    pub fn resize(&mut self, renderer: &mut dyn Renderer, width: u32, height: u32) -> RenderResult<()> {
        renderer.resize(width, height)?;
        self.window_size = (width, height);
        for viewport in self.viewports.values_mut() {
            viewport.resize(width, height);
        }
        Ok(())
    }

    /// Drop every GPU resource the view caches: models, textures, table and skybox lists
    pub fn clear_resources(&mut self, renderer: &mut dyn Renderer) {
        self.scene.models.reset();
        renderer.texture_manager().reset();
        if let Some(skybox) = self.scene.skybox.as_mut() {
            skybox.reset_list();
        }
        self.scene.table_list = None;
        self.scene.shadow_table_list = None;
        for viewport in self.viewports.values_mut() {
            viewport.clear_occlusion_queries();
        }
    }

    /// Window-space viewport containing a pixel, with the pixel relative to its top-left corner
    fn viewport_at(&self, x: i32, y: i32) -> Option<(&Viewport, i32, i32)> {
        let window_height = i32::try_from(self.window_size.1).unwrap_or(i32::MAX);
        let flipped_y = window_height - 1 - y;
        self.order
            .iter()
            .filter_map(|&key| self.viewports.get(key))
            .find(|viewport| !viewport.is_offscreen() && viewport.point_is_in_viewport(x, flipped_y))
            .map(|viewport| {
                let top = window_height - (viewport.y() + i32::try_from(viewport.height()).unwrap_or(i32::MAX));
                (viewport, x - viewport.x(), y - top)
            })
    }

    /// World-space `(near, far)` ray under a window pixel, top-left origin
    #[must_use]
    pub fn window_coords_to_world_vector(&self, x: i32, y: i32) -> Option<(Vec3, Vec3)> {
        let (viewport, local_x, local_y) = self.viewport_at(x, y)?;
        viewport.window_coords_to_world_vector(local_x, local_y)
    }

    /// Point at height `world_z` under a window pixel, as `(x, y)`
    #[must_use]
    pub fn window_coords_to_world_coords(&self, x: i32, y: i32, world_z: f32) -> Option<(f32, f32)> {
        let (start, end) = self.window_coords_to_world_vector(x, y)?;
        let dz = end.z - start.z;
        if dz.abs() <= f32::EPSILON {
            return None;
        }
        let a = (world_z - start.z) / dz;
        Some((a.mul_add(end.x - start.x, start.x), a.mul_add(end.y - start.y, start.y)))
    }

    // === Drawing ===

    /// Draw every viewport, shadow maps first
    ///
    /// # Errors
    /// The first error of a viewport pass; later viewports are skipped.
    pub fn draw(&mut self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        for index in (0..self.order.len()).rev() {
            let key = self.order[index];
            let shadow = self
                .viewports
                .get(key)
                .and_then(Viewport::shadow_viewport)
                .and_then(|shadow| self.viewports.get(shadow))
                .and_then(Viewport::shadow_source);
            let Some(viewport) = self.viewports.get_mut(key) else { continue };
            let scene = &mut self.scene;
            viewport.draw(renderer, &mut |r, viewport, pass| scene.draw_pass(r, viewport, pass, shadow.as_ref()))?;
        }
        Ok(())
    }

    /// One complete frame: begin, clear, draw every viewport, present
    ///
    /// # Errors
    /// Frame and draw errors.
    pub fn draw_frame(&mut self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        renderer.begin_frame()?;
        renderer.clear_buffers(true, true)?;
        let drawn = self.draw(renderer);
        let ended = renderer.end_frame();
        drawn.and(ended)
    }
}

impl Scene {
    fn draw_pass(&mut self, renderer: &mut dyn Renderer, viewport: &mut Viewport, pass: ViewportPass, shadow: Option<&ShadowSource>) -> RenderResult<()> {
        renderer.enable_blending(false);
        if !pass.depth_only {
            if let Some(skybox) = self.skybox.as_mut() {
                skybox.draw(renderer, viewport.camera().position())?;
            }
        }
        self.draw_objects(renderer, viewport, pass.depth_only, shadow)?;
        if !pass.depth_only {
            self.draw_selection(renderer)?;
        }
        if pass.draw_ui {
            if let Some(ui) = self.ui.as_mut() {
                renderer.enable_blending(true);
                let drawn = renderer.draw_in_2d(&mut |r| ui.draw(r));
                renderer.enable_blending(false);
                drawn?;
            }
        }
        Ok(())
    }

    fn draw_objects(&mut self, renderer: &mut dyn Renderer, viewport: &mut Viewport, depth_only: bool, shadow: Option<&ShadowSource>) -> RenderResult<()> {
        renderer.enable_depth_test(true);
        let program = self.shader_program.filter(|_| !depth_only);
        if let Some(program) = program {
            renderer.shader_manager().push_program(program);
        }
        if !depth_only {
            viewport.set_up_shadow_map(renderer, shadow)?;
        }

        let drawn = self.draw_table(renderer, depth_only).and_then(|()| self.draw_pieces(renderer, viewport, depth_only));
        let popped = match program {
            Some(_) => renderer.shader_manager().pop_program(),
            None => Ok(()),
        };
        drawn?;
        popped?;

        if !depth_only {
            renderer.enable_blending(true);
            let drawn = self.draw_effects(renderer);
            renderer.enable_blending(false);
            drawn?;
        }
        renderer.enable_depth_test(false);
        Ok(())
    }

    fn draw_table(&mut self, renderer: &mut dyn Renderer, depth_only: bool) -> RenderResult<()> {
        let landscape = self.model.landscape();
        let cached = if depth_only { &mut self.shadow_table_list } else { &mut self.table_list };
        if cached.as_ref().map_or(true, |table| table.generation != landscape.generation()) {
            let list = renderer.create_drawing_list(&mut |r| record_table(r, landscape, depth_only))?;
            log::debug!("Table list recorded with {} calls (depth only: {depth_only})", list.len());
            *cached = Some(TableList { generation: landscape.generation(), list });
        }
        match cached.as_ref() {
            Some(table) => table.list.draw(renderer),
            None => Ok(()),
        }
    }

    fn draw_pieces(&mut self, renderer: &mut dyn Renderer, viewport: &mut Viewport, depth_only: bool) -> RenderResult<()> {
        let (width, height) = (viewport.width() as i32, viewport.height() as i32);
        let eye = viewport.camera().position();
        let mut visible: Vec<(ObjectKey, f32)> = self
            .model
            .objects()
            .filter(|(_, object)| {
                viewport
                    .world_coords_to_window_coords(object.position)
                    .is_some_and(|(x, y)| (0..=width).contains(&x) && (0..=height).contains(&y))
            })
            .map(|(key, object)| (key, (object.position - eye).norm()))
            .collect();
        visible.sort_by(|a, b| a.1.total_cmp(&b.1));

        let Self { model, models, bounding, .. } = self;
        for (key, _) in visible {
            let Some(object) = model.object(key) else { continue };
            let bounds = bounding.as_ref().and_then(|b| b.bounding(&object.model));
            let query = viewport.occlusion_query(renderer, key)?;
            let was_visible = query.is_visible();
            query.query(renderer, was_visible, &mut |r| match bounds {
                Some(bounds) if !was_visible => draw_box(r, bounds, object.position, object.rotation, false),
                _ => with_transform(r, object.position, object.rotation, &mut |r| {
                    models.draw_model(r, &object.model, Some(object), depth_only)?;
                    for secondary in &object.secondary_models {
                        models.draw_model(r, secondary, None, depth_only)?;
                    }
                    Ok(())
                }),
            })?;
        }
        Ok(())
    }

    fn draw_effects(&mut self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        let Self { model, models, particles, .. } = self;
        for projectile in model.projectiles() {
            with_transform(renderer, projectile.position, projectile.rotation, &mut |r| {
                if let Some(path) = projectile.model.as_deref() {
                    models.draw_model(r, path, None, false)?;
                }
                match (particles.as_mut(), projectile.particle.as_ref()) {
                    (Some(particles), Some(effect)) => particles.draw(r, effect),
                    _ => Ok(()),
                }
            })?;
        }
        if let Some(particles) = particles.as_mut() {
            for effect in model.particle_effects() {
                particles.draw(renderer, effect)?;
            }
        }
        Ok(())
    }

    fn draw_selection(&self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        let Some(object) = self.model.selected().and_then(|key| self.model.object(key)) else { return Ok(()) };
        let Some(bounds) = self.bounding.as_ref().and_then(|b| b.bounding(&object.model)) else { return Ok(()) };
        draw_box(renderer, bounds, object.position, object.rotation, true)
    }
}

/// Run `func` with the frame moved to `position` and turned `rotation` degrees around z
fn with_transform(
    renderer: &mut dyn Renderer,
    position: Vec3,
    rotation: f32,
    func: &mut dyn FnMut(&mut dyn Renderer) -> RenderResult<()>,
) -> RenderResult<()> {
    renderer.push_matrix();
    renderer.translate(position.x, position.y, position.z);
    renderer.rotate(rotation, 0.0, 0.0, 1.0);
    let result = func(renderer);
    result.and(renderer.pop_matrix())
}

/// Bounding box of a piece: blue outline, or solid faces standing in for an occluded model
fn draw_box(renderer: &mut dyn Renderer, (min, max): (Vec3, Vec3), position: Vec3, rotation: f32, wireframe: bool) -> RenderResult<()> {
    with_transform(renderer, position, rotation, &mut |r| {
        r.set_color(SELECTION_COLOR);
        let mode = if wireframe { RenderMode::LineLoop } else { RenderMode::Rectangles };
        let faces = [
            [min, Vec3::new(min.x, max.y, min.z), Vec3::new(min.x, max.y, max.z), Vec3::new(min.x, min.y, max.z)],
            [min, Vec3::new(min.x, min.y, max.z), Vec3::new(max.x, min.y, max.z), Vec3::new(max.x, min.y, min.z)],
            [Vec3::new(max.x, min.y, min.z), Vec3::new(max.x, max.y, min.z), max, Vec3::new(max.x, min.y, max.z)],
            [Vec3::new(min.x, max.y, min.z), Vec3::new(min.x, max.y, max.z), max, Vec3::new(max.x, max.y, min.z)],
        ];
        let drawn = faces.iter().try_for_each(|face| r.render_arrays(mode, face, &[], &[]));
        r.set_color(Color::default());
        drawn
    })
}

/// Landscape as one triangle strip per grid column, then decals unless only depth matters
fn record_table(renderer: &mut dyn Renderer, landscape: &Landscape, depth_only: bool) -> RenderResult<()> {
    let (columns, rows) = landscape.points();
    let (width, depth) = (landscape.width(), landscape.depth());
    let (x0, y0) = (-width / 2.0, -depth / 2.0);
    let step_x = width / (columns - 1) as f32;
    let step_y = depth / (rows - 1) as f32;
    let (scale_x, scale_y) = landscape.texture_scale();

    if depth_only || landscape.texture().is_empty() {
        renderer.unbind_texture(TextureSlot::Diffuse);
    } else {
        renderer.set_texture(landscape.texture(), false, TextureFlags::BUILD_MIPMAPS)?;
    }
    let mut vertices = Vec::with_capacity(rows * 2);
    let mut tex_coords = Vec::with_capacity(rows * 2);
    for column in 0..columns - 1 {
        vertices.clear();
        tex_coords.clear();
        let x = step_x.mul_add(column as f32, x0);
        for row in 0..rows {
            let y = step_y.mul_add(row as f32, y0);
            for (dx, c) in [(0.0, column), (step_x, column + 1)] {
                vertices.push(Vec3::new(x + dx, y, landscape.height(c * rows + row)));
                tex_coords.push(Vec2::new((x + dx - x0) / scale_x, (y - y0) / scale_y));
            }
        }
        renderer.render_arrays(RenderMode::TriangleStrip, &vertices, &[], &tex_coords)?;
    }
    renderer.unbind_texture(TextureSlot::Diffuse);
    if depth_only {
        return Ok(());
    }

    let corners = [Vec2::new(0.0, 0.0), Vec2::new(0.0, 1.0), Vec2::new(1.0, 0.0), Vec2::new(1.0, 1.0)];
    if landscape.decals().is_empty() {
        return Ok(());
    }
    renderer.enable_blending(true);
    for decal in landscape.decals() {
        let (hw, hd) = (decal.width / 2.0, decal.depth / 2.0);
        let quad: Vec<Vec3> = [(-hw, -hd), (-hw, hd), (hw, -hd), (hw, hd)]
            .iter()
            .map(|&(dx, dy)| Vec3::new(dx, dy, landscape.height_at(decal.x + dx, decal.y + dy) + DECAL_LIFT))
            .collect();
        renderer.set_texture(&decal.texture, false, TextureFlags::NO_WRAP | TextureFlags::HAS_ALPHA)?;
        with_transform(renderer, Vec3::new(decal.x, decal.y, 0.0), decal.rotation, &mut |r| {
            r.render_arrays(RenderMode::TriangleStrip, &quad, &[], &corners)
        })?;
    }
    renderer.enable_blending(false);
    renderer.unbind_texture(TextureSlot::Diffuse);
    Ok(())
}

impl std::fmt::Debug for GameView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameView")
            .field("viewports", &self.order.len())
            .field("window_size", &self.window_size)
            .field("objects", &self.scene.model.object_count())
            .field("models", &self.scene.models)
            .field("skybox", &self.scene.skybox)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetError, ModelData};
    use crate::render::backends::headless::HeadlessCommand;
    use crate::render::mesh::MeshPart;
    use crate::render::{CachedTextureType, HeadlessRenderer};
    use std::cell::Cell;
    use std::rc::Rc;

    struct CubeProvider;

    impl ModelProvider for CubeProvider {
        fn load(&self, path: &str) -> Result<ModelData, AssetError> {
            if path == "missing.obj" {
                return Err(AssetError::NotFound(path.to_string()));
            }
            Ok(ModelData {
                vertices: vec![
                    Vec3::new(-0.5, -0.5, 0.0),
                    Vec3::new(0.5, -0.5, 0.0),
                    Vec3::new(0.5, 0.5, 0.0),
                    Vec3::new(-0.5, 0.5, 0.0),
                ],
                indexes: vec![0, 1, 2, 0, 2, 3],
                parts: vec![MeshPart::new(0, "", "body")],
                ..ModelData::default()
            })
        }
    }

    struct UnitBounds;

    impl BoundingProvider for UnitBounds {
        fn bounding(&self, _path: &str) -> Option<(Vec3, Vec3)> {
            Some((Vec3::new(-0.5, -0.5, 0.0), Vec3::new(0.5, 0.5, 1.0)))
        }
    }

    struct CountingUi(Rc<Cell<usize>>);

    impl UiLayer for CountingUi {
        fn draw(&mut self, _renderer: &mut dyn Renderer) -> RenderResult<()> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }
    }

    fn view() -> (GameView, HeadlessRenderer) {
        let view = GameView::new(Box::new(CubeProvider), 800, 600, &ViewConfig::default());
        (view, HeadlessRenderer::headless(800, 600).unwrap())
    }

    fn draw_count(renderer: &HeadlessRenderer) -> usize {
        renderer.backend().draws().count()
    }

    #[test]
    fn test_viewports_draw_in_reverse_order() {
        let (mut view, mut renderer) = view();
        let main = view.main_viewport();
        let shadow = view.enable_shadow_map(main, 256, 60.0, Vec3::new(0.0, 0.0, 50.0)).unwrap();
        view.draw(&mut renderer).unwrap();

        let commands = renderer.backend().commands();
        let position = |f: &dyn Fn(&HeadlessCommand) -> bool| commands.iter().position(|c| f(c)).unwrap();
        let first_target = position(&|c| matches!(c, HeadlessCommand::BeginRenderTarget { width: 256, .. }));
        let first_draw = position(&|c| matches!(c, HeadlessCommand::Draw(_)));
        let target_end = position(&|c| matches!(c, HeadlessCommand::EndRenderTarget));
        let last_draw = commands.iter().rposition(|c| matches!(c, HeadlessCommand::Draw(_))).unwrap();
        assert!(first_target < first_draw);
        assert!(target_end < last_draw);
        assert_eq!(view.viewport(shadow).unwrap().texture().unwrap().kind(), CachedTextureType::Depth);
        assert_eq!(view.viewport(main).unwrap().shadow_viewport(), Some(shadow));
    }

    #[test]
    fn test_shadow_pass_skips_decals() {
        let (mut view, mut renderer) = view();
        view.model_mut().landscape_mut().add_decal(crate::scene::Decal {
            texture: "crater.png".into(),
            x: 0.0,
            y: 0.0,
            rotation: 30.0,
            width: 2.0,
            depth: 2.0,
        });
        let main = view.main_viewport();
        view.enable_shadow_map(main, 128, 60.0, Vec3::new(0.0, 0.0, 50.0));
        view.draw(&mut renderer).unwrap();

        let shadow = view.scene.shadow_table_list.as_ref().unwrap().list.draw_count();
        let color = view.scene.table_list.as_ref().unwrap().list.draw_count();
        assert_eq!(color, shadow + 1);
    }

    #[test]
    fn test_only_decals_are_blended() {
        let (mut view, mut renderer) = view();
        view.model_mut().landscape_mut().add_decal(crate::scene::Decal {
            texture: "crater.png".into(),
            x: 0.0,
            y: 0.0,
            rotation: 0.0,
            width: 2.0,
            depth: 2.0,
        });
        view.model_mut().add_object(GameObject::new("tank.obj", Vec3::zeros(), 0.0));
        view.draw(&mut renderer).unwrap();

        let mut blending = false;
        let mut draws = Vec::new();
        for command in renderer.backend().commands() {
            match command {
                HeadlessCommand::Blending(enable) => blending = *enable,
                HeadlessCommand::Draw(_) => draws.push(blending),
                _ => {}
            }
        }
        assert!(!draws[0]);
        assert_eq!(draws.iter().filter(|&&blended| blended).count(), 1);
        assert!(!blending);
    }

    #[test]
    fn test_table_list_is_reused_until_landscape_changes() {
        let (mut view, mut renderer) = view();
        view.draw(&mut renderer).unwrap();
        let generation = view.scene.table_list.as_ref().unwrap().generation;
        view.draw(&mut renderer).unwrap();
        assert_eq!(view.scene.table_list.as_ref().unwrap().generation, generation);

        view.model_mut().landscape_mut().set_height(0, 0, 1.0);
        view.draw(&mut renderer).unwrap();
        assert_ne!(view.scene.table_list.as_ref().unwrap().generation, generation);
    }

    #[test]
    fn test_occluded_piece_is_drawn_as_box() {
        let (mut view, mut renderer) = view();
        view.set_bounding_provider(Box::new(UnitBounds));
        view.model_mut().add_object(GameObject::new("tank.obj", Vec3::zeros(), 0.0));
        renderer.backend_mut().set_visibility_predicate(|_| false);

        view.draw(&mut renderer).unwrap();
        assert!(view.model_manager().is_loaded("tank.obj"));
        renderer.backend_mut().take_commands();

        view.draw(&mut renderer).unwrap();
        let boxes = renderer.backend().draws().filter(|d| d.color == SELECTION_COLOR).count();
        assert_eq!(boxes, 4);
    }

    #[test]
    fn test_pieces_out_of_view_are_culled() {
        let (mut view, mut renderer) = view();
        view.draw(&mut renderer).unwrap();
        let table_only = draw_count(&renderer);
        renderer.backend_mut().take_commands();

        view.model_mut().add_object(GameObject::new("tank.obj", Vec3::new(0.0, -500.0, 0.0), 0.0));
        view.draw(&mut renderer).unwrap();
        assert_eq!(draw_count(&renderer), table_only);
    }

    #[test]
    fn test_missing_model_is_skipped() {
        let (mut view, mut renderer) = view();
        view.model_mut().add_object(GameObject::new("missing.obj", Vec3::zeros(), 0.0));
        view.draw(&mut renderer).unwrap();
        view.draw(&mut renderer).unwrap();
        assert!(!view.model_manager().is_loaded("missing.obj"));
    }

    #[test]
    fn test_ui_only_on_main_viewport() {
        let (mut view, mut renderer) = view();
        let count = Rc::new(Cell::new(0));
        view.set_ui(Box::new(CountingUi(count.clone())));
        let main = view.main_viewport();
        view.enable_shadow_map(main, 128, 60.0, Vec3::new(0.0, 0.0, 50.0));
        view.draw_frame(&mut renderer).unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(renderer.matrix_depth(), 1);
    }

    #[test]
    fn test_disable_shadow_map_removes_viewport() {
        let (mut view, _) = view();
        let main = view.main_viewport();
        let shadow = view.enable_shadow_map(main, 128, 60.0, Vec3::new(0.0, 0.0, 50.0)).unwrap();
        view.disable_shadow_map(main);
        assert!(view.viewport(shadow).is_none());
        assert_eq!(view.viewport_keys(), &[main]);
        assert!(view.remove_viewport(main).is_none());
    }

    #[test]
    fn test_window_center_hits_camera_target() {
        let (mut view, mut renderer) = view();
        view.draw(&mut renderer).unwrap();
        let (x, y) = view.window_coords_to_world_coords(400, 300, 0.0).unwrap();
        assert!(x.abs() < 0.5, "x = {x}");
        assert!(y.abs() < 0.5, "y = {y}");
    }

    #[test]
    fn test_resize_follows_window() {
        let (mut view, mut renderer) = view();
        let main = view.main_viewport();
        view.resize(&mut renderer, 1024, 768).unwrap();
        assert_eq!(view.window_size(), (1024, 768));
        assert_eq!(view.viewport(main).unwrap().width(), 1024);
    }
}
