//! Tabletop demo application
//!
//! Opens a window for the backend named in `table_app.toml`, lays out a hilly table with a
//! few pieces and lets the player fly the camera around it.
//!
//! Controls: WASD pans, Q/E turns, R/F tilts, the mouse wheel zooms and dragging with the
//! right button orbits. Left click selects a piece, T toggles the selected tank's turret,
//! Delete removes it and Space resets the camera.

mod pieces;

use std::sync::Arc;
use std::time::{Duration, Instant};

use glfw::{Action, Key, MouseButton, WindowEvent};
use rand::Rng;
use thiserror::Error;
use wargame_engine::assets::{ImageFileProvider, ImageProvider};
use wargame_engine::config::{Config, ConfigError};
use wargame_engine::core::{ApplicationConfig, BackendKind, TextureConfig};
use wargame_engine::foundation::logging;
use wargame_engine::foundation::math::Vec3;
use wargame_engine::render::backends::dx::DxBackend;
use wargame_engine::render::backends::gl::{GlBackend, Legacy, Modern};
use wargame_engine::render::backends::vulkan::VulkanBackend;
use wargame_engine::render::types::Light;
use wargame_engine::render::window::{GlfwWindow, WindowError};
use wargame_engine::render::{
    GraphicsEngine, HeadlessBackend, OrbitCamera, RenderBackend, RenderError, Renderer,
};
use wargame_engine::scene::{GameObject, GameView, Landscape};

use pieces::{BoxPieces, HOUSE, TANK, TREE};

const CONFIG_PATH: &str = "table_app.toml";
const TABLE_WIDTH: f32 = 60.0;
const TABLE_DEPTH: f32 = 40.0;
const PICK_RADIUS: f32 = 2.0;

/// Demo failures
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration could not be read
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Configuration values are inconsistent
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Window creation failed
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Renderer failure
    #[error(transparent)]
    Render(#[from] RenderError),
}

fn engine<B: RenderBackend + 'static>(backend: B, textures: &TextureConfig) -> Result<Box<dyn Renderer>, AppError> {
    let provider: Arc<dyn ImageProvider> = Arc::new(ImageFileProvider::new());
    Ok(Box::new(GraphicsEngine::with_provider(backend, provider, textures)?))
}

fn create_renderer(window: &mut GlfwWindow, config: &ApplicationConfig) -> Result<Box<dyn Renderer>, AppError> {
    let (width, height) = window.framebuffer_size();
    match config.renderer.backend {
        BackendKind::LegacyGl => {
            // SAFETY: the window made its context current when it was created
            let backend = unsafe { GlBackend::<Legacy>::from_loader(|name| window.gl_proc_address(name), width, height)? };
            engine(backend, &config.textures)
        }
        BackendKind::ModernGl => {
            // SAFETY: as above
            let backend = unsafe { GlBackend::<Modern>::from_loader(|name| window.gl_proc_address(name), width, height)? };
            engine(backend, &config.textures)
        }
        BackendKind::Vulkan => engine(VulkanBackend::new(&*window, &config.renderer.vulkan)?, &config.textures),
        BackendKind::DirectX => {
            // SAFETY: the window lives in the app next to the renderer and is dropped after it
            let backend = unsafe { DxBackend::new(window.surface_target()?, (width, height), &config.renderer.directx)? };
            engine(backend, &config.textures)
        }
        BackendKind::Headless => engine(HeadlessBackend::with_size(width, height), &config.textures),
    }
}

/// Rolling hills from a handful of gaussian bumps
fn generate_landscape(rng: &mut impl Rng) -> Landscape {
    const COLUMNS: usize = 61;
    const ROWS: usize = 41;
    let mut landscape = Landscape::new(TABLE_WIDTH, TABLE_DEPTH, "textures/table.png", COLUMNS, ROWS);
    landscape.set_texture("textures/table.png", (8.0, 8.0));

    let hills: Vec<(f32, f32, f32, f32)> = (0..6)
        .map(|_| {
            let x = rng.gen_range(-TABLE_WIDTH / 2.0..TABLE_WIDTH / 2.0);
            let y = rng.gen_range(-TABLE_DEPTH / 2.0..TABLE_DEPTH / 2.0);
            (x, y, rng.gen_range(0.5..2.5), rng.gen_range(3.0..8.0))
        })
        .collect();

    for column in 0..COLUMNS {
        for row in 0..ROWS {
            let x = column as f32 * TABLE_WIDTH / (COLUMNS - 1) as f32 - TABLE_WIDTH / 2.0;
            let y = row as f32 * TABLE_DEPTH / (ROWS - 1) as f32 - TABLE_DEPTH / 2.0;
            let height: f32 = hills
                .iter()
                .map(|&(hx, hy, amplitude, radius)| {
                    let distance = (x - hx).powi(2) + (y - hy).powi(2);
                    amplitude * (-distance / (radius * radius)).exp()
                })
                .sum();
            landscape.set_height(column, row, height);
        }
    }
    landscape
}

/// Window, renderer and view of the running demo
pub struct TableApp {
    // The renderer owns surfaces created from the window, so it is declared (and dropped) first
    renderer: Box<dyn Renderer>,
    window: GlfwWindow,
    view: GameView,
    camera: OrbitCamera,
    drag_from: Option<(f64, f64)>,
    frames: u32,
    last_report: Instant,
}

impl TableApp {
    /// Open the window and the renderer described by `config`
    ///
    /// # Errors
    /// Window or renderer creation failures.
    pub fn new(config: &ApplicationConfig) -> Result<Self, AppError> {
        log::info!("Creating table demo with the {} backend...", config.renderer.backend.name());
        let mut window = GlfwWindow::new("Wargame Table", 1280, 720, config.renderer.backend)?;
        let mut renderer = create_renderer(&mut window, config)?;
        log::info!("Renderer '{}' ready", renderer.name());

        let (width, height) = window.framebuffer_size();
        let view = GameView::new(Box::new(BoxPieces), width, height, &config.view);
        let camera = OrbitCamera::new(TABLE_WIDTH / 2.0, TABLE_DEPTH / 2.0, 2.8, 0.5).with_distance(45.0);

        renderer.set_number_of_lights(1);
        renderer.set_up_light(0, &Light { position: [-20.0, -30.0, 40.0, 1.0], ..Light::default() });

        Ok(Self { renderer, window, view, camera, drag_from: None, frames: 0, last_report: Instant::now() })
    }

    /// Populate the table
    pub fn initialize(&mut self, config: &ApplicationConfig) {
        let mut rng = rand::thread_rng();
        self.view.set_bounding_provider(Box::new(BoxPieces));
        self.apply_camera();

        let model = self.view.model_mut();
        *model.landscape_mut() = generate_landscape(&mut rng);

        for _ in 0..12 {
            let x = rng.gen_range(-25.0..25.0);
            let y = rng.gen_range(-16.0..16.0);
            let z = model.landscape().height_at(x, y);
            let mut tree = GameObject::new(TREE, Vec3::new(x, y, z), rng.gen_range(0.0..360.0));
            tree.is_static = true;
            model.add_object(tree);
        }
        for (x, y, rotation) in [(-10.0, 8.0, 20.0), (14.0, -6.0, 200.0)] {
            let z = model.landscape().height_at(x, y);
            let mut house = GameObject::new(HOUSE, Vec3::new(x, y, z), rotation);
            house.is_static = true;
            model.add_object(house);
        }
        for i in 0..5 {
            let x = -20.0 + i as f32 * 8.0;
            let y = -12.0 + rng.gen_range(-2.0..2.0);
            let z = model.landscape().height_at(x, y);
            model.add_object(GameObject::new(TANK, Vec3::new(x, y, z), 90.0));
        }
        log::info!("Table populated with {} objects", model.object_count());

        if config.view.shadow_map_size > 0 {
            let main = self.view.main_viewport();
            let light = Vec3::new(-20.0, -30.0, 40.0);
            if self.view.enable_shadow_map(main, config.view.shadow_map_size, config.view.shadow_angle, light).is_none() {
                log::warn!("Shadow map could not be attached to the main viewport");
            }
        }
    }

    /// Run until the window closes
    ///
    /// # Errors
    /// The first renderer failure ends the loop.
    pub fn run(&mut self) -> Result<(), AppError> {
        log::info!("Starting table demo...");
        while !self.window.should_close() {
            for event in self.window.poll_events() {
                self.handle_event(event)?;
            }

            let (width, height) = self.window.framebuffer_size();
            if width == 0 || height == 0 {
                // Minimized
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }

            self.view.draw_frame(self.renderer.as_mut())?;
            self.window.swap_buffers();
            self.report_fps();
        }

        self.view.clear_resources(self.renderer.as_mut());
        log::info!("Table demo completed");
        Ok(())
    }

    fn handle_event(&mut self, event: WindowEvent) -> Result<(), AppError> {
        match event {
            WindowEvent::Key(Key::Escape, _, Action::Press, _) => self.window.set_should_close(true),
            WindowEvent::Key(key, _, Action::Press | Action::Repeat, _) => self.handle_key(key),
            WindowEvent::Scroll(_, offset) => {
                self.camera.zoom(1.1_f32.powf(offset as f32));
                self.apply_camera();
            }
            WindowEvent::MouseButton(MouseButton::Button2, action, _) => {
                self.drag_from = (action == Action::Press).then(|| {
                    let (x, y) = self.window.cursor_position();
                    (f64::from(x), f64::from(y))
                });
            }
            WindowEvent::MouseButton(MouseButton::Button1, Action::Press, _) => {
                let (x, y) = self.window.cursor_position();
                self.pick(x, y);
            }
            WindowEvent::CursorPos(x, y) => {
                if let Some((from_x, from_y)) = self.drag_from.replace((x, y)) {
                    self.camera.rotate(((x - from_x) * 0.3) as f32, ((y - from_y) * 0.3) as f32);
                    self.apply_camera();
                }
            }
            WindowEvent::FramebufferSize(width, height) if width > 0 && height > 0 => {
                log::debug!("Framebuffer resized to {width}x{height}");
                self.view.resize(self.renderer.as_mut(), width as u32, height as u32)?;
            }
            _ => {}
        }
        Ok(())
    }

    fn handle_key(&mut self, key: Key) {
        match key {
            Key::W => self.camera.translate(0.0, 1.0),
            Key::S => self.camera.translate(0.0, -1.0),
            Key::A => self.camera.translate(-1.0, 0.0),
            Key::D => self.camera.translate(1.0, 0.0),
            Key::Q => self.camera.rotate(-5.0, 0.0),
            Key::E => self.camera.rotate(5.0, 0.0),
            Key::R => self.camera.rotate(0.0, 5.0),
            Key::F => self.camera.rotate(0.0, -5.0),
            Key::Space => self.camera.reset(),
            Key::T => {
                let model = self.view.model_mut();
                if let Some(object) = model.selected().and_then(|key| model.object_mut(key)) {
                    let hidden = object.hidden_parts.contains("turret");
                    object.show_part("turret", hidden);
                }
                return;
            }
            Key::Delete => {
                if let Some(selected) = self.view.model().selected() {
                    self.view.remove_object(selected);
                }
                return;
            }
            _ => return,
        }
        self.apply_camera();
    }

    fn apply_camera(&mut self) {
        let main = self.view.main_viewport();
        if let Some(viewport) = self.view.viewport_mut(main) {
            viewport.set_camera(Box::new(self.camera.clone()));
        }
    }

    /// Select the movable piece closest to the clicked table point
    fn pick(&mut self, x: i32, y: i32) {
        let Some((world_x, world_y)) = self.view.window_coords_to_world_coords(x, y, 0.0) else {
            return;
        };
        let model = self.view.model_mut();
        let nearest = model
            .objects()
            .filter(|(_, object)| !object.is_static)
            .map(|(key, object)| {
                let distance = (object.position.x - world_x).hypot(object.position.y - world_y);
                (key, distance)
            })
            .filter(|&(_, distance)| distance <= PICK_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(key, _)| key);
        model.select(nearest);
        log::debug!("Clicked table at ({world_x:.1}, {world_y:.1}), selection {nearest:?}");
    }

    fn report_fps(&mut self) {
        self.frames += 1;
        let elapsed = self.last_report.elapsed();
        if elapsed >= Duration::from_secs(5) {
            let fps = f64::from(self.frames) / elapsed.as_secs_f64();
            self.window.set_title(&format!("Wargame Table - {} - {fps:.0} fps", self.renderer.name()));
            log::debug!("{fps:.1} fps");
            self.frames = 0;
            self.last_report = Instant::now();
        }
    }
}

fn main() -> Result<(), AppError> {
    let config = ApplicationConfig::load_or_default(CONFIG_PATH)?;
    logging::init_with_level(&config.engine.log_level);
    config.validate().map_err(AppError::InvalidConfig)?;

    let mut app = TableApp::new(&config)?;
    app.initialize(&config);
    app.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_landscape_has_hills() {
        let mut rng = StdRng::seed_from_u64(7);
        let landscape = generate_landscape(&mut rng);
        let highest = (0..61 * 41).map(|i| landscape.height(i)).fold(0.0_f32, f32::max);
        assert!(highest > 0.1);
        assert!(landscape.height_at(0.0, 0.0) >= 0.0);
    }
}
