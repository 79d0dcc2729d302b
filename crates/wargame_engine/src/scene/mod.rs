//! # Scene
//!
//! The game-facing layer over the renderer: the [`GameModel`] describing what stands on the
//! table and the [`GameView`] drawing it through one or more viewports every frame.
//!
//! The interface toolkit and the particle system live outside the engine; the view reaches them
//! through [`UiLayer`] and [`ParticleRenderer`].

pub mod game_view;
pub mod model;
pub mod skybox;

pub use game_view::GameView;
pub use model::{Decal, GameModel, GameObject, Landscape, ModelManager, ParticleEffect, Projectile};
pub use skybox::Skybox;

use crate::render::{RenderResult, Renderer};

/// 2D interface drawn on top of a viewport
///
/// Called inside [`Renderer::draw_in_2d`]: pixel coordinates, y growing downward.
pub trait UiLayer {
    /// Draw the interface
    ///
    /// # Errors
    /// Renderer errors.
    fn draw(&mut self, renderer: &mut dyn Renderer) -> RenderResult<()>;
}

/// Draws particle effects with the current transform
pub trait ParticleRenderer {
    /// Draw one effect
    ///
    /// # Errors
    /// Renderer errors.
    fn draw(&mut self, renderer: &mut dyn Renderer, effect: &ParticleEffect) -> RenderResult<()>;
}
