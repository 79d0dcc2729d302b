//! Drawing lists
//!
//! A drawing list is recorded once by running a callback against the renderer in recording
//! mode and replayed any number of times. Immediate geometry drawn while recording is baked
//! into persistent vertex buffers; state changes are stored as commands. Replay goes through
//! the public [`Renderer`] contract, so a list works on every backend.

use crate::foundation::math::Vec3;
use crate::render::api::unwind_matrices;
use crate::render::mesh::Material;
use crate::render::texture::TextureBinding;
use crate::render::vertex::VertexBuffer;
use crate::render::{Color, Light, RenderMode, RenderResult, Renderer, TeamColor, TextureFlags, TextureSlot};

/// One recorded renderer call
#[derive(Clone)]
pub(crate) enum ListCommand {
    PushMatrix,
    PopMatrix,
    Translate(Vec3),
    Rotate(f32, Vec3),
    Scale(f32),
    LookAt { position: Vec3, target: Vec3, up: Vec3 },
    ResetViewMatrix,
    SetColor(Color),
    SetMaterial(Box<Material>),
    SetNumberOfLights(usize),
    SetUpLight(usize, Light),
    SetTexture { path: String, slot: TextureSlot, flags: TextureFlags, team_colors: Vec<TeamColor>, force_load_now: bool },
    SetCubemap { faces: Box<[String; 6]>, slot: TextureSlot },
    BindTexture { binding: TextureBinding, slot: TextureSlot },
    UnbindTexture(TextureSlot),
    DepthTest(bool),
    Blending(bool),
    PolygonOffset { enable: bool, factor: f32, units: f32 },
    DrawArrays { buffer: VertexBuffer<'static>, mode: RenderMode, count: usize },
    DrawIndexes { buffer: VertexBuffer<'static>, begin: usize, count: usize },
    DrawInstanced { buffer: VertexBuffer<'static>, size: usize, instances: usize },
}

/// Replayable batch of render calls
#[derive(Clone, Default)]
pub struct DrawingList {
    commands: Vec<ListCommand>,
}

impl DrawingList {
    pub(crate) fn from_commands(commands: Vec<ListCommand>) -> Self {
        Self { commands }
    }

    /// Number of recorded calls
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether nothing was recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Number of recorded draw calls
    #[must_use]
    pub fn draw_count(&self) -> usize {
        self.commands
            .iter()
            .filter(|c| {
                matches!(
                    c,
                    ListCommand::DrawArrays { .. } | ListCommand::DrawIndexes { .. } | ListCommand::DrawInstanced { .. }
                )
            })
            .count()
    }

    /// Replay the recorded calls
    ///
    /// A replay that fails part way pops the model-view stack back to its depth at the start.
    ///
    /// # Errors
    /// The first error a replayed call returns.
    pub fn draw(&self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        let depth = renderer.matrix_depth();
        let result = self.replay(renderer);
        if result.is_err() {
            if let Err(err) = unwind_matrices(renderer, depth) {
                log::warn!("Failed to rebalance matrices after drawing list error: {}", err);
            }
        }
        result
    }

    fn replay(&self, renderer: &mut dyn Renderer) -> RenderResult<()> {
        for command in &self.commands {
            match command {
                ListCommand::PushMatrix => renderer.push_matrix(),
                ListCommand::PopMatrix => renderer.pop_matrix()?,
                ListCommand::Translate(v) => renderer.translate(v.x, v.y, v.z),
                ListCommand::Rotate(angle, axis) => renderer.rotate(*angle, axis.x, axis.y, axis.z),
                ListCommand::Scale(factor) => renderer.scale(*factor),
                ListCommand::LookAt { position, target, up } => renderer.look_at(*position, *target, *up),
                ListCommand::ResetViewMatrix => renderer.reset_view_matrix(),
                ListCommand::SetColor(color) => renderer.set_color(*color),
                ListCommand::SetMaterial(material) => renderer.set_material(material),
                ListCommand::SetNumberOfLights(count) => renderer.set_number_of_lights(*count),
                ListCommand::SetUpLight(index, light) => renderer.set_up_light(*index, light),
                ListCommand::SetTexture { path, slot, flags, team_colors, force_load_now } => {
                    if !team_colors.is_empty() {
                        renderer.set_team_texture(path, team_colors, *flags)?;
                    } else if *slot == TextureSlot::Diffuse {
                        renderer.set_texture(path, *force_load_now, *flags)?;
                    } else {
                        renderer.set_texture_in_slot(path, *slot, *flags)?;
                    }
                }
                ListCommand::SetCubemap { faces, slot } => renderer.set_cubemap_texture(faces, *slot)?,
                ListCommand::BindTexture { binding, slot } => renderer.set_texture_binding(binding, *slot)?,
                ListCommand::UnbindTexture(slot) => renderer.unbind_texture(*slot),
                ListCommand::DepthTest(enable) => renderer.enable_depth_test(*enable),
                ListCommand::Blending(enable) => renderer.enable_blending(*enable),
                ListCommand::PolygonOffset { enable, factor, units } => renderer.enable_polygon_offset(*enable, *factor, *units),
                ListCommand::DrawArrays { buffer, mode, count } => renderer.draw_arrays(buffer, *mode, *count)?,
                ListCommand::DrawIndexes { buffer, begin, count } => renderer.draw_indexes(buffer, *begin, *count)?,
                ListCommand::DrawInstanced { buffer, size, instances } => renderer.draw_instanced(buffer, *size, *instances)?,
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for DrawingList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DrawingList").field("commands", &self.commands.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::vertex::VertexArrays;
    use crate::render::{HeadlessRenderer, RenderError};

    const TRIANGLE: [f32; 9] = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];

    #[test]
    fn test_failed_replay_rebalances_matrices() {
        let mut renderer = HeadlessRenderer::headless(320, 240).unwrap();
        let arrays = VertexArrays::separate(&TRIANGLE, &[], &[]).unwrap();
        let mut buffer = renderer.create_vertex_buffer(&arrays).unwrap();
        renderer.set_index_buffer(&mut buffer, &[0, 1, 2]).unwrap();
        renderer.translate(1.0, 0.0, 0.0);
        let before = renderer.view_matrix();

        let list = DrawingList::from_commands(vec![
            ListCommand::PushMatrix,
            ListCommand::PushMatrix,
            ListCommand::Translate(Vec3::new(4.0, 4.0, 4.0)),
            ListCommand::DrawIndexes { buffer, begin: 0, count: 6 },
            ListCommand::PopMatrix,
            ListCommand::PopMatrix,
        ]);

        assert!(matches!(list.draw(&mut renderer), Err(RenderError::IndexOutOfRange { .. })));
        assert_eq!(renderer.matrix_depth(), 1);
        assert_eq!(renderer.view_matrix(), before);
    }

    #[test]
    fn test_recorded_texture_keeps_force_load() {
        let mut renderer = HeadlessRenderer::headless(320, 240).unwrap();
        let list = renderer
            .create_drawing_list(&mut |r| r.set_texture("units/tank.png", true, TextureFlags::BUILD_MIPMAPS))
            .unwrap();
        assert!(matches!(
            list.commands.as_slice(),
            [ListCommand::SetTexture { force_load_now: true, slot: TextureSlot::Diffuse, .. }]
        ));
    }
}
