//! Skybox: six textured faces around the eye, drawn behind everything

use crate::foundation::math::{Vec2, Vec3};
use crate::render::drawing_list::DrawingList;
use crate::render::{RenderMode, RenderResult, Renderer, TextureFlags, TextureSlot};

/// Cube of face textures centered on the camera
///
/// Faces are ordered +x, -x, +y, -y, +z, -z. The geometry is recorded into a drawing list on
/// the first draw and kept until [`reset_list`](Self::reset_list).
pub struct Skybox {
    half_size: f32,
    faces: [String; 6],
    list: Option<DrawingList>,
}

impl Skybox {
    /// Skybox of edge `size` showing `faces`
    #[must_use]
    pub fn new(size: f32, faces: [String; 6]) -> Self {
        Self { half_size: size / 2.0, faces, list: None }
    }

    /// Face textures
    #[must_use]
    pub const fn faces(&self) -> &[String; 6] {
        &self.faces
    }

    /// Drop the recorded geometry; re-recorded on the next draw
    pub fn reset_list(&mut self) {
        self.list = None;
    }

    /// Draw around `eye` without touching the depth buffer
    ///
    /// # Errors
    /// Errors of recording or replaying the face list.
    pub fn draw(&mut self, renderer: &mut dyn Renderer, eye: Vec3) -> RenderResult<()> {
        if self.list.is_none() {
            let (half_size, faces) = (self.half_size, &self.faces);
            self.list = Some(renderer.create_drawing_list(&mut |r| record_faces(r, half_size, faces))?);
        }
        let Some(list) = self.list.as_ref() else { return Ok(()) };

        renderer.enable_depth_test(false);
        renderer.push_matrix();
        renderer.translate(eye.x, eye.y, eye.z);
        let result = list.draw(renderer);
        let popped = renderer.pop_matrix();
        renderer.enable_depth_test(true);
        result.and(popped)
    }
}

fn record_faces(renderer: &mut dyn Renderer, s: f32, faces: &[String; 6]) -> RenderResult<()> {
    let quads: [[Vec3; 4]; 6] = [
        [Vec3::new(s, -s, -s), Vec3::new(s, s, -s), Vec3::new(s, s, s), Vec3::new(s, -s, s)],
        [Vec3::new(-s, s, -s), Vec3::new(-s, -s, -s), Vec3::new(-s, -s, s), Vec3::new(-s, s, s)],
        [Vec3::new(s, s, -s), Vec3::new(-s, s, -s), Vec3::new(-s, s, s), Vec3::new(s, s, s)],
        [Vec3::new(-s, -s, -s), Vec3::new(s, -s, -s), Vec3::new(s, -s, s), Vec3::new(-s, -s, s)],
        [Vec3::new(-s, -s, s), Vec3::new(s, -s, s), Vec3::new(s, s, s), Vec3::new(-s, s, s)],
        [Vec3::new(-s, s, -s), Vec3::new(s, s, -s), Vec3::new(s, -s, -s), Vec3::new(-s, -s, -s)],
    ];
    let tex_coords = [Vec2::new(0.0, 1.0), Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0), Vec2::new(0.0, 0.0)];
    for (quad, face) in quads.iter().zip(faces) {
        renderer.set_texture(face, false, TextureFlags::NO_WRAP)?;
        renderer.render_arrays(RenderMode::Rectangles, quad, &[], &tex_coords)?;
    }
    renderer.unbind_texture(TextureSlot::Diffuse);
    Ok(())
}

impl std::fmt::Debug for Skybox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Skybox")
            .field("half_size", &self.half_size)
            .field("faces", &self.faces)
            .field("recorded", &self.list.is_some())
            .finish()
    }
}
