//! Materials and sub-mesh partitioning
//!
//! A model's index buffer is split into per-material ranges by a sorted list of
//! [`MeshPart`] breakpoints. [`Model`] uploads the geometry once and draws each range
//! with its material, optionally skipping named sub-meshes.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::assets::ModelData;
use crate::render::vertex::{VertexArrays, VertexBuffer};
use crate::render::{Renderer, RenderResult, TeamColor, TextureFlags, TextureSlot};

/// Surface parameters of a sub-mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Ambient reflectance
    pub ambient: [f32; 4],
    /// Diffuse reflectance
    pub diffuse: [f32; 4],
    /// Specular reflectance
    pub specular: [f32; 4],
    /// Specular exponent
    pub shininess: f32,
    /// Diffuse texture path
    pub texture: Option<String>,
    /// Specular map path
    pub specular_map: Option<String>,
    /// Bump map path
    pub bump_map: Option<String>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: [0.2, 0.2, 0.2, 1.0],
            diffuse: [0.8, 0.8, 0.8, 1.0],
            specular: [0.0, 0.0, 0.0, 1.0],
            shininess: 0.0,
            texture: None,
            specular_map: None,
            bump_map: None,
        }
    }
}

impl Material {
    /// Set the colors and bind the textures of this material
    ///
    /// The diffuse texture gets the team-colored variant when `team_colors` is not empty;
    /// slots of absent textures are unbound.
    ///
    /// # Errors
    /// Backend failures binding textures.
    pub fn apply(&self, renderer: &mut dyn Renderer, team_colors: &[TeamColor]) -> RenderResult<()> {
        renderer.set_material(self);
        match &self.texture {
            Some(path) if team_colors.is_empty() => renderer.set_texture(path, false, TextureFlags::BUILD_MIPMAPS)?,
            Some(path) => renderer.set_team_texture(path, team_colors, TextureFlags::BUILD_MIPMAPS)?,
            None => renderer.unbind_texture(TextureSlot::Diffuse),
        }
        for (path, slot) in [(&self.specular_map, TextureSlot::Specular), (&self.bump_map, TextureSlot::Bump)] {
            match path {
                Some(path) => renderer.set_texture_in_slot(path, slot, TextureFlags::BUILD_MIPMAPS)?,
                None => renderer.unbind_texture(slot),
            }
        }
        Ok(())
    }
}

/// Named materials of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialManager {
    materials: HashMap<String, Material>,
}

impl MaterialManager {
    /// Empty set
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Material called `name`
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    /// Add or replace a material
    pub fn add(&mut self, name: impl Into<String>, material: Material) {
        self.materials.insert(name.into(), material);
    }

    /// Add materials, keeping existing entries of the same name
    pub fn insert_all(&mut self, materials: impl IntoIterator<Item = (String, Material)>) {
        for (name, material) in materials {
            self.materials.entry(name).or_insert(material);
        }
    }

    /// Number of materials
    #[must_use]
    pub fn len(&self) -> usize {
        self.materials.len()
    }

    /// Whether there are no materials
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

/// Sub-mesh breakpoint: `material` applies from index `begin` up to the next breakpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshPart {
    /// First index of the sub-mesh
    pub begin: usize,
    /// Material name
    pub material: String,
    /// Sub-mesh name, used to hide it
    pub name: String,
}

impl MeshPart {
    /// Create a breakpoint
    pub fn new(begin: usize, material: impl Into<String>, name: impl Into<String>) -> Self {
        Self { begin, material: material.into(), name: name.into() }
    }
}

/// Contiguous index range drawn with one material
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshRange<'a> {
    /// First index
    pub begin: usize,
    /// Number of indexes
    pub count: usize,
    /// Material name; `None` for indexes before the first breakpoint
    pub material: Option<&'a str>,
}

/// Split `0..index_count` into per-material ranges
///
/// Hidden parts are skipped. Adjacent ranges sharing a material are merged; with
/// `vertex_only` materials are ignored and every contiguous run becomes one range.
#[must_use]
pub fn partition<'a>(parts: &'a [MeshPart], index_count: usize, hidden: &HashSet<String>, vertex_only: bool) -> Vec<MeshRange<'a>> {
    let mut ranges: Vec<MeshRange<'a>> = Vec::new();
    let mut push = |begin: usize, end: usize, material: Option<&'a str>| {
        if end <= begin {
            return;
        }
        let material = if vertex_only { None } else { material };
        if let Some(last) = ranges.last_mut() {
            if last.begin + last.count == begin && last.material == material {
                last.count += end - begin;
                return;
            }
        }
        ranges.push(MeshRange { begin, count: end - begin, material });
    };

    let first = parts.first().map_or(index_count, |p| p.begin.min(index_count));
    push(0, first, None);
    for (i, part) in parts.iter().enumerate() {
        let begin = part.begin.min(index_count);
        let end = parts.get(i + 1).map_or(index_count, |next| next.begin.min(index_count));
        if !hidden.contains(&part.name) {
            push(begin, end, Some(part.material.as_str()));
        }
    }
    ranges
}

/// Uploaded model geometry with its sub-mesh table
pub struct Model {
    buffer: VertexBuffer<'static>,
    parts: Vec<MeshPart>,
    materials: MaterialManager,
}

impl Model {
    /// Upload `data` into a persistent vertex buffer
    ///
    /// # Errors
    /// `InvalidOperation` for inconsistent arrays, backend allocation failures.
    pub fn new(renderer: &mut dyn Renderer, data: &ModelData) -> RenderResult<Self> {
        let arrays = VertexArrays::from_vectors(&data.vertices, &data.normals, &data.tex_coords)?;
        let mut buffer = renderer.create_vertex_buffer(&arrays)?;
        if !data.indexes.is_empty() {
            renderer.set_index_buffer(&mut buffer, &data.indexes)?;
        }
        let mut parts = data.parts.clone();
        parts.sort_by_key(|p| p.begin);
        Ok(Self { buffer, parts, materials: data.materials.clone() })
    }

    /// Vertex buffer
    #[must_use]
    pub const fn buffer(&self) -> &VertexBuffer<'static> {
        &self.buffer
    }

    /// Sub-mesh breakpoints, sorted
    #[must_use]
    pub fn parts(&self) -> &[MeshPart] {
        &self.parts
    }

    /// Materials
    #[must_use]
    pub const fn materials(&self) -> &MaterialManager {
        &self.materials
    }

    /// Draw the model, skipping `hidden` sub-meshes
    ///
    /// With `vertex_only` (depth and shadow passes) materials and textures are left alone.
    ///
    /// # Errors
    /// Backend draw failures.
    pub fn draw(
        &self,
        renderer: &mut dyn Renderer,
        hidden: &HashSet<String>,
        vertex_only: bool,
        team_colors: &[TeamColor],
    ) -> RenderResult<()> {
        let index_count = self.buffer.index_count();
        if index_count == 0 {
            if !vertex_only {
                if let Some(material) = self.parts.first().and_then(|p| self.materials.get(&p.material)) {
                    material.apply(renderer, team_colors)?;
                }
            }
            return renderer.draw_all(&self.buffer, self.buffer.vertex_count());
        }

        for range in partition(&self.parts, index_count, hidden, vertex_only) {
            if let Some(material) = range.material.and_then(|name| self.materials.get(name)) {
                material.apply(renderer, team_colors)?;
            }
            renderer.draw_indexes(&self.buffer, range.begin, range.count)?;
        }
        if !vertex_only {
            renderer.set_material(&Material::default());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parts() -> Vec<MeshPart> {
        vec![MeshPart::new(0, "hull", "body"), MeshPart::new(300, "tracks", "wheels")]
    }

    #[test]
    fn test_partition_by_material() {
        let parts = parts();
        let ranges = partition(&parts, 450, &HashSet::new(), false);
        assert_eq!(
            ranges,
            vec![
                MeshRange { begin: 0, count: 300, material: Some("hull") },
                MeshRange { begin: 300, count: 150, material: Some("tracks") },
            ]
        );
    }

    #[test]
    fn test_hidden_part_is_skipped() {
        let parts = parts();
        let hidden: HashSet<String> = ["body".to_string()].into_iter().collect();
        let ranges = partition(&parts, 450, &hidden, false);
        assert_eq!(ranges, vec![MeshRange { begin: 300, count: 150, material: Some("tracks") }]);
    }

    #[test]
    fn test_same_material_parts_merge() {
        let parts = vec![MeshPart::new(10, "a", "x"), MeshPart::new(20, "a", "y"), MeshPart::new(30, "b", "z")];
        let ranges = partition(&parts, 40, &HashSet::new(), false);
        assert_eq!(
            ranges,
            vec![
                MeshRange { begin: 0, count: 10, material: None },
                MeshRange { begin: 10, count: 20, material: Some("a") },
                MeshRange { begin: 30, count: 10, material: Some("b") },
            ]
        );
    }

    #[test]
    fn test_vertex_only_draws_one_range() {
        let parts = parts();
        let ranges = partition(&parts, 450, &HashSet::new(), true);
        assert_eq!(ranges, vec![MeshRange { begin: 0, count: 450, material: None }]);
    }

    #[test]
    fn test_material_manager_keeps_existing_on_insert_all() {
        let mut materials = MaterialManager::new();
        materials.add("a", Material { shininess: 5.0, ..Material::default() });
        materials.insert_all([("a".to_string(), Material::default()), ("b".to_string(), Material::default())]);
        assert_eq!(materials.len(), 2);
        assert_eq!(materials.get("a").map(|m| m.shininess), Some(5.0));
    }
}
