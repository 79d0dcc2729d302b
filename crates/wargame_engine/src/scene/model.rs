//! Game model: what the game view draws
//!
//! The model is plain data. Pieces on the table, the landscape with its height map and decals,
//! projectiles in flight and particle effects. Uploaded meshes live in the [`ModelManager`],
//! keyed by model path, so any number of pieces share one GPU copy.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::assets::ModelProvider;
use crate::foundation::math::Vec3;
use crate::render::mesh::Model;
use crate::render::viewport::ObjectKey;
use crate::render::{RenderResult, Renderer, TeamColor};

/// A piece placed on the table
#[derive(Debug, Clone, PartialEq)]
pub struct GameObject {
    /// Path of the model drawn for the piece
    pub model: String,
    /// Position on the table
    pub position: Vec3,
    /// Rotation around the table normal, degrees
    pub rotation: f32,
    /// Sub-meshes not drawn
    pub hidden_parts: HashSet<String>,
    /// Team color variants of the piece's textures
    pub team_colors: Vec<TeamColor>,
    /// Extra models drawn with the piece's transform (weapons, banners)
    pub secondary_models: Vec<String>,
    /// Part of the landscape rather than of the game: never selected
    pub is_static: bool,
}

impl GameObject {
    /// Piece showing `model` at `position`
    pub fn new(model: impl Into<String>, position: Vec3, rotation: f32) -> Self {
        Self {
            model: model.into(),
            position,
            rotation,
            hidden_parts: HashSet::new(),
            team_colors: Vec::new(),
            secondary_models: Vec::new(),
            is_static: false,
        }
    }

    /// Hide or show a sub-mesh
    pub fn show_part(&mut self, name: &str, show: bool) {
        if show {
            self.hidden_parts.remove(name);
        } else {
            self.hidden_parts.insert(name.to_string());
        }
    }
}

/// Texture laid flat on the landscape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decal {
    /// Texture path
    pub texture: String,
    /// Center x
    pub x: f32,
    /// Center y
    pub y: f32,
    /// Rotation around the table normal, degrees
    pub rotation: f32,
    /// Extent along x
    pub width: f32,
    /// Extent along y
    pub depth: f32,
}

/// Particle effect placed in the scene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticleEffect {
    /// Effect description path
    pub path: String,
    /// Emitter position
    pub position: Vec3,
    /// Uniform scale
    pub scale: f32,
    /// Particle budget
    pub max_particles: usize,
}

/// Projectile in flight
#[derive(Debug, Clone, PartialEq)]
pub struct Projectile {
    /// Current position
    pub position: Vec3,
    /// Rotation around the table normal, degrees
    pub rotation: f32,
    /// Model drawn for the projectile, if any
    pub model: Option<String>,
    /// Trail effect, drawn relative to the projectile
    pub particle: Option<ParticleEffect>,
}

/// Height-mapped table surface
///
/// `points_per_width` x `points_per_depth` heights sampled on a regular grid centered on the
/// origin, stored column by column (x outer, y inner).
#[derive(Debug, Clone, PartialEq)]
pub struct Landscape {
    width: f32,
    depth: f32,
    points_per_width: usize,
    points_per_depth: usize,
    heights: Vec<f32>,
    texture: String,
    texture_scale: (f32, f32),
    decals: Vec<Decal>,
    generation: u64,
}

impl Landscape {
    /// Flat landscape of `width` x `depth` sampled on a `points_per_width` x `points_per_depth` grid
    pub fn new(width: f32, depth: f32, texture: impl Into<String>, points_per_width: usize, points_per_depth: usize) -> Self {
        let points_per_width = points_per_width.max(2);
        let points_per_depth = points_per_depth.max(2);
        Self {
            width,
            depth,
            points_per_width,
            points_per_depth,
            heights: vec![0.0; points_per_width * points_per_depth],
            texture: texture.into(),
            texture_scale: (width, depth),
            decals: Vec::new(),
            generation: 0,
        }
    }

    /// Extent along x
    #[must_use]
    pub const fn width(&self) -> f32 {
        self.width
    }

    /// Extent along y
    #[must_use]
    pub const fn depth(&self) -> f32 {
        self.depth
    }

    /// Grid resolution as `(along x, along y)`
    #[must_use]
    pub const fn points(&self) -> (usize, usize) {
        (self.points_per_width, self.points_per_depth)
    }

    /// Surface texture
    #[must_use]
    pub fn texture(&self) -> &str {
        &self.texture
    }

    /// World extent covered by one repetition of the texture, `(along x, along y)`
    #[must_use]
    pub const fn texture_scale(&self) -> (f32, f32) {
        self.texture_scale
    }

    /// Counter bumped by every change, used to invalidate cached geometry
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    fn touch(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    /// Replace the surface texture and its repetition
    pub fn set_texture(&mut self, texture: impl Into<String>, scale: (f32, f32)) {
        self.texture = texture.into();
        self.texture_scale = scale;
        self.touch();
    }

    /// Height of grid point `index`; 0 past the grid
    #[must_use]
    pub fn height(&self, index: usize) -> f32 {
        self.heights.get(index).copied().unwrap_or_default()
    }

    /// Set the height of grid point (`column`, `row`)
    pub fn set_height(&mut self, column: usize, row: usize, height: f32) {
        if column < self.points_per_width && row < self.points_per_depth {
            self.heights[column * self.points_per_depth + row] = height;
            self.touch();
        }
    }

    /// Surface height at a world point, bilinear between grid points, clamped to the table
    #[must_use]
    pub fn height_at(&self, x: f32, y: f32) -> f32 {
        let step_x = self.width / (self.points_per_width - 1) as f32;
        let step_y = self.depth / (self.points_per_depth - 1) as f32;
        let gx = ((x + self.width / 2.0) / step_x).clamp(0.0, (self.points_per_width - 1) as f32);
        let gy = ((y + self.depth / 2.0) / step_y).clamp(0.0, (self.points_per_depth - 1) as f32);
        let (c0, r0) = (gx.floor() as usize, gy.floor() as usize);
        let (c1, r1) = ((c0 + 1).min(self.points_per_width - 1), (r0 + 1).min(self.points_per_depth - 1));
        let (fx, fy) = (gx - c0 as f32, gy - r0 as f32);
        let at = |c: usize, r: usize| self.height(c * self.points_per_depth + r);
        let near = at(c0, r0) * (1.0 - fx) + at(c1, r0) * fx;
        let far = at(c0, r1) * (1.0 - fx) + at(c1, r1) * fx;
        near * (1.0 - fy) + far * fy
    }

    /// Decals, in drawing order
    #[must_use]
    pub fn decals(&self) -> &[Decal] {
        &self.decals
    }

    /// Lay a decal on the surface
    pub fn add_decal(&mut self, decal: Decal) {
        self.decals.push(decal);
        self.touch();
    }
}

impl Default for Landscape {
    fn default() -> Self {
        Self::new(60.0, 40.0, "", 2, 2)
    }
}

/// Everything on the table
#[derive(Debug, Default)]
pub struct GameModel {
    objects: SlotMap<ObjectKey, GameObject>,
    selected: Option<ObjectKey>,
    landscape: Landscape,
    projectiles: Vec<Projectile>,
    particles: Vec<ParticleEffect>,
}

impl GameModel {
    /// Empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a piece
    pub fn add_object(&mut self, object: GameObject) -> ObjectKey {
        self.objects.insert(object)
    }

    /// Remove a piece, deselecting it
    pub fn remove_object(&mut self, key: ObjectKey) -> Option<GameObject> {
        if self.selected == Some(key) {
            self.selected = None;
        }
        self.objects.remove(key)
    }

    /// Piece by key
    #[must_use]
    pub fn object(&self, key: ObjectKey) -> Option<&GameObject> {
        self.objects.get(key)
    }

    /// Mutable piece by key
    pub fn object_mut(&mut self, key: ObjectKey) -> Option<&mut GameObject> {
        self.objects.get_mut(key)
    }

    /// Every piece with its key
    pub fn objects(&self) -> impl Iterator<Item = (ObjectKey, &GameObject)> {
        self.objects.iter()
    }

    /// Number of pieces
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Select a piece; static pieces and unknown keys clear the selection
    pub fn select(&mut self, key: Option<ObjectKey>) {
        self.selected = key.filter(|&k| self.objects.get(k).is_some_and(|o| !o.is_static));
    }

    /// Selected piece
    #[must_use]
    pub const fn selected(&self) -> Option<ObjectKey> {
        self.selected
    }

    /// Table surface
    #[must_use]
    pub const fn landscape(&self) -> &Landscape {
        &self.landscape
    }

    /// Mutable table surface
    pub fn landscape_mut(&mut self) -> &mut Landscape {
        &mut self.landscape
    }

    /// Projectiles in flight
    #[must_use]
    pub fn projectiles(&self) -> &[Projectile] {
        &self.projectiles
    }

    /// Launch a projectile
    pub fn add_projectile(&mut self, projectile: Projectile) {
        self.projectiles.push(projectile);
    }

    /// Drop projectiles that reached their target
    pub fn retain_projectiles(&mut self, keep: impl FnMut(&Projectile) -> bool) {
        self.projectiles.retain(keep);
    }

    /// Standalone particle effects
    #[must_use]
    pub fn particle_effects(&self) -> &[ParticleEffect] {
        &self.particles
    }

    /// Start a particle effect
    pub fn add_particle_effect(&mut self, effect: ParticleEffect) {
        self.particles.push(effect);
    }
}

/// Uploaded models keyed by path
///
/// Models load on first draw. A model that fails to load is remembered and skipped with one
/// warning instead of being retried every frame.
pub struct ModelManager {
    provider: Box<dyn ModelProvider>,
    models: HashMap<String, Option<Model>>,
}

impl ModelManager {
    /// Manager loading through `provider`
    pub fn new(provider: Box<dyn ModelProvider>) -> Self {
        Self { provider, models: HashMap::new() }
    }

    /// Load `path` unless it was already attempted
    ///
    /// # Errors
    /// Backend errors while uploading; provider errors are logged and absorbed.
    pub fn load_if_not_exist(&mut self, renderer: &mut dyn Renderer, path: &str) -> RenderResult<()> {
        if self.models.contains_key(path) {
            return Ok(());
        }
        let model = match self.provider.load(path) {
            Ok(data) => Some(Model::new(renderer, &data)?),
            Err(err) => {
                log::warn!("Failed to load model '{path}': {err}");
                None
            }
        };
        log::debug!("Model '{path}' cached (loaded: {})", model.is_some());
        self.models.insert(path.to_string(), model);
        Ok(())
    }

    /// Draw `path` with the current transform, loading it first if needed
    ///
    /// `object` supplies hidden sub-meshes and team colors. Depth passes skip materials.
    ///
    /// # Errors
    /// Backend draw and upload failures.
    pub fn draw_model(&mut self, renderer: &mut dyn Renderer, path: &str, object: Option<&GameObject>, depth_only: bool) -> RenderResult<()> {
        self.load_if_not_exist(renderer, path)?;
        let Some(Some(model)) = self.models.get(path) else { return Ok(()) };
        let empty = HashSet::new();
        let (hidden, team_colors) = object.map_or((&empty, &[][..]), |o| (&o.hidden_parts, o.team_colors.as_slice()));
        model.draw(renderer, hidden, depth_only, team_colors)
    }

    /// Whether `path` is loaded
    #[must_use]
    pub fn is_loaded(&self, path: &str) -> bool {
        matches!(self.models.get(path), Some(Some(_)))
    }

    /// Forget every model; they reload on next use
    pub fn reset(&mut self) {
        self.models.clear();
    }
}

impl std::fmt::Debug for ModelManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelManager").field("models", &self.models.len()).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_height_is_interpolated() {
        let mut landscape = Landscape::new(10.0, 10.0, "grass.png", 3, 3);
        landscape.set_height(1, 1, 4.0);
        assert_relative_eq!(landscape.height_at(0.0, 0.0), 4.0);
        assert_relative_eq!(landscape.height_at(2.5, 0.0), 2.0);
        assert_relative_eq!(landscape.height_at(-100.0, -100.0), 0.0);
    }

    #[test]
    fn test_changes_bump_generation() {
        let mut landscape = Landscape::default();
        let before = landscape.generation();
        landscape.add_decal(Decal { texture: "crater.png".into(), x: 0.0, y: 0.0, rotation: 0.0, width: 2.0, depth: 2.0 });
        assert!(landscape.generation() > before);
        let after = landscape.generation();
        landscape.set_height(99, 0, 1.0);
        assert_eq!(landscape.generation(), after);
    }

    #[test]
    fn test_static_objects_cannot_be_selected() {
        let mut model = GameModel::new();
        let tree = model.add_object(GameObject { is_static: true, ..GameObject::new("tree.obj", Vec3::zeros(), 0.0) });
        let tank = model.add_object(GameObject::new("tank.obj", Vec3::new(1.0, 0.0, 0.0), 90.0));
        model.select(Some(tree));
        assert_eq!(model.selected(), None);
        model.select(Some(tank));
        assert_eq!(model.selected(), Some(tank));
        model.remove_object(tank);
        assert_eq!(model.selected(), None);
        assert_eq!(model.object_count(), 1);
    }

    #[test]
    fn test_show_part_toggles_hidden_set() {
        let mut object = GameObject::new("tank.obj", Vec3::zeros(), 0.0);
        object.show_part("turret", false);
        assert!(object.hidden_parts.contains("turret"));
        object.show_part("turret", true);
        assert!(object.hidden_parts.is_empty());
    }
}
