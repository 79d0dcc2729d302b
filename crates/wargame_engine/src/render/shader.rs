//! Shader program management
//!
//! Every backend exposes a [`ShaderManager`]: compiled programs, a stack of active programs,
//! uniforms and vertex attributes addressed by semantic name, and one "program changed"
//! notification the renderer uses to re-upload matrices and color.
//!
//! The helpers here are shared by the backends: [`ProgramStack`] for the active-program stack,
//! [`LocationCache`] for lazily memoized per-program lookups and [`UniformBlock`] for backends
//! that pack named uniforms into a buffer (Vulkan, DirectX).

use std::collections::HashMap;

use crate::render::types::MAX_LIGHTS;
use crate::render::{RenderError, RenderResult};

/// Opaque handle to a compiled program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderProgram(pub u32);

/// Callback fired once per active-program switch
pub type ProgramChangeCallback = Box<dyn FnMut()>;

/// Program and uniform management of one backend
pub trait ShaderManager {
    /// Compile a program from files; an empty path selects the built-in stage
    ///
    /// # Errors
    /// `ShaderCompilation` with the compiler log, or `ResourceCreationFailed` for unreadable files.
    fn new_program(&mut self, vertex_path: &str, fragment_path: &str, geometry_path: &str) -> RenderResult<ShaderProgram>;

    /// Compile a program from source text; empty text selects the built-in stage
    ///
    /// # Errors
    /// `ShaderCompilation` with the compiler log.
    fn new_program_source(&mut self, vertex: &str, fragment: &str, geometry: &str) -> RenderResult<ShaderProgram>;

    /// The built-in program active when the stack is empty
    fn default_program(&self) -> ShaderProgram;

    /// Program currently in use
    fn active_program(&self) -> ShaderProgram;

    /// Make `program` active, remembering the previous one
    fn push_program(&mut self, program: ShaderProgram);

    /// Reactivate the program that was active before the matching push
    ///
    /// # Errors
    /// `InvalidOperation` when there is no matching push.
    fn pop_program(&mut self) -> RenderResult<()>;

    /// Set a float uniform of `count` elements of `element_size` components (16 for a matrix)
    fn set_uniform_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32]);

    /// Set a signed integer uniform
    fn set_uniform_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32]);

    /// Set an unsigned integer uniform
    fn set_uniform_u32(&mut self, name: &str, element_size: usize, count: usize, values: &[u32]);

    /// Stream a float vertex attribute by name; `per_instance` advances it once per instance
    fn set_vertex_attribute_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32], per_instance: bool);

    /// Stream an integer vertex attribute by name
    fn set_vertex_attribute_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32], per_instance: bool);

    /// Stop streaming a float attribute and feed the constant `default` instead
    fn disable_vertex_attribute_f32(&mut self, name: &str, element_size: usize, default: &[f32]);

    /// Stop streaming an integer attribute and feed the constant `default` instead
    fn disable_vertex_attribute_i32(&mut self, name: &str, element_size: usize, default: &[i32]);

    /// Register the callback fired on every active-program switch (replaces any previous one)
    fn on_program_change(&mut self, callback: ProgramChangeCallback);
}

/// Active-program stack with a change notification
pub struct ProgramStack {
    default: ShaderProgram,
    stack: Vec<ShaderProgram>,
    on_change: Option<ProgramChangeCallback>,
}

impl ProgramStack {
    /// Create a stack whose bottom is `default`
    #[must_use]
    pub fn new(default: ShaderProgram) -> Self {
        Self { default, stack: Vec::new(), on_change: None }
    }

    /// Built-in program
    #[must_use]
    pub const fn default_program(&self) -> ShaderProgram {
        self.default
    }

    /// Program on top of the stack
    #[must_use]
    pub fn active(&self) -> ShaderProgram {
        self.stack.last().copied().unwrap_or(self.default)
    }

    /// Push `program`; returns it when the active program changed
    pub fn push(&mut self, program: ShaderProgram) -> Option<ShaderProgram> {
        let previous = self.active();
        self.stack.push(program);
        self.changed(previous)
    }

    /// Pop the top program; returns the newly active program when it changed
    ///
    /// # Errors
    /// `InvalidOperation` on an empty stack.
    pub fn pop(&mut self) -> RenderResult<Option<ShaderProgram>> {
        let previous = self.active();
        if self.stack.pop().is_none() {
            return Err(RenderError::InvalidOperation("pop_program without matching push_program".to_string()));
        }
        Ok(self.changed(previous))
    }

    fn changed(&mut self, previous: ShaderProgram) -> Option<ShaderProgram> {
        let current = self.active();
        if current == previous {
            return None;
        }
        if let Some(callback) = self.on_change.as_mut() {
            callback();
        }
        Some(current)
    }

    /// Replace the change callback
    pub fn set_callback(&mut self, callback: ProgramChangeCallback) {
        self.on_change = Some(callback);
    }

    /// Forget pushed programs whose backing objects are gone
    pub fn clear(&mut self) {
        self.stack.clear();
    }
}

/// Lazily memoized per-program lookups (uniform and attribute locations)
///
/// Misses are cached too, so a name a program lacks is only resolved once.
#[derive(Debug)]
pub struct LocationCache<L> {
    entries: HashMap<ShaderProgram, HashMap<String, Option<L>>>,
}

impl<L: Clone> LocationCache<L> {
    /// Create an empty cache
    #[must_use]
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Cached location of `name` in `program`, resolving it with `resolve` on first use
    pub fn get_or_resolve(&mut self, program: ShaderProgram, name: &str, resolve: impl FnOnce() -> Option<L>) -> Option<L> {
        let names = self.entries.entry(program).or_default();
        if let Some(location) = names.get(name) {
            return location.clone();
        }
        let location = resolve();
        names.insert(name.to_string(), location.clone());
        location
    }

    /// Drop everything cached for `program`
    pub fn forget(&mut self, program: ShaderProgram) {
        self.entries.remove(&program);
    }
}

impl<L: Clone> Default for LocationCache<L> {
    fn default() -> Self {
        Self::new()
    }
}

/// Semantic uniform names understood by every backend
pub mod names {
    /// Projection * model-view
    pub const MVP_MATRIX: &str = "mvp_matrix";
    /// Model-view matrix
    pub const MODEL_VIEW_MATRIX: &str = "model_view_matrix";
    /// Projection matrix
    pub const PROJECTION_MATRIX: &str = "projection_matrix";
    /// Current color
    pub const COLOR: &str = "color";
    /// Per-draw flags (see [`crate::render::backend::DrawFlags`])
    pub const DRAW_FLAGS: &str = "drawFlags";
    /// Number of active lights
    pub const LIGHTS_COUNT: &str = "lightsCount";
    /// Light-space matrix for shadow mapping
    pub const LIGHT_MATRIX: &str = "lightMatrix";
    /// Whether the shadow map slot holds a valid depth texture
    pub const SHADOWS_ENABLED: &str = "shadowsEnabled";
    /// Material ambient color
    pub const MATERIAL_AMBIENT: &str = "material.ambient";
    /// Material diffuse color
    pub const MATERIAL_DIFFUSE: &str = "material.diffuse";
    /// Material specular color
    pub const MATERIAL_SPECULAR: &str = "material.specular";
    /// Material shininess
    pub const MATERIAL_SHININESS: &str = "material.shininess";

    /// Name of a field of light `index` (`pos`, `ambient`, `diffuse`, `specular`)
    #[must_use]
    pub fn light(index: usize, field: &str) -> String {
        format!("lights[{index}].{field}")
    }

    /// Values the explicit APIs send with every draw instead of the scene block
    #[must_use]
    pub fn is_per_draw(name: &str) -> bool {
        matches!(name, MVP_MATRIX | MODEL_VIEW_MATRIX | COLOR | DRAW_FLAGS)
    }
}

const LIGHT_STRIDE: usize = 64;
const MATERIAL_OFFSET: usize = LIGHT_STRIDE * MAX_LIGHTS;

/// Byte layout of the built-in scene uniform block (std140)
///
/// ```glsl
/// struct Light { vec4 pos; vec4 ambient; vec4 diffuse; vec4 specular; };
/// layout(std140) uniform Scene {
///     Light lights[8];
///     vec4 materialAmbient; vec4 materialDiffuse; vec4 materialSpecular;
///     float materialShininess; int lightsCount; int shadowsEnabled;
///     mat4 projection;
///     mat4 lightMatrix;
/// };
/// ```
pub mod scene_block {
    use super::{LIGHT_STRIDE, MATERIAL_OFFSET};

    /// Offset of `material.ambient`
    pub const MATERIAL_AMBIENT: usize = MATERIAL_OFFSET;
    /// Offset of `material.diffuse`
    pub const MATERIAL_DIFFUSE: usize = MATERIAL_OFFSET + 16;
    /// Offset of `material.specular`
    pub const MATERIAL_SPECULAR: usize = MATERIAL_OFFSET + 32;
    /// Offset of `material.shininess`
    pub const MATERIAL_SHININESS: usize = MATERIAL_OFFSET + 48;
    /// Offset of `lightsCount`
    pub const LIGHTS_COUNT: usize = MATERIAL_OFFSET + 52;
    /// Offset of `shadowsEnabled`
    pub const SHADOWS_ENABLED: usize = MATERIAL_OFFSET + 56;
    /// Offset of the projection matrix
    pub const PROJECTION: usize = MATERIAL_OFFSET + 64;
    /// Offset of `lightMatrix`
    pub const LIGHT_MATRIX: usize = MATERIAL_OFFSET + 128;
    /// Block size in bytes
    pub const SIZE: usize = MATERIAL_OFFSET + 192;

    /// Offset of light field `field` of light `index`
    #[must_use]
    pub fn light_field(index: usize, field: &str) -> Option<usize> {
        let field_offset = match field {
            "pos" => 0,
            "ambient" => 16,
            "diffuse" => 32,
            "specular" => 48,
            _ => return None,
        };
        Some(index * LIGHT_STRIDE + field_offset)
    }
}

/// CPU copy of the scene uniform block with named setters
///
/// Vulkan and DirectX upload it into their per-frame uniform arena whenever it is dirty.
#[derive(Debug, Clone)]
pub struct UniformBlock {
    data: Vec<u8>,
    dirty: bool,
    ignored: Vec<String>,
}

impl UniformBlock {
    /// Zeroed block
    #[must_use]
    pub fn new() -> Self {
        Self { data: vec![0; scene_block::SIZE], dirty: true, ignored: Vec::new() }
    }

    /// Raw bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Whether the block changed since the last [`take_dirty`](Self::take_dirty)
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag, returning its previous value
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    /// Mark the block for re-upload
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    fn offset_of(name: &str) -> Option<usize> {
        match name {
            names::MATERIAL_AMBIENT => Some(scene_block::MATERIAL_AMBIENT),
            names::MATERIAL_DIFFUSE => Some(scene_block::MATERIAL_DIFFUSE),
            names::MATERIAL_SPECULAR => Some(scene_block::MATERIAL_SPECULAR),
            names::MATERIAL_SHININESS => Some(scene_block::MATERIAL_SHININESS),
            names::LIGHTS_COUNT => Some(scene_block::LIGHTS_COUNT),
            names::SHADOWS_ENABLED => Some(scene_block::SHADOWS_ENABLED),
            names::PROJECTION_MATRIX => Some(scene_block::PROJECTION),
            names::LIGHT_MATRIX => Some(scene_block::LIGHT_MATRIX),
            _ => {
                let rest = name.strip_prefix("lights[")?;
                let (index, field) = rest.split_once("].")?;
                let index: usize = index.parse().ok()?;
                if index >= MAX_LIGHTS {
                    return None;
                }
                scene_block::light_field(index, field)
            }
        }
    }

    /// Write `bytes` at the offset of `name`; unknown names are ignored with one debug log each
    pub fn write(&mut self, name: &str, bytes: &[u8]) -> bool {
        let Some(offset) = Self::offset_of(name) else {
            if !self.ignored.iter().any(|n| n == name) {
                log::debug!("Uniform '{}' is not part of the scene block, ignoring", name);
                self.ignored.push(name.to_string());
            }
            return false;
        };
        let end = (offset + bytes.len()).min(self.data.len());
        let len = end - offset;
        if self.data[offset..end] != bytes[..len] {
            self.data[offset..end].copy_from_slice(&bytes[..len]);
            self.dirty = true;
        }
        true
    }

    /// Write float values
    pub fn write_f32(&mut self, name: &str, values: &[f32]) -> bool {
        self.write(name, bytemuck::cast_slice(values))
    }

    /// Write signed integer values
    pub fn write_i32(&mut self, name: &str, values: &[i32]) -> bool {
        self.write(name, bytemuck::cast_slice(values))
    }

    /// Write unsigned integer values
    pub fn write_u32(&mut self, name: &str, values: &[u32]) -> bool {
        self.write(name, bytemuck::cast_slice(values))
    }
}

impl Default for UniformBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of values a uniform setter should consume
#[must_use]
pub fn uniform_len(element_size: usize, count: usize, available: usize) -> usize {
    (element_size * count).min(available)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn test_program_stack_fires_once_per_switch() {
        let fired = Rc::new(Cell::new(0));
        let counter = Rc::clone(&fired);
        let mut stack = ProgramStack::new(ShaderProgram(0));
        stack.set_callback(Box::new(move || counter.set(counter.get() + 1)));

        assert_eq!(stack.push(ShaderProgram(1)), Some(ShaderProgram(1)));
        assert_eq!(stack.push(ShaderProgram(1)), None);
        assert_eq!(stack.pop().unwrap(), None);
        assert_eq!(stack.pop().unwrap(), Some(ShaderProgram(0)));
        assert_eq!(fired.get(), 2);
        assert!(stack.pop().is_err());
    }

    #[test]
    fn test_location_cache_memoizes_misses() {
        let mut cache = LocationCache::<u32>::new();
        let mut lookups = 0;
        for _ in 0..3 {
            let location = cache.get_or_resolve(ShaderProgram(1), "missing", || {
                lookups += 1;
                None
            });
            assert_eq!(location, None);
        }
        assert_eq!(lookups, 1);

        assert_eq!(cache.get_or_resolve(ShaderProgram(2), "missing", || Some(4)), Some(4));
    }

    #[test]
    fn test_uniform_block_layout() {
        let mut block = UniformBlock::new();
        block.take_dirty();

        assert!(block.write_f32("lights[2].diffuse", &[1.0, 0.5, 0.25, 1.0]));
        let offset = 2 * 64 + 32;
        let expected: &[u8] = bytemuck::cast_slice(&[1.0f32, 0.5, 0.25, 1.0]);
        assert_eq!(&block.bytes()[offset..offset + 16], expected);
        assert!(block.take_dirty());

        assert!(block.write_i32(names::LIGHTS_COUNT, &[3]));
        assert!(!block.write_f32("lights[8].pos", &[0.0; 4]));
        assert!(!block.write_f32("unknownUniform", &[0.0]));
        assert_eq!(block.bytes().len(), scene_block::SIZE);
    }

    #[test]
    fn test_unchanged_write_keeps_block_clean() {
        let mut block = UniformBlock::new();
        block.write_f32(names::MATERIAL_SHININESS, &[8.0]);
        block.take_dirty();
        block.write_f32(names::MATERIAL_SHININESS, &[8.0]);
        assert!(!block.is_dirty());
    }
}
