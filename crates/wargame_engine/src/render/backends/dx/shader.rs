//! WGSL programs and the DirectX shader manager
//!
//! Programs are a vertex and a fragment module with the entry points `vs_main` and `fs_main`,
//! sharing the backend's pipeline layout. As on Vulkan, named uniforms land in the scene
//! [`UniformBlock`] except for the per-draw values, which travel in the draw block.

use std::collections::HashSet;
use std::rc::Rc;

use crate::render::shader::{names, uniform_len, ProgramChangeCallback, ProgramStack, ShaderManager, ShaderProgram, UniformBlock};
use crate::render::{Feature, RenderError, RenderResult};

pub(crate) const VERTEX_ENTRY: &str = "vs_main";
pub(crate) const FRAGMENT_ENTRY: &str = "fs_main";

const BUILTIN_SOURCE: &str = include_str!("../../../../shaders/dx/scene.wgsl");

/// Compiled stages of a program
pub(crate) struct DxProgram {
    pub vertex: Rc<wgpu::ShaderModule>,
    pub fragment: Rc<wgpu::ShaderModule>,
}

/// Compile WGSL, turning validation errors into `ShaderCompilation`
fn compile(device: &wgpu::Device, stage: &str, source: &str) -> RenderResult<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(stage),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(RenderError::ShaderCompilation { stage: stage.to_string(), log: error.to_string() }),
        None => Ok(module),
    }
}

fn read_source(path: &str) -> RenderResult<String> {
    std::fs::read_to_string(path).map_err(|e| RenderError::ResourceCreationFailed(format!("Failed to read shader file {path}: {e}")))
}

/// Shader manager of the DirectX backend
pub struct DxShaderManager {
    device: Rc<wgpu::Device>,
    builtin: Rc<wgpu::ShaderModule>,
    programs: Vec<DxProgram>,
    stack: ProgramStack,
    block: UniformBlock,
    ignored_attributes: HashSet<String>,
}

impl DxShaderManager {
    /// Compile the built-in program
    ///
    /// # Errors
    /// `ShaderCompilation` if the embedded WGSL does not validate.
    pub(crate) fn new(device: &Rc<wgpu::Device>) -> RenderResult<Self> {
        let builtin = Rc::new(compile(device, "built-in", BUILTIN_SOURCE)?);
        let mut manager = Self {
            device: Rc::clone(device),
            builtin,
            programs: Vec::new(),
            stack: ProgramStack::new(ShaderProgram(0)),
            block: UniformBlock::new(),
            ignored_attributes: HashSet::new(),
        };
        manager.new_program_source("", "", "")?;
        Ok(manager)
    }

    pub(crate) fn program(&self, program: ShaderProgram) -> Option<&DxProgram> {
        self.programs.get(program.0 as usize)
    }

    /// Scene uniform block shared by all programs
    pub(crate) fn block_mut(&mut self) -> &mut UniformBlock {
        &mut self.block
    }

    fn stage(&self, stage: &str, source: &str) -> RenderResult<Rc<wgpu::ShaderModule>> {
        if source.is_empty() {
            Ok(Rc::clone(&self.builtin))
        } else {
            compile(&self.device, stage, source).map(Rc::new)
        }
    }

    fn ignore_attribute(&mut self, name: &str) {
        if self.ignored_attributes.insert(name.to_string()) {
            log::warn!("DirectX programs take no named vertex attributes; ignoring '{}'", name);
        }
    }
}

impl ShaderManager for DxShaderManager {
    fn new_program(&mut self, vertex_path: &str, fragment_path: &str, geometry_path: &str) -> RenderResult<ShaderProgram> {
        let load = |path: &str| if path.is_empty() { Ok(String::new()) } else { read_source(path) };
        let (vertex, fragment, geometry) = (load(vertex_path)?, load(fragment_path)?, load(geometry_path)?);
        self.new_program_source(&vertex, &fragment, &geometry)
    }

    fn new_program_source(&mut self, vertex: &str, fragment: &str, geometry: &str) -> RenderResult<ShaderProgram> {
        if !geometry.is_empty() {
            return Err(RenderError::UnsupportedFeature(Feature::GeometryShaders));
        }
        let program = DxProgram { vertex: self.stage("vertex", vertex)?, fragment: self.stage("fragment", fragment)? };
        let handle = ShaderProgram(self.programs.len() as u32);
        self.programs.push(program);
        log::debug!("Compiled DirectX program {:?}", handle);
        Ok(handle)
    }

    fn default_program(&self) -> ShaderProgram {
        self.stack.default_program()
    }

    fn active_program(&self) -> ShaderProgram {
        self.stack.active()
    }

    fn push_program(&mut self, program: ShaderProgram) {
        if self.program(program).is_none() {
            log::warn!("push_program with unknown program {:?}", program);
        }
        self.stack.push(program);
    }

    fn pop_program(&mut self) -> RenderResult<()> {
        self.stack.pop().map(|_| ())
    }

    fn set_uniform_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32]) {
        if !names::is_per_draw(name) {
            self.block.write_f32(name, &values[..uniform_len(element_size, count, values.len())]);
        }
    }

    fn set_uniform_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32]) {
        if !names::is_per_draw(name) {
            self.block.write_i32(name, &values[..uniform_len(element_size, count, values.len())]);
        }
    }

    fn set_uniform_u32(&mut self, name: &str, element_size: usize, count: usize, values: &[u32]) {
        if !names::is_per_draw(name) {
            self.block.write_u32(name, &values[..uniform_len(element_size, count, values.len())]);
        }
    }

    fn set_vertex_attribute_f32(&mut self, name: &str, _element_size: usize, _count: usize, _values: &[f32], _per_instance: bool) {
        self.ignore_attribute(name);
    }

    fn set_vertex_attribute_i32(&mut self, name: &str, _element_size: usize, _count: usize, _values: &[i32], _per_instance: bool) {
        self.ignore_attribute(name);
    }

    fn disable_vertex_attribute_f32(&mut self, name: &str, _element_size: usize, _default: &[f32]) {
        self.ignore_attribute(name);
    }

    fn disable_vertex_attribute_i32(&mut self, name: &str, _element_size: usize, _default: &[i32]) {
        self.ignore_attribute(name);
    }

    fn on_program_change(&mut self, callback: ProgramChangeCallback) {
        self.stack.set_callback(callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_source_declares_entry_points() {
        assert!(BUILTIN_SOURCE.contains(&format!("fn {VERTEX_ENTRY}(")));
        assert!(BUILTIN_SOURCE.contains(&format!("fn {FRAGMENT_ENTRY}(")));
    }
}
