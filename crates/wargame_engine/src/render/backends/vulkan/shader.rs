//! SPIR-V programs and the Vulkan shader manager
//!
//! Programs are sets of SPIR-V modules sharing the backend's single pipeline layout. Named
//! uniforms land in the scene [`UniformBlock`], except for the per-draw values (matrices,
//! color, draw flags) which travel as push constants.

use std::collections::HashSet;
use std::ffi::CStr;
use std::io::Cursor;
use std::rc::Rc;

use ash::vk;

use super::context::VulkanDevice;
use crate::core::config::ShaderConfig;
use crate::render::shader::{names, uniform_len, ProgramChangeCallback, ProgramStack, ShaderManager, ShaderProgram, UniformBlock};
use crate::render::{Feature, RenderError, RenderResult};

const ENTRY_POINT: &CStr = c"main";

/// Shader module wrapper with RAII cleanup
struct ShaderModule {
    device: Rc<VulkanDevice>,
    stage: vk::ShaderStageFlags,
    module: vk::ShaderModule,
}

impl ShaderModule {
    /// Create a module from SPIR-V bytecode
    fn from_bytes(device: &Rc<VulkanDevice>, stage: vk::ShaderStageFlags, bytes: &[u8]) -> RenderResult<Self> {
        let code = ash::util::read_spv(&mut Cursor::new(bytes))
            .map_err(|e| RenderError::ShaderCompilation { stage: stage_name(stage).to_string(), log: e.to_string() })?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }.map_err(|e| {
            RenderError::ShaderCompilation { stage: stage_name(stage).to_string(), log: format!("{e:?}") }
        })?;
        Ok(Self { device: Rc::clone(device), stage, module })
    }

    /// Load a module from a SPIR-V file
    fn from_file(device: &Rc<VulkanDevice>, stage: vk::ShaderStageFlags, path: &str) -> RenderResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| RenderError::ResourceCreationFailed(format!("Failed to read shader file {path}: {e}")))?;
        Self::from_bytes(device, stage, &bytes)
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_shader_module(self.module, None) };
    }
}

const fn stage_name(stage: vk::ShaderStageFlags) -> &'static str {
    if stage.as_raw() == vk::ShaderStageFlags::VERTEX.as_raw() {
        "vertex"
    } else if stage.as_raw() == vk::ShaderStageFlags::FRAGMENT.as_raw() {
        "fragment"
    } else {
        "geometry"
    }
}

/// Linked set of shader stages
pub(crate) struct VulkanProgram {
    modules: Vec<ShaderModule>,
}

impl VulkanProgram {
    /// Stage descriptions for pipeline creation
    pub(crate) fn stage_infos(&self) -> Vec<vk::PipelineShaderStageCreateInfo> {
        self.modules
            .iter()
            .map(|m| vk::PipelineShaderStageCreateInfo::builder().stage(m.stage).module(m.module).name(ENTRY_POINT).build())
            .collect()
    }
}

/// Shader manager of the Vulkan backend
pub struct VulkanShaderManager {
    device: Rc<VulkanDevice>,
    builtin: ShaderConfig,
    programs: Vec<VulkanProgram>,
    stack: ProgramStack,
    block: UniformBlock,
    ignored_attributes: HashSet<String>,
}

impl VulkanShaderManager {
    /// Load the built-in program from the configured SPIR-V files
    ///
    /// # Errors
    /// As [`ShaderManager::new_program`].
    pub(crate) fn new(device: &Rc<VulkanDevice>, builtin: &ShaderConfig) -> RenderResult<Self> {
        let mut manager = Self {
            device: Rc::clone(device),
            builtin: builtin.clone(),
            programs: Vec::new(),
            stack: ProgramStack::new(ShaderProgram(0)),
            block: UniformBlock::new(),
            ignored_attributes: HashSet::new(),
        };
        manager.new_program("", "", "")?;
        Ok(manager)
    }

    pub(crate) fn program(&self, program: ShaderProgram) -> Option<&VulkanProgram> {
        self.programs.get(program.0 as usize)
    }

    /// Scene uniform block shared by all programs
    pub(crate) fn block_mut(&mut self) -> &mut UniformBlock {
        &mut self.block
    }

    fn ignore_attribute(&mut self, name: &str) {
        if self.ignored_attributes.insert(name.to_string()) {
            log::warn!("Vulkan programs take no named vertex attributes; ignoring '{}'", name);
        }
    }
}

impl ShaderManager for VulkanShaderManager {
    fn new_program(&mut self, vertex_path: &str, fragment_path: &str, geometry_path: &str) -> RenderResult<ShaderProgram> {
        let vertex = if vertex_path.is_empty() { self.builtin.vertex_shader_path.as_str() } else { vertex_path };
        let fragment = if fragment_path.is_empty() { self.builtin.fragment_shader_path.as_str() } else { fragment_path };

        let mut modules = vec![
            ShaderModule::from_file(&self.device, vk::ShaderStageFlags::VERTEX, vertex)?,
            ShaderModule::from_file(&self.device, vk::ShaderStageFlags::FRAGMENT, fragment)?,
        ];
        if !geometry_path.is_empty() {
            if !self.device.features.geometry_shader {
                return Err(RenderError::UnsupportedFeature(Feature::GeometryShaders));
            }
            modules.push(ShaderModule::from_file(&self.device, vk::ShaderStageFlags::GEOMETRY, geometry_path)?);
        }

        let program = ShaderProgram(self.programs.len() as u32);
        self.programs.push(VulkanProgram { modules });
        log::debug!("Loaded Vulkan program {:?} ({}, {})", program, vertex, fragment);
        Ok(program)
    }

    fn new_program_source(&mut self, _vertex: &str, _fragment: &str, _geometry: &str) -> RenderResult<ShaderProgram> {
        Err(RenderError::ShaderCompilation {
            stage: "link".to_string(),
            log: "the Vulkan renderer loads precompiled SPIR-V only".to_string(),
        })
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
    fn test_per_draw_values_bypass_the_block() {
        assert!(names::is_per_draw(names::MODEL_VIEW_MATRIX));
        assert!(names::is_per_draw(names::COLOR));
        assert!(!names::is_per_draw(names::PROJECTION_MATRIX));
        assert!(!names::is_per_draw(&names::light(0, "pos")));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(stage_name(vk::ShaderStageFlags::VERTEX), "vertex");
        assert_eq!(stage_name(vk::ShaderStageFlags::FRAGMENT), "fragment");
        assert_eq!(stage_name(vk::ShaderStageFlags::GEOMETRY), "geometry");
    }
}
