//! GL program management

use std::collections::HashMap;
use std::rc::Rc;

use glow::HasContext;

use crate::render::shader::{uniform_len, LocationCache, ProgramChangeCallback, ProgramStack, ShaderManager, ShaderProgram};
use crate::render::{RenderError, RenderResult, TextureSlot};

/// Fixed attribute locations of the built-in streams
pub(crate) mod attributes {
    pub const POSITION: u32 = 0;
    pub const NORMAL: u32 = 1;
    pub const TEX_COORD: u32 = 2;
}

const ATTRIBUTE_NAMES: [(u32, &str); 3] =
    [(attributes::POSITION, "Position"), (attributes::NORMAL, "Normal"), (attributes::TEX_COORD, "TexCoord")];

/// Built-in program sources for one GL profile
pub(crate) struct BuiltinSources {
    pub vertex: &'static str,
    pub fragment: &'static str,
}

/// Shader manager over a GL context
pub struct GlShaderManager {
    gl: Rc<glow::Context>,
    builtin: BuiltinSources,
    programs: HashMap<ShaderProgram, glow::Program>,
    next_id: u32,
    stack: ProgramStack,
    uniforms: LocationCache<glow::UniformLocation>,
    attribute_locations: LocationCache<u32>,
    attribute_buffers: HashMap<String, glow::Buffer>,
    instancing: bool,
}

impl GlShaderManager {
    /// Compile the built-in program and make it active
    ///
    /// # Errors
    /// `ShaderCompilation` when the built-in program does not compile on this driver.
    pub(crate) fn new(gl: Rc<glow::Context>, builtin: BuiltinSources, instancing: bool) -> RenderResult<Self> {
        let mut manager = Self {
            gl,
            builtin,
            programs: HashMap::new(),
            next_id: 1,
            stack: ProgramStack::new(ShaderProgram(0)),
            uniforms: LocationCache::new(),
            attribute_locations: LocationCache::new(),
            attribute_buffers: HashMap::new(),
            instancing,
        };
        let native = manager.compile(manager.builtin.vertex, manager.builtin.fragment, "")?;
        manager.programs.insert(ShaderProgram(0), native);
        unsafe { manager.gl.use_program(Some(native)) };
        Ok(manager)
    }

    fn compile(&self, vertex: &str, fragment: &str, geometry: &str) -> RenderResult<glow::Program> {
        let gl = &self.gl;
        let vertex = if vertex.is_empty() { self.builtin.vertex } else { vertex };
        let fragment = if fragment.is_empty() { self.builtin.fragment } else { fragment };

        unsafe {
            let program = gl.create_program().map_err(RenderError::ResourceCreationFailed)?;
            let mut stages = Vec::new();
            let sources = [(glow::VERTEX_SHADER, vertex, "vertex"), (glow::FRAGMENT_SHADER, fragment, "fragment"), (glow::GEOMETRY_SHADER, geometry, "geometry")];
            for (kind, source, stage) in sources {
                if source.is_empty() {
                    continue;
                }
                let shader = gl.create_shader(kind).map_err(RenderError::ResourceCreationFailed)?;
                gl.shader_source(shader, source);
                gl.compile_shader(shader);
                if !gl.get_shader_compile_status(shader) {
                    let log = gl.get_shader_info_log(shader);
                    gl.delete_shader(shader);
                    for attached in stages {
                        gl.delete_shader(attached);
                    }
                    gl.delete_program(program);
                    return Err(RenderError::ShaderCompilation { stage: stage.to_string(), log });
                }
                gl.attach_shader(program, shader);
                stages.push(shader);
            }

            for (location, name) in ATTRIBUTE_NAMES {
                gl.bind_attrib_location(program, location, name);
            }
            gl.link_program(program);
            for shader in stages {
                gl.detach_shader(program, shader);
                gl.delete_shader(shader);
            }
            if !gl.get_program_link_status(program) {
                let log = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(RenderError::ShaderCompilation { stage: "link".to_string(), log });
            }

            // Sampler uniforms address fixed texture units, one per slot.
            gl.use_program(Some(program));
            for slot in TextureSlot::ALL {
                if let Some(location) = gl.get_uniform_location(program, slot.sampler_name()) {
                    gl.uniform_1_i32(Some(&location), slot.index() as i32);
                }
            }
            if let Some(active) = self.programs.get(&self.stack.active()) {
                gl.use_program(Some(*active));
            }
            Ok(program)
        }
    }

    fn activate(&self) {
        if let Some(program) = self.programs.get(&self.stack.active()) {
            unsafe { self.gl.use_program(Some(*program)) };
        }
    }

    fn uniform_location(&mut self, name: &str) -> Option<glow::UniformLocation> {
        let active = self.stack.active();
        let program = *self.programs.get(&active)?;
        let gl = &self.gl;
        self.uniforms.get_or_resolve(active, name, || unsafe { gl.get_uniform_location(program, name) })
    }

    fn attribute_location(&mut self, name: &str) -> Option<u32> {
        let active = self.stack.active();
        let program = *self.programs.get(&active)?;
        let gl = &self.gl;
        self.attribute_locations.get_or_resolve(active, name, || unsafe { gl.get_attrib_location(program, name) })
    }

    fn stream_attribute(&mut self, name: &str, location: u32, bytes: &[u8]) -> RenderResult<()> {
        let buffer = match self.attribute_buffers.get(name) {
            Some(buffer) => *buffer,
            None => {
                let buffer = unsafe { self.gl.create_buffer() }.map_err(RenderError::ResourceCreationFailed)?;
                self.attribute_buffers.insert(name.to_string(), buffer);
                buffer
            }
        };
        unsafe {
            self.gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            self.gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytes, glow::STREAM_DRAW);
            self.gl.enable_vertex_attrib_array(location);
        }
        Ok(())
    }
}

impl ShaderManager for GlShaderManager {
    fn new_program(&mut self, vertex_path: &str, fragment_path: &str, geometry_path: &str) -> RenderResult<ShaderProgram> {
        let read = |path: &str| -> RenderResult<String> {
            if path.is_empty() {
                return Ok(String::new());
            }
            std::fs::read_to_string(path)
                .map_err(|e| RenderError::ResourceCreationFailed(format!("Failed to read shader {path}: {e}")))
        };
        let vertex = read(vertex_path)?;
        let fragment = read(fragment_path)?;
        let geometry = read(geometry_path)?;
        self.new_program_source(&vertex, &fragment, &geometry)
    }

    fn new_program_source(&mut self, vertex: &str, fragment: &str, geometry: &str) -> RenderResult<ShaderProgram> {
        let native = self.compile(vertex, fragment, geometry)?;
        let program = ShaderProgram(self.next_id);
        self.next_id += 1;
        self.programs.insert(program, native);
        log::debug!("Compiled GL program {:?}", program);
        Ok(program)
    }

    fn default_program(&self) -> ShaderProgram {
        self.stack.default_program()
    }

    fn active_program(&self) -> ShaderProgram {
        self.stack.active()
    }

    fn push_program(&mut self, program: ShaderProgram) {
        if !self.programs.contains_key(&program) {
            log::warn!("push_program with unknown program {:?}", program);
        }
        if self.stack.push(program).is_some() {
            self.activate();
        }
    }

    fn pop_program(&mut self) -> RenderResult<()> {
        if self.stack.pop()?.is_some() {
            self.activate();
        }
        Ok(())
    }

    fn set_uniform_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32]) {
        let Some(location) = self.uniform_location(name) else { return };
        let values = &values[..uniform_len(element_size, count, values.len())];
        let location = Some(&location);
        unsafe {
            match element_size {
                1 => self.gl.uniform_1_f32_slice(location, values),
                2 => self.gl.uniform_2_f32_slice(location, values),
                3 => self.gl.uniform_3_f32_slice(location, values),
                4 => self.gl.uniform_4_f32_slice(location, values),
                9 => self.gl.uniform_matrix_3_f32_slice(location, false, values),
                16 => self.gl.uniform_matrix_4_f32_slice(location, false, values),
                other => log::warn!("Uniform '{}' has unsupported element size {}", name, other),
            }
        }
    }

    fn set_uniform_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32]) {
        let Some(location) = self.uniform_location(name) else { return };
        let values = &values[..uniform_len(element_size, count, values.len())];
        let location = Some(&location);
        unsafe {
            match element_size {
                1 => self.gl.uniform_1_i32_slice(location, values),
                2 => self.gl.uniform_2_i32_slice(location, values),
                3 => self.gl.uniform_3_i32_slice(location, values),
                4 => self.gl.uniform_4_i32_slice(location, values),
                other => log::warn!("Uniform '{}' has unsupported element size {}", name, other),
            }
        }
    }

    fn set_uniform_u32(&mut self, name: &str, element_size: usize, count: usize, values: &[u32]) {
        if !self.instancing {
            // GLSL 1.20 has no unsigned uniforms
            let signed: Vec<i32> = values.iter().map(|&v| v as i32).collect();
            self.set_uniform_i32(name, element_size, count, &signed);
            return;
        }
        let Some(location) = self.uniform_location(name) else { return };
        let values = &values[..uniform_len(element_size, count, values.len())];
        let location = Some(&location);
        unsafe {
            match element_size {
                1 => self.gl.uniform_1_u32_slice(location, values),
                2 => self.gl.uniform_2_u32_slice(location, values),
                3 => self.gl.uniform_3_u32_slice(location, values),
                4 => self.gl.uniform_4_u32_slice(location, values),
                other => log::warn!("Uniform '{}' has unsupported element size {}", name, other),
            }
        }
    }

    fn set_vertex_attribute_f32(&mut self, name: &str, element_size: usize, count: usize, values: &[f32], per_instance: bool) {
        let Some(location) = self.attribute_location(name) else { return };
        let values = &values[..uniform_len(element_size, count, values.len())];
        if let Err(err) = self.stream_attribute(name, location, bytemuck::cast_slice(values)) {
            log::warn!("Failed to stream attribute '{}': {}", name, err);
            return;
        }
        unsafe {
            self.gl.vertex_attrib_pointer_f32(location, element_size as i32, glow::FLOAT, false, 0, 0);
            if self.instancing {
                self.gl.vertex_attrib_divisor(location, u32::from(per_instance));
            }
        }
    }

    fn set_vertex_attribute_i32(&mut self, name: &str, element_size: usize, count: usize, values: &[i32], per_instance: bool) {
        if !self.instancing {
            let floats: Vec<f32> = values.iter().map(|&v| v as f32).collect();
            self.set_vertex_attribute_f32(name, element_size, count, &floats, per_instance);
            return;
        }
        let Some(location) = self.attribute_location(name) else { return };
        let values = &values[..uniform_len(element_size, count, values.len())];
        if let Err(err) = self.stream_attribute(name, location, bytemuck::cast_slice(values)) {
            log::warn!("Failed to stream attribute '{}': {}", name, err);
            return;
        }
        unsafe {
            self.gl.vertex_attrib_pointer_i32(location, element_size as i32, glow::INT, 0, 0);
            self.gl.vertex_attrib_divisor(location, u32::from(per_instance));
        }
    }

    fn disable_vertex_attribute_f32(&mut self, name: &str, element_size: usize, default: &[f32]) {
        let Some(location) = self.attribute_location(name) else { return };
        let mut value = [0.0, 0.0, 0.0, 1.0];
        let len = element_size.min(4).min(default.len());
        value[..len].copy_from_slice(&default[..len]);
        unsafe {
            self.gl.disable_vertex_attrib_array(location);
            self.gl.vertex_attrib_4_f32(location, value[0], value[1], value[2], value[3]);
        }
    }

    fn disable_vertex_attribute_i32(&mut self, name: &str, element_size: usize, default: &[i32]) {
        let floats: Vec<f32> = default.iter().map(|&v| v as f32).collect();
        self.disable_vertex_attribute_f32(name, element_size, &floats);
    }

    fn on_program_change(&mut self, callback: ProgramChangeCallback) {
        self.stack.set_callback(callback);
    }
}

impl Drop for GlShaderManager {
    fn drop(&mut self) {
        unsafe {
            for (_, program) in self.programs.drain() {
                self.gl.delete_program(program);
            }
            for (_, buffer) in self.attribute_buffers.drain() {
                self.gl.delete_buffer(buffer);
            }
        }
    }
}
