//! GL vertex and index buffers

use std::rc::Rc;

use glow::HasContext;

use super::shader::attributes;
use crate::render::handle::Scoped;
use crate::render::vertex::PackedVertices;
use crate::render::{RenderError, RenderResult};

const FLOAT_SIZE: i32 = std::mem::size_of::<f32>() as i32;

/// Where each stream starts inside a packed buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PackedLayout {
    pub normals_offset: Option<usize>,
    pub tex_coords_offset: Option<usize>,
}

impl PackedLayout {
    pub(crate) const fn of(packed: &PackedVertices) -> Self {
        Self {
            normals_offset: packed.normals_offset,
            tex_coords_offset: packed.tex_coords_offset,
        }
    }
}

fn create_buffer(gl: &Rc<glow::Context>) -> RenderResult<Scoped<glow::Buffer>> {
    let buffer = unsafe { gl.create_buffer() }.map_err(RenderError::ResourceCreationFailed)?;
    let owner = Rc::clone(gl);
    Ok(Scoped::new(buffer, move |b| unsafe { owner.delete_buffer(b) }))
}

/// Persistent vertex buffer in the packed layout
///
/// With `vertex_array` the attribute setup is captured once in its own vertex array object;
/// the caller rebinds its main vertex array afterwards.
pub(crate) struct GlVertexBuffer {
    buffer: Scoped<glow::Buffer>,
    vertex_array: Option<Scoped<glow::VertexArray>>,
    layout: PackedLayout,
}

impl GlVertexBuffer {
    pub(crate) fn new(gl: &Rc<glow::Context>, packed: &PackedVertices, vertex_array: bool) -> RenderResult<Self> {
        let buffer = create_buffer(gl)?;
        let layout = PackedLayout::of(packed);
        let vertex_array = if vertex_array {
            let vao = unsafe { gl.create_vertex_array() }.map_err(RenderError::ResourceCreationFailed)?;
            let owner = Rc::clone(gl);
            Some(Scoped::new(vao, move |v| unsafe { owner.delete_vertex_array(v) }))
        } else {
            None
        };
        unsafe {
            if let Some(vao) = &vertex_array {
                gl.bind_vertex_array(Some(vao.raw()));
            }
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer.raw()));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&packed.data), glow::STATIC_DRAW);
        }
        if vertex_array.is_some() {
            point_attributes(gl, layout);
        }
        Ok(Self { buffer, vertex_array, layout })
    }

    /// Bind and point the built-in attributes at this buffer
    pub(crate) fn bind(&self, gl: &glow::Context) {
        match &self.vertex_array {
            Some(vao) => unsafe { gl.bind_vertex_array(Some(vao.raw())) },
            None => {
                unsafe { gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.buffer.raw())) };
                point_attributes(gl, self.layout);
            }
        }
    }
}

/// Persistent index buffer
pub(crate) struct GlIndexBuffer {
    buffer: Scoped<glow::Buffer>,
}

impl GlIndexBuffer {
    pub(crate) fn new(gl: &Rc<glow::Context>, indexes: &[u32]) -> RenderResult<Self> {
        let buffer = create_buffer(gl)?;
        unsafe {
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer.raw()));
            gl.buffer_data_u8_slice(glow::ELEMENT_ARRAY_BUFFER, bytemuck::cast_slice(indexes), glow::STATIC_DRAW);
        }
        Ok(Self { buffer })
    }

    pub(crate) fn bind(&self, gl: &glow::Context) {
        unsafe { gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.buffer.raw())) };
    }
}

/// Reused buffers for client-side arrays drawn once
pub(crate) struct StreamBuffers {
    vertices: Scoped<glow::Buffer>,
    indexes: Scoped<glow::Buffer>,
}

impl StreamBuffers {
    pub(crate) fn new(gl: &Rc<glow::Context>) -> RenderResult<Self> {
        Ok(Self { vertices: create_buffer(gl)?, indexes: create_buffer(gl)? })
    }

    /// Orphan and refill the vertex stream, then point the attributes at it
    pub(crate) fn stream_vertices(&self, gl: &glow::Context, packed: &PackedVertices) {
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(self.vertices.raw()));
            gl.buffer_data_u8_slice(glow::ARRAY_BUFFER, bytemuck::cast_slice(&packed.data), glow::STREAM_DRAW);
        }
        point_attributes(gl, PackedLayout::of(packed));
    }

    pub(crate) fn stream_indexes(&self, gl: &glow::Context, indexes: &[u32]) {
        unsafe {
            gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(self.indexes.raw()));
            gl.buffer_data_u8_slice(glow::ELEMENT_ARRAY_BUFFER, bytemuck::cast_slice(indexes), glow::STREAM_DRAW);
        }
    }
}

/// Point the fixed attribute locations at the bound array buffer
///
/// Missing normals default to +Z, missing texture coordinates to the origin.
fn point_attributes(gl: &glow::Context, layout: PackedLayout) {
    unsafe {
        gl.enable_vertex_attrib_array(attributes::POSITION);
        gl.vertex_attrib_pointer_f32(attributes::POSITION, 3, glow::FLOAT, false, 0, 0);

        match layout.normals_offset {
            Some(offset) => {
                gl.enable_vertex_attrib_array(attributes::NORMAL);
                gl.vertex_attrib_pointer_f32(attributes::NORMAL, 3, glow::FLOAT, false, 0, offset as i32 * FLOAT_SIZE);
            }
            None => {
                gl.disable_vertex_attrib_array(attributes::NORMAL);
                gl.vertex_attrib_3_f32(attributes::NORMAL, 0.0, 0.0, 1.0);
            }
        }

        match layout.tex_coords_offset {
            Some(offset) => {
                gl.enable_vertex_attrib_array(attributes::TEX_COORD);
                gl.vertex_attrib_pointer_f32(attributes::TEX_COORD, 2, glow::FLOAT, false, 0, offset as i32 * FLOAT_SIZE);
            }
            None => {
                gl.disable_vertex_attrib_array(attributes::TEX_COORD);
                gl.vertex_attrib_2_f32(attributes::TEX_COORD, 0.0, 0.0);
            }
        }
    }
}
