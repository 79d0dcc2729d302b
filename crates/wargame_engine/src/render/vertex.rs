//! Vertex data and vertex buffers
//!
//! [`VertexArrays`] describes caller geometry (separate or interleaved arrays) without copying it.
//! A [`VertexBuffer`] either borrows such arrays for the lifetime `'a` (temporary buffers,
//! streamed at draw time) or owns a GPU copy (`VertexBuffer<'static>`, persistent buffers).

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use crate::foundation::math::{Vec2, Vec3};
use crate::render::{RenderError, RenderResult};

/// One vertex attribute inside a float array
#[derive(Debug, Clone, Copy)]
pub struct AttributeStream<'a> {
    /// Backing array
    pub data: &'a [f32],
    /// Components per vertex
    pub components: usize,
    /// Distance between consecutive vertices, in floats
    pub stride: usize,
    /// Offset of the first vertex, in floats
    pub offset: usize,
}

impl<'a> AttributeStream<'a> {
    /// Tightly packed stream
    #[must_use]
    pub const fn packed(data: &'a [f32], components: usize) -> Self {
        Self { data, components, stride: components, offset: 0 }
    }

    /// Components of vertex `index`
    #[must_use]
    pub fn element(&self, index: usize) -> &'a [f32] {
        let start = self.offset + index * self.stride;
        &self.data[start..start + self.components]
    }

    fn fits(&self, count: usize) -> bool {
        count == 0 || self.offset + (count - 1) * self.stride + self.components <= self.data.len()
    }

    fn gather_into(&self, count: usize, out: &mut Vec<f32>) {
        if self.stride == self.components {
            out.extend_from_slice(&self.data[self.offset..self.offset + count * self.components]);
        } else {
            for i in 0..count {
                out.extend_from_slice(self.element(i));
            }
        }
    }
}

/// Positions with optional normals and texture coordinates
#[derive(Debug, Clone, Copy)]
pub struct VertexArrays<'a> {
    positions: AttributeStream<'a>,
    normals: Option<AttributeStream<'a>>,
    tex_coords: Option<AttributeStream<'a>>,
    vertex_count: usize,
}

impl<'a> VertexArrays<'a> {
    /// Separate arrays: xyz positions, xyz normals and uv coordinates; empty arrays are absent
    ///
    /// # Errors
    /// `InvalidOperation` when positions are empty or the array lengths disagree.
    pub fn separate(positions: &'a [f32], normals: &'a [f32], tex_coords: &'a [f32]) -> RenderResult<Self> {
        if positions.is_empty() || positions.len() % 3 != 0 {
            return Err(RenderError::InvalidOperation(format!(
                "vertex positions need a non-empty multiple of 3 floats, got {}",
                positions.len()
            )));
        }
        let vertex_count = positions.len() / 3;
        let normals = optional_stream(normals, 3, vertex_count, "normals")?;
        let tex_coords = optional_stream(tex_coords, 2, vertex_count, "texture coordinates")?;

        Ok(Self { positions: AttributeStream::packed(positions, 3), normals, tex_coords, vertex_count })
    }

    /// One interleaved array `[x y z (nx ny nz) (u v)]*`
    ///
    /// # Errors
    /// `InvalidOperation` when the array is empty or not a whole number of vertices.
    pub fn interleaved(data: &'a [f32], has_normals: bool, has_tex_coords: bool) -> RenderResult<Self> {
        let stride = 3 + if has_normals { 3 } else { 0 } + if has_tex_coords { 2 } else { 0 };
        if data.is_empty() || data.len() % stride != 0 {
            return Err(RenderError::InvalidOperation(format!(
                "interleaved vertex data of {} floats is not a multiple of the {stride}-float stride",
                data.len()
            )));
        }
        let normals = has_normals.then_some(AttributeStream { data, components: 3, stride, offset: 3 });
        let uv_offset = if has_normals { 6 } else { 3 };
        let tex_coords = has_tex_coords.then_some(AttributeStream { data, components: 2, stride, offset: uv_offset });

        Ok(Self {
            positions: AttributeStream { data, components: 3, stride, offset: 0 },
            normals,
            tex_coords,
            vertex_count: data.len() / stride,
        })
    }

    /// Arrays of vectors, as mesh providers deliver them
    ///
    /// # Errors
    /// As [`separate`](Self::separate).
    pub fn from_vectors(vertices: &'a [Vec3], normals: &'a [Vec3], tex_coords: &'a [Vec2]) -> RenderResult<Self> {
        Self::separate(bytemuck::cast_slice(vertices), bytemuck::cast_slice(normals), bytemuck::cast_slice(tex_coords))
    }

    /// Number of vertices
    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Position stream
    #[must_use]
    pub const fn positions(&self) -> &AttributeStream<'a> {
        &self.positions
    }

    /// Normal stream, if present
    #[must_use]
    pub const fn normals(&self) -> Option<&AttributeStream<'a>> {
        self.normals.as_ref()
    }

    /// Texture coordinate stream, if present
    #[must_use]
    pub const fn tex_coords(&self) -> Option<&AttributeStream<'a>> {
        self.tex_coords.as_ref()
    }

    /// Position of vertex `index`
    #[must_use]
    pub fn position(&self, index: usize) -> Vec3 {
        Vec3::from_column_slice(self.positions.element(index))
    }

    /// Copy into the canonical packed layout backends upload
    #[must_use]
    pub fn pack(&self) -> PackedVertices {
        let n = self.vertex_count;
        let mut data = Vec::with_capacity(n * 8);
        self.positions.gather_into(n, &mut data);
        let normals_offset = self.normals.map(|stream| {
            let offset = data.len();
            stream.gather_into(n, &mut data);
            offset
        });
        let tex_coords_offset = self.tex_coords.map(|stream| {
            let offset = data.len();
            stream.gather_into(n, &mut data);
            offset
        });
        PackedVertices { data, vertex_count: n, normals_offset, tex_coords_offset }
    }
}

fn optional_stream<'a>(
    data: &'a [f32],
    components: usize,
    vertex_count: usize,
    what: &str,
) -> RenderResult<Option<AttributeStream<'a>>> {
    if data.is_empty() {
        return Ok(None);
    }
    let stream = AttributeStream::packed(data, components);
    if data.len() != vertex_count * components || !stream.fits(vertex_count) {
        return Err(RenderError::InvalidOperation(format!(
            "{what} hold {} floats, expected {} for {vertex_count} vertices",
            data.len(),
            vertex_count * components
        )));
    }
    Ok(Some(stream))
}

/// Vertex data in the canonical upload layout: all positions, then normals, then uvs
#[derive(Debug, Clone, PartialEq)]
pub struct PackedVertices {
    /// Packed floats
    pub data: Vec<f32>,
    /// Number of vertices
    pub vertex_count: usize,
    /// Float offset of the normals, if present
    pub normals_offset: Option<usize>,
    /// Float offset of the texture coordinates, if present
    pub tex_coords_offset: Option<usize>,
}

impl PackedVertices {
    /// Positions, three floats per vertex
    #[must_use]
    pub fn positions(&self) -> &[f32] {
        &self.data[..self.vertex_count * 3]
    }

    /// Normals, three floats per vertex
    #[must_use]
    pub fn normals(&self) -> Option<&[f32]> {
        self.normals_offset.map(|o| &self.data[o..o + self.vertex_count * 3])
    }

    /// Texture coordinates, two floats per vertex
    #[must_use]
    pub fn tex_coords(&self) -> Option<&[f32]> {
        self.tex_coords_offset.map(|o| &self.data[o..o + self.vertex_count * 2])
    }

    /// Byte offsets of the streams when the data is uploaded at byte `base`
    #[must_use]
    pub fn byte_offsets(&self, base: u64) -> StreamOffsets {
        let bytes = |offset: usize| base + (offset * std::mem::size_of::<f32>()) as u64;
        StreamOffsets { positions: base, normals: self.normals_offset.map(bytes), tex_coords: self.tex_coords_offset.map(bytes) }
    }

    /// Borrow as vertex arrays
    #[must_use]
    pub fn arrays(&self) -> VertexArrays<'_> {
        VertexArrays {
            positions: AttributeStream::packed(self.positions(), 3),
            normals: self.normals().map(|n| AttributeStream::packed(n, 3)),
            tex_coords: self.tex_coords().map(|t| AttributeStream::packed(t, 2)),
            vertex_count: self.vertex_count,
        }
    }
}

/// Byte offsets of the streams of an uploaded [`PackedVertices`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOffsets {
    /// Offset of the positions
    pub positions: u64,
    /// Offset of the normals, if present
    pub normals: Option<u64>,
    /// Offset of the texture coordinates, if present
    pub tex_coords: Option<u64>,
}

/// Triangle indexes covering `vertex_count` vertices drawn as quads
#[must_use]
pub fn quad_indexes(vertex_count: usize) -> Vec<u32> {
    (0..vertex_count / 4)
        .flat_map(|quad| {
            let i = (quad * 4) as u32;
            [i, i + 1, i + 2, i, i + 2, i + 3]
        })
        .collect()
}

/// Where a buffer's vertices live
#[derive(Clone)]
pub enum VertexSource<'a> {
    /// Caller arrays streamed at draw time
    Borrowed(VertexArrays<'a>),
    /// Backend-owned GPU copy
    Resident(Rc<dyn Any>),
}

/// Backend index buffer
#[derive(Clone)]
pub struct IndexBuffer {
    count: usize,
    native: Rc<dyn Any>,
}

impl IndexBuffer {
    /// Wrap a backend native holding `count` indexes
    #[must_use]
    pub fn new(count: usize, native: Rc<dyn Any>) -> Self {
        Self { count, native }
    }

    /// Number of indexes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.count
    }

    /// Whether the buffer holds no indexes
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Backend native
    #[must_use]
    pub fn native(&self) -> &Rc<dyn Any> {
        &self.native
    }
}

/// Geometry ready to draw, with an optional index buffer
#[derive(Clone)]
pub struct VertexBuffer<'a> {
    source: VertexSource<'a>,
    vertex_count: usize,
    has_normals: bool,
    has_tex_coords: bool,
    indexes: Option<IndexBuffer>,
}

impl<'a> VertexBuffer<'a> {
    /// Temporary buffer over caller arrays
    #[must_use]
    pub fn borrowed(arrays: VertexArrays<'a>) -> Self {
        Self {
            vertex_count: arrays.vertex_count(),
            has_normals: arrays.normals().is_some(),
            has_tex_coords: arrays.tex_coords().is_some(),
            source: VertexSource::Borrowed(arrays),
            indexes: None,
        }
    }

    /// Number of vertices
    #[must_use]
    pub const fn vertex_count(&self) -> usize {
        self.vertex_count
    }

    /// Number of indexes, 0 without an index buffer
    #[must_use]
    pub fn index_count(&self) -> usize {
        self.indexes.as_ref().map_or(0, IndexBuffer::len)
    }

    /// Whether normals are present
    #[must_use]
    pub const fn has_normals(&self) -> bool {
        self.has_normals
    }

    /// Whether texture coordinates are present
    #[must_use]
    pub const fn has_tex_coords(&self) -> bool {
        self.has_tex_coords
    }

    /// Vertex source
    #[must_use]
    pub const fn source(&self) -> &VertexSource<'a> {
        &self.source
    }

    /// Caller arrays of a temporary buffer
    #[must_use]
    pub const fn arrays(&self) -> Option<&VertexArrays<'a>> {
        match &self.source {
            VertexSource::Borrowed(arrays) => Some(arrays),
            VertexSource::Resident(_) => None,
        }
    }

    /// Whether the vertices live in a backend-owned copy
    #[must_use]
    pub const fn is_resident(&self) -> bool {
        matches!(self.source, VertexSource::Resident(_))
    }

    /// Index buffer, if one was set
    #[must_use]
    pub const fn indexes(&self) -> Option<&IndexBuffer> {
        self.indexes.as_ref()
    }

    /// Attach an index buffer
    pub fn set_indexes(&mut self, indexes: IndexBuffer) {
        self.indexes = Some(indexes);
    }

    /// Check that `begin..begin + count` addresses existing indexes
    ///
    /// # Errors
    /// `IndexOutOfRange` otherwise; a buffer without indexes has length 0.
    pub fn check_index_range(&self, begin: usize, count: usize) -> RenderResult<()> {
        let len = self.index_count();
        match begin.checked_add(count) {
            Some(end) if end <= len => Ok(()),
            _ => Err(RenderError::IndexOutOfRange { begin, count, len }),
        }
    }

    /// Cheap handle to a persistent buffer; `None` for temporary buffers
    #[must_use]
    pub fn share(&self) -> Option<VertexBuffer<'static>> {
        match &self.source {
            VertexSource::Resident(native) => Some(VertexBuffer {
                source: VertexSource::Resident(Rc::clone(native)),
                vertex_count: self.vertex_count,
                has_normals: self.has_normals,
                has_tex_coords: self.has_tex_coords,
                indexes: self.indexes.clone(),
            }),
            VertexSource::Borrowed(_) => None,
        }
    }
}

impl VertexBuffer<'static> {
    /// Persistent buffer over a backend-owned copy
    #[must_use]
    pub fn resident(native: Rc<dyn Any>, vertex_count: usize, has_normals: bool, has_tex_coords: bool) -> Self {
        Self { source: VertexSource::Resident(native), vertex_count, has_normals, has_tex_coords, indexes: None }
    }
}

impl fmt::Debug for VertexBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VertexBuffer")
            .field("resident", &self.is_resident())
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_offsets_are_in_bytes() {
        let packed = PackedVertices { data: vec![0.0; 16], vertex_count: 2, normals_offset: Some(6), tex_coords_offset: Some(12) };
        let offsets = packed.byte_offsets(256);
        assert_eq!(offsets, StreamOffsets { positions: 256, normals: Some(280), tex_coords: Some(304) });
    }

    #[test]
    fn test_interleaved_matches_separate() {
        let interleaved = [
            0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, //
            1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0,
        ];
        let positions = [0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
        let normals = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0];
        let uvs = [0.0, 0.0, 1.0, 0.0, 0.0, 1.0];

        let a = VertexArrays::interleaved(&interleaved, true, true).unwrap();
        let b = VertexArrays::separate(&positions, &normals, &uvs).unwrap();
        assert_eq!(a.vertex_count(), 3);
        assert_eq!(a.pack(), b.pack());
    }

    #[test]
    fn test_mismatched_arrays_are_rejected() {
        let positions = [0.0; 9];
        assert!(VertexArrays::separate(&positions, &[0.0; 6], &[]).is_err());
        assert!(VertexArrays::separate(&[], &[], &[]).is_err());
        assert!(VertexArrays::interleaved(&[0.0; 7], false, false).is_err());
    }

    #[test]
    fn test_borrowed_buffer_references_caller_memory() {
        let positions = vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let arrays = VertexArrays::separate(&positions, &[], &[]).unwrap();
        let buffer = VertexBuffer::borrowed(arrays);
        let streamed = buffer.arrays().unwrap().positions().data;
        assert_eq!(streamed.as_ptr(), positions.as_ptr());
        assert!(buffer.share().is_none());
    }

    #[test]
    fn test_index_range_check() {
        let mut buffer = VertexBuffer::resident(Rc::new(()), 3, false, false);
        buffer.set_indexes(IndexBuffer::new(450, Rc::new(())));
        assert!(buffer.check_index_range(0, 450).is_ok());
        assert!(buffer.check_index_range(300, 150).is_ok());
        assert!(matches!(
            buffer.check_index_range(300, 151),
            Err(RenderError::IndexOutOfRange { begin: 300, count: 151, len: 450 })
        ));
        assert!(buffer.check_index_range(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_quad_indexes() {
        assert_eq!(quad_indexes(8), vec![0, 1, 2, 0, 2, 3, 4, 5, 6, 4, 6, 7]);
    }
}
